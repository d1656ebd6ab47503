//! Sluice Lint
//!
//! Validates pipeline documents before they run. [`Linter::lint`] never
//! stops at the first problem: it records a named check for everything it
//! inspects and reports them all in a [`LintResult`], grouped into general
//! checks and per-stage reports. A document is runnable only when every
//! check passes.
//!
//! [`LintDebouncer`] re-lints an edited document once edits stop arriving
//! for a quiescence window.

mod debounce;
mod linter;
mod result;

pub use debounce::LintDebouncer;
pub use linter::Linter;
pub use result::{LintFailure, LintIssue, LintResult, LintSummary, StageErrors, StageReport};

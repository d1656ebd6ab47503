//! Sluice Template
//!
//! Run-time variable substitution for pipeline documents. A document may
//! reference `{{ namespace.field }}` tokens; at trigger time they are
//! resolved against [`RunVariableBindings`]: built-ins first (`app`,
//! `storage`, `date`), then trigger parameters, then pipeline options, then
//! declared variable defaults.
//!
//! Substitution is textual and pure. Values are escaped as JSON string
//! content, so a bound value can never break out of the string literal it is
//! placed in.

mod bindings;
mod error;
mod render;

pub use bindings::{AppIdentity, RunVariableBindings, StorageSettings, expand_params};
pub use error::TemplateError;
pub use render::{missing_variables, referenced_variables, substitute};

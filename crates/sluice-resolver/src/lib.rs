mod error;
mod resolver;

pub use error::WiringError;
pub use resolver::WiringResolver;

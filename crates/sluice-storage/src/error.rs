use std::io::ErrorKind;

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
  /// The requested object was not found.
  #[error("object not found: {location}")]
  NotFound { location: String },

  /// The location is not a `scheme://bucket/object` URL.
  #[error("invalid location '{location}': {message}")]
  InvalidLocation { location: String, message: String },

  /// A single compose call was given more sources than the backend accepts.
  #[error("cannot compose {count} objects in one call (limit {limit})")]
  TooManySources { count: usize, limit: usize },

  /// An I/O error occurred.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

impl StorageError {
  /// Whether retrying the same operation may succeed.
  pub fn is_transient(&self) -> bool {
    match self {
      StorageError::Io(e) => matches!(
        e.kind(),
        ErrorKind::Interrupted
          | ErrorKind::TimedOut
          | ErrorKind::WouldBlock
          | ErrorKind::ConnectionReset
          | ErrorKind::ConnectionAborted
      ),
      _ => false,
    }
  }

  pub(crate) fn not_found(location: &str) -> Self {
    Self::NotFound {
      location: location.to_string(),
    }
  }
}

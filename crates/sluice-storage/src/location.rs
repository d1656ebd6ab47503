use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::StorageError;

/// A parsed `scheme://bucket/object` location.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
  pub scheme: String,
  pub bucket: String,
  pub object: String,
}

impl Location {
  pub fn parse(location: &str) -> Result<Self, StorageError> {
    let invalid = |message: &str| StorageError::InvalidLocation {
      location: location.to_string(),
      message: message.to_string(),
    };

    let (scheme, rest) = location
      .split_once("://")
      .ok_or_else(|| invalid("expected scheme://bucket/object"))?;
    if scheme.is_empty() {
      return Err(invalid("missing scheme"));
    }

    let (bucket, object) = rest
      .split_once('/')
      .ok_or_else(|| invalid("missing object name"))?;
    if bucket.is_empty() {
      return Err(invalid("missing bucket"));
    }
    if object.is_empty() || object.ends_with('/') {
      return Err(invalid("missing object name"));
    }
    if object.split('/').any(|segment| segment == "..") {
      return Err(invalid("object name may not contain '..'"));
    }

    Ok(Self {
      scheme: scheme.to_string(),
      bucket: bucket.to_string(),
      object: object.to_string(),
    })
  }
}

impl fmt::Display for Location {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}://{}/{}", self.scheme, self.bucket, self.object)
  }
}

/// Hands out fresh temporary locations under a common prefix.
///
/// The default allocator names objects with random UUIDs, so no two calls
/// ever return the same location. The sequential allocator numbers them
/// instead, which keeps dry-run output stable.
#[derive(Debug)]
pub struct LocationAllocator {
  prefix: String,
  counter: Option<AtomicUsize>,
}

impl LocationAllocator {
  pub fn new(prefix: impl Into<String>) -> Self {
    Self {
      prefix: normalize(prefix.into()),
      counter: None,
    }
  }

  pub fn sequential(prefix: impl Into<String>) -> Self {
    Self {
      prefix: normalize(prefix.into()),
      counter: Some(AtomicUsize::new(0)),
    }
  }

  pub fn prefix(&self) -> &str {
    &self.prefix
  }

  /// A location no earlier call on this allocator has returned.
  pub fn allocate(&self) -> String {
    match &self.counter {
      Some(counter) => {
        let n = counter.fetch_add(1, Ordering::Relaxed);
        format!("{}tmp-{:04}", self.prefix, n)
      }
      None => format!("{}{}", self.prefix, uuid::Uuid::new_v4()),
    }
  }
}

fn normalize(mut prefix: String) -> String {
  if !prefix.ends_with('/') {
    prefix.push('/');
  }
  prefix
}

//! Sluice Storage
//!
//! Object storage for the data that flows between stages. Every object is
//! addressed by a location URL of the form `scheme://bucket/object`; stage
//! `sources` and `sinks` are lists of such locations.
//!
//! The [`Store`] trait is the backend seam. [`FsStore`] keeps objects on the
//! local filesystem, [`MemoryStore`] keeps them in memory for tests and
//! dry runs. Both stream data through [`ByteStream`] and support ordered
//! composition of many objects into one, with [`compose_ordered`] layering a
//! hierarchical fan-in on top of each backend's per-call source limit.

mod compose;
mod error;
mod fs;
mod location;
mod memory;

pub use compose::{ComposeSummary, compose_ordered, split_evenly};
pub use error::StorageError;
pub use fs::FsStore;
pub use location::{Location, LocationAllocator};
pub use memory::MemoryStore;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::ops::Range;
use std::pin::Pin;

/// A boxed stream of bytes for object data.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// Default number of sources a single compose call accepts.
pub const DEFAULT_MAX_COMPOSE_SOURCES: usize = 32;

/// Default content type for composed objects.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Object storage trait.
///
/// Implementations provide the actual storage backend (filesystem, memory,
/// a cloud bucket). Locations are opaque to callers beyond their URL form.
#[async_trait]
pub trait Store: Send + Sync {
  /// Retrieve an object as a stream of bytes.
  async fn get(&self, location: &str) -> Result<ByteStream, StorageError>;

  /// Retrieve the bytes of `range` of an object. The range is clamped to
  /// the object's length.
  async fn get_range(&self, location: &str, range: Range<u64>) -> Result<ByteStream, StorageError>;

  /// Length of an object in bytes.
  async fn size(&self, location: &str) -> Result<u64, StorageError>;

  /// Store an object, replacing any existing one.
  async fn put(&self, location: &str, data: ByteStream, content_type: &str)
  -> Result<(), StorageError>;

  /// Delete an object.
  async fn delete(&self, location: &str) -> Result<(), StorageError>;

  /// Whether an object exists.
  async fn exists(&self, location: &str) -> Result<bool, StorageError>;

  /// Concatenate `sources` in order into `destination`.
  ///
  /// A single call accepts at most [`Store::max_compose_sources`] sources;
  /// use [`compose_ordered`] for arbitrary counts.
  async fn compose(
    &self,
    sources: &[String],
    destination: &str,
    content_type: &str,
  ) -> Result<(), StorageError>;

  /// Maximum number of sources one [`Store::compose`] call accepts.
  fn max_compose_sources(&self) -> usize {
    DEFAULT_MAX_COMPOSE_SOURCES
  }
}

/// Wrap an in-memory buffer as a [`ByteStream`].
pub fn bytes_stream(data: Bytes) -> ByteStream {
  Box::pin(futures::stream::once(async move { Ok(data) }))
}

/// Read a whole object into memory.
pub async fn read_all(store: &dyn Store, location: &str) -> Result<Bytes, StorageError> {
  let mut stream = store.get(location).await?;
  let mut buffer = BytesMut::new();
  while let Some(chunk) = stream.next().await {
    buffer.extend_from_slice(&chunk?);
  }
  Ok(buffer.freeze())
}

/// Read `range` of an object into memory.
pub async fn read_range(
  store: &dyn Store,
  location: &str,
  range: Range<u64>,
) -> Result<Bytes, StorageError> {
  let mut stream = store.get_range(location, range).await?;
  let mut buffer = BytesMut::new();
  while let Some(chunk) = stream.next().await {
    buffer.extend_from_slice(&chunk?);
  }
  Ok(buffer.freeze())
}

/// Write a whole in-memory buffer as an object.
pub async fn write_all(
  store: &dyn Store,
  location: &str,
  data: Bytes,
  content_type: &str,
) -> Result<(), StorageError> {
  store.put(location, bytes_stream(data), content_type).await
}

/// Delete an object, treating a missing object as already deleted.
pub async fn delete_if_exists(store: &dyn Store, location: &str) -> Result<(), StorageError> {
  match store.delete(location).await {
    Ok(()) | Err(StorageError::NotFound { .. }) => Ok(()),
    Err(e) => Err(e),
  }
}

use std::collections::BTreeMap;
use std::ops::Range;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use tokio::sync::RwLock;

use crate::error::StorageError;
use crate::location::Location;
use crate::{ByteStream, DEFAULT_MAX_COMPOSE_SOURCES, Store, bytes_stream};

#[derive(Debug, Clone)]
struct Object {
  data: Bytes,
  content_type: String,
}

/// In-memory object store.
#[derive(Debug)]
pub struct MemoryStore {
  objects: RwLock<BTreeMap<String, Object>>,
  max_compose_sources: usize,
}

impl Default for MemoryStore {
  fn default() -> Self {
    Self::new()
  }
}

impl MemoryStore {
  pub fn new() -> Self {
    Self {
      objects: RwLock::new(BTreeMap::new()),
      max_compose_sources: DEFAULT_MAX_COMPOSE_SOURCES,
    }
  }

  /// Override the per-call compose limit.
  pub fn with_max_compose_sources(mut self, limit: usize) -> Self {
    self.max_compose_sources = limit.max(2);
    self
  }

  /// Every stored location, sorted.
  pub async fn locations(&self) -> Vec<String> {
    self.objects.read().await.keys().cloned().collect()
  }

  /// Content type recorded for an object.
  pub async fn content_type(&self, location: &str) -> Option<String> {
    self
      .objects
      .read()
      .await
      .get(location)
      .map(|o| o.content_type.clone())
  }
}

#[async_trait]
impl Store for MemoryStore {
  async fn get(&self, location: &str) -> Result<ByteStream, StorageError> {
    let objects = self.objects.read().await;
    let object = objects
      .get(location)
      .ok_or_else(|| StorageError::not_found(location))?;
    Ok(bytes_stream(object.data.clone()))
  }

  async fn get_range(&self, location: &str, range: Range<u64>) -> Result<ByteStream, StorageError> {
    let objects = self.objects.read().await;
    let object = objects
      .get(location)
      .ok_or_else(|| StorageError::not_found(location))?;
    let len = object.data.len();
    let end = usize::try_from(range.end).unwrap_or(usize::MAX).min(len);
    let start = usize::try_from(range.start).unwrap_or(usize::MAX).min(end);
    Ok(bytes_stream(object.data.slice(start..end)))
  }

  async fn size(&self, location: &str) -> Result<u64, StorageError> {
    let objects = self.objects.read().await;
    let object = objects
      .get(location)
      .ok_or_else(|| StorageError::not_found(location))?;
    Ok(object.data.len() as u64)
  }

  async fn put(
    &self,
    location: &str,
    data: ByteStream,
    content_type: &str,
  ) -> Result<(), StorageError> {
    Location::parse(location)?;

    let mut buffer = BytesMut::new();
    let mut stream = std::pin::pin!(data);
    while let Some(chunk) = stream.next().await {
      buffer.extend_from_slice(&chunk?);
    }

    self.objects.write().await.insert(
      location.to_string(),
      Object {
        data: buffer.freeze(),
        content_type: content_type.to_string(),
      },
    );
    Ok(())
  }

  async fn delete(&self, location: &str) -> Result<(), StorageError> {
    self
      .objects
      .write()
      .await
      .remove(location)
      .map(|_| ())
      .ok_or_else(|| StorageError::not_found(location))
  }

  async fn exists(&self, location: &str) -> Result<bool, StorageError> {
    Ok(self.objects.read().await.contains_key(location))
  }

  async fn compose(
    &self,
    sources: &[String],
    destination: &str,
    content_type: &str,
  ) -> Result<(), StorageError> {
    if sources.len() > self.max_compose_sources {
      return Err(StorageError::TooManySources {
        count: sources.len(),
        limit: self.max_compose_sources,
      });
    }
    Location::parse(destination)?;

    let mut objects = self.objects.write().await;
    let mut buffer = BytesMut::new();
    for source in sources {
      let object = objects
        .get(source)
        .ok_or_else(|| StorageError::not_found(source))?;
      buffer.extend_from_slice(&object.data);
    }

    objects.insert(
      destination.to_string(),
      Object {
        data: buffer.freeze(),
        content_type: content_type.to_string(),
      },
    );
    Ok(())
  }

  fn max_compose_sources(&self) -> usize {
    self.max_compose_sources
  }
}

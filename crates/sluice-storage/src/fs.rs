use std::io::SeekFrom;
use std::ops::Range;
use std::path::PathBuf;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;

use crate::error::StorageError;
use crate::location::Location;
use crate::{ByteStream, DEFAULT_MAX_COMPOSE_SOURCES, Store};

/// Filesystem-based object store.
///
/// Each object is stored at `{base_path}/{bucket}/{object}`, whatever the
/// location's scheme. Parent directories are created automatically.
pub struct FsStore {
  base_path: PathBuf,
  max_compose_sources: usize,
}

impl FsStore {
  /// Create a new filesystem store with the given base path.
  pub fn new(base_path: impl Into<PathBuf>) -> Self {
    Self {
      base_path: base_path.into(),
      max_compose_sources: DEFAULT_MAX_COMPOSE_SOURCES,
    }
  }

  /// Override the per-call compose limit.
  pub fn with_max_compose_sources(mut self, limit: usize) -> Self {
    self.max_compose_sources = limit.max(2);
    self
  }

  /// Filesystem path backing a location.
  pub fn path_for(&self, location: &str) -> Result<PathBuf, StorageError> {
    let location = Location::parse(location)?;
    Ok(self.base_path.join(location.bucket).join(location.object))
  }

  async fn open(&self, location: &str) -> Result<File, StorageError> {
    let path = self.path_for(location)?;
    File::open(&path).await.map_err(|e| {
      if e.kind() == std::io::ErrorKind::NotFound {
        StorageError::not_found(location)
      } else {
        StorageError::Io(e)
      }
    })
  }
}

#[async_trait]
impl Store for FsStore {
  async fn get(&self, location: &str) -> Result<ByteStream, StorageError> {
    let file = self.open(location).await?;
    let stream = ReaderStream::new(file).map(|r| r.map_err(StorageError::Io));
    Ok(Box::pin(stream))
  }

  async fn get_range(&self, location: &str, range: Range<u64>) -> Result<ByteStream, StorageError> {
    let mut file = self.open(location).await?;
    file.seek(SeekFrom::Start(range.start)).await?;
    let length = range.end.saturating_sub(range.start);
    let stream = ReaderStream::new(file.take(length)).map(|r| r.map_err(StorageError::Io));
    Ok(Box::pin(stream))
  }

  async fn size(&self, location: &str) -> Result<u64, StorageError> {
    let file = self.open(location).await?;
    Ok(file.metadata().await?.len())
  }

  async fn put(
    &self,
    location: &str,
    data: ByteStream,
    _content_type: &str,
  ) -> Result<(), StorageError> {
    let path = self.path_for(location)?;

    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).await?;
    }

    let mut file = File::create(path).await?;
    let mut stream = std::pin::pin!(data);

    while let Some(chunk) = stream.next().await {
      let bytes = chunk?;
      file.write_all(&bytes).await?;
    }

    file.flush().await?;
    Ok(())
  }

  async fn delete(&self, location: &str) -> Result<(), StorageError> {
    let path = self.path_for(location)?;
    fs::remove_file(&path).await.map_err(|e| {
      if e.kind() == std::io::ErrorKind::NotFound {
        StorageError::not_found(location)
      } else {
        StorageError::Io(e)
      }
    })
  }

  async fn exists(&self, location: &str) -> Result<bool, StorageError> {
    let path = self.path_for(location)?;
    Ok(fs::try_exists(path).await?)
  }

  async fn compose(
    &self,
    sources: &[String],
    destination: &str,
    _content_type: &str,
  ) -> Result<(), StorageError> {
    if sources.len() > self.max_compose_sources {
      return Err(StorageError::TooManySources {
        count: sources.len(),
        limit: self.max_compose_sources,
      });
    }

    let path = self.path_for(destination)?;
    if let Some(parent) = path.parent() {
      fs::create_dir_all(parent).await?;
    }

    // Write beside the destination first so a source may also be the target.
    let staging = path.with_extension(format!("compose-{}", uuid::Uuid::new_v4()));
    let mut out = File::create(&staging).await?;
    for source in sources {
      let mut input = self.open(source).await?;
      tokio::io::copy(&mut input, &mut out).await?;
    }
    out.flush().await?;
    drop(out);

    fs::rename(&staging, &path).await?;
    Ok(())
  }

  fn max_compose_sources(&self) -> usize {
    self.max_compose_sources
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{read_all, read_range, write_all};
  use bytes::Bytes;

  #[tokio::test]
  async fn test_put_get_delete() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsStore::new(dir.path());

    write_all(&store, "store://b/one/two.txt", Bytes::from("hello"), "text/plain")
      .await
      .unwrap();

    assert!(dir.path().join("b/one/two.txt").exists());
    assert!(store.exists("store://b/one/two.txt").await.unwrap());
    assert_eq!(
      read_all(&store, "store://b/one/two.txt").await.unwrap(),
      Bytes::from("hello")
    );

    store.delete("store://b/one/two.txt").await.unwrap();
    assert!(!store.exists("store://b/one/two.txt").await.unwrap());
    assert!(matches!(
      store.delete("store://b/one/two.txt").await,
      Err(StorageError::NotFound { .. })
    ));
  }

  #[tokio::test]
  async fn test_ranged_read_and_size() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsStore::new(dir.path());
    write_all(&store, "store://b/data", Bytes::from("0123456789"), "text/plain")
      .await
      .unwrap();

    assert_eq!(store.size("store://b/data").await.unwrap(), 10);
    assert_eq!(
      read_range(&store, "store://b/data", 3..7).await.unwrap(),
      Bytes::from("3456")
    );
    assert_eq!(
      read_range(&store, "store://b/data", 8..100).await.unwrap(),
      Bytes::from("89")
    );
    assert!(matches!(
      store.size("store://b/missing").await,
      Err(StorageError::NotFound { .. })
    ));
  }

  #[tokio::test]
  async fn test_get_missing() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsStore::new(dir.path());
    assert!(matches!(
      store.get("store://b/missing").await,
      Err(StorageError::NotFound { .. })
    ));
  }

  #[tokio::test]
  async fn test_compose_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsStore::new(dir.path());

    for (name, body) in [("a", "1\n"), ("b", "2\n"), ("c", "3\n")] {
      write_all(&store, &format!("store://b/{name}"), Bytes::from(body), "text/plain")
        .await
        .unwrap();
    }

    let sources = vec![
      "store://b/c".to_string(),
      "store://b/a".to_string(),
      "store://b/b".to_string(),
    ];
    store.compose(&sources, "store://b/out", "text/plain").await.unwrap();

    assert_eq!(
      read_all(&store, "store://b/out").await.unwrap(),
      Bytes::from("3\n1\n2\n")
    );
  }

  #[tokio::test]
  async fn test_compose_respects_limit() {
    let dir = tempfile::tempdir().unwrap();
    let store = FsStore::new(dir.path()).with_max_compose_sources(2);
    let sources = vec!["store://b/a".to_string(); 3];
    assert!(matches!(
      store.compose(&sources, "store://b/out", "text/plain").await,
      Err(StorageError::TooManySources { count: 3, limit: 2 })
    ));
  }
}

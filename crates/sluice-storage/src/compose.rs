use tracing::{debug, warn};

use crate::error::StorageError;
use crate::location::LocationAllocator;
use crate::{Store, delete_if_exists, write_all};

/// Outcome of an ordered composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComposeSummary {
  /// Number of compose calls issued.
  pub calls: usize,
  /// Number of intermediate objects created (and deleted again).
  pub intermediates: usize,
}

/// Split `items` into the fewest chunks of at most `max` items, with chunk
/// sizes as even as possible. Order is preserved.
pub fn split_evenly<T>(items: &[T], max: usize) -> Vec<&[T]> {
  if items.is_empty() {
    return Vec::new();
  }
  let max = max.max(1);
  let chunk_count = items.len().div_ceil(max);
  let chunk_size = items.len().div_ceil(chunk_count);
  items.chunks(chunk_size).collect()
}

/// Concatenate any number of `sources`, in order, into `destination`.
///
/// When there are more sources than `limit` (or the store's own compose
/// limit, whichever is lower), batches are composed into intermediate
/// objects allocated from `scratch`, recursively, until a single call can
/// produce the destination. Intermediates are deleted afterwards, including
/// when composition fails part way.
pub async fn compose_ordered(
  store: &dyn Store,
  sources: &[String],
  destination: &str,
  content_type: &str,
  scratch: &LocationAllocator,
  limit: usize,
) -> Result<ComposeSummary, StorageError> {
  let limit = limit.min(store.max_compose_sources()).max(2);
  let mut summary = ComposeSummary {
    calls: 0,
    intermediates: 0,
  };

  if sources.is_empty() {
    write_all(store, destination, bytes::Bytes::new(), content_type).await?;
    return Ok(summary);
  }

  let mut intermediates = Vec::new();
  let result = compose_levels(
    store,
    sources,
    destination,
    content_type,
    scratch,
    limit,
    &mut intermediates,
    &mut summary,
  )
  .await;

  for location in &intermediates {
    if let Err(e) = delete_if_exists(store, location).await {
      warn!(location = %location, error = %e, "failed to delete compose intermediate");
    }
  }

  result.map(|()| summary)
}

#[allow(clippy::too_many_arguments)]
async fn compose_levels(
  store: &dyn Store,
  sources: &[String],
  destination: &str,
  content_type: &str,
  scratch: &LocationAllocator,
  limit: usize,
  intermediates: &mut Vec<String>,
  summary: &mut ComposeSummary,
) -> Result<(), StorageError> {
  let mut level: Vec<String> = sources.to_vec();

  while level.len() > limit {
    let mut next = Vec::new();
    for batch in split_evenly(&level, limit) {
      let intermediate = scratch.allocate();
      intermediates.push(intermediate.clone());
      store.compose(batch, &intermediate, content_type).await?;
      summary.calls += 1;
      summary.intermediates += 1;
      next.push(intermediate);
    }
    debug!(
      destination = %destination,
      from = level.len(),
      to = next.len(),
      "compose_level_reduced"
    );
    level = next;
  }

  store.compose(&level, destination, content_type).await?;
  summary.calls += 1;
  Ok(())
}

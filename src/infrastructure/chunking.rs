// Chunked fan-out reads: split keys into bounded batches, fetch them concurrently, merge.
// A failed batch never aborts the others; callers get the merged items plus the failed partitions.

use futures::future::join_all;
use rand::Rng;
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::FeedConfig;
use crate::error::{AppError, AppResult};

/// One partition that could not be read
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkFailure {
    pub chunk_index: usize,
    pub keys: Vec<String>,
    pub error: String,
}

/// Merged result of a fan-out read
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkedRead<T> {
    pub items: Vec<T>,
    pub failures: Vec<ChunkFailure>,
    pub chunks: usize,
}

impl<T> ChunkedRead<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            failures: Vec::new(),
            chunks: 0,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Keys of every failed partition, for a targeted retry
    pub fn failed_keys(&self) -> Vec<String> {
        self.failures
            .iter()
            .flat_map(|failure| failure.keys.iter().cloned())
            .collect()
    }

    pub fn into_parts(self) -> (Vec<T>, Vec<ChunkFailure>) {
        (self.items, self.failures)
    }

    /// Strict view: any failed partition turns the whole read into an error
    pub fn into_result(self) -> AppResult<Vec<T>> {
        if self.failures.is_empty() {
            Ok(self.items)
        } else {
            Err(AppError::PartialChunkFailure {
                failed: self.failures.len(),
                total: self.chunks,
            })
        }
    }
}

/// Retry policy for transient store failures
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one
    pub attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            attempts: 0,
            base_backoff: Duration::ZERO,
        }
    }

    pub fn from_config(config: &FeedConfig) -> Self {
        Self {
            attempts: config.retry_attempts,
            base_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = self.base_backoff.as_millis() as u64;
        let exponential = base_ms.saturating_mul(1u64 << attempt.min(16));
        Duration::from_millis(exponential + jitter_ms(base_ms))
    }

    /// Run `operation`, retrying while it fails with a transient error
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.attempts => {
                    let delay = self.delay_for(attempt);
                    debug!("Transient store failure ({}), retrying in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&FeedConfig::default())
    }
}

fn jitter_ms(max: u64) -> u64 {
    if max == 0 {
        0
    } else {
        rand::rng().random_range(0..=max)
    }
}

/// Drop duplicate and empty keys, keeping first-seen order
pub fn unique_keys<I, S>(keys: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut seen = HashSet::new();
    keys.into_iter()
        .map(Into::into)
        .filter(|key: &String| !key.is_empty() && seen.insert(key.clone()))
        .collect()
}

/// Partition `keys` into batches of at most `chunk_size`, run `fetch` for every batch
/// concurrently, and merge the results in batch order.
pub async fn fan_out<T, F, Fut>(
    keys: &[String],
    chunk_size: usize,
    retry: &RetryPolicy,
    fetch: F,
) -> ChunkedRead<T>
where
    F: Fn(Vec<String>) -> Fut,
    Fut: Future<Output = AppResult<Vec<T>>>,
{
    if keys.is_empty() {
        return ChunkedRead::empty();
    }

    let chunks: Vec<Vec<String>> = keys
        .chunks(chunk_size.max(1))
        .map(<[String]>::to_vec)
        .collect();
    let fetch = &fetch;

    let results = join_all(
        chunks
            .iter()
            .map(|chunk| retry.run(move || fetch(chunk.clone()))),
    )
    .await;

    let mut read = ChunkedRead {
        items: Vec::new(),
        failures: Vec::new(),
        chunks: chunks.len(),
    };
    for (chunk_index, (chunk, result)) in chunks.into_iter().zip(results).enumerate() {
        match result {
            Ok(items) => read.items.extend(items),
            Err(e) => {
                warn!(
                    "Chunk {} of {} failed ({} keys): {}",
                    chunk_index + 1,
                    read.chunks,
                    chunk.len(),
                    e
                );
                read.failures.push(ChunkFailure {
                    chunk_index,
                    keys: chunk,
                    error: e.to_string(),
                });
            }
        }
    }
    read
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn keys(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("k{:02}", i)).collect()
    }

    #[tokio::test]
    async fn test_twenty_three_keys_make_three_chunks() {
        let sizes = Mutex::new(Vec::new());
        let read = fan_out(&keys(23), 10, &RetryPolicy::none(), |chunk| {
            sizes.lock().unwrap().push(chunk.len());
            async move { Ok::<_, AppError>(chunk) }
        })
        .await;

        assert_eq!(read.chunks, 3);
        assert_eq!(*sizes.lock().unwrap(), vec![10, 10, 3]);
        assert_eq!(read.items, keys(23));
        assert!(read.is_complete());
    }

    #[tokio::test]
    async fn test_failed_chunk_is_reported_not_fatal() {
        let read = fan_out(&keys(25), 10, &RetryPolicy::none(), |chunk| async move {
            if chunk.contains(&"k12".to_string()) {
                Err(AppError::StoreUnavailable("boom".to_string()))
            } else {
                Ok(chunk)
            }
        })
        .await;

        assert_eq!(read.items.len(), 15);
        assert_eq!(read.failures.len(), 1);
        assert_eq!(read.failures[0].chunk_index, 1);
        assert_eq!(read.failed_keys().len(), 10);
        assert!(matches!(
            read.into_result(),
            Err(AppError::PartialChunkFailure { failed: 1, total: 3 })
        ));
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy {
            attempts: 2,
            base_backoff: Duration::from_millis(1),
        };
        let read = fan_out(&keys(3), 10, &policy, |chunk| {
            let call = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call == 0 {
                    Err(AppError::StoreUnavailable("flaky".to_string()))
                } else {
                    Ok(chunk)
                }
            }
        })
        .await;

        assert!(read.is_complete());
        assert_eq!(read.items.len(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let read: ChunkedRead<String> = fan_out(&keys(3), 10, &RetryPolicy::default(), |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AppError::InvalidArgument("bad".to_string())) }
        })
        .await;

        assert_eq!(read.failures.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unique_keys() {
        let deduped = unique_keys(vec!["a", "b", "", "a", "c", "b"]);
        assert_eq!(deduped, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_no_keys_no_queries() {
        let read: ChunkedRead<String> = fan_out(&[], 10, &RetryPolicy::none(), |_| async {
            Err(AppError::Internal("no fetch expected".to_string()))
        })
        .await;
        assert_eq!(read.chunks, 0);
        assert!(read.items.is_empty());
        assert!(read.is_complete());
    }
}

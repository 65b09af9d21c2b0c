#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use feed_engine::config::FeedConfig;
use feed_engine::error::{AppError, AppResult};
use feed_engine::feed_interface::FeedInterface;
use feed_engine::infrastructure::document_store::{
    DocumentRef, DocumentSnapshot, DocumentStore, Filter, Query, Timestamp, WriteBatch,
};
use feed_engine::infrastructure::memory_store::MemoryDocumentStore;
use feed_engine::infrastructure::metrics_store::MetricsStore;
use feed_engine::infrastructure::sqlite_store::SqliteDocumentStore;
use feed_engine::models::{NewPost, NewProfile, Post, UserProfile};

/// Wraps a store to inject query failures and read latency.
/// Queries whose membership predicate names a poisoned key fail as unavailable.
pub struct FlakyStore {
    inner: Arc<dyn DocumentStore>,
    poisoned: Mutex<HashSet<String>>,
    read_delay: Duration,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        Self {
            inner,
            poisoned: Mutex::new(HashSet::new()),
            read_delay: Duration::ZERO,
        }
    }

    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    pub fn poison(&self, key: &str) {
        self.poisoned.lock().unwrap().insert(key.to_string());
    }

    // Runs after the read, so callers act on a snapshot that may already be stale
    async fn pause(&self) {
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
    }

    fn is_poisoned(&self, query: &Query) -> bool {
        let poisoned = self.poisoned.lock().unwrap();
        query.filters.iter().any(|filter| match filter {
            Filter::In { values, .. } => values
                .iter()
                .any(|value| value.as_str().is_some_and(|key| poisoned.contains(key))),
            Filter::IdIn(ids) => ids.iter().any(|id| poisoned.contains(id)),
            Filter::Eq { .. } => false,
        })
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    fn backend_name(&self) -> &'static str {
        "flaky"
    }

    async fn get(&self, target: &DocumentRef) -> AppResult<Option<DocumentSnapshot>> {
        let result = self.inner.get(target).await;
        self.pause().await;
        result
    }

    async fn query(&self, query: &Query) -> AppResult<Vec<DocumentSnapshot>> {
        if self.is_poisoned(query) {
            return Err(AppError::StoreUnavailable(format!(
                "injected failure on {}",
                query.collection
            )));
        }
        let result = self.inner.query(query).await;
        self.pause().await;
        result
    }

    async fn commit(&self, batch: WriteBatch) -> AppResult<Timestamp> {
        self.inner.commit(batch).await
    }
}

/// Feed limits with retries disabled so injected failures surface immediately
pub fn test_config() -> FeedConfig {
    FeedConfig {
        retry_attempts: 0,
        retry_backoff_ms: 0,
        ..FeedConfig::default()
    }
}

pub struct Harness {
    pub api: FeedInterface,
    pub store: Arc<dyn DocumentStore>,
    pub metrics: Arc<MetricsStore>,
}

impl Harness {
    pub fn over(inner: Arc<dyn DocumentStore>, config: FeedConfig) -> Self {
        let metrics = Arc::new(MetricsStore::new(inner));
        let store: Arc<dyn DocumentStore> = metrics.clone();
        Self {
            api: FeedInterface::with_metrics(metrics.clone(), &config),
            store,
            metrics,
        }
    }

    pub fn memory() -> Self {
        Self::over(Arc::new(MemoryDocumentStore::new()), test_config())
    }

    pub async fn sqlite() -> Self {
        let store = SqliteDocumentStore::new_in_memory().await.unwrap();
        Self::over(Arc::new(store), test_config())
    }

    /// File-backed SQLite with a real connection pool, for concurrent-write runs
    pub async fn sqlite_file(path: &std::path::Path) -> Self {
        let url = format!("sqlite://{}", path.display());
        let store = SqliteDocumentStore::connect(&url, 5).await.unwrap();
        Self::over(Arc::new(store), test_config())
    }

    pub async fn register(&self, uid: &str) -> UserProfile {
        self.api
            .profiles
            .register(NewProfile {
                uid: uid.to_string(),
                handle: uid.to_lowercase(),
                display_name: format!("User {}", uid),
                email: format!("{}@example.com", uid),
                avatar_url: None,
            })
            .await
            .unwrap()
    }

    pub async fn post(&self, author: &str, text: &str) -> Post {
        self.api
            .create_post(
                author,
                NewPost {
                    text: text.to_string(),
                    media: None,
                },
            )
            .await
            .unwrap()
    }

    pub async fn profile(&self, uid: &str) -> UserProfile {
        self.api.profiles.get(uid).await.unwrap()
    }
}

// Metrics Decorator - wraps any DocumentStore and records per-operation call statistics

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::instrument;

use crate::error::AppResult;
use crate::infrastructure::document_store::{
    collection_group, DocumentRef, DocumentSnapshot, DocumentStore, Query, Timestamp, WriteBatch,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OperationMetrics {
    pub total_calls: u64,
    pub error_count: u64,
    pub total_time_ms: f64,
    pub avg_time_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreMetricsSnapshot {
    pub backend: String,
    pub operations: HashMap<String, OperationMetrics>,
    /// Query calls per collection group (`posts`, `following`, ...)
    pub queries_by_collection: HashMap<String, u64>,
}

impl StoreMetricsSnapshot {
    pub fn calls(&self, operation: &str) -> u64 {
        self.operations
            .get(operation)
            .map(|m| m.total_calls)
            .unwrap_or(0)
    }

    pub fn queries_on(&self, collection: &str) -> u64 {
        self.queries_by_collection
            .get(collection)
            .copied()
            .unwrap_or(0)
    }
}

pub struct MetricsStore {
    inner: Arc<dyn DocumentStore>,
    metrics: RwLock<StoreMetricsSnapshot>,
}

impl MetricsStore {
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        let metrics = StoreMetricsSnapshot {
            backend: inner.backend_name().to_string(),
            ..Default::default()
        };
        Self {
            inner,
            metrics: RwLock::new(metrics),
        }
    }

    pub async fn snapshot(&self) -> StoreMetricsSnapshot {
        self.metrics.read().await.clone()
    }

    pub async fn reset(&self) {
        let mut metrics = self.metrics.write().await;
        metrics.operations.clear();
        metrics.queries_by_collection.clear();
    }

    async fn record_operation(&self, operation: &str, start_time: Instant, success: bool) {
        let elapsed_ms = start_time.elapsed().as_secs_f64() * 1000.0;
        let mut metrics = self.metrics.write().await;
        let entry = metrics
            .operations
            .entry(operation.to_string())
            .or_default();
        entry.total_calls += 1;
        if !success {
            entry.error_count += 1;
        }
        entry.total_time_ms += elapsed_ms;
        entry.avg_time_ms = entry.total_time_ms / entry.total_calls as f64;
    }
}

#[async_trait]
impl DocumentStore for MetricsStore {
    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }

    #[instrument(skip(self, target), fields(doc = %target))]
    async fn get(&self, target: &DocumentRef) -> AppResult<Option<DocumentSnapshot>> {
        let start = Instant::now();
        let result = self.inner.get(target).await;
        self.record_operation("get", start, result.is_ok()).await;
        result
    }

    #[instrument(skip(self, query), fields(collection = %query.collection))]
    async fn query(&self, query: &Query) -> AppResult<Vec<DocumentSnapshot>> {
        {
            let mut metrics = self.metrics.write().await;
            *metrics
                .queries_by_collection
                .entry(collection_group(&query.collection).to_string())
                .or_default() += 1;
        }
        let start = Instant::now();
        let result = self.inner.query(query).await;
        self.record_operation("query", start, result.is_ok()).await;
        result
    }

    #[instrument(skip(self, batch), fields(writes = batch.len()))]
    async fn commit(&self, batch: WriteBatch) -> AppResult<Timestamp> {
        let start = Instant::now();
        let result = self.inner.commit(batch).await;
        self.record_operation("commit", start, result.is_ok()).await;
        result
    }
}

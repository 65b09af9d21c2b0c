use std::sync::Arc;
use crate::{
    config::Config,
    error::AppResult,
    feed_interface::FeedInterface,
    infrastructure::{
        document_store::DocumentStore, metrics_store::MetricsStore,
        sqlite_store::SqliteDocumentStore,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub feed_interface: FeedInterface,
    pub store: Arc<SqliteDocumentStore>,
    pub config: Config,
}

impl AppState {
    pub async fn new(config: Config) -> AppResult<Self> {
        // Initialize document store
        let store = Arc::new(
            SqliteDocumentStore::connect(&config.database.url, config.database.max_connections)
                .await?,
        );
        store.health_check().await?;

        // Every service call goes through the metrics decorator
        let inner: Arc<dyn DocumentStore> = store.clone();
        let metrics = Arc::new(MetricsStore::new(inner));
        let feed_interface = FeedInterface::with_metrics(metrics, &config.feed);

        Ok(Self {
            feed_interface,
            store,
            config,
        })
    }
}

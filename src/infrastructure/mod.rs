// Storage and request plumbing shared by the services
pub mod chunking;        // Bounded-batch fan-out reads with retry
pub mod document_store;  // Document store interface and shared write semantics
pub mod memory_store;    // In-process store
pub mod metrics_store;   // Per-operation metrics decorator
pub mod sqlite_store;    // SQLite-backed store
pub mod viewer;          // Acting-user context

pub use chunking::{fan_out, ChunkFailure, ChunkedRead, RetryPolicy};
pub use document_store::{
    DocumentRef, DocumentSnapshot, DocumentStore, Filter, Query, WriteBatch, WriteOp,
};
pub use memory_store::MemoryDocumentStore;
pub use metrics_store::{MetricsStore, StoreMetricsSnapshot};
pub use sqlite_store::SqliteDocumentStore;
pub use viewer::ViewerContext;

// Social feed engine - follow graph, posts, reposts and timeline assembly over a document store

// Storage interface, backends and request plumbing
pub mod infrastructure;

// Domain records and collection layout
pub mod models;

// Graph, post, repost and feed services
pub mod services;

// Service facade and HTTP routes
pub mod feed_interface;
pub mod app_state;

// Common utilities
pub mod config;
pub mod error;

// Re-exports for convenience
pub use error::{AppError, AppResult};
pub use feed_interface::{create_feed_router, FeedInterface};

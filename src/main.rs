// Feed Server - HTTP front end for the feed engine

use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use feed_engine::{
    app_state::AppState,
    config::Config,
    feed_interface::create_feed_router,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize application state
    let app_state = AppState::new(config.clone()).await?;
    let (idle, size) = app_state.store.pool_stats();
    info!("Store pool: {} connections ({} idle)", size, idle);

    // Build main application router
    let app = Router::new()
        .nest("/api/v1", create_feed_router(app_state.feed_interface.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = config.server_address();
    info!("Feed server starting on http://{}", addr);
    info!("  GET    /api/v1/feed                          - Viewer timeline (x-viewer-id)");
    info!("  POST   /api/v1/users                         - Register profile");
    info!("  PUT    /api/v1/users/{{id}}/following/{{target}} - Follow");
    info!("  DELETE /api/v1/users/{{id}}/following/{{target}} - Unfollow");
    info!("  POST   /api/v1/posts                         - Create post (x-viewer-id)");
    info!("  POST   /api/v1/posts/{{id}}/repost             - Toggle repost (x-viewer-id)");

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

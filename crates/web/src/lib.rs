//! pushmirror webhook listener.
//!
//! Provides an Axum-based HTTP server with:
//! - The GitHub push webhook receiver
//! - Status and health endpoints

pub mod api;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use pushmirror_core::sync_engine::SyncEngine;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub engine: Arc<SyncEngine>,
    /// Shared secret for `X-Hub-Signature-256` verification.
    pub webhook_secret: String,
}

/// Build the application router over `state`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(api::status::routes())
        .merge(api::webhooks::routes())
        .layer(DefaultBodyLimit::max(5 * 1024 * 1024)) // push payloads can be large
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The web server.
pub struct WebServer {
    state: Arc<AppState>,
}

impl WebServer {
    /// Create a new web server with the given dependencies.
    pub fn new(engine: Arc<SyncEngine>, webhook_secret: impl Into<String>) -> Self {
        let state = Arc::new(AppState {
            engine,
            webhook_secret: webhook_secret.into(),
        });
        Self { state }
    }

    /// Start the web server, listening on the given address.
    pub async fn start(self, addr: SocketAddr) -> anyhow::Result<()> {
        let app = router(self.state);

        info!(addr = %addr, "starting web server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}

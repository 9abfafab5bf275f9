//! Web server module.

mod handlers;

pub use handlers::*;

use crate::scheduler::Monitor;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub monitor: Arc<Monitor>,
}

/// Web server for SiteLens.
pub struct Server {
    state: AppState,
    http_port: u16,
}

impl Server {
    pub fn new(http_port: u16, monitor: Arc<Monitor>) -> Self {
        Self {
            state: AppState { monitor },
            http_port,
        }
    }

    /// Build the router with all routes.
    fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            .route("/health", get(handlers::handle_health))
            .route("/api/sites", get(handlers::handle_get_sites))
            .route("/api/sites", post(handlers::handle_add_site))
            .route("/api/sites", delete(handlers::handle_remove_site))
            .route("/api/stats", get(handlers::handle_get_stats))
            .route("/api/history", get(handlers::handle_get_history))
            .layer(cors)
            .layer(DefaultBodyLimit::max(64 * 1024))
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}

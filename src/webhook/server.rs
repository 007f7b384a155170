//! Webhook server assembly
//!
//! Binds the HTTP listener and carries the shared state the handlers
//! work against. Component construction happens at startup; the server
//! only wires them behind routes.

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::cache::Cache;
use crate::conflict::ConflictResolver;
use crate::config::ServerConfig;
use crate::error::Result;
use crate::queue::Queue;
use crate::registry::AccountRegistry;
use crate::router::InstanceRouter;
use crate::store::Store;

use super::api::create_router;

// ============================================================================
// App State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Durable store
    pub store: Store,

    /// Redis cache
    pub cache: Cache,

    /// Account registry
    pub registry: AccountRegistry,

    /// Account-to-instance router
    pub router: InstanceRouter,

    /// Mobile-conflict resolver
    pub conflict: Arc<ConflictResolver>,

    /// Background job queue
    pub queue: Queue,

    /// Server start time
    pub start_time: Instant,

    /// Server configuration
    pub config: ServerConfig,
}

// ============================================================================
// Webhook Server
// ============================================================================

/// HTTP server for instance webhooks and the control API
pub struct WebhookServer {
    config: ServerConfig,
    state: AppState,
}

impl WebhookServer {
    /// Create a new webhook server over already-connected components
    pub fn new(state: AppState) -> Self {
        Self {
            config: state.config.clone(),
            state,
        }
    }

    /// Get the application state
    pub fn state(&self) -> AppState {
        self.state.clone()
    }

    /// Build the router with all routes
    pub fn build_router(&self) -> Router {
        create_router(self.state.clone()).layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
    }

    /// Start the server
    pub async fn start(&self) -> Result<()> {
        let router = self.build_router();
        let addr = format!("{}:{}", self.config.host, self.config.port);

        tracing::info!(%addr, "Starting webhook server");

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }

    /// Start with graceful shutdown
    pub async fn start_with_shutdown(
        &self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let router = self.build_router();
        let addr = format!("{}:{}", self.config.host, self.config.port);

        tracing::info!(%addr, "Starting webhook server (with graceful shutdown)");

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal)
            .await?;

        tracing::info!("Webhook server shutdown complete");
        Ok(())
    }
}

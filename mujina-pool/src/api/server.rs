//! API server setup.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Json, Router, routing::get};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa_axum::router::OpenApiRouter;

use super::v0;
use crate::config::PoolConfig;
use crate::job_manager::JobManager;
use crate::tracing::prelude::*;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 7785)),
        }
    }
}

impl From<&PoolConfig> for ApiConfig {
    fn from(config: &PoolConfig) -> Self {
        Self {
            bind_addr: config.api_addr,
        }
    }
}

/// State shared by all handlers.
#[derive(Clone)]
pub struct SharedState {
    pub manager: Arc<JobManager>,

    /// Template feed, present only in stream mode.
    pub template_feed: Option<mpsc::Sender<String>>,

    pub started: Instant,
}

impl SharedState {
    pub fn new(manager: Arc<JobManager>, template_feed: Option<mpsc::Sender<String>>) -> Self {
        Self {
            manager,
            template_feed,
            started: Instant::now(),
        }
    }
}

/// Build the application router with the OpenAPI document at
/// `/api/openapi.json`.
pub fn router(state: SharedState) -> Router {
    let (router, openapi) = OpenApiRouter::new()
        .nest("/api/v0", v0::routes())
        .split_for_parts();

    router
        .route(
            "/api/openapi.json",
            get(move || {
                let openapi = openapi.clone();
                async move { Json(openapi) }
            }),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API until `shutdown` fires.
pub async fn serve(
    config: ApiConfig,
    state: SharedState,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "API server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}

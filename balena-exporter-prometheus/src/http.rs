//! HTTP server for the Prometheus metrics endpoint.
//!
//! Besides the metrics path, two probes are served: `/health` answers as
//! long as the process is up, `/ready` only once a poll cycle has written
//! the registry.

use std::net::SocketAddr;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};

use crate::metrics::SharedMetrics;
use crate::poller::SharedStats;

const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

#[derive(Clone)]
struct AppState {
    metrics: SharedMetrics,
    stats: SharedStats,
}

fn create_router(metrics: SharedMetrics, stats: SharedStats, metrics_path: &str) -> Router {
    Router::new()
        .route(metrics_path, get(metrics_handler))
        .route("/health", get(|| async { "healthy\n" }))
        .route("/ready", get(ready_handler))
        .layer(CorsLayer::permissive())
        .with_state(AppState { metrics, stats })
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    ([(CONTENT_TYPE, OPENMETRICS_CONTENT_TYPE)], state.metrics.render())
}

async fn ready_handler(State(state): State<AppState>) -> (StatusCode, String) {
    let stats = state.stats.read();
    match (stats.cycles_completed, &stats.last_error) {
        (0, Some(error)) => (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("not ready - last poll cycle failed: {}\n", error),
        ),
        (0, None) => (
            StatusCode::SERVICE_UNAVAILABLE,
            "not ready - no poll cycle completed yet\n".to_string(),
        ),
        (cycles, _) => (
            StatusCode::OK,
            format!("ready - {} devices after {} cycles\n", stats.last_device_count, cycles),
        ),
    }
}

/// Resolves once `shutdown` flips to `true` or its sender is dropped.
async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}

/// Serves the metrics registry and the readiness probes.
pub struct HttpServer {
    metrics: SharedMetrics,
    stats: SharedStats,
    listen_addr: SocketAddr,
    metrics_path: String,
}

impl HttpServer {
    pub fn new(
        metrics: SharedMetrics,
        stats: SharedStats,
        listen_addr: SocketAddr,
        metrics_path: String,
    ) -> Self {
        Self {
            metrics,
            stats,
            listen_addr,
            metrics_path,
        }
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until shutdown.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let addr = listener.local_addr()?;
        let router = create_router(self.metrics, self.stats, &self.metrics_path);

        info!(%addr, path = %self.metrics_path, "HTTP server listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown_requested(shutdown).await;
                debug!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}

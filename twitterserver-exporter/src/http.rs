//! HTTP server for Prometheus metrics endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::exporter::{CONTENT_TYPE, SharedExporter};
use crate::scrape::{HttpSource, SnapshotSource};

/// Application state shared across handlers.
struct AppState<S> {
    exporter: SharedExporter<S>,
    metrics_path: String,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            exporter: Arc::clone(&self.exporter),
            metrics_path: self.metrics_path.clone(),
        }
    }
}

/// Create the HTTP router.
///
/// Every path other than the metrics and health endpoints redirects to the
/// metrics endpoint.
pub fn create_router<S: SnapshotSource>(exporter: SharedExporter<S>, metrics_path: &str) -> Router {
    let state = AppState {
        exporter,
        metrics_path: metrics_path.to_string(),
    };

    Router::new()
        .route(metrics_path, get(metrics_handler::<S>))
        .route("/health", get(health_handler))
        .fallback(redirect_handler::<S>)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the metrics endpoint.
///
/// Scrape failures still produce a 200 carrying the exporter's own metrics.
async fn metrics_handler<S: SnapshotSource>(State(state): State<AppState<S>>) -> Response {
    let body = state.exporter.render().await;

    (StatusCode::OK, [(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response()
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// Permanently redirect to the metrics endpoint.
async fn redirect_handler<S: SnapshotSource>(State(state): State<AppState<S>>) -> Response {
    (
        StatusCode::MOVED_PERMANENTLY,
        [(header::LOCATION, state.metrics_path)],
    )
        .into_response()
}

/// HTTP server configuration.
pub struct HttpServer<S = HttpSource> {
    exporter: SharedExporter<S>,
    listen_addr: SocketAddr,
    metrics_path: String,
}

impl<S: SnapshotSource> HttpServer<S> {
    /// Create a new HTTP server.
    pub fn new(exporter: SharedExporter<S>, listen_addr: SocketAddr, metrics_path: String) -> Self {
        Self {
            exporter,
            listen_addr,
            metrics_path,
        }
    }

    /// Bind the listen address and serve until the shutdown signal is received.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.listen_addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", self.listen_addr, e))?;

        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener until the shutdown signal is received.
    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let router = create_router(self.exporter, &self.metrics_path);
        let addr = listener.local_addr()?;

        info!(
            addr = %addr,
            path = %self.metrics_path,
            "HTTP server listening"
        );

        // Run server with graceful shutdown
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                loop {
                    if shutdown.changed().await.is_err() {
                        break;
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}

//! HTTP sidecar for operational endpoints.
//!
//! Serves `/metrics` for Prometheus scraping and `/healthz` for liveness
//! probes on the configured metrics address. Runs as its own tracked task
//! and stops with the server's shutdown signal.

use std::net::SocketAddr;

use axum::{Router, routing::get};
use tokio_util::sync::CancellationToken;

async fn metrics_handler() -> String {
    crate::metrics::gather_metrics()
}

async fn health_handler() -> &'static str {
    "OK"
}

/// Serves the operational endpoints until `shutdown` fires. Bind and serve
/// failures are logged and end the task; they never take the server down.
pub async fn run_http_server(addr: SocketAddr, shutdown: CancellationToken) {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(health_handler));

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(%addr, error = %err, "metrics endpoint bind failed");
            return;
        }
    };
    tracing::info!(%addr, "metrics endpoint listening");

    let serve = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await });
    if let Err(err) = serve.await {
        tracing::error!(error = %err, "metrics endpoint failed");
    }
}

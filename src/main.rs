//! parleyd - a team messaging server.
//!
//! One binary: the websocket gateway, the channel and post domain, file
//! uploads, the plugin host, and the job scheduler, backed by SQLite.

pub mod analytics;
pub mod bots;
pub mod cache;
pub mod channels;
pub mod cluster;
pub mod config;
pub mod email;
pub mod error;
pub mod files;
pub mod gateway;
pub mod groups;
pub mod http;
pub mod hub;
pub mod jobs;
pub mod metrics;
pub mod model;
pub mod plugins;
pub mod posts;
pub mod push;
pub mod roles;
pub mod search;
pub mod server;
pub mod status;
pub mod store;
pub mod telemetry;
pub mod ws;

use tracing::info;

use crate::config::ConfigStore;
use crate::gateway::Gateway;
use crate::jobs::JobServer;
use crate::server::{SERVER_VERSION, Server, ServerOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    // Logging is configured by the file being loaded, so load failures go
    // to stderr directly. The store keeps the path for admin reloads.
    let config_store = match ConfigStore::load_file(&config_path) {
        Ok(store) => store,
        Err(err) => {
            eprintln!("failed to load config {config_path}: {err}");
            return Err(err.into());
        }
    };
    let config = config_store.get();
    telemetry::init(&config.log);

    info!(
        version = SERVER_VERSION,
        config = %config_path,
        site_url = %config.service.site_url,
        "starting parleyd"
    );

    let metrics_config = config.metrics.clone();
    let srv = Server::new(ServerOptions::new(config_store)).await?;
    srv.start().await?;

    if metrics_config.enable {
        let shutdown = srv.shutdown_signal();
        srv.go(http::run_http_server(metrics_config.listen_address, shutdown));
    }

    let jobs = JobServer::start(srv.clone());

    let gateway = Gateway::bind(srv.clone()).await?;
    srv.go(gateway.run());

    wait_for_signal().await;
    info!("shutdown signal received");

    jobs.stop();
    srv.shutdown().await;
    info!("parleyd stopped");
    Ok(())
}

async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};
    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(err) => {
            tracing::error!(error = %err, "SIGTERM handler installation failed");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

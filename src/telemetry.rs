//! Tracing setup and observability helpers.

use std::time::Instant;

use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// Initializes the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level so operators can raise
/// verbosity without touching the config file. Calling this twice is a
/// no-op; the second `init` would panic, so tests use `try_init` paths
/// of their own.
pub fn init(log: &LogConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log.level.clone()));

    if log.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

/// Guard that times a store operation and records it on drop.
pub struct StoreTimer {
    operation: &'static str,
    start: Instant,
}

impl StoreTimer {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for StoreTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        crate::metrics::observe_store_duration(self.operation, duration);
    }
}

/// Standardized span constructors for request and connection observability.
pub mod spans {
    use tracing::{info_span, Span};

    /// Span covering one websocket connection's lifetime. The `user_id`
    /// field is recorded once the connection authenticates.
    pub fn websocket(conn_id: &str) -> Span {
        info_span!("websocket", conn_id = %conn_id, user_id = tracing::field::Empty)
    }

    /// Span covering one scheduled job run.
    pub fn job(name: &str) -> Span {
        info_span!("job", name = %name)
    }
}

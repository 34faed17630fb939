//! Search engine brokerage.
//!
//! The server composes an optional external search engine behind a trait;
//! nothing in-process indexes today, so the broker's job is lifecycle
//! (start/stop with the server) and answering "is search active".

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::AppResult;

#[async_trait]
pub trait SearchEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self) -> AppResult<()>;

    async fn stop(&self) -> AppResult<()>;
}

/// Holds the registered engine, if any, and proxies lifecycle calls.
#[derive(Default)]
pub struct SearchEngineBroker {
    engine: Option<Arc<dyn SearchEngine>>,
}

impl SearchEngineBroker {
    pub fn new(engine: Option<Arc<dyn SearchEngine>>) -> Self {
        Self { engine }
    }

    pub fn is_active(&self) -> bool {
        self.engine.is_some()
    }

    /// Start the registered engine. Failures are logged and the server
    /// continues without search.
    pub async fn start(&self) {
        if let Some(engine) = &self.engine {
            match engine.start().await {
                Ok(()) => info!(engine = %engine.name(), "search engine started"),
                Err(err) => warn!(engine = %engine.name(), error = %err, "search engine failed to start"),
            }
        }
    }

    pub async fn stop(&self) {
        if let Some(engine) = &self.engine {
            if let Err(err) = engine.stop().await {
                warn!(engine = %engine.name(), error = %err, "search engine failed to stop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FlagEngine {
        started: AtomicBool,
    }

    #[async_trait]
    impl SearchEngine for FlagEngine {
        fn name(&self) -> &str {
            "flag"
        }

        async fn start(&self) -> AppResult<()> {
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn stop(&self) -> AppResult<()> {
            self.started.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn broker_proxies_lifecycle() {
        let engine = Arc::new(FlagEngine {
            started: AtomicBool::new(false),
        });
        let broker = SearchEngineBroker::new(Some(engine.clone()));
        assert!(broker.is_active());

        broker.start().await;
        assert!(engine.started.load(Ordering::SeqCst));
        broker.stop().await;
        assert!(!engine.started.load(Ordering::SeqCst));
    }

    #[test]
    fn empty_broker_is_inactive() {
        assert!(!SearchEngineBroker::default().is_active());
    }
}

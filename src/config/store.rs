//! Live configuration with registered change listeners.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use super::types::{Config, ConfigError};
use crate::model::new_id;

/// Callback invoked with (old, new) after every config swap.
pub type ConfigListener = Box<dyn Fn(&Config, &Config) + Send + Sync>;

/// Holds the active configuration and fans out change notifications.
///
/// Reads return a cheap `Arc` snapshot; a swap is a pointer replace under a
/// short write lock, with listeners invoked after the lock is released so a
/// listener may read the store again.
pub struct ConfigStore {
    current: RwLock<Arc<Config>>,
    listeners: DashMap<String, ConfigListener>,
    path: Option<PathBuf>,
}

impl ConfigStore {
    /// Wrap an already-built configuration (tests, embedded use).
    pub fn new(config: Config) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
            listeners: DashMap::new(),
            path: None,
        }
    }

    /// Load from a TOML file, remembering the path for [`Self::reload`].
    pub fn load_file(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let config = Config::load(&path)?;
        Ok(Self {
            current: RwLock::new(Arc::new(config)),
            listeners: DashMap::new(),
            path: Some(path),
        })
    }

    /// Snapshot of the active configuration.
    pub fn get(&self) -> Arc<Config> {
        self.current.read().clone()
    }

    /// Swap in a new configuration and notify every listener with the old
    /// and new values.
    pub fn set(&self, config: Config) {
        let new = Arc::new(config);
        let old = {
            let mut guard = self.current.write();
            std::mem::replace(&mut *guard, new.clone())
        };
        debug!(listeners = self.listeners.len(), "config updated");
        for entry in self.listeners.iter() {
            (entry.value())(&old, &new);
        }
    }

    /// Re-read the backing file. A file that no longer validates is
    /// rejected and the running configuration stays. No-op without a path.
    pub fn reload(&self) -> Result<(), ConfigError> {
        if let Some(ref path) = self.path {
            let config = Config::load(path)?;
            if let Err(errors) = super::validate(&config) {
                let joined = errors
                    .iter()
                    .map(|err| err.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                return Err(ConfigError::Invalid(joined));
            }
            self.set(config);
        }
        Ok(())
    }

    /// Register a change listener; the returned id unregisters it.
    pub fn add_listener(&self, listener: ConfigListener) -> String {
        let id = new_id();
        self.listeners.insert(id.clone(), listener);
        id
    }

    pub fn remove_listener(&self, id: &str) {
        self.listeners.remove(id);
    }
}

//! In-process plugin environment.
//!
//! Plugins are trait objects registered at server construction; there is no
//! sandbox or external process. Notification hooks run sequentially in
//! registration order. The upload intercept is the one hook that can change
//! the outcome of an operation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::model::{Channel, ChannelMember, FileInfo, User};

mod kv;

pub use kv::{KvSetOptions, PluginKv};

/// Outcome of a plugin's look at an upload in flight.
#[derive(Debug, Default)]
pub enum UploadVerdict {
    /// Let the file through unchanged.
    #[default]
    Allow,
    /// Fail the upload; the reason reaches the caller.
    Reject(String),
    /// Substitute file bytes and/or metadata.
    Replace {
        data: Option<Vec<u8>>,
        info: Option<FileInfo>,
    },
}

/// Hook surface plugins may implement. Every method has a no-op default so
/// a plugin only writes the hooks it cares about.
#[async_trait]
pub trait PluginHooks: Send + Sync {
    /// Stable identifier, also the KV namespace for this plugin.
    fn id(&self) -> &str;

    async fn channel_has_been_created(&self, _channel: &Channel) {}

    async fn user_has_joined_channel(&self, _member: &ChannelMember, _actor: Option<&User>) {}

    async fn user_has_left_channel(&self, _member: &ChannelMember, _actor: Option<&User>) {}

    /// Inspect an upload before it is persisted.
    async fn file_will_be_uploaded(&self, _info: &FileInfo, _data: &[u8]) -> UploadVerdict {
        UploadVerdict::Allow
    }
}

/// Result of running the upload intercept across every registered plugin.
#[derive(Debug)]
pub struct InterceptedUpload {
    pub info: FileInfo,
    /// Replacement bytes, when some plugin substituted the file.
    pub data: Option<Vec<u8>>,
}

/// Owns the registered plugins and gates hook dispatch.
pub struct PluginEnvironment {
    enabled: bool,
    active: AtomicBool,
    hooks: Vec<Arc<dyn PluginHooks>>,
    kv: PluginKv,
}

impl PluginEnvironment {
    pub fn new(enabled: bool, hooks: Vec<Arc<dyn PluginHooks>>, kv: PluginKv) -> Self {
        Self {
            enabled,
            active: AtomicBool::new(true),
            hooks,
            kv,
        }
    }

    pub fn kv(&self) -> &PluginKv {
        &self.kv
    }

    /// True while hooks should run: configured on and not yet shut down.
    pub fn active(&self) -> bool {
        self.enabled && self.active.load(Ordering::Acquire) && !self.hooks.is_empty()
    }

    /// Stop dispatching hooks. In-flight hook calls finish on their own.
    pub fn shutdown(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            debug!(plugins = self.hooks.len(), "plugin environment deactivated");
        }
    }

    pub async fn channel_has_been_created(&self, channel: &Channel) {
        if !self.active() {
            return;
        }
        for hook in &self.hooks {
            hook.channel_has_been_created(channel).await;
        }
    }

    pub async fn user_has_joined_channel(&self, member: &ChannelMember, actor: Option<&User>) {
        if !self.active() {
            return;
        }
        for hook in &self.hooks {
            hook.user_has_joined_channel(member, actor).await;
        }
    }

    pub async fn user_has_left_channel(&self, member: &ChannelMember, actor: Option<&User>) {
        if !self.active() {
            return;
        }
        for hook in &self.hooks {
            hook.user_has_left_channel(member, actor).await;
        }
    }

    /// Run the upload intercept chain.
    ///
    /// Plugins run sequentially in registration order; each sees the effect
    /// of earlier replacements, so the last replacement wins. A rejection
    /// aborts the chain and reports the plugin's reason.
    pub async fn file_will_be_uploaded(
        &self,
        info: FileInfo,
        data: &[u8],
    ) -> Result<InterceptedUpload, String> {
        let mut current = InterceptedUpload { info, data: None };
        if !self.active() {
            return Ok(current);
        }
        for hook in &self.hooks {
            let bytes = current.data.as_deref().unwrap_or(data);
            match hook.file_will_be_uploaded(&current.info, bytes).await {
                UploadVerdict::Allow => {}
                UploadVerdict::Reject(reason) => {
                    debug!(plugin = %hook.id(), reason = %reason, "upload rejected by plugin");
                    return Err(reason);
                }
                UploadVerdict::Replace { data, info } => {
                    if let Some(data) = data {
                        current.data = Some(data);
                    }
                    if let Some(info) = info {
                        current.info = info;
                    }
                }
            }
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    struct StaticVerdict {
        id: &'static str,
        verdict: fn() -> UploadVerdict,
    }

    #[async_trait]
    impl PluginHooks for StaticVerdict {
        fn id(&self) -> &str {
            self.id
        }

        async fn file_will_be_uploaded(&self, _info: &FileInfo, _data: &[u8]) -> UploadVerdict {
            (self.verdict)()
        }
    }

    async fn env(hooks: Vec<Arc<dyn PluginHooks>>) -> PluginEnvironment {
        let store = Store::new(":memory:").await.unwrap();
        PluginEnvironment::new(true, hooks, PluginKv::new(store))
    }

    fn upload_info() -> FileInfo {
        let mut info = FileInfo::new("creator");
        info.set_names("p.txt");
        info
    }

    #[tokio::test]
    async fn last_replacement_wins() {
        let env = env(vec![
            Arc::new(StaticVerdict {
                id: "first",
                verdict: || UploadVerdict::Replace { data: Some(b"one".to_vec()), info: None },
            }),
            Arc::new(StaticVerdict {
                id: "second",
                verdict: || UploadVerdict::Replace { data: Some(b"two".to_vec()), info: None },
            }),
        ])
        .await;

        let out = env.file_will_be_uploaded(upload_info(), b"orig").await.unwrap();
        assert_eq!(out.data.as_deref(), Some(b"two".as_slice()));
    }

    #[tokio::test]
    async fn rejection_stops_the_chain() {
        let env = env(vec![
            Arc::new(StaticVerdict {
                id: "guard",
                verdict: || UploadVerdict::Reject("forbidden mime".to_string()),
            }),
            Arc::new(StaticVerdict {
                id: "later",
                verdict: || UploadVerdict::Replace { data: Some(b"nope".to_vec()), info: None },
            }),
        ])
        .await;

        let reason = env
            .file_will_be_uploaded(upload_info(), b"orig")
            .await
            .unwrap_err();
        assert_eq!(reason, "forbidden mime");
    }

    #[tokio::test]
    async fn shutdown_disables_dispatch() {
        let env = env(vec![Arc::new(StaticVerdict {
            id: "guard",
            verdict: || UploadVerdict::Reject("never".to_string()),
        })])
        .await;
        assert!(env.active());

        env.shutdown();
        assert!(!env.active());
        let out = env.file_will_be_uploaded(upload_info(), b"orig").await.unwrap();
        assert!(out.data.is_none());
    }

    #[tokio::test]
    async fn disabled_environment_never_dispatches() {
        let store = Store::new(":memory:").await.unwrap();
        let env = PluginEnvironment::new(
            false,
            vec![Arc::new(StaticVerdict {
                id: "guard",
                verdict: || UploadVerdict::Reject("never".to_string()),
            })],
            PluginKv::new(store),
        );
        assert!(!env.active());
        assert!(env.file_will_be_uploaded(upload_info(), b"x").await.is_ok());
    }
}

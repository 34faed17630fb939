//! Plugin key/value API with legacy-key migration.
//!
//! Early releases hashed every over-long key before storing it. Reads fall
//! back to the hashed form, successful plain writes garbage-collect it, and
//! deletes remove both, so rows migrate to plain keys as plugins touch them.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha2::{Digest, Sha256};

use crate::error::{AppError, AppResult};
use crate::model::now_millis;
use crate::store::{Store, StoreError};

/// Longest key the legacy schema stored verbatim; longer keys were hashed.
const LEGACY_KEY_MAX_LEN: usize = 50;

/// Write options mirroring the plugin-facing API.
#[derive(Debug, Clone, Default)]
pub struct KvSetOptions {
    /// Apply only if the stored value still equals `old_value`.
    pub atomic: bool,
    /// Expected current value; `None` means "only if absent".
    pub old_value: Option<Vec<u8>>,
    /// TTL in seconds; zero or negative means no expiry.
    pub expire_in_seconds: i64,
}

/// Plugin KV operations over the store.
#[derive(Clone)]
pub struct PluginKv {
    store: Store,
}

impl PluginKv {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn set(&self, plugin_id: &str, key: &str, value: &[u8]) -> AppResult<()> {
        self.set_with_options(plugin_id, key, value, KvSetOptions::default())
            .await
            .map(|_| ())
    }

    /// Write a value; with `atomic` the result reports whether the compare
    /// succeeded, otherwise it is always `true`.
    pub async fn set_with_options(
        &self,
        plugin_id: &str,
        key: &str,
        value: &[u8],
        options: KvSetOptions,
    ) -> AppResult<bool> {
        validate_key(plugin_id, key)?;
        let expire_at = expire_at_from(options.expire_in_seconds);

        let written = if options.atomic {
            self.store
                .plugin_kv()
                .set_with_old_value(
                    plugin_id,
                    key,
                    options.old_value.as_deref(),
                    value,
                    expire_at,
                    now_millis(),
                )
                .await
                .map_err(|err| kv_error("set", err))?
        } else {
            self.store
                .plugin_kv()
                .set(plugin_id, key, value, expire_at)
                .await
                .map_err(|err| kv_error("set", err))?;
            true
        };

        // A committed plain write makes the legacy hashed row stale.
        if written && let Some(hashed) = hashed_form(key) {
            self.store
                .plugin_kv()
                .delete(plugin_id, &hashed)
                .await
                .map_err(|err| kv_error("set", err))?;
        }
        Ok(written)
    }

    pub async fn compare_and_set(
        &self,
        plugin_id: &str,
        key: &str,
        old_value: Option<&[u8]>,
        new_value: &[u8],
    ) -> AppResult<bool> {
        validate_key(plugin_id, key)?;
        self.store
            .plugin_kv()
            .set_with_old_value(plugin_id, key, old_value, new_value, 0, now_millis())
            .await
            .map_err(|err| kv_error("compare_and_set", err))
    }

    pub async fn compare_and_delete(
        &self,
        plugin_id: &str,
        key: &str,
        old_value: &[u8],
    ) -> AppResult<bool> {
        validate_key(plugin_id, key)?;
        self.store
            .plugin_kv()
            .delete_with_old_value(plugin_id, key, old_value, now_millis())
            .await
            .map_err(|err| kv_error("compare_and_delete", err))
    }

    /// Read the plain key, falling back to its legacy hashed form.
    pub async fn get(&self, plugin_id: &str, key: &str) -> AppResult<Option<Vec<u8>>> {
        validate_key(plugin_id, key)?;
        let now = now_millis();
        let repo = self.store.plugin_kv();
        if let Some(value) = repo
            .get(plugin_id, key, now)
            .await
            .map_err(|err| kv_error("get", err))?
        {
            return Ok(Some(value));
        }
        if let Some(hashed) = hashed_form(key) {
            return repo
                .get(plugin_id, &hashed, now)
                .await
                .map_err(|err| kv_error("get", err));
        }
        Ok(None)
    }

    /// Remove the key in both its plain and legacy hashed forms.
    pub async fn delete(&self, plugin_id: &str, key: &str) -> AppResult<()> {
        validate_key(plugin_id, key)?;
        let repo = self.store.plugin_kv();
        repo.delete(plugin_id, key)
            .await
            .map_err(|err| kv_error("delete", err))?;
        if let Some(hashed) = hashed_form(key) {
            repo.delete(plugin_id, &hashed)
                .await
                .map_err(|err| kv_error("delete", err))?;
        }
        Ok(())
    }

    pub async fn delete_all_for_plugin(&self, plugin_id: &str) -> AppResult<()> {
        self.store
            .plugin_kv()
            .delete_all_for_plugin(plugin_id)
            .await
            .map_err(|err| kv_error("delete_all_for_plugin", err))
    }

    pub async fn delete_all_expired(&self) -> AppResult<u64> {
        self.store
            .plugin_kv()
            .delete_expired(now_millis())
            .await
            .map_err(|err| kv_error("delete_all_expired", err))
    }

    pub async fn list_keys(
        &self,
        plugin_id: &str,
        page: i64,
        per_page: i64,
    ) -> AppResult<Vec<String>> {
        if page < 0 || per_page <= 0 {
            return Err(AppError::invalid_input(
                "app.plugin_kv.list_keys.page.app_error",
                "page must be non-negative and per_page positive",
            ));
        }
        self.store
            .plugin_kv()
            .list_keys(plugin_id, page, per_page, now_millis())
            .await
            .map_err(|err| kv_error("list_keys", err))
    }
}

fn validate_key(plugin_id: &str, key: &str) -> AppResult<()> {
    if plugin_id.is_empty() || key.is_empty() {
        return Err(AppError::invalid_input(
            "app.plugin_kv.key.empty.app_error",
            "plugin id and key must not be empty",
        ));
    }
    Ok(())
}

fn expire_at_from(expire_in_seconds: i64) -> i64 {
    if expire_in_seconds > 0 {
        now_millis() + expire_in_seconds * 1000
    } else {
        0
    }
}

/// Legacy hashed form of `key`, or `None` when the key was stored verbatim.
fn hashed_form(key: &str) -> Option<String> {
    if key.len() <= LEGACY_KEY_MAX_LEN {
        return None;
    }
    Some(BASE64.encode(Sha256::digest(key.as_bytes())))
}

fn kv_error(operation: &str, err: StoreError) -> AppError {
    AppError::internal(
        "app.plugin_kv.store.app_error",
        format!("plugin kv {operation} failed"),
    )
    .with_detail(err.to_string())
}

//! Role resolution and the higher-scope permission merge.
//!
//! A channel scheme overrides the stock channel roles for one channel, but
//! it may only restrict the moderated subset: a moderated permission is
//! effective when the higher scope grants it and the scheme role kept it,
//! while every other channel permission follows the higher scope outright.
//! The merge runs at load time so callers always observe effective sets,
//! never the raw stored rows.

use std::collections::HashSet;

use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::model::{CHANNEL_MODERATED_PERMISSIONS, Role, is_built_in_channel_role, now_millis};
use crate::server::App;
use crate::ws::events::EVENT_ROLE_UPDATED;
use crate::ws::{Broadcast, WebSocketEvent};

impl App {
    pub async fn get_role_by_name(&self, name: &str) -> AppResult<Role> {
        let mut roles = self.get_roles_by_names(&[name.to_string()]).await?;
        roles.pop().ok_or_else(|| {
            AppError::not_found("app.role.get.missing.app_error", "role not found")
                .with_detail(format!("name={name}"))
        })
    }

    /// Loads roles by name with effective permission sets.
    pub async fn get_roles_by_names(&self, names: &[String]) -> AppResult<Vec<Role>> {
        let mut roles = self.store().roles().get_by_names(names).await?;
        self.merge_channel_higher_scoped_permissions(&mut roles)
            .await?;
        Ok(roles)
    }

    /// In-place merge for every scheme-managed role in the slice. One
    /// batched store query resolves the higher scopes; names outside any
    /// channel scheme come back without an entry and stay untouched.
    pub(crate) async fn merge_channel_higher_scoped_permissions(
        &self,
        roles: &mut [Role],
    ) -> AppResult<()> {
        let candidates: Vec<String> = roles
            .iter()
            .filter(|r| r.scheme_managed)
            .map(|r| r.name.clone())
            .collect();
        if candidates.is_empty() {
            return Ok(());
        }

        let higher = self
            .store()
            .roles()
            .channel_higher_scoped_permissions(&candidates)
            .await?;
        for role in roles.iter_mut() {
            if let Some(higher_permissions) = higher.get(&role.name) {
                merge_higher_scoped(role, higher_permissions);
            }
        }
        Ok(())
    }

    /// Persists a role change and republishes every role whose effective
    /// permissions may have moved with it.
    ///
    /// Updating a stock channel role shifts the higher scope under every
    /// channel-scheme role, so all of them are re-emitted with recomputed
    /// sets. Stock roles outside the channel scope feed no merge and only
    /// announce themselves.
    pub async fn update_role(&self, role: &Role) -> AppResult<Role> {
        if role.name.is_empty() {
            return Err(AppError::invalid_input(
                "app.role.update.invalid.app_error",
                "role name must not be empty",
            ));
        }

        let mut updated = role.clone();
        updated.update_at = now_millis();
        self.store().roles().save(&updated).await?;

        let built_in_channel = is_built_in_channel_role(&updated.name);
        if updated.built_in && !built_in_channel {
            self.send_role_updated(&updated).await;
            return Ok(updated);
        }

        let mut impacted = if built_in_channel {
            self.store().roles().all_channel_scheme_roles().await?
        } else {
            Vec::new()
        };
        impacted.retain(|r| r.name != updated.name);
        impacted.push(updated.clone());
        self.merge_channel_higher_scoped_permissions(&mut impacted)
            .await?;
        for impacted_role in &impacted {
            self.send_role_updated(impacted_role).await;
        }
        Ok(updated)
    }

    async fn send_role_updated(&self, role: &Role) {
        let event =
            WebSocketEvent::new(EVENT_ROLE_UPDATED, Broadcast::all()).add("role", json!(role));
        self.publish(event).await;
    }
}

/// Applies one higher scope to one scheme-managed role: moderated
/// permissions survive only when both scopes hold them, the rest follow
/// the higher scope.
fn merge_higher_scoped(role: &mut Role, higher: &[String]) {
    let kept: HashSet<&str> = role.permissions.iter().map(String::as_str).collect();
    role.permissions = higher
        .iter()
        .filter(|p| {
            !CHANNEL_MODERATED_PERMISSIONS.contains(&p.as_str()) || kept.contains(p.as_str())
        })
        .cloned()
        .collect();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        CHANNEL_ADMIN_ROLE_ID, CHANNEL_USER_ROLE_ID, Scheme, SchemeScope, new_id,
    };
    use crate::server::tests::test_server;

    fn stock_channel_user() -> Role {
        let mut role = Role::new(
            CHANNEL_USER_ROLE_ID,
            vec![
                "read_channel".to_string(),
                "create_post".to_string(),
                "create_reactions".to_string(),
                "use_channel_mentions".to_string(),
            ],
        );
        role.built_in = true;
        role
    }

    /// A channel scheme's member role with `create_post` revoked.
    fn scheme_member_role(name: &str) -> Role {
        let mut role = Role::new(
            name,
            vec![
                "read_channel".to_string(),
                "create_reactions".to_string(),
                "use_channel_mentions".to_string(),
            ],
        );
        role.scheme_managed = true;
        role
    }

    async fn seed_channel_scheme(app: &App, member_role: &str, admin_role: &str) {
        let mut scheme = Scheme::new(&new_id(), SchemeScope::Channel);
        scheme.default_channel_user_role = member_role.to_string();
        scheme.default_channel_admin_role = admin_role.to_string();
        app.store().schemes().save(&scheme).await.unwrap();
    }

    #[test]
    fn moderated_permissions_need_both_scopes() {
        let mut role = scheme_member_role("scheme_member");
        // The scheme role also carries a stray grant the higher scope
        // lacks; it must not survive.
        role.permissions.push("manage_members".to_string());

        merge_higher_scoped(
            &mut role,
            &[
                "read_channel".to_string(),
                "create_post".to_string(),
                "create_reactions".to_string(),
                "use_channel_mentions".to_string(),
            ],
        );

        assert!(role.permissions.contains(&"read_channel".to_string()));
        assert!(role.permissions.contains(&"create_reactions".to_string()));
        // Revoked by the scheme: gone even though the higher scope has it.
        assert!(!role.permissions.contains(&"create_post".to_string()));
        // Granted by the scheme alone: also gone.
        assert!(!role.permissions.contains(&"manage_members".to_string()));
    }

    #[test]
    fn non_moderated_permissions_follow_the_higher_scope() {
        let mut role = scheme_member_role("scheme_member");
        merge_higher_scoped(
            &mut role,
            &["read_channel".to_string(), "manage_team".to_string()],
        );
        // Not moderated, so the higher scope grants it outright.
        assert!(role.permissions.contains(&"manage_team".to_string()));
    }

    #[tokio::test]
    async fn loading_scheme_roles_merges_in_place() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let member_name = format!("scheme_member_{}", new_id());
        app.store().roles().save(&stock_channel_user()).await.unwrap();
        app.store()
            .roles()
            .save(&scheme_member_role(&member_name))
            .await
            .unwrap();
        seed_channel_scheme(&app, &member_name, CHANNEL_ADMIN_ROLE_ID).await;

        let roles = app
            .get_roles_by_names(&[member_name.clone()])
            .await
            .unwrap();
        assert_eq!(roles.len(), 1);
        let merged = &roles[0];
        assert!(merged.permissions.contains(&"read_channel".to_string()));
        assert!(!merged.permissions.contains(&"create_post".to_string()));

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn roles_outside_any_scheme_load_unchanged() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        app.store().roles().save(&stock_channel_user()).await.unwrap();
        let role = app.get_role_by_name(CHANNEL_USER_ROLE_ID).await.unwrap();
        assert!(role.permissions.contains(&"create_post".to_string()));

        let err = app.get_role_by_name("no_such_role").await.unwrap_err();
        assert_eq!(err.id(), "app.role.get.missing.app_error");

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn updating_a_stock_channel_role_reemits_scheme_roles() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let member_name = format!("scheme_member_{}", new_id());
        app.store().roles().save(&stock_channel_user()).await.unwrap();
        app.store()
            .roles()
            .save(&scheme_member_role(&member_name))
            .await
            .unwrap();
        seed_channel_scheme(&app, &member_name, CHANNEL_ADMIN_ROLE_ID).await;

        // Subscribe a connection so the re-emission is observable.
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let handle = crate::hub::ConnHandle::new(
            "conn1".to_string(),
            "watcher".to_string(),
            "session1".to_string(),
            tx,
            tokio_util::sync::CancellationToken::new(),
        );
        srv.hubs().register(handle).await;
        let hello = rx.recv().await.unwrap();
        assert!(hello.contains("\"hello\""));

        // Drop `use_channel_mentions` from the stock role.
        let mut stock = stock_channel_user();
        stock.permissions.retain(|p| p != "use_channel_mentions");
        app.update_role(&stock).await.unwrap();

        let mut seen = Vec::new();
        for _ in 0..2 {
            let frame: serde_json::Value =
                serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
            assert_eq!(frame["event"], "role_updated");
            let role: Role =
                serde_json::from_value(frame["data"]["role"].clone()).unwrap();
            seen.push(role);
        }
        let scheme_role = seen.iter().find(|r| r.name == member_name).unwrap();
        // The scheme role's effective set lost the permission too.
        assert!(!scheme_role.permissions.contains(&"use_channel_mentions".to_string()));
        assert!(seen.iter().any(|r| r.name == CHANNEL_USER_ROLE_ID));

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn updating_a_non_channel_built_in_role_emits_once() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let mut system_user = Role::new("system_user", vec!["create_team".to_string()]);
        system_user.built_in = true;
        app.store().roles().save(&system_user).await.unwrap();

        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let handle = crate::hub::ConnHandle::new(
            "conn1".to_string(),
            "watcher".to_string(),
            "session1".to_string(),
            tx,
            tokio_util::sync::CancellationToken::new(),
        );
        srv.hubs().register(handle).await;
        let _hello = rx.recv().await.unwrap();

        system_user.permissions.push("create_group_channel".to_string());
        app.update_role(&system_user).await.unwrap();

        let frame: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["event"], "role_updated");
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(50), rx.recv())
                .await
                .is_err()
        );

        srv.shutdown().await;
    }

    #[tokio::test]
    async fn empty_role_name_is_rejected() {
        let srv = test_server().await;
        let app = App::new(srv.clone());

        let err = app
            .update_role(&Role::new("", Vec::new()))
            .await
            .unwrap_err();
        assert_eq!(err.id(), "app.role.update.invalid.app_error");

        srv.shutdown().await;
    }
}

//! Role and scheme repositories.

use std::collections::HashMap;

use sqlx::SqlitePool;

use super::StoreError;
use crate::model::{
    CHANNEL_ADMIN_ROLE_ID, CHANNEL_GUEST_ROLE_ID, CHANNEL_USER_ROLE_ID, Role, Scheme, SchemeScope,
};

type RoleRow = (String, String, String, String, i64, i64, i64, String, bool, bool);

const ROLE_COLUMNS: &str = "id, name, display_name, description, create_at, update_at, \
     delete_at, permissions, scheme_managed, built_in";

fn row_to_role(row: RoleRow) -> Role {
    Role {
        id: row.0,
        name: row.1,
        display_name: row.2,
        description: row.3,
        create_at: row.4,
        update_at: row.5,
        delete_at: row.6,
        permissions: row.7.split_whitespace().map(String::from).collect(),
        scheme_managed: row.8,
        built_in: row.9,
    }
}

pub struct RoleRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> RoleRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, role: &Role) -> Result<(), StoreError> {
        let permissions = role.permissions.join(" ");
        sqlx::query(
            r#"
            INSERT INTO roles (id, name, display_name, description, create_at, update_at,
                               delete_at, permissions, scheme_managed, built_in)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (name) DO UPDATE SET
                display_name = excluded.display_name,
                description = excluded.description,
                update_at = excluded.update_at,
                permissions = excluded.permissions,
                scheme_managed = excluded.scheme_managed
            "#,
        )
        .bind(&role.id)
        .bind(&role.name)
        .bind(&role.display_name)
        .bind(&role.description)
        .bind(role.create_at)
        .bind(role.update_at)
        .bind(role.delete_at)
        .bind(&permissions)
        .bind(role.scheme_managed)
        .bind(role.built_in)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_by_names(&self, names: &[String]) -> Result<Vec<Role>, StoreError> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; names.len()].join(", ");
        let query = format!(
            "SELECT {} FROM roles WHERE name IN ({}) AND delete_at = 0",
            ROLE_COLUMNS, placeholders
        );
        let mut q = sqlx::query_as::<_, RoleRow>(&query);
        for name in names {
            q = q.bind(name);
        }
        let rows = q.fetch_all(self.pool).await?;
        Ok(rows.into_iter().map(row_to_role).collect())
    }

    /// Every role referenced from a live channel-scope scheme.
    pub async fn all_channel_scheme_roles(&self) -> Result<Vec<Role>, StoreError> {
        let rows = sqlx::query_as::<_, RoleRow>(
            r#"
            SELECT DISTINCT r.id, r.name, r.display_name, r.description, r.create_at,
                            r.update_at, r.delete_at, r.permissions, r.scheme_managed,
                            r.built_in
            FROM roles r
            JOIN schemes s ON r.name IN (s.default_channel_guest_role,
                                         s.default_channel_user_role,
                                         s.default_channel_admin_role)
            WHERE s.scope = 'channel' AND s.delete_at = 0 AND r.delete_at = 0
            ORDER BY r.name
            "#,
        )
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_role).collect())
    }

    /// For the named channel-scheme roles, the permission set of the stock
    /// role occupying the same slot (guest, user or admin). One query covers
    /// the whole batch; names outside any channel scheme get no entry.
    pub async fn channel_higher_scoped_permissions(
        &self,
        names: &[String],
    ) -> Result<HashMap<String, Vec<String>>, StoreError> {
        if names.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = vec!["?"; names.len()].join(", ");
        let query = format!(
            r#"
            SELECT s.default_channel_guest_role AS name, hr.permissions
            FROM schemes s JOIN roles hr ON hr.name = '{guest}'
            WHERE s.scope = 'channel' AND s.delete_at = 0 AND hr.delete_at = 0
              AND s.default_channel_guest_role IN ({ph})
            UNION
            SELECT s.default_channel_user_role, hr.permissions
            FROM schemes s JOIN roles hr ON hr.name = '{user}'
            WHERE s.scope = 'channel' AND s.delete_at = 0 AND hr.delete_at = 0
              AND s.default_channel_user_role IN ({ph})
            UNION
            SELECT s.default_channel_admin_role, hr.permissions
            FROM schemes s JOIN roles hr ON hr.name = '{admin}'
            WHERE s.scope = 'channel' AND s.delete_at = 0 AND hr.delete_at = 0
              AND s.default_channel_admin_role IN ({ph})
            "#,
            guest = CHANNEL_GUEST_ROLE_ID,
            user = CHANNEL_USER_ROLE_ID,
            admin = CHANNEL_ADMIN_ROLE_ID,
            ph = placeholders
        );
        let mut q = sqlx::query_as::<_, (String, String)>(&query);
        for _ in 0..3 {
            for name in names {
                q = q.bind(name);
            }
        }
        let rows = q.fetch_all(self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|(name, permissions)| {
                (name, permissions.split_whitespace().map(String::from).collect())
            })
            .collect())
    }
}

type SchemeRow = (
    String,
    String,
    String,
    String,
    i64,
    i64,
    i64,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
);

const SCHEME_COLUMNS: &str = "id, name, display_name, description, create_at, update_at, \
     delete_at, scope, default_team_admin_role, default_team_user_role, \
     default_team_guest_role, default_channel_admin_role, default_channel_user_role, \
     default_channel_guest_role";

fn row_to_scheme(row: SchemeRow) -> Result<Scheme, StoreError> {
    let scope = match row.7.as_str() {
        "team" => SchemeScope::Team,
        "channel" => SchemeScope::Channel,
        other => return Err(StoreError::not_found("scheme scope", other.to_string())),
    };
    Ok(Scheme {
        id: row.0,
        name: row.1,
        display_name: row.2,
        description: row.3,
        create_at: row.4,
        update_at: row.5,
        delete_at: row.6,
        scope,
        default_team_admin_role: row.8,
        default_team_user_role: row.9,
        default_team_guest_role: row.10,
        default_channel_admin_role: row.11,
        default_channel_user_role: row.12,
        default_channel_guest_role: row.13,
    })
}

pub struct SchemeRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SchemeRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, scheme: &Scheme) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO schemes (id, name, display_name, description, create_at, update_at,
                                 delete_at, scope, default_team_admin_role,
                                 default_team_user_role, default_team_guest_role,
                                 default_channel_admin_role, default_channel_user_role,
                                 default_channel_guest_role)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&scheme.id)
        .bind(&scheme.name)
        .bind(&scheme.display_name)
        .bind(&scheme.description)
        .bind(scheme.create_at)
        .bind(scheme.update_at)
        .bind(scheme.delete_at)
        .bind(scheme.scope.as_str())
        .bind(&scheme.default_team_admin_role)
        .bind(&scheme.default_team_user_role)
        .bind(&scheme.default_team_guest_role)
        .bind(&scheme.default_channel_admin_role)
        .bind(&scheme.default_channel_user_role)
        .bind(&scheme.default_channel_guest_role)
        .execute(self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return StoreError::conflict("scheme", scheme.name.clone());
            }
            StoreError::from(e)
        })?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Scheme, StoreError> {
        let row = sqlx::query_as::<_, SchemeRow>(&format!(
            "SELECT {} FROM schemes WHERE id = ? AND delete_at = 0",
            SCHEME_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("scheme", id))?;
        row_to_scheme(row)
    }
}

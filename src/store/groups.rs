//! Group repository: groups, memberships and syncable bindings.

use sqlx::SqlitePool;

use super::StoreError;
use crate::model::{Group, GroupSyncable, GroupSyncableType};

type GroupRow = (String, String, String, String, String, String, i64, i64, i64, bool);

const GROUP_COLUMNS: &str = "id, name, display_name, description, source, remote_id, \
     create_at, update_at, delete_at, allow_reference";

fn row_to_group(row: GroupRow) -> Group {
    Group {
        id: row.0,
        name: row.1,
        display_name: row.2,
        description: row.3,
        source: row.4,
        remote_id: row.5,
        create_at: row.6,
        update_at: row.7,
        delete_at: row.8,
        allow_reference: row.9,
    }
}

type SyncableRow = (String, String, String, bool, bool, i64, i64, i64);

fn row_to_syncable(row: SyncableRow) -> Result<GroupSyncable, StoreError> {
    let syncable_type = match row.2.as_str() {
        "team" => GroupSyncableType::Team,
        "channel" => GroupSyncableType::Channel,
        other => return Err(StoreError::not_found("syncable type", other.to_string())),
    };
    Ok(GroupSyncable {
        group_id: row.0,
        syncable_id: row.1,
        syncable_type,
        auto_add: row.3,
        scheme_admin: row.4,
        create_at: row.5,
        update_at: row.6,
        delete_at: row.7,
    })
}

pub struct GroupRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> GroupRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, group: &Group) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO user_groups (id, name, display_name, description, source, remote_id,
                                     create_at, update_at, delete_at, allow_reference)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&group.id)
        .bind(&group.name)
        .bind(&group.display_name)
        .bind(&group.description)
        .bind(&group.source)
        .bind(&group.remote_id)
        .bind(group.create_at)
        .bind(group.update_at)
        .bind(group.delete_at)
        .bind(group.allow_reference)
        .execute(self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return StoreError::conflict("group", group.name.clone());
            }
            StoreError::from(e)
        })?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Group, StoreError> {
        let row = sqlx::query_as::<_, GroupRow>(&format!(
            "SELECT {} FROM user_groups WHERE id = ? AND delete_at = 0",
            GROUP_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("group", id))?;
        Ok(row_to_group(row))
    }

    pub async fn update(&self, group: &Group) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE user_groups
            SET display_name = ?, description = ?, remote_id = ?, update_at = ?,
                allow_reference = ?
            WHERE id = ? AND delete_at = 0
            "#,
        )
        .bind(&group.display_name)
        .bind(&group.description)
        .bind(&group.remote_id)
        .bind(group.update_at)
        .bind(group.allow_reference)
        .bind(&group.id)
        .execute(self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("group", group.id.clone()));
        }
        Ok(())
    }

    pub async fn delete(&self, id: &str, now: i64) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE user_groups SET delete_at = ?, update_at = ? WHERE id = ? AND delete_at = 0",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("group", id));
        }
        Ok(())
    }

    pub async fn add_member(&self, group_id: &str, user_id: &str, now: i64) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO group_members (group_id, user_id, create_at, delete_at)
            VALUES (?, ?, ?, 0)
            ON CONFLICT (group_id, user_id) DO UPDATE SET delete_at = 0
            "#,
        )
        .bind(group_id)
        .bind(user_id)
        .bind(now)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove_member(&self, group_id: &str, user_id: &str, now: i64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE group_members SET delete_at = ? WHERE group_id = ? AND user_id = ?",
        )
        .bind(now)
        .bind(group_id)
        .bind(user_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn member_ids(&self, group_id: &str) -> Result<Vec<String>, StoreError> {
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT user_id FROM group_members WHERE group_id = ? AND delete_at = 0",
        )
        .bind(group_id)
        .fetch_all(self.pool)
        .await?;
        Ok(ids)
    }

    /// Whether the user belongs to any group bound to the syncable object.
    /// Group-constrained membership checks reduce to this.
    pub async fn user_in_syncable_groups(
        &self,
        user_id: &str,
        syncable_id: &str,
        syncable_type: GroupSyncableType,
    ) -> Result<bool, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM group_members gm
            JOIN group_syncables gs ON gm.group_id = gs.group_id
            WHERE gm.user_id = ? AND gm.delete_at = 0
              AND gs.syncable_id = ? AND gs.syncable_type = ? AND gs.delete_at = 0
            "#,
        )
        .bind(user_id)
        .bind(syncable_id)
        .bind(syncable_type.as_str())
        .fetch_one(self.pool)
        .await?;
        Ok(count > 0)
    }

    pub async fn save_syncable(&self, syncable: &GroupSyncable) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO group_syncables (group_id, syncable_id, syncable_type, auto_add,
                                         scheme_admin, create_at, update_at, delete_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (group_id, syncable_id, syncable_type) DO UPDATE SET
                auto_add = excluded.auto_add,
                scheme_admin = excluded.scheme_admin,
                update_at = excluded.update_at,
                delete_at = excluded.delete_at
            "#,
        )
        .bind(&syncable.group_id)
        .bind(&syncable.syncable_id)
        .bind(syncable.syncable_type.as_str())
        .bind(syncable.auto_add)
        .bind(syncable.scheme_admin)
        .bind(syncable.create_at)
        .bind(syncable.update_at)
        .bind(syncable.delete_at)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn syncables_for_object(
        &self,
        syncable_id: &str,
        syncable_type: GroupSyncableType,
    ) -> Result<Vec<GroupSyncable>, StoreError> {
        let rows = sqlx::query_as::<_, SyncableRow>(
            r#"
            SELECT group_id, syncable_id, syncable_type, auto_add, scheme_admin,
                   create_at, update_at, delete_at
            FROM group_syncables
            WHERE syncable_id = ? AND syncable_type = ? AND delete_at = 0
            "#,
        )
        .bind(syncable_id)
        .bind(syncable_type.as_str())
        .fetch_all(self.pool)
        .await?;
        rows.into_iter().map(row_to_syncable).collect()
    }

    pub async fn syncables_for_group(
        &self,
        group_id: &str,
        syncable_type: GroupSyncableType,
    ) -> Result<Vec<GroupSyncable>, StoreError> {
        let rows = sqlx::query_as::<_, SyncableRow>(
            r#"
            SELECT group_id, syncable_id, syncable_type, auto_add, scheme_admin,
                   create_at, update_at, delete_at
            FROM group_syncables
            WHERE group_id = ? AND syncable_type = ? AND delete_at = 0
            "#,
        )
        .bind(group_id)
        .bind(syncable_type.as_str())
        .fetch_all(self.pool)
        .await?;
        rows.into_iter().map(row_to_syncable).collect()
    }

    pub async fn get_syncable(
        &self,
        group_id: &str,
        syncable_id: &str,
        syncable_type: GroupSyncableType,
    ) -> Result<Option<GroupSyncable>, StoreError> {
        let row = sqlx::query_as::<_, SyncableRow>(
            r#"
            SELECT group_id, syncable_id, syncable_type, auto_add, scheme_admin,
                   create_at, update_at, delete_at
            FROM group_syncables
            WHERE group_id = ? AND syncable_id = ? AND syncable_type = ? AND delete_at = 0
            "#,
        )
        .bind(group_id)
        .bind(syncable_id)
        .bind(syncable_type.as_str())
        .fetch_optional(self.pool)
        .await?;
        row.map(row_to_syncable).transpose()
    }

    pub async fn delete_syncable(
        &self,
        group_id: &str,
        syncable_id: &str,
        syncable_type: GroupSyncableType,
        now: i64,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE group_syncables SET delete_at = ?, update_at = ?
            WHERE group_id = ? AND syncable_id = ? AND syncable_type = ? AND delete_at = 0
            "#,
        )
        .bind(now)
        .bind(now)
        .bind(group_id)
        .bind(syncable_id)
        .bind(syncable_type.as_str())
        .execute(self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(
                "group syncable",
                format!("{group_id}/{syncable_id}"),
            ));
        }
        Ok(())
    }
}

//! Team and team-membership repository.

use sqlx::SqlitePool;

use super::StoreError;
use crate::model::{Team, TeamMember};

type TeamRow = (
    String,         // id
    i64,            // create_at
    i64,            // update_at
    i64,            // delete_at
    String,         // display_name
    String,         // name
    String,         // description
    String,         // email
    String,         // team_type
    String,         // allowed_domains
    String,         // invite_id
    Option<String>, // scheme_id
    bool,           // group_constrained
);

const TEAM_COLUMNS: &str = "id, create_at, update_at, delete_at, display_name, name, \
     description, email, team_type, allowed_domains, invite_id, scheme_id, group_constrained";

fn row_to_team(row: TeamRow) -> Team {
    Team {
        id: row.0,
        create_at: row.1,
        update_at: row.2,
        delete_at: row.3,
        display_name: row.4,
        name: row.5,
        description: row.6,
        email: row.7,
        team_type: row.8,
        allowed_domains: row.9,
        invite_id: row.10,
        scheme_id: row.11,
        group_constrained: row.12,
    }
}

type TeamMemberRow = (String, String, String, i64, bool, bool, bool);

fn row_to_team_member(row: TeamMemberRow) -> TeamMember {
    TeamMember {
        team_id: row.0,
        user_id: row.1,
        roles: row.2,
        delete_at: row.3,
        scheme_user: row.4,
        scheme_admin: row.5,
        scheme_guest: row.6,
    }
}

pub struct TeamRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> TeamRepository<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn save(&self, team: &Team) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO teams (id, create_at, update_at, delete_at, display_name, name,
                               description, email, team_type, allowed_domains, invite_id,
                               scheme_id, group_constrained)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&team.id)
        .bind(team.create_at)
        .bind(team.update_at)
        .bind(team.delete_at)
        .bind(&team.display_name)
        .bind(&team.name)
        .bind(&team.description)
        .bind(&team.email)
        .bind(&team.team_type)
        .bind(&team.allowed_domains)
        .bind(&team.invite_id)
        .bind(&team.scheme_id)
        .bind(team.group_constrained)
        .execute(self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return StoreError::conflict("team", team.name.clone());
            }
            StoreError::from(e)
        })?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Team, StoreError> {
        let row = sqlx::query_as::<_, TeamRow>(&format!(
            "SELECT {} FROM teams WHERE id = ?",
            TEAM_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("team", id))?;
        Ok(row_to_team(row))
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM teams WHERE delete_at = 0")
                .fetch_one(self.pool)
                .await?;
        Ok(count)
    }

    // --- membership ---

    pub async fn save_member(&self, member: &TeamMember) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO team_members (team_id, user_id, roles, delete_at,
                                      scheme_user, scheme_admin, scheme_guest)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (team_id, user_id)
            DO UPDATE SET roles = excluded.roles, delete_at = excluded.delete_at,
                          scheme_user = excluded.scheme_user,
                          scheme_admin = excluded.scheme_admin,
                          scheme_guest = excluded.scheme_guest
            "#,
        )
        .bind(&member.team_id)
        .bind(&member.user_id)
        .bind(&member.roles)
        .bind(member.delete_at)
        .bind(member.scheme_user)
        .bind(member.scheme_admin)
        .bind(member.scheme_guest)
        .execute(self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_member(
        &self,
        team_id: &str,
        user_id: &str,
    ) -> Result<TeamMember, StoreError> {
        let row = sqlx::query_as::<_, TeamMemberRow>(
            r#"
            SELECT team_id, user_id, roles, delete_at, scheme_user, scheme_admin, scheme_guest
            FROM team_members
            WHERE team_id = ? AND user_id = ? AND delete_at = 0
            "#,
        )
        .bind(team_id)
        .bind(user_id)
        .fetch_optional(self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("team member", user_id))?;
        Ok(row_to_team_member(row))
    }

    pub async fn get_members_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<TeamMember>, StoreError> {
        let rows = sqlx::query_as::<_, TeamMemberRow>(
            r#"
            SELECT team_id, user_id, roles, delete_at, scheme_user, scheme_admin, scheme_guest
            FROM team_members
            WHERE user_id = ? AND delete_at = 0
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool)
        .await?;
        Ok(rows.into_iter().map(row_to_team_member).collect())
    }

    /// Whether two users share at least one live team membership.
    pub async fn users_share_team(
        &self,
        user_id_a: &str,
        user_id_b: &str,
    ) -> Result<bool, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM team_members a
            JOIN team_members b ON a.team_id = b.team_id
            WHERE a.user_id = ? AND b.user_id = ? AND a.delete_at = 0 AND b.delete_at = 0
            "#,
        )
        .bind(user_id_a)
        .bind(user_id_b)
        .fetch_one(self.pool)
        .await?;
        Ok(count > 0)
    }

    pub async fn remove_member(&self, team_id: &str, user_id: &str, now: i64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE team_members SET delete_at = ? WHERE team_id = ? AND user_id = ?",
        )
        .bind(now)
        .bind(team_id)
        .bind(user_id)
        .execute(self.pool)
        .await?;
        Ok(())
    }
}

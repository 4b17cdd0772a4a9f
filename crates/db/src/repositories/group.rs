use sqlx::Row;

use signoff_core::domain::group::{ApproverGroup, GroupId};
use signoff_core::domain::principal::{RoleId, TenantId, UserId};

use super::{parse_timestamp, RepositoryError};
use crate::DbPool;

pub struct SqlGroupRepository {
    pool: DbPool,
}

impl SqlGroupRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(&self, id: &GroupId) -> Result<Option<ApproverGroup>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, tenant_id, name, deleted, created_at, updated_at
             FROM approver_group WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut group = row_to_group(&row)?;
        self.load_members(&mut group).await?;
        Ok(Some(group))
    }

    pub async fn list_for_tenant(
        &self,
        tenant: &TenantId,
    ) -> Result<Vec<ApproverGroup>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, name, deleted, created_at, updated_at
             FROM approver_group WHERE tenant_id = ? AND deleted = 0
             ORDER BY name",
        )
        .bind(&tenant.0)
        .fetch_all(&self.pool)
        .await?;

        let mut groups = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut group = row_to_group(row)?;
            self.load_members(&mut group).await?;
            groups.push(group);
        }
        Ok(groups)
    }

    /// Upserts the group and replaces its membership rows. Name uniqueness
    /// per tenant is enforced by a partial unique index over live rows.
    pub async fn save(&self, group: &ApproverGroup) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO approver_group (id, tenant_id, name, deleted, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 deleted = excluded.deleted,
                 updated_at = excluded.updated_at",
        )
        .bind(&group.id.0)
        .bind(&group.tenant_id.0)
        .bind(&group.name)
        .bind(group.deleted as i64)
        .bind(group.created_at.to_rfc3339())
        .bind(group.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await;

        if let Err(sqlx::Error::Database(db_error)) = &result {
            if db_error.is_unique_violation() {
                return Err(RepositoryError::Constraint(format!(
                    "group named `{}` already exists for tenant `{}`",
                    group.name, group.tenant_id
                )));
            }
        }
        result?;

        sqlx::query("DELETE FROM approver_group_user WHERE group_id = ?")
            .bind(&group.id.0)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM approver_group_role WHERE group_id = ?")
            .bind(&group.id.0)
            .execute(&mut *tx)
            .await?;

        for user in &group.member_users {
            sqlx::query("INSERT INTO approver_group_user (group_id, user_id) VALUES (?, ?)")
                .bind(&group.id.0)
                .bind(&user.0)
                .execute(&mut *tx)
                .await?;
        }
        for role in &group.member_roles {
            sqlx::query("INSERT INTO approver_group_role (group_id, role_id) VALUES (?, ?)")
                .bind(&group.id.0)
                .bind(&role.0)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn mark_deleted(&self, id: &GroupId) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE approver_group SET deleted = 1, updated_at = ? WHERE id = ?",
        )
        .bind(chrono::Utc::now().to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_members(&self, group: &mut ApproverGroup) -> Result<(), RepositoryError> {
        let user_rows = sqlx::query(
            "SELECT user_id FROM approver_group_user WHERE group_id = ? ORDER BY user_id",
        )
        .bind(&group.id.0)
        .fetch_all(&self.pool)
        .await?;
        group.member_users = user_rows
            .iter()
            .map(|row| {
                row.try_get::<String, _>("user_id")
                    .map(UserId)
                    .map_err(|e| RepositoryError::Decode(e.to_string()))
            })
            .collect::<Result<_, _>>()?;

        let role_rows = sqlx::query(
            "SELECT role_id FROM approver_group_role WHERE group_id = ? ORDER BY role_id",
        )
        .bind(&group.id.0)
        .fetch_all(&self.pool)
        .await?;
        group.member_roles = role_rows
            .iter()
            .map(|row| {
                row.try_get::<String, _>("role_id")
                    .map(RoleId)
                    .map_err(|e| RepositoryError::Decode(e.to_string()))
            })
            .collect::<Result<_, _>>()?;

        Ok(())
    }
}

fn row_to_group(row: &sqlx::sqlite::SqliteRow) -> Result<ApproverGroup, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let tenant_id: String =
        row.try_get("tenant_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let name: String = row.try_get("name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let deleted: i64 =
        row.try_get("deleted").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(ApproverGroup {
        id: GroupId(id),
        tenant_id: TenantId(tenant_id),
        name,
        member_users: Vec::new(),
        member_roles: Vec::new(),
        deleted: deleted != 0,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

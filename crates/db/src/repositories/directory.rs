use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::Row;

use signoff_core::directory::PrincipalDirectory;
use signoff_core::domain::principal::{RoleId, TenantId, UserId};
use signoff_core::store::StoreError;

use super::{backend, RepositoryError};
use crate::DbPool;

pub struct SqlPrincipalDirectory {
    pool: DbPool,
}

impl SqlPrincipalDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn upsert_principal(
        &self,
        user: &UserId,
        tenant: &TenantId,
        display_name: &str,
        active: bool,
    ) -> Result<(), RepositoryError> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO principal (id, tenant_id, display_name, active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 display_name = excluded.display_name,
                 active = excluded.active,
                 updated_at = excluded.updated_at",
        )
        .bind(&user.0)
        .bind(&tenant.0)
        .bind(display_name)
        .bind(active as i64)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_active(&self, user: &UserId, active: bool) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE principal SET active = ?, updated_at = ? WHERE id = ?")
            .bind(active as i64)
            .bind(chrono::Utc::now().to_rfc3339())
            .bind(&user.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn grant_role(&self, user: &UserId, role: &RoleId) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO principal_role (user_id, role_id) VALUES (?, ?)
             ON CONFLICT(user_id, role_id) DO NOTHING",
        )
        .bind(&user.0)
        .bind(&role.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn revoke_role(&self, user: &UserId, role: &RoleId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM principal_role WHERE user_id = ? AND role_id = ?")
            .bind(&user.0)
            .bind(&role.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PrincipalDirectory for SqlPrincipalDirectory {
    async fn active_users(&self, users: &[UserId]) -> Result<HashSet<UserId>, StoreError> {
        let mut active = HashSet::new();
        for user in users {
            let row = sqlx::query("SELECT active FROM principal WHERE id = ?")
                .bind(&user.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
            if let Some(row) = row {
                let flag: i64 = row.try_get("active").map_err(backend)?;
                if flag != 0 {
                    active.insert(user.clone());
                }
            }
        }
        Ok(active)
    }

    async fn users_with_roles(&self, roles: &[RoleId]) -> Result<HashSet<UserId>, StoreError> {
        let mut users = HashSet::new();
        for role in roles {
            let rows = sqlx::query(
                "SELECT p.id FROM principal p
                 JOIN principal_role r ON r.user_id = p.id
                 WHERE r.role_id = ? AND p.active = 1",
            )
            .bind(&role.0)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
            for row in &rows {
                let id: String = row.try_get("id").map_err(backend)?;
                users.insert(UserId(id));
            }
        }
        Ok(users)
    }
}

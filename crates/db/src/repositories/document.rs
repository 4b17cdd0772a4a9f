use std::collections::BTreeSet;

use sqlx::Row;

use signoff_core::domain::action::ActionCode;
use signoff_core::domain::document::{
    ApprovalDocument, ApprovalDocumentLevel, DocumentId, LevelId,
};
use signoff_core::domain::entity::EntityTypeTag;
use signoff_core::domain::group::GroupId;
use signoff_core::domain::principal::TenantId;

use super::{parse_timestamp, RepositoryError};
use crate::DbPool;

pub struct SqlDocumentRepository {
    pool: DbPool,
}

impl SqlDocumentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn find_by_id(
        &self,
        id: &DocumentId,
    ) -> Result<Option<(ApprovalDocument, Vec<ApprovalDocumentLevel>)>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, tenant_id, entity_type, description, deleted, created_at, updated_at
             FROM approval_document WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let mut document = row_to_document(&row)?;
        document.actions = self.load_actions(id).await?;
        let levels = self.load_levels(id).await?;
        Ok(Some((document, levels)))
    }

    /// Live documents for one tenant and entity type, actions hydrated,
    /// levels left to `find_by_id`.
    pub async fn list_for_tenant(
        &self,
        tenant: &TenantId,
        entity_type: &EntityTypeTag,
    ) -> Result<Vec<ApprovalDocument>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, entity_type, description, deleted, created_at, updated_at
             FROM approval_document
             WHERE tenant_id = ? AND entity_type = ? AND deleted = 0
             ORDER BY id",
        )
        .bind(&tenant.0)
        .bind(&entity_type.0)
        .fetch_all(&self.pool)
        .await?;

        let mut documents = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut document = row_to_document(row)?;
            document.actions = self.load_actions(&document.id).await?;
            documents.push(document);
        }
        Ok(documents)
    }

    /// Upserts the document with its action set and level layout. Two live
    /// documents for the same tenant and entity type may not govern an
    /// identical action set; action sets are compared here because sqlite
    /// cannot express set equality as a constraint.
    pub async fn save(
        &self,
        document: &ApprovalDocument,
        levels: &[ApprovalDocumentLevel],
    ) -> Result<(), RepositoryError> {
        if !document.deleted {
            let siblings = self
                .sibling_action_sets(&document.tenant_id, &document.entity_type, &document.id)
                .await?;
            if siblings.iter().any(|actions| actions == &document.actions) {
                return Err(RepositoryError::Constraint(format!(
                    "document with identical action set already active for tenant `{}` type `{}`",
                    document.tenant_id, document.entity_type
                )));
            }
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO approval_document
                 (id, tenant_id, entity_type, description, deleted, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 description = excluded.description,
                 deleted = excluded.deleted,
                 updated_at = excluded.updated_at",
        )
        .bind(&document.id.0)
        .bind(&document.tenant_id.0)
        .bind(&document.entity_type.0)
        .bind(&document.description)
        .bind(document.deleted as i64)
        .bind(document.created_at.to_rfc3339())
        .bind(document.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM approval_document_action WHERE document_id = ?")
            .bind(&document.id.0)
            .execute(&mut *tx)
            .await?;
        for action in &document.actions {
            sqlx::query(
                "INSERT INTO approval_document_action (document_id, action_code) VALUES (?, ?)",
            )
            .bind(&document.id.0)
            .bind(action.as_str())
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "DELETE FROM level_approver_group WHERE level_id IN
                 (SELECT id FROM approval_document_level WHERE document_id = ?)",
        )
        .bind(&document.id.0)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM level_overrider_group WHERE level_id IN
                 (SELECT id FROM approval_document_level WHERE document_id = ?)",
        )
        .bind(&document.id.0)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM approval_document_level WHERE document_id = ?")
            .bind(&document.id.0)
            .execute(&mut *tx)
            .await?;

        for level in levels {
            sqlx::query(
                "INSERT INTO approval_document_level (id, document_id, level) VALUES (?, ?, ?)",
            )
            .bind(&level.id.0)
            .bind(&document.id.0)
            .bind(level.level as i64)
            .execute(&mut *tx)
            .await?;

            for group in &level.approver_groups {
                sqlx::query(
                    "INSERT INTO level_approver_group (level_id, group_id) VALUES (?, ?)",
                )
                .bind(&level.id.0)
                .bind(&group.0)
                .execute(&mut *tx)
                .await?;
            }
            for group in &level.overrider_groups {
                sqlx::query(
                    "INSERT INTO level_overrider_group (level_id, group_id) VALUES (?, ?)",
                )
                .bind(&level.id.0)
                .bind(&group.0)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn mark_deleted(&self, id: &DocumentId) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE approval_document SET deleted = 1, updated_at = ? WHERE id = ?")
            .bind(chrono::Utc::now().to_rfc3339())
            .bind(&id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn sibling_action_sets(
        &self,
        tenant: &TenantId,
        entity_type: &EntityTypeTag,
        excluding: &DocumentId,
    ) -> Result<Vec<BTreeSet<ActionCode>>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT d.id AS document_id, a.action_code
             FROM approval_document d
             JOIN approval_document_action a ON a.document_id = d.id
             WHERE d.tenant_id = ? AND d.entity_type = ? AND d.deleted = 0 AND d.id != ?
             ORDER BY d.id",
        )
        .bind(&tenant.0)
        .bind(&entity_type.0)
        .bind(&excluding.0)
        .fetch_all(&self.pool)
        .await?;

        let mut sets: Vec<(String, BTreeSet<ActionCode>)> = Vec::new();
        for row in &rows {
            let document_id: String = row
                .try_get("document_id")
                .map_err(|e| RepositoryError::Decode(e.to_string()))?;
            let action_code: String = row
                .try_get("action_code")
                .map_err(|e| RepositoryError::Decode(e.to_string()))?;
            match sets.last_mut() {
                Some((id, actions)) if *id == document_id => {
                    actions.insert(ActionCode::new(action_code));
                }
                _ => {
                    let mut actions = BTreeSet::new();
                    actions.insert(ActionCode::new(action_code));
                    sets.push((document_id, actions));
                }
            }
        }
        Ok(sets.into_iter().map(|(_, actions)| actions).collect())
    }

    async fn load_actions(&self, id: &DocumentId) -> Result<BTreeSet<ActionCode>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT action_code FROM approval_document_action WHERE document_id = ?",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("action_code")
                    .map(ActionCode::new)
                    .map_err(|e| RepositoryError::Decode(e.to_string()))
            })
            .collect()
    }

    async fn load_levels(
        &self,
        id: &DocumentId,
    ) -> Result<Vec<ApprovalDocumentLevel>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, document_id, level FROM approval_document_level
             WHERE document_id = ? ORDER BY level",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        let mut levels = Vec::with_capacity(rows.len());
        for row in &rows {
            let level_id: String =
                row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
            let document_id: String = row
                .try_get("document_id")
                .map_err(|e| RepositoryError::Decode(e.to_string()))?;
            let level: i64 =
                row.try_get("level").map_err(|e| RepositoryError::Decode(e.to_string()))?;

            levels.push(ApprovalDocumentLevel {
                id: LevelId(level_id.clone()),
                document_id: DocumentId(document_id),
                level: level as u32,
                approver_groups: self.load_level_groups("level_approver_group", &level_id).await?,
                overrider_groups: self
                    .load_level_groups("level_overrider_group", &level_id)
                    .await?,
            });
        }
        Ok(levels)
    }

    async fn load_level_groups(
        &self,
        table: &str,
        level_id: &str,
    ) -> Result<Vec<GroupId>, RepositoryError> {
        let sql = format!("SELECT group_id FROM {table} WHERE level_id = ? ORDER BY group_id");
        let rows = sqlx::query(&sql).bind(level_id).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("group_id")
                    .map(GroupId)
                    .map_err(|e| RepositoryError::Decode(e.to_string()))
            })
            .collect()
    }
}

fn row_to_document(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalDocument, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let tenant_id: String =
        row.try_get("tenant_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let entity_type: String =
        row.try_get("entity_type").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let description: String =
        row.try_get("description").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let deleted: i64 =
        row.try_get("deleted").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(ApprovalDocument {
        id: DocumentId(id),
        tenant_id: TenantId(tenant_id),
        entity_type: EntityTypeTag(entity_type),
        description,
        actions: BTreeSet::new(),
        deleted: deleted != 0,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

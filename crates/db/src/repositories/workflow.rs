use std::collections::BTreeSet;

use async_trait::async_trait;
use sqlx::Row;

use signoff_core::domain::action::ActionCode;
use signoff_core::domain::approval::{
    Approval, ApprovalId, ApprovalTask, TaskId, TaskStatus,
};
use signoff_core::domain::document::{
    ApprovalDocument, ApprovalDocumentLevel, DocumentId, LevelId,
};
use signoff_core::domain::entity::{EntityRef, EntityTypeTag};
use signoff_core::domain::group::{ApproverGroup, GroupId};
use signoff_core::domain::principal::{RoleId, TenantId, UserId};
use signoff_core::run::ApprovalRun;
use signoff_core::store::{DecisionRecord, StoreError, WorkflowStore};

use super::{
    approval_status_as_str, backend, parse_approval_status, parse_task_status, parse_timestamp,
    task_status_as_str,
};
use crate::DbPool;

/// Sql-backed workflow store. `commit_decision` performs the conditional
/// write that serializes racing decisions on one task.
pub struct SqlWorkflowStore {
    pool: DbPool,
}

impl SqlWorkflowStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn load_action_set(&self, document: &DocumentId) -> Result<BTreeSet<ActionCode>, StoreError> {
        let rows = sqlx::query(
            "SELECT action_code FROM approval_document_action WHERE document_id = ?",
        )
        .bind(&document.0)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter()
            .map(|row| {
                row.try_get::<String, _>("action_code").map(ActionCode::new).map_err(backend)
            })
            .collect()
    }

    async fn load_level_groups(
        &self,
        table: &str,
        level_id: &str,
    ) -> Result<Vec<GroupId>, StoreError> {
        let sql = format!("SELECT group_id FROM {table} WHERE level_id = ? ORDER BY group_id");
        let rows = sqlx::query(&sql).bind(level_id).fetch_all(&self.pool).await.map_err(backend)?;
        rows.iter()
            .map(|row| row.try_get::<String, _>("group_id").map(GroupId).map_err(backend))
            .collect()
    }

    async fn hydrate_level(
        &self,
        row: &sqlx::sqlite::SqliteRow,
    ) -> Result<ApprovalDocumentLevel, StoreError> {
        let level_id: String = row.try_get("id").map_err(backend)?;
        let document_id: String = row.try_get("document_id").map_err(backend)?;
        let level: i64 = row.try_get("level").map_err(backend)?;

        Ok(ApprovalDocumentLevel {
            id: LevelId(level_id.clone()),
            document_id: DocumentId(document_id),
            level: level as u32,
            approver_groups: self.load_level_groups("level_approver_group", &level_id).await?,
            overrider_groups: self.load_level_groups("level_overrider_group", &level_id).await?,
        })
    }
}

fn row_to_approval(row: &sqlx::sqlite::SqliteRow) -> Result<Approval, StoreError> {
    let id: String = row.try_get("id").map_err(backend)?;
    let document_id: Option<String> = row.try_get("document_id").map_err(backend)?;
    let status: String = row.try_get("status").map_err(backend)?;
    let action_code: String = row.try_get("action_code").map_err(backend)?;
    let entity_type: String = row.try_get("entity_type").map_err(backend)?;
    let entity_id: String = row.try_get("entity_id").map_err(backend)?;
    let requested_by: String = row.try_get("requested_by").map_err(backend)?;
    let created_at: String = row.try_get("created_at").map_err(backend)?;
    let updated_at: String = row.try_get("updated_at").map_err(backend)?;

    Ok(Approval {
        id: ApprovalId(id),
        status: parse_approval_status(&status).map_err(StoreError::from)?,
        document_id: document_id.map(DocumentId),
        action: ActionCode::new(action_code),
        target: EntityRef::new(entity_type, entity_id),
        requested_by: UserId(requested_by),
        created_at: parse_timestamp(&created_at).map_err(StoreError::from)?,
        updated_at: parse_timestamp(&updated_at).map_err(StoreError::from)?,
    })
}

fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalTask, StoreError> {
    let id: String = row.try_get("id").map_err(backend)?;
    let approval_id: String = row.try_get("approval_id").map_err(backend)?;
    let level_id: String = row.try_get("level_id").map_err(backend)?;
    let level: i64 = row.try_get("level").map_err(backend)?;
    let status: String = row.try_get("status").map_err(backend)?;
    let decided_by: Option<String> = row.try_get("decided_by").map_err(backend)?;
    let comment: Option<String> = row.try_get("comment").map_err(backend)?;
    let created_at: String = row.try_get("created_at").map_err(backend)?;
    let updated_at: String = row.try_get("updated_at").map_err(backend)?;

    Ok(ApprovalTask {
        id: TaskId(id),
        approval_id: ApprovalId(approval_id),
        level_id: LevelId(level_id),
        level: level as u32,
        status: parse_task_status(&status).map_err(StoreError::from)?,
        decided_by: decided_by.map(UserId),
        comment,
        created_at: parse_timestamp(&created_at).map_err(StoreError::from)?,
        updated_at: parse_timestamp(&updated_at).map_err(StoreError::from)?,
    })
}

const TASK_COLUMNS: &str = "id, approval_id, level_id, level, status, decided_by, comment,
                            created_at, updated_at";

#[async_trait]
impl WorkflowStore for SqlWorkflowStore {
    async fn matching_documents(
        &self,
        tenant: &TenantId,
        entity_type: &EntityTypeTag,
        action: &ActionCode,
    ) -> Result<Vec<ApprovalDocument>, StoreError> {
        let rows = sqlx::query(
            "SELECT d.id, d.tenant_id, d.entity_type, d.description, d.deleted,
                    d.created_at, d.updated_at
             FROM approval_document d
             JOIN approval_document_action a ON a.document_id = d.id
             WHERE d.tenant_id = ? AND d.entity_type = ? AND a.action_code = ? AND d.deleted = 0
             ORDER BY d.id",
        )
        .bind(&tenant.0)
        .bind(&entity_type.0)
        .bind(action.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut documents = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.try_get("id").map_err(backend)?;
            let tenant_id: String = row.try_get("tenant_id").map_err(backend)?;
            let entity_type: String = row.try_get("entity_type").map_err(backend)?;
            let description: String = row.try_get("description").map_err(backend)?;
            let deleted: i64 = row.try_get("deleted").map_err(backend)?;
            let created_at: String = row.try_get("created_at").map_err(backend)?;
            let updated_at: String = row.try_get("updated_at").map_err(backend)?;

            let document_id = DocumentId(id);
            let actions = self.load_action_set(&document_id).await?;
            documents.push(ApprovalDocument {
                id: document_id,
                tenant_id: TenantId(tenant_id),
                entity_type: EntityTypeTag(entity_type),
                description,
                actions,
                deleted: deleted != 0,
                created_at: parse_timestamp(&created_at).map_err(StoreError::from)?,
                updated_at: parse_timestamp(&updated_at).map_err(StoreError::from)?,
            });
        }
        Ok(documents)
    }

    async fn levels_for_document(
        &self,
        document: &DocumentId,
    ) -> Result<Vec<ApprovalDocumentLevel>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, document_id, level FROM approval_document_level
             WHERE document_id = ? ORDER BY level",
        )
        .bind(&document.0)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut levels = Vec::with_capacity(rows.len());
        for row in &rows {
            levels.push(self.hydrate_level(row).await?);
        }
        Ok(levels)
    }

    async fn find_level(
        &self,
        level: &LevelId,
    ) -> Result<Option<ApprovalDocumentLevel>, StoreError> {
        let row = sqlx::query(
            "SELECT id, document_id, level FROM approval_document_level WHERE id = ?",
        )
        .bind(&level.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(ref row) => Ok(Some(self.hydrate_level(row).await?)),
            None => Ok(None),
        }
    }

    async fn groups_by_ids(&self, ids: &[GroupId]) -> Result<Vec<ApproverGroup>, StoreError> {
        let mut groups = Vec::with_capacity(ids.len());
        for id in ids {
            let row = sqlx::query(
                "SELECT id, tenant_id, name, deleted, created_at, updated_at
                 FROM approver_group WHERE id = ? AND deleted = 0",
            )
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

            let Some(row) = row else {
                continue;
            };
            let group_id: String = row.try_get("id").map_err(backend)?;
            let tenant_id: String = row.try_get("tenant_id").map_err(backend)?;
            let name: String = row.try_get("name").map_err(backend)?;
            let created_at: String = row.try_get("created_at").map_err(backend)?;
            let updated_at: String = row.try_get("updated_at").map_err(backend)?;

            let user_rows = sqlx::query(
                "SELECT user_id FROM approver_group_user WHERE group_id = ? ORDER BY user_id",
            )
            .bind(&group_id)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
            let member_users = user_rows
                .iter()
                .map(|row| row.try_get::<String, _>("user_id").map(UserId).map_err(backend))
                .collect::<Result<Vec<_>, _>>()?;

            let role_rows = sqlx::query(
                "SELECT role_id FROM approver_group_role WHERE group_id = ? ORDER BY role_id",
            )
            .bind(&group_id)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
            let member_roles = role_rows
                .iter()
                .map(|row| row.try_get::<String, _>("role_id").map(RoleId).map_err(backend))
                .collect::<Result<Vec<_>, _>>()?;

            groups.push(ApproverGroup {
                id: GroupId(group_id),
                tenant_id: TenantId(tenant_id),
                name,
                member_users,
                member_roles,
                deleted: false,
                created_at: parse_timestamp(&created_at).map_err(StoreError::from)?,
                updated_at: parse_timestamp(&updated_at).map_err(StoreError::from)?,
            });
        }
        Ok(groups)
    }

    async fn insert_run(&self, run: &ApprovalRun) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let approval = &run.approval;
        sqlx::query(
            "INSERT INTO approval (id, document_id, status, action_code, entity_type, entity_id,
                                   requested_by, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&approval.id.0)
        .bind(approval.document_id.as_ref().map(|id| id.0.clone()))
        .bind(approval_status_as_str(&approval.status))
        .bind(approval.action.as_str())
        .bind(&approval.target.entity_type.0)
        .bind(&approval.target.entity_id)
        .bind(&approval.requested_by.0)
        .bind(approval.created_at.to_rfc3339())
        .bind(approval.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        for task in &run.tasks {
            sqlx::query(
                "INSERT INTO approval_task (id, approval_id, level_id, level, status,
                                            decided_by, comment, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&task.id.0)
            .bind(&task.approval_id.0)
            .bind(&task.level_id.0)
            .bind(task.level as i64)
            .bind(task_status_as_str(&task.status))
            .bind(task.decided_by.as_ref().map(|user| user.0.clone()))
            .bind(task.comment.as_deref())
            .bind(task.created_at.to_rfc3339())
            .bind(task.updated_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn ongoing_approval_for(
        &self,
        target: &EntityRef,
    ) -> Result<Option<Approval>, StoreError> {
        let row = sqlx::query(
            "SELECT id, document_id, status, action_code, entity_type, entity_id,
                    requested_by, created_at, updated_at
             FROM approval
             WHERE entity_type = ? AND entity_id = ? AND status = 'ongoing'",
        )
        .bind(&target.entity_type.0)
        .bind(&target.entity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(ref row) => Ok(Some(row_to_approval(row)?)),
            None => Ok(None),
        }
    }

    async fn find_approval(&self, id: &ApprovalId) -> Result<Option<Approval>, StoreError> {
        let row = sqlx::query(
            "SELECT id, document_id, status, action_code, entity_type, entity_id,
                    requested_by, created_at, updated_at
             FROM approval WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(ref row) => Ok(Some(row_to_approval(row)?)),
            None => Ok(None),
        }
    }

    async fn find_task(&self, id: &TaskId) -> Result<Option<ApprovalTask>, StoreError> {
        let sql = format!("SELECT {TASK_COLUMNS} FROM approval_task WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        match row {
            Some(ref row) => Ok(Some(row_to_task(row)?)),
            None => Ok(None),
        }
    }

    async fn tasks_for_approval(
        &self,
        id: &ApprovalId,
    ) -> Result<Vec<ApprovalTask>, StoreError> {
        let sql =
            format!("SELECT {TASK_COLUMNS} FROM approval_task WHERE approval_id = ? ORDER BY level");
        let rows = sqlx::query(&sql).bind(&id.0).fetch_all(&self.pool).await.map_err(backend)?;
        rows.iter().map(row_to_task).collect()
    }

    async fn commit_decision(&self, record: &DecisionRecord) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let decided_at = record.decided_at.to_rfc3339();

        // Conditional on the task still being pending. Zero rows means a
        // concurrent decision won; nothing in this transaction is kept.
        let updated = sqlx::query(
            "UPDATE approval_task
             SET status = ?, decided_by = ?, comment = ?, updated_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(task_status_as_str(&record.task_status))
        .bind(record.decided_by.as_ref().map(|user| user.0.clone()))
        .bind(record.comment.as_deref())
        .bind(&decided_at)
        .bind(&record.task_id.0)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        if updated.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM approval_task WHERE id = ?")
                .bind(&record.task_id.0)
                .fetch_optional(&mut *tx)
                .await
                .map_err(backend)?
                .is_some();
            return if exists {
                Err(StoreError::Conflict)
            } else {
                Err(StoreError::Missing { kind: "task", id: record.task_id.0.clone() })
            };
        }

        if let Some(unlocked) = &record.unlocked_task_id {
            sqlx::query(
                "UPDATE approval_task SET status = ?, updated_at = ? WHERE id = ?",
            )
            .bind(task_status_as_str(&TaskStatus::Pending))
            .bind(&decided_at)
            .bind(&unlocked.0)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        for terminated in &record.terminated_task_ids {
            sqlx::query(
                "UPDATE approval_task SET status = ?, updated_at = ? WHERE id = ?",
            )
            .bind(task_status_as_str(&TaskStatus::Terminated))
            .bind(&decided_at)
            .bind(&terminated.0)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        sqlx::query("UPDATE approval SET status = ?, updated_at = ? WHERE id = ?")
            .bind(approval_status_as_str(&record.run_status))
            .bind(&decided_at)
            .bind(&record.approval_id.0)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok(())
    }
}

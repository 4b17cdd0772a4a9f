use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::domain::action::ActionCode;
use crate::domain::approval::{Approval, ApprovalId, ApprovalStatus, ApprovalTask, TaskId, TaskStatus};
use crate::domain::document::{ApprovalDocument, ApprovalDocumentLevel, DocumentId, LevelId};
use crate::domain::entity::{EntityRef, EntityTypeTag};
use crate::domain::group::{ApproverGroup, GroupId};
use crate::domain::principal::TenantId;
use crate::run::{ApprovalRun, CascadeOutcome};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The conditional decision write found the task no longer pending;
    /// another decision committed first.
    #[error("decision conflict: task is no longer pending")]
    Conflict,
    #[error("{kind} `{id}` was not found")]
    Missing { kind: &'static str, id: String },
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Everything one decision writes, committed atomically and conditionally:
/// the write only succeeds while the decided task is still pending.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecisionRecord {
    pub approval_id: ApprovalId,
    pub task_id: TaskId,
    pub task_status: TaskStatus,
    pub decided_by: Option<crate::domain::principal::UserId>,
    pub comment: Option<String>,
    pub unlocked_task_id: Option<TaskId>,
    pub terminated_task_ids: Vec<TaskId>,
    pub run_status: ApprovalStatus,
    pub decided_at: DateTime<Utc>,
}

impl DecisionRecord {
    pub fn from_outcome(approval_id: ApprovalId, outcome: &CascadeOutcome) -> Self {
        Self {
            approval_id,
            task_id: outcome.decided_task.id.clone(),
            task_status: outcome.decided_task.status,
            decided_by: outcome.decided_task.decided_by.clone(),
            comment: outcome.decided_task.comment.clone(),
            unlocked_task_id: outcome.unlocked_task.as_ref().map(|task| task.id.clone()),
            terminated_task_ids:
                outcome.terminated_tasks.iter().map(|task| task.id.clone()).collect(),
            run_status: outcome.run_status,
            decided_at: outcome.decided_task.updated_at,
        }
    }
}

/// Persistence seam the engine drives. Implementations must make
/// `insert_run` and `commit_decision` atomic; `commit_decision` must fail
/// with `Conflict` when the decided task is not pending anymore.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    async fn matching_documents(
        &self,
        tenant: &TenantId,
        entity_type: &EntityTypeTag,
        action: &ActionCode,
    ) -> Result<Vec<ApprovalDocument>, StoreError>;

    async fn levels_for_document(
        &self,
        document: &DocumentId,
    ) -> Result<Vec<ApprovalDocumentLevel>, StoreError>;

    async fn find_level(&self, level: &LevelId)
        -> Result<Option<ApprovalDocumentLevel>, StoreError>;

    async fn groups_by_ids(&self, ids: &[GroupId]) -> Result<Vec<ApproverGroup>, StoreError>;

    async fn insert_run(&self, run: &ApprovalRun) -> Result<(), StoreError>;

    /// The ongoing approval referencing `target`, if any. One entity never
    /// has more than one ongoing run.
    async fn ongoing_approval_for(
        &self,
        target: &EntityRef,
    ) -> Result<Option<Approval>, StoreError>;

    async fn find_approval(&self, id: &ApprovalId) -> Result<Option<Approval>, StoreError>;

    async fn find_task(&self, id: &TaskId) -> Result<Option<ApprovalTask>, StoreError>;

    async fn tasks_for_approval(&self, id: &ApprovalId)
        -> Result<Vec<ApprovalTask>, StoreError>;

    async fn commit_decision(&self, record: &DecisionRecord) -> Result<(), StoreError>;
}

#[derive(Default)]
struct InMemoryState {
    documents: HashMap<String, ApprovalDocument>,
    levels: HashMap<String, ApprovalDocumentLevel>,
    groups: HashMap<String, ApproverGroup>,
    approvals: HashMap<String, Approval>,
    tasks: HashMap<String, ApprovalTask>,
}

/// Store for tests and embedded use. Mirrors the uniqueness rules the sql
/// store enforces via constraints.
#[derive(Default)]
pub struct InMemoryWorkflowStore {
    state: RwLock<InMemoryState>,
}

impl InMemoryWorkflowStore {
    /// Registers configuration. No two active documents for the same tenant
    /// and entity type may carry an identical action set.
    pub async fn put_document(
        &self,
        document: ApprovalDocument,
        levels: Vec<ApprovalDocumentLevel>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let duplicate = state.documents.values().any(|existing| {
            existing.id != document.id
                && !existing.deleted
                && !document.deleted
                && existing.tenant_id == document.tenant_id
                && existing.entity_type == document.entity_type
                && existing.actions == document.actions
        });
        if duplicate {
            return Err(StoreError::Backend(format!(
                "document with identical action set already active for tenant `{}` type `{}`",
                document.tenant_id, document.entity_type
            )));
        }

        for level in levels {
            state.levels.insert(level.id.0.clone(), level);
        }
        state.documents.insert(document.id.0.clone(), document);
        Ok(())
    }

    /// Registers a group; unique `(tenant, name)` among non-deleted groups.
    pub async fn put_group(&self, group: ApproverGroup) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let duplicate = state.groups.values().any(|existing| {
            existing.id != group.id
                && !existing.deleted
                && !group.deleted
                && existing.tenant_id == group.tenant_id
                && existing.name == group.name
        });
        if duplicate {
            return Err(StoreError::Backend(format!(
                "group named `{}` already exists for tenant `{}`",
                group.name, group.tenant_id
            )));
        }
        state.groups.insert(group.id.0.clone(), group);
        Ok(())
    }

    pub async fn approval_count(&self) -> usize {
        self.state.read().await.approvals.len()
    }

    pub async fn task_count(&self) -> usize {
        self.state.read().await.tasks.len()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn matching_documents(
        &self,
        tenant: &TenantId,
        entity_type: &EntityTypeTag,
        action: &ActionCode,
    ) -> Result<Vec<ApprovalDocument>, StoreError> {
        let state = self.state.read().await;
        let mut matches: Vec<ApprovalDocument> = state
            .documents
            .values()
            .filter(|document| {
                &document.tenant_id == tenant
                    && &document.entity_type == entity_type
                    && document.governs(action)
            })
            .cloned()
            .collect();
        matches.sort_by(|left, right| left.id.0.cmp(&right.id.0));
        Ok(matches)
    }

    async fn levels_for_document(
        &self,
        document: &DocumentId,
    ) -> Result<Vec<ApprovalDocumentLevel>, StoreError> {
        let state = self.state.read().await;
        let mut levels: Vec<ApprovalDocumentLevel> = state
            .levels
            .values()
            .filter(|level| &level.document_id == document)
            .cloned()
            .collect();
        levels.sort_by_key(|level| level.level);
        Ok(levels)
    }

    async fn find_level(
        &self,
        level: &LevelId,
    ) -> Result<Option<ApprovalDocumentLevel>, StoreError> {
        let state = self.state.read().await;
        Ok(state.levels.get(&level.0).cloned())
    }

    async fn groups_by_ids(&self, ids: &[GroupId]) -> Result<Vec<ApproverGroup>, StoreError> {
        let state = self.state.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| state.groups.get(&id.0))
            .filter(|group| !group.deleted)
            .cloned()
            .collect())
    }

    async fn insert_run(&self, run: &ApprovalRun) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        state.approvals.insert(run.approval.id.0.clone(), run.approval.clone());
        for task in &run.tasks {
            state.tasks.insert(task.id.0.clone(), task.clone());
        }
        Ok(())
    }

    async fn ongoing_approval_for(
        &self,
        target: &EntityRef,
    ) -> Result<Option<Approval>, StoreError> {
        let state = self.state.read().await;
        Ok(state
            .approvals
            .values()
            .find(|approval| {
                approval.status == ApprovalStatus::Ongoing && &approval.target == target
            })
            .cloned())
    }

    async fn find_approval(&self, id: &ApprovalId) -> Result<Option<Approval>, StoreError> {
        let state = self.state.read().await;
        Ok(state.approvals.get(&id.0).cloned())
    }

    async fn find_task(&self, id: &TaskId) -> Result<Option<ApprovalTask>, StoreError> {
        let state = self.state.read().await;
        Ok(state.tasks.get(&id.0).cloned())
    }

    async fn tasks_for_approval(
        &self,
        id: &ApprovalId,
    ) -> Result<Vec<ApprovalTask>, StoreError> {
        let state = self.state.read().await;
        let mut tasks: Vec<ApprovalTask> = state
            .tasks
            .values()
            .filter(|task| &task.approval_id == id)
            .cloned()
            .collect();
        tasks.sort_by_key(|task| task.level);
        Ok(tasks)
    }

    async fn commit_decision(&self, record: &DecisionRecord) -> Result<(), StoreError> {
        let mut state = self.state.write().await;

        // The conditional write: losers of a decision race observe a
        // non-pending task here and fail without touching anything.
        let current = state
            .tasks
            .get(&record.task_id.0)
            .ok_or_else(|| StoreError::Missing { kind: "task", id: record.task_id.0.clone() })?;
        if current.status != TaskStatus::Pending {
            return Err(StoreError::Conflict);
        }

        let decided = state
            .tasks
            .get_mut(&record.task_id.0)
            .ok_or_else(|| StoreError::Missing { kind: "task", id: record.task_id.0.clone() })?;
        decided.status = record.task_status;
        decided.decided_by = record.decided_by.clone();
        decided.comment = record.comment.clone();
        decided.updated_at = record.decided_at;

        if let Some(unlocked_id) = &record.unlocked_task_id {
            let unlocked = state.tasks.get_mut(&unlocked_id.0).ok_or_else(|| {
                StoreError::Missing { kind: "task", id: unlocked_id.0.clone() }
            })?;
            unlocked.status = TaskStatus::Pending;
            unlocked.updated_at = record.decided_at;
        }

        for terminated_id in &record.terminated_task_ids {
            let terminated = state.tasks.get_mut(&terminated_id.0).ok_or_else(|| {
                StoreError::Missing { kind: "task", id: terminated_id.0.clone() }
            })?;
            terminated.status = TaskStatus::Terminated;
            terminated.updated_at = record.decided_at;
        }

        let approval = state.approvals.get_mut(&record.approval_id.0).ok_or_else(|| {
            StoreError::Missing { kind: "approval", id: record.approval_id.0.clone() }
        })?;
        approval.status = record.run_status;
        approval.updated_at = record.decided_at;

        Ok(())
    }
}

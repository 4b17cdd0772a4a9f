use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::action::ActionCode;
use crate::domain::document::{DocumentId, LevelId};
use crate::domain::entity::EntityRef;
use crate::domain::principal::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApprovalId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl fmt::Display for ApprovalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Overall status of one workflow run. Transitions once, irreversibly, out
/// of `Ongoing`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Ongoing,
    Completed,
    Rejected,
}

impl ApprovalStatus {
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Ongoing)
    }
}

/// Status of one per-level decision unit. All transitions are one-way:
/// `NotStarted` -> `Pending` -> one of the terminal states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    NotStarted,
    Pending,
    Approved,
    Rejected,
    Terminated,
    Overridden,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Terminated | Self::Overridden)
    }

    /// Tasks a sibling decision forces to `Terminated`.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, Self::NotStarted | Self::Pending)
    }
}

/// One workflow run: a concrete (entity, action, document) triple. Runs are
/// append-only audit records and are never deleted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub id: ApprovalId,
    pub status: ApprovalStatus,
    /// `None` only for the synthetic, unsaved approval handed to the
    /// completion hook on the auto-bypass path.
    pub document_id: Option<DocumentId>,
    pub action: ActionCode,
    pub target: EntityRef,
    pub requested_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Approval {
    pub fn start(
        document_id: DocumentId,
        action: ActionCode,
        target: EntityRef,
        requested_by: UserId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ApprovalId(Uuid::new_v4().to_string()),
            status: ApprovalStatus::Ongoing,
            document_id: Some(document_id),
            action,
            target,
            requested_by,
            created_at: now,
            updated_at: now,
        }
    }

    /// Synthetic completed run for the no-document fast path. Never
    /// persisted; exists only to satisfy the completion-hook contract.
    pub fn synthetic_completed(action: ActionCode, target: EntityRef, requested_by: UserId) -> Self {
        let now = Utc::now();
        Self {
            id: ApprovalId(Uuid::new_v4().to_string()),
            status: ApprovalStatus::Completed,
            document_id: None,
            action,
            target,
            requested_by,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One decision unit for one level of one run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalTask {
    pub id: TaskId,
    pub approval_id: ApprovalId,
    pub level_id: LevelId,
    pub level: u32,
    pub status: TaskStatus,
    pub decided_by: Option<UserId>,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalTask {
    pub fn new(
        approval_id: ApprovalId,
        level_id: LevelId,
        level: u32,
        status: TaskStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TaskId(Uuid::new_v4().to_string()),
            approval_id,
            level_id,
            level,
            status,
            decided_by: None,
            comment: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ApprovalStatus, TaskStatus};

    #[test]
    fn only_ongoing_is_unsettled() {
        assert!(!ApprovalStatus::Ongoing.is_settled());
        assert!(ApprovalStatus::Completed.is_settled());
        assert!(ApprovalStatus::Rejected.is_settled());
    }

    #[test]
    fn terminal_and_cancellable_sets_partition_task_statuses() {
        for status in [
            TaskStatus::NotStarted,
            TaskStatus::Pending,
            TaskStatus::Approved,
            TaskStatus::Rejected,
            TaskStatus::Terminated,
            TaskStatus::Overridden,
        ] {
            assert_ne!(status.is_terminal(), status.is_cancellable(), "{status:?}");
        }
    }
}

use thiserror::Error;

use crate::domain::action::ActionCode;
use crate::domain::approval::{ApprovalId, ApprovalStatus, TaskId, TaskStatus};
use crate::domain::document::DocumentId;
use crate::domain::entity::{EntityRef, EntityTypeTag, LifecycleStatus};
use crate::domain::principal::{TenantId, UserId};
use crate::run::CascadeError;
use crate::store::StoreError;

/// Stable machine-readable classification of engine failures, for API
/// layers that render their own messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    Configuration,
    InvalidState,
    PermissionDenied,
    NotFound,
    Storage,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration_error",
            Self::InvalidState => "invalid_state_error",
            Self::PermissionDenied => "permission_denied",
            Self::NotFound => "not_found_error",
            Self::Storage => "storage_error",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("entity `{entity}` has no resolvable tenant")]
    TenantUnresolved { entity: EntityRef },
    #[error("approval document `{document}` has no levels configured")]
    DocumentWithoutLevels { document: DocumentId },
    #[error("{matches} approval documents match tenant `{tenant}`, type `{entity_type}`, action `{action}`")]
    AmbiguousDocument {
        tenant: TenantId,
        entity_type: EntityTypeTag,
        action: ActionCode,
        matches: usize,
    },
    #[error("entity is {actual:?}, transition requires {expected:?}")]
    LifecycleMismatch { expected: LifecycleStatus, actual: LifecycleStatus },
    #[error("approval `{approval}` is already ongoing for `{target}`")]
    ApprovalAlreadyOngoing { target: EntityRef, approval: ApprovalId },
    #[error("task `{task}` is {status:?}, decisions require a pending task")]
    TaskNotActionable { task: TaskId, status: TaskStatus },
    #[error("approval `{approval}` already settled as {status:?}")]
    RunSettled { approval: ApprovalId, status: ApprovalStatus },
    #[error("task `{task}` was decided concurrently")]
    DecisionConflict { task: TaskId },
    #[error("user `{user}` is not an approver for task `{task}`")]
    NotAnApprover { user: UserId, task: TaskId },
    #[error("user `{user}` is not an overrider for task `{task}`")]
    NotAnOverrider { user: UserId, task: TaskId },
    #[error("{kind} `{id}` was not found")]
    NotFound { kind: &'static str, id: String },
    #[error("storage failure: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::TenantUnresolved { .. }
            | Self::DocumentWithoutLevels { .. }
            | Self::AmbiguousDocument { .. } => ErrorCode::Configuration,
            Self::LifecycleMismatch { .. }
            | Self::ApprovalAlreadyOngoing { .. }
            | Self::TaskNotActionable { .. }
            | Self::RunSettled { .. }
            | Self::DecisionConflict { .. } => ErrorCode::InvalidState,
            Self::NotAnApprover { .. } | Self::NotAnOverrider { .. } => ErrorCode::PermissionDenied,
            Self::NotFound { .. } => ErrorCode::NotFound,
            Self::Storage(_) => ErrorCode::Storage,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Missing { kind, id } => Self::NotFound { kind, id },
            // Conflicts are mapped at the decision site, where the task id
            // is known; a stray conflict is a storage-level failure.
            StoreError::Conflict => Self::Storage("conflicting concurrent write".to_string()),
            StoreError::Backend(message) => Self::Storage(message),
        }
    }
}

impl From<CascadeError> for EngineError {
    fn from(value: CascadeError) -> Self {
        match value {
            CascadeError::TaskNotPending { task, status } => {
                Self::TaskNotActionable { task, status }
            }
            CascadeError::RunSettled { approval, status } => Self::RunSettled { approval, status },
            CascadeError::NoLevels { document } => Self::DocumentWithoutLevels { document },
            CascadeError::UnknownTask { task } => Self::NotFound { kind: "task", id: task.0 },
        }
    }
}

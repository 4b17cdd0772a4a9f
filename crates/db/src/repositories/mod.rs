use chrono::{DateTime, Utc};
use thiserror::Error;

use signoff_core::domain::approval::{ApprovalStatus, TaskStatus};
use signoff_core::store::StoreError;

pub mod directory;
pub mod document;
pub mod group;
pub mod workflow;

pub use directory::SqlPrincipalDirectory;
pub use document::SqlDocumentRepository;
pub use group::SqlGroupRepository;
pub use workflow::SqlWorkflowStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("{0}")]
    Constraint(String),
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        StoreError::Backend(value.to_string())
    }
}

pub(crate) fn backend(error: sqlx::Error) -> StoreError {
    StoreError::Backend(error.to_string())
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("timestamp `{raw}`: {error}")))
}

pub(crate) fn approval_status_as_str(status: &ApprovalStatus) -> &'static str {
    match status {
        ApprovalStatus::Ongoing => "ongoing",
        ApprovalStatus::Completed => "completed",
        ApprovalStatus::Rejected => "rejected",
    }
}

pub(crate) fn parse_approval_status(raw: &str) -> Result<ApprovalStatus, RepositoryError> {
    match raw {
        "ongoing" => Ok(ApprovalStatus::Ongoing),
        "completed" => Ok(ApprovalStatus::Completed),
        "rejected" => Ok(ApprovalStatus::Rejected),
        other => Err(RepositoryError::Decode(format!("unknown approval status `{other}`"))),
    }
}

pub(crate) fn task_status_as_str(status: &TaskStatus) -> &'static str {
    match status {
        TaskStatus::NotStarted => "not_started",
        TaskStatus::Pending => "pending",
        TaskStatus::Approved => "approved",
        TaskStatus::Rejected => "rejected",
        TaskStatus::Terminated => "terminated",
        TaskStatus::Overridden => "overridden",
    }
}

pub(crate) fn parse_task_status(raw: &str) -> Result<TaskStatus, RepositoryError> {
    match raw {
        "not_started" => Ok(TaskStatus::NotStarted),
        "pending" => Ok(TaskStatus::Pending),
        "approved" => Ok(TaskStatus::Approved),
        "rejected" => Ok(TaskStatus::Rejected),
        "terminated" => Ok(TaskStatus::Terminated),
        "overridden" => Ok(TaskStatus::Overridden),
        other => Err(RepositoryError::Decode(format!("unknown task status `{other}`"))),
    }
}

pub mod config;
pub mod directory;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod notify;
pub mod registry;
pub mod run;
pub mod store;
pub mod telemetry;

pub use config::{
    AppConfig, ConfigError, ConfigOverrides, DatabaseConfig, LoadOptions, LogFormat,
    LoggingConfig, NotificationConfig,
};
pub use directory::{InMemoryDirectory, PrincipalDirectory};
pub use domain::action::{Action, ActionCode, ActionKind, ActionRegistry, ActionRegistryError};
pub use domain::approval::{
    Approval, ApprovalId, ApprovalStatus, ApprovalTask, TaskId, TaskStatus,
};
pub use domain::document::{
    ApprovalDocument, ApprovalDocumentLevel, DocumentError, DocumentId, LevelId, LevelSpec,
};
pub use domain::entity::{
    ApprovalState, EntityRef, EntityTypeTag, GovernedEntity, LifecycleStatus,
};
pub use domain::group::{ApproverGroup, GroupId};
pub use domain::principal::{RoleId, TenantId, UserId};
pub use engine::{DecisionOutcome, TransitionOutcome, WorkflowEngine};
pub use errors::{EngineError, ErrorCode};
pub use notify::{
    ConfiguredSink, InMemoryNotificationSink, NoopNotificationSink, NotificationIntent,
    NotificationSink, TracingNotificationSink,
};
pub use registry::{EntityRegistry, InMemoryEntityRegistry};
pub use run::{ApprovalRun, CascadeError, CascadeOutcome, Verdict};
pub use store::{DecisionRecord, InMemoryWorkflowStore, StoreError, WorkflowStore};

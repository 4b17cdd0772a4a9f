use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::action::{ActionCode, ActionKind};
use crate::domain::approval::{Approval, ApprovalStatus};
use crate::domain::principal::TenantId;

/// Stable tag identifying the kind of a governed entity. Documents are
/// scoped per tag; the tag is resolved through the entity registry rather
/// than any language-level type information.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityTypeTag(pub String);

impl fmt::Display for EntityTypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Polymorphic reference to one governed entity instance: type tag plus an
/// opaque id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityTypeTag,
    pub entity_id: String,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self { entity_type: EntityTypeTag(entity_type.into()), entity_id: entity_id.into() }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    UnderCreation,
    UnderUpdate,
    UnderDeletion,
    Active,
    Deleted,
}

/// Embeddable approval-facing state for a governed entity. Entities compose
/// this value rather than inheriting engine behavior.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalState {
    pub lifecycle: LifecycleStatus,
}

impl ApprovalState {
    pub fn new(lifecycle: LifecycleStatus) -> Self {
        Self { lifecycle }
    }

    /// Standard terminal effect of a finished approval, usable by entity
    /// `finish_workflow` implementations that have no bespoke behavior.
    pub fn settle(&mut self, approval: &Approval) {
        if let Some(next) = settled_lifecycle(&approval.status, &approval.action) {
            self.lifecycle = next;
        }
    }
}

impl Default for ApprovalState {
    fn default() -> Self {
        Self::new(LifecycleStatus::UnderCreation)
    }
}

/// Lifecycle an entity lands in once an approval for `action` settles with
/// `status`. `None` for ongoing runs and for custom actions, whose terminal
/// effects are entity-specific.
pub fn settled_lifecycle(status: &ApprovalStatus, action: &ActionCode) -> Option<LifecycleStatus> {
    let kind = ActionKind::from_code(action)?;
    match (status, kind) {
        (ApprovalStatus::Ongoing, _) => None,
        (ApprovalStatus::Completed, ActionKind::Create | ActionKind::Update) => {
            Some(LifecycleStatus::Active)
        }
        (ApprovalStatus::Completed, ActionKind::Delete) => Some(LifecycleStatus::Deleted),
        (ApprovalStatus::Rejected, ActionKind::Create) => Some(LifecycleStatus::Deleted),
        (ApprovalStatus::Rejected, ActionKind::Update | ActionKind::Delete) => {
            Some(LifecycleStatus::Active)
        }
    }
}

/// The Entity Contract: every entity whose lifecycle is routed through the
/// engine implements this. The engine owns the lifecycle field while the
/// entity is in an `under_*` state and hands it back through
/// `finish_workflow`.
pub trait GovernedEntity: Send + Sync {
    /// Owning tenant, or `None` when the entity is not attached to one. A
    /// missing tenant aborts transition entry points.
    fn tenant_id(&self) -> Option<TenantId>;

    fn entity_ref(&self) -> EntityRef;

    fn lifecycle(&self) -> LifecycleStatus;

    fn set_lifecycle(&mut self, status: LifecycleStatus);

    /// Human-readable description used in notification text.
    fn display_name(&self) -> String;

    /// Terminal hook, invoked exactly once per finished approval (real or
    /// synthetic) after the task cascade settles. The default applies the
    /// standard lifecycle effect; override to add domain side effects.
    fn finish_workflow(&mut self, approval: &Approval) {
        if let Some(next) = settled_lifecycle(&approval.status, &approval.action) {
            self.set_lifecycle(next);
        }
    }
}

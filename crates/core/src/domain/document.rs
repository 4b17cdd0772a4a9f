use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::action::ActionCode;
use crate::domain::entity::EntityTypeTag;
use crate::domain::group::GroupId;
use crate::domain::principal::TenantId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LevelId(pub String);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for LevelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Governance configuration binding one tenant and entity type to an ordered
/// list of approval levels for a set of actions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDocument {
    pub id: DocumentId,
    pub tenant_id: TenantId,
    pub entity_type: EntityTypeTag,
    pub description: String,
    pub actions: BTreeSet<ActionCode>,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One ordered step of a document. Approver and overrider group sets are
/// disjoint authorization paths.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDocumentLevel {
    pub id: LevelId,
    pub document_id: DocumentId,
    pub level: u32,
    pub approver_groups: Vec<GroupId>,
    pub overrider_groups: Vec<GroupId>,
}

/// Input for attaching a level to a document; `level` left unset gets the
/// next free number.
#[derive(Clone, Debug, Default)]
pub struct LevelSpec {
    pub level: Option<u32>,
    pub approver_groups: Vec<GroupId>,
    pub overrider_groups: Vec<GroupId>,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("level {level} already exists on document `{document}`")]
    DuplicateLevel { document: DocumentId, level: u32 },
    #[error("group `{group}` appears in both approver and overrider sets")]
    OverlappingGroupSets { group: GroupId },
    #[error("level must reference at least one approver group")]
    NoApproverGroups,
}

impl ApprovalDocument {
    pub fn new(
        id: impl Into<String>,
        tenant_id: TenantId,
        entity_type: EntityTypeTag,
        description: impl Into<String>,
        actions: impl IntoIterator<Item = ActionCode>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: DocumentId(id.into()),
            tenant_id,
            entity_type,
            description: description.into(),
            actions: actions.into_iter().collect(),
            deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Matching rule: a document governs an action when its action set
    /// contains it.
    pub fn governs(&self, action: &ActionCode) -> bool {
        !self.deleted && self.actions.contains(action)
    }

    /// Auto-numbering for new levels: max existing level plus one, starting
    /// at 1.
    pub fn next_level_number(&self, existing: &[ApprovalDocumentLevel]) -> u32 {
        existing
            .iter()
            .filter(|level| level.document_id == self.id)
            .map(|level| level.level)
            .max()
            .map_or(1, |max| max + 1)
    }

    /// Builds and validates a new level for this document. Does not persist;
    /// stores own the unique `(document, level)` constraint at write time,
    /// this enforces it against the levels handed in.
    pub fn attach_level(
        &self,
        existing: &[ApprovalDocumentLevel],
        spec: LevelSpec,
    ) -> Result<ApprovalDocumentLevel, DocumentError> {
        if spec.approver_groups.is_empty() {
            return Err(DocumentError::NoApproverGroups);
        }
        if let Some(group) =
            spec.approver_groups.iter().find(|group| spec.overrider_groups.contains(group))
        {
            return Err(DocumentError::OverlappingGroupSets { group: group.clone() });
        }

        let level = spec.level.unwrap_or_else(|| self.next_level_number(existing));
        let duplicate = existing
            .iter()
            .any(|candidate| candidate.document_id == self.id && candidate.level == level);
        if duplicate {
            return Err(DocumentError::DuplicateLevel { document: self.id.clone(), level });
        }

        Ok(ApprovalDocumentLevel {
            id: LevelId(Uuid::new_v4().to_string()),
            document_id: self.id.clone(),
            level,
            approver_groups: spec.approver_groups,
            overrider_groups: spec.overrider_groups,
        })
    }
}

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::entity::LifecycleStatus;

/// Canonical code naming one kind of lifecycle transition. Codes are
/// normalized to trimmed lowercase so `Create` and `create` refer to the
/// same action.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionCode(String);

impl ActionCode {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The three transition kinds the engine exposes entry points for. Custom
/// actions can be registered and bound to documents, but only these kinds
/// carry a lifecycle guard and an auto-bypass effect.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Create,
    Update,
    Delete,
}

impl ActionKind {
    pub fn code(&self) -> ActionCode {
        match self {
            Self::Create => ActionCode::new("create"),
            Self::Update => ActionCode::new("update"),
            Self::Delete => ActionCode::new("delete"),
        }
    }

    /// Lifecycle state an entity must be in before this transition may be
    /// requested.
    pub fn expected_lifecycle(&self) -> LifecycleStatus {
        match self {
            Self::Create => LifecycleStatus::UnderCreation,
            Self::Update => LifecycleStatus::UnderUpdate,
            Self::Delete => LifecycleStatus::UnderDeletion,
        }
    }

    /// Terminal entity effect applied when no approval document governs the
    /// transition.
    pub fn bypass_lifecycle(&self) -> LifecycleStatus {
        match self {
            Self::Create | Self::Update => LifecycleStatus::Active,
            Self::Delete => LifecycleStatus::Deleted,
        }
    }

    pub fn from_code(code: &ActionCode) -> Option<Self> {
        match code.as_str() {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// A named operation governable by approval documents.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub code: ActionCode,
    pub name: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ActionRegistryError {
    #[error("action code `{code}` is already registered")]
    DuplicateCode { code: ActionCode },
    #[error("action code must not be empty")]
    EmptyCode,
}

/// Tenant-agnostic registry of named operations. Seeded with the three
/// canonical lifecycle actions; codes are immutable once registered.
#[derive(Clone, Debug)]
pub struct ActionRegistry {
    actions: HashMap<ActionCode, Action>,
}

impl ActionRegistry {
    pub fn register(&mut self, action: Action) -> Result<(), ActionRegistryError> {
        if action.code.as_str().is_empty() {
            return Err(ActionRegistryError::EmptyCode);
        }
        if self.actions.contains_key(&action.code) {
            return Err(ActionRegistryError::DuplicateCode { code: action.code });
        }
        self.actions.insert(action.code.clone(), action);
        Ok(())
    }

    pub fn find(&self, code: &ActionCode) -> Option<&Action> {
        self.actions.get(code)
    }

    pub fn codes(&self) -> Vec<ActionCode> {
        let mut codes: Vec<ActionCode> = self.actions.keys().cloned().collect();
        codes.sort();
        codes
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        let mut registry = Self { actions: HashMap::new() };
        for (kind, name) in [
            (ActionKind::Create, "Create"),
            (ActionKind::Update, "Update"),
            (ActionKind::Delete, "Delete"),
        ] {
            let action = Action { code: kind.code(), name: name.to_string() };
            // Fresh map, canonical codes are distinct.
            let _ = registry.register(action);
        }
        registry
    }
}

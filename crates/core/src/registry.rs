use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::approval::Approval;
use crate::domain::entity::{EntityRef, GovernedEntity};
use crate::store::StoreError;

/// Host-application seam for entities the engine governs but does not own.
/// The engine asks for a display name when composing notifications and hands
/// the settled approval back exactly once per run.
#[async_trait]
pub trait EntityRegistry: Send + Sync {
    async fn describe(&self, target: &EntityRef) -> Result<String, StoreError>;

    /// Invoked after the run settles (completed or rejected). The host applies
    /// the terminal lifecycle effect and any domain side effects.
    async fn finish_workflow(&self, target: &EntityRef, approval: &Approval)
        -> Result<(), StoreError>;
}

/// Registry for tests and embedded use, holding cloned entities of one type.
pub struct InMemoryEntityRegistry<E> {
    entities: RwLock<HashMap<String, E>>,
}

impl<E> Default for InMemoryEntityRegistry<E> {
    fn default() -> Self {
        Self { entities: RwLock::new(HashMap::new()) }
    }
}

impl<E> InMemoryEntityRegistry<E>
where
    E: GovernedEntity + Clone,
{
    pub async fn put(&self, entity: E) {
        let mut entities = self.entities.write().await;
        entities.insert(entity.entity_ref().to_string(), entity);
    }

    pub async fn get(&self, target: &EntityRef) -> Option<E> {
        let entities = self.entities.read().await;
        entities.get(&target.to_string()).cloned()
    }
}

#[async_trait]
impl<E> EntityRegistry for InMemoryEntityRegistry<E>
where
    E: GovernedEntity + Clone,
{
    async fn describe(&self, target: &EntityRef) -> Result<String, StoreError> {
        let entities = self.entities.read().await;
        let entity = entities.get(&target.to_string()).ok_or_else(|| StoreError::Missing {
            kind: "entity",
            id: target.to_string(),
        })?;
        Ok(entity.display_name())
    }

    async fn finish_workflow(
        &self,
        target: &EntityRef,
        approval: &Approval,
    ) -> Result<(), StoreError> {
        let mut entities = self.entities.write().await;
        let entity = entities.get_mut(&target.to_string()).ok_or_else(|| {
            StoreError::Missing { kind: "entity", id: target.to_string() }
        })?;
        entity.finish_workflow(approval);
        Ok(())
    }
}

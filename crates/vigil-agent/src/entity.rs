//! The agent's own entity

use crate::config::AgentConfig;
use crate::error::AgentError;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use vigil_proto::{unix_now, Entity, SystemInfo};

/// Build the agent entity from configuration and host facts
pub fn build_entity(config: &AgentConfig, system: SystemInfo) -> Entity {
    let mut entity = Entity::agent(config.name.clone(), config.namespace.clone());
    entity.subscriptions = config.subscriptions.clone();
    entity.labels = config.labels.clone();
    entity.annotations = config.annotations.clone();
    entity.deregister = config.deregister;
    entity.deregistration_handler = config.deregistration_handler.clone();
    entity.system = system;
    entity.with_default_subscription()
}

/// Shared, updatable copy of the agent entity
///
/// Readers take snapshots; only backend pushes through
/// [`EntityStore::apply_config`] modify it.
#[derive(Clone)]
pub struct EntityStore {
    inner: Arc<RwLock<Entity>>,
}

impl EntityStore {
    /// Wrap an entity
    pub fn new(entity: Entity) -> Self {
        Self {
            inner: Arc::new(RwLock::new(entity)),
        }
    }

    /// Current entity, stamped with the current time
    pub async fn snapshot(&self) -> Entity {
        let mut entity = self.inner.read().await.clone();
        entity.last_seen = unix_now();
        entity
    }

    /// Entity name
    pub async fn name(&self) -> String {
        self.inner.read().await.name.clone()
    }

    /// Replace the mutable parts of the entity with a backend-provided update
    ///
    /// Identity, class and system facts stay local; the entity-specific
    /// subscription is always kept.
    pub async fn apply_config(&self, update: Entity) -> Result<(), AgentError> {
        let mut entity = self.inner.write().await;
        if update.name != entity.name {
            return Err(AgentError::EntityMismatch {
                expected: entity.name.clone(),
                actual: update.name,
            });
        }

        entity.subscriptions = update.subscriptions;
        entity.labels = update.labels;
        entity.annotations = update.annotations;
        entity.deregister = update.deregister;
        entity.deregistration_handler = update.deregistration_handler;
        let own = entity.default_subscription();
        if !entity.subscriptions.contains(&own) {
            entity.subscriptions.push(own);
        }

        info!("Applied entity config for {} ({} subscriptions)", entity.name, entity.subscriptions.len());
        Ok(())
    }
}

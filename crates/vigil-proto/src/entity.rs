//! Agent identity

use crate::{validate_name, ValidationError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Entity class reported by agents
pub const AGENT_ENTITY_CLASS: &str = "agent";

/// Identity of an agent, attached to every outbound event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Entity name, unique per namespace
    pub name: String,
    /// Namespace the entity lives in
    #[serde(default)]
    pub namespace: String,
    /// Entity class, always `agent` for entities created by an agent
    #[serde(default)]
    pub entity_class: String,
    /// Subscriptions used to route check requests
    #[serde(default)]
    pub subscriptions: Vec<String>,
    /// Whether the backend should deregister the entity when it stops sending keepalives
    #[serde(default)]
    pub deregister: bool,
    /// Handler used when deregistering
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deregistration_handler: Option<String>,
    /// Free-form labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Free-form annotations
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// System snapshot taken at startup
    #[serde(default)]
    pub system: SystemInfo,
    /// Last time the entity was seen, unix seconds
    #[serde(default)]
    pub last_seen: i64,
}

/// Host information collected at startup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    /// Hostname
    #[serde(default)]
    pub hostname: String,
    /// Operating system
    #[serde(default)]
    pub os: String,
    /// OS family or distribution
    #[serde(default)]
    pub platform: String,
    /// CPU architecture
    #[serde(default)]
    pub arch: String,
}

impl Entity {
    /// Create an agent entity with the given name and namespace
    pub fn agent(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            entity_class: AGENT_ENTITY_CLASS.to_string(),
            ..Default::default()
        }
    }

    /// Subscription that targets exactly this entity
    pub fn default_subscription(&self) -> String {
        format!("entity:{}", self.name)
    }

    /// Ensure the entity-specific subscription is present
    pub fn with_default_subscription(mut self) -> Self {
        let own = self.default_subscription();
        if !self.subscriptions.contains(&own) {
            self.subscriptions.push(own);
        }
        self
    }

    /// Validate the entity
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_name("entity", &self.name)?;
        if self.namespace.is_empty() {
            return Err(ValidationError::EmptyField {
                kind: "entity",
                field: "namespace",
            });
        }
        Ok(())
    }
}

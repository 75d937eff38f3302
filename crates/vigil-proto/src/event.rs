//! Result events

use crate::{unix_now, validate_name, Check, Entity, ValidationError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result envelope sent to the backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Namespace of the event
    #[serde(default)]
    pub namespace: String,
    /// Event ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    /// Entity that produced the event
    pub entity: Entity,
    /// Check result, absent for keepalives and metric-only events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<Check>,
    /// Metric points
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<Metrics>,
    /// Creation time, unix seconds
    #[serde(default)]
    pub timestamp: i64,
}

/// A set of metric points
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Handlers for the metrics
    #[serde(default)]
    pub handlers: Vec<String>,
    /// Points
    #[serde(default)]
    pub points: Vec<MetricPoint>,
}

/// A single metric sample
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    /// Metric name
    pub name: String,
    /// Sample value
    pub value: f64,
    /// Sample time, unix seconds
    #[serde(default)]
    pub timestamp: i64,
    /// Tags
    #[serde(default)]
    pub tags: Vec<MetricTag>,
}

/// Metric tag
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricTag {
    /// Tag name
    pub name: String,
    /// Tag value
    pub value: String,
}

impl Event {
    /// Create an event for an entity, timestamped now
    pub fn new(entity: Entity) -> Self {
        Self {
            namespace: entity.namespace.clone(),
            id: Some(Uuid::new_v4()),
            entity,
            check: None,
            metrics: None,
            timestamp: unix_now(),
        }
    }

    /// Create an event carrying a check result
    pub fn with_check(entity: Entity, check: Check) -> Self {
        Self {
            check: Some(check),
            ..Self::new(entity)
        }
    }

    /// Fill namespace, ID and timestamp when they are absent
    ///
    /// Values that are already present are left untouched.
    pub fn fill_defaults(&mut self, namespace: &str) {
        if self.namespace.is_empty() {
            self.namespace = namespace.to_string();
        }
        if self.entity.namespace.is_empty() {
            self.entity.namespace = self.namespace.clone();
        }
        if let Some(check) = self.check.as_mut() {
            if check.config.namespace.is_empty() {
                check.config.namespace = self.namespace.clone();
            }
        }
        if self.id.is_none() {
            self.id = Some(Uuid::new_v4());
        }
        if self.timestamp == 0 {
            self.timestamp = unix_now();
        }
    }

    /// Validate the entity and, when present, the check name
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.entity.validate()?;
        if let Some(check) = &self.check {
            validate_name("check", &check.config.name)?;
        }
        if self.check.is_none() && self.metrics.is_none() {
            return Err(ValidationError::EmptyField {
                kind: "event",
                field: "check or metrics",
            });
        }
        Ok(())
    }
}

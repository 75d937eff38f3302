//! Agent configuration

use crate::error::AgentError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default backend endpoint
pub const DEFAULT_BACKEND_URL: &str = "127.0.0.1:8081";

/// Default namespace for entities and events
pub const DEFAULT_NAMESPACE: &str = "default";

/// Configuration for an agent instance
///
/// Every field has a default so a configuration file only needs to name
/// what differs. Durations are given in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Entity name, defaults to the hostname
    pub name: String,
    /// Namespace of the entity and its events
    pub namespace: String,
    /// Subscriptions in addition to `entity:<name>`
    pub subscriptions: Vec<String>,
    /// Entity labels
    pub labels: BTreeMap<String, String>,
    /// Entity annotations
    pub annotations: BTreeMap<String, String>,
    /// Ask the backend to deregister the entity when it goes away
    pub deregister: bool,
    /// Handler the backend runs on deregistration
    pub deregistration_handler: Option<String>,
    /// Backend endpoints to connect to
    pub backend_urls: Vec<String>,
    /// Interval between keepalives
    #[serde(with = "duration_secs")]
    pub keepalive_interval: Duration,
    /// Time without keepalives after which the backend raises a warning
    #[serde(with = "duration_secs")]
    pub keepalive_warning_timeout: Duration,
    /// Deadline for the backend handshake reply
    #[serde(with = "duration_secs")]
    pub handshake_timeout: Duration,
    /// Deadline for opening a connection
    #[serde(with = "duration_secs")]
    pub dial_timeout: Duration,
    /// Deadline for a single connection write
    #[serde(with = "duration_secs")]
    pub write_timeout: Duration,
    /// First reconnect delay
    #[serde(with = "duration_secs")]
    pub retry_min: Duration,
    /// Upper bound of the reconnect delay
    #[serde(with = "duration_secs")]
    pub retry_max: Duration,
    /// Capacity of the outbound message queue
    pub outbound_queue_size: usize,
    /// Directory holding installed assets
    pub cache_dir: PathBuf,
    /// Deadline for a single asset download
    #[serde(with = "duration_secs")]
    pub asset_fetch_timeout: Duration,
    /// Largest asset body accepted, in bytes
    pub max_asset_size: u64,
    /// Allow-list file restricting executable commands
    pub allow_list: Option<PathBuf>,
    /// Deadline for a graceful stop
    #[serde(with = "duration_secs")]
    pub shutdown_timeout: Duration,
    /// Output size limit applied when a check does not set its own, zero means unlimited
    pub max_output_size: u64,
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: crate::system::hostname(),
            namespace: DEFAULT_NAMESPACE.to_string(),
            subscriptions: Vec::new(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            deregister: false,
            deregistration_handler: None,
            backend_urls: vec![DEFAULT_BACKEND_URL.to_string()],
            keepalive_interval: Duration::from_secs(20),
            keepalive_warning_timeout: Duration::from_secs(120),
            handshake_timeout: Duration::from_secs(10),
            dial_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(15),
            retry_min: Duration::from_secs(1),
            retry_max: Duration::from_secs(120),
            outbound_queue_size: 1000,
            cache_dir: default_cache_dir(),
            asset_fetch_timeout: Duration::from_secs(60),
            max_asset_size: crate::assets::fetch::DEFAULT_MAX_ASSET_SIZE,
            allow_list: None,
            shutdown_timeout: Duration::from_secs(10),
            max_output_size: 0,
            log_level: "info".to_string(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(r"C:\ProgramData\vigil\cache")
    } else {
        PathBuf::from("/var/cache/vigil")
    }
}

impl AgentConfig {
    /// Create a configuration with the given entity name and defaults otherwise
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Load a configuration file, YAML or JSON by extension
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AgentError> {
        load_by_extension(path.as_ref())
    }

    /// Check the configuration before the agent starts
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.name.trim().is_empty() {
            return Err(AgentError::Config("agent name must not be empty".to_string()));
        }
        if self.namespace.trim().is_empty() {
            return Err(AgentError::Config("namespace must not be empty".to_string()));
        }
        if self.keepalive_interval.is_zero() {
            return Err(AgentError::Config("keepalive interval must be positive".to_string()));
        }
        if self.outbound_queue_size == 0 {
            return Err(AgentError::Config("outbound queue size must be positive".to_string()));
        }
        for (field, value) in [
            ("retry_min", self.retry_min),
            ("retry_max", self.retry_max),
            ("dial_timeout", self.dial_timeout),
            ("handshake_timeout", self.handshake_timeout),
            ("write_timeout", self.write_timeout),
        ] {
            if value.is_zero() {
                return Err(AgentError::Config(format!("{} must be positive", field)));
            }
        }
        if self.max_asset_size == 0 {
            return Err(AgentError::Config("max_asset_size must be positive".to_string()));
        }
        if self.retry_min > self.retry_max {
            return Err(AgentError::Config(format!(
                "retry_min ({:?}) exceeds retry_max ({:?})",
                self.retry_min, self.retry_max
            )));
        }
        Ok(())
    }
}

/// Parse a YAML (`.yml`, `.yaml`) or JSON (`.json`) file
pub(crate) fn load_by_extension<T: DeserializeOwned>(path: &Path) -> Result<T, AgentError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| AgentError::Config(format!("failed to read {}: {}", path.display(), e)))?;

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yml") | Some("yaml") => serde_yaml::from_str(&content)
            .map_err(|e| AgentError::Config(format!("invalid YAML in {}: {}", path.display(), e))),
        Some("json") => serde_json::from_str(&content)
            .map_err(|e| AgentError::Config(format!("invalid JSON in {}: {}", path.display(), e))),
        _ => Err(AgentError::Config(format!(
            "{}: unsupported file extension, expected .yml, .yaml or .json",
            path.display()
        ))),
    }
}

/// Durations as (possibly fractional) seconds
mod duration_secs {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        if duration.subsec_nanos() == 0 {
            serializer.serialize_u64(duration.as_secs())
        } else {
            serializer.serialize_f64(duration.as_secs_f64())
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if secs < 0.0 {
            return Err(D::Error::custom(format!("invalid duration: {} seconds", secs)));
        }
        Duration::try_from_secs_f64(secs)
            .map_err(|e| D::Error::custom(format!("invalid duration: {} seconds ({})", secs, e)))
    }
}

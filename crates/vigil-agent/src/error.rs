//! Error types for the agent runtime

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use vigil_proto::{ProtocolError, ValidationError};
use vigil_transport::TransportError;

/// Main error type for agent operations
#[derive(Debug, Error)]
pub enum AgentError {
    /// Invalid or unusable configuration; aborts startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport-related errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Protocol-related errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Backend did not complete the handshake
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Malformed check, hook, entity or event
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Asset install failure
    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),

    /// Entity config pushed for a different entity
    #[error("Entity mismatch: expected {expected}, got {actual}")]
    EntityMismatch {
        /// Name of this agent's entity
        expected: String,
        /// Name in the pushed config
        actual: String,
    },

    /// A check with the same name is still executing
    #[error("Check {0} is already in progress")]
    CheckInProgress(String),

    /// No handler registered for an inbound message type
    #[error("No handler for message type {0}")]
    UnknownMessageType(String),

    /// Outbound queue receiver is gone
    #[error("Outbound queue closed")]
    QueueClosed,

    /// Timeout errors
    #[error("Timeout after {duration:?}")]
    Timeout {
        /// Duration that was exceeded
        duration: Duration,
    },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Whether the error must abort startup rather than trigger a retry
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Config(_))
    }
}

/// Errors installing a runtime asset
#[derive(Debug, Error)]
pub enum AssetError {
    /// Download failed
    #[error("failed to download {url}: {reason}")]
    Download {
        /// Asset URL
        url: String,
        /// Failure description
        reason: String,
    },

    /// Download exceeded the fetch timeout
    #[error("download of asset {name} timed out after {timeout:?}")]
    Timeout {
        /// Asset name
        name: String,
        /// Fetch timeout
        timeout: Duration,
    },

    /// Downloaded body does not hash to the declared sha256
    #[error("asset {name} sha256 mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Asset name
        name: String,
        /// Declared hash
        expected: String,
        /// Hash of the downloaded body
        actual: String,
    },

    /// Something other than a directory occupies the cache path
    #[error("cache path {} exists and is not a directory", path.display())]
    CacheCollision {
        /// Offending path
        path: PathBuf,
    },

    /// Archive could not be unpacked
    #[error("failed to extract asset {name}: {reason}")]
    Extract {
        /// Asset name
        name: String,
        /// Failure description
        reason: String,
    },

    /// A check referenced an asset the request did not carry
    #[error("asset {0} is not provided by the check request")]
    Unknown(String),

    /// Asset reference failed validation
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    /// Filesystem errors
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        /// Path being operated on
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

impl AssetError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the failure is an integrity violation rather than an availability problem
    pub fn is_integrity_error(&self) -> bool {
        matches!(self, Self::ChecksumMismatch { .. } | Self::CacheCollision { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(AgentError::Config("no name".into()).is_fatal());
        assert!(!AgentError::Handshake("bad reply".into()).is_fatal());
        assert!(!AgentError::Transport(TransportError::Closed).is_fatal());
        assert!(!AgentError::CheckInProgress("disk".into()).is_fatal());
    }

    #[test]
    fn test_integrity_classification() {
        let mismatch = AssetError::ChecksumMismatch {
            name: "tool".into(),
            expected: "a".into(),
            actual: "b".into(),
        };
        assert!(mismatch.is_integrity_error());
        assert!(AssetError::CacheCollision { path: "/tmp/x".into() }.is_integrity_error());
        assert!(!AssetError::Unknown("tool".into()).is_integrity_error());
    }
}

//! Error types for protocol operations

use thiserror::Error;

/// Protocol-specific errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Stream ended in the middle of a frame
    #[error("Invalid frame format")]
    InvalidFrame,

    /// Frame too large
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Envelope carried a different type than the caller expected
    #[error("Unexpected message type: expected {expected}, got {actual}")]
    UnexpectedType {
        /// Expected message type
        expected: String,
        /// Received message type
        actual: String,
    },

    /// Underlying stream I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(format!("JSON error: {}", err))
    }
}

impl From<rmp_serde::encode::Error> for ProtocolError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Serialization(format!("MessagePack encode error: {}", err))
    }
}

impl From<rmp_serde::decode::Error> for ProtocolError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Serialization(format!("MessagePack decode error: {}", err))
    }
}

/// Validation failures for configuration and events received from the wire
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field was empty
    #[error("{kind} {field} must not be empty")]
    EmptyField {
        /// Resource kind
        kind: &'static str,
        /// Field name
        field: &'static str,
    },

    /// A name contained a character outside `[A-Za-z0-9_.-]`
    #[error("{kind} name {name:?} contains invalid character {character:?}")]
    InvalidName {
        /// Resource kind
        kind: &'static str,
        /// Offending name
        name: String,
        /// First invalid character
        character: char,
    },

    /// Check has neither an interval nor a cron schedule
    #[error("check {0} must have an interval greater than zero or a cron schedule")]
    MissingSchedule(String),

    /// Unknown hook type
    #[error("invalid hook type {0:?}")]
    InvalidHookType(String),

    /// Asset hash is not a lowercase sha256 hex digest
    #[error("asset {name} has invalid sha256 {hash:?}")]
    InvalidHash {
        /// Asset name
        name: String,
        /// Offending hash
        hash: String,
    },
}

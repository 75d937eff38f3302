//! # Vigil Protocol
//!
//! Wire envelope, frame codec and the data model exchanged between a Vigil
//! agent and its backend.

#![warn(missing_docs)]

/// Message envelope and handshake types
pub mod message;

/// Frame codec for async streams
pub mod codec;

/// Agent identity
pub mod entity;

/// Runtime asset references
pub mod asset;

/// Check and hook configuration and results
pub mod check;

/// Result events
pub mod event;

/// Error types for protocol operations
pub mod error;

pub use asset::Asset;
pub use check::{Check, CheckConfig, CheckRequest, Hook, HookConfig, HookList};
pub use codec::MessageCodec;
pub use entity::{Entity, SystemInfo};
pub use error::{ProtocolError, ValidationError};
pub use event::{Event, MetricPoint, MetricTag, Metrics};
pub use message::{AgentHandshake, BackendHandshake, Message, MessageType};

/// Current unix time in seconds
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Check that a resource name is non-empty and only uses `[A-Za-z0-9_.-]`
pub(crate) fn validate_name(kind: &'static str, name: &str) -> Result<(), ValidationError> {
    if name.is_empty() {
        return Err(ValidationError::EmptyField {
            kind,
            field: "name",
        });
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
    {
        return Err(ValidationError::InvalidName {
            kind,
            name: name.to_string(),
            character: bad,
        });
    }
    Ok(())
}

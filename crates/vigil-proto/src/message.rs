//! Message envelope and handshake types

use crate::ProtocolError;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Message kinds understood by the agent runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// First message on every connection, sent by the agent
    AgentHandshake,
    /// Backend reply to the agent handshake
    BackendHandshake,
    /// Liveness event
    Keepalive,
    /// Check result or ingested event
    Event,
    /// Backend request to execute a check
    CheckRequest,
    /// Backend push of updated entity configuration
    EntityConfig,
}

impl MessageType {
    /// All known message kinds
    pub const ALL: [MessageType; 6] = [
        Self::AgentHandshake,
        Self::BackendHandshake,
        Self::Keepalive,
        Self::Event,
        Self::CheckRequest,
        Self::EntityConfig,
    ];

    /// Wire name of this message kind
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AgentHandshake => "agent_handshake",
            Self::BackendHandshake => "backend_handshake",
            Self::Keepalive => "keepalive",
            Self::Event => "event",
            Self::CheckRequest => "check_request",
            Self::EntityConfig => "entity_config",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ProtocolError::Serialization(format!("Unknown message type: {}", s)))
    }
}

/// Wire envelope: a type string and a type-specific JSON payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message type string
    #[serde(rename = "type")]
    pub message_type: String,
    /// JSON document for this type
    pub payload: Bytes,
}

impl Message {
    /// Create a message from a raw type string and payload
    pub fn new(message_type: impl Into<String>, payload: Bytes) -> Self {
        Self {
            message_type: message_type.into(),
            payload,
        }
    }

    /// Create a message by JSON-encoding `value` as the payload
    pub fn encode<T: Serialize>(kind: MessageType, value: &T) -> Result<Self, ProtocolError> {
        let payload = serde_json::to_vec(value)?;
        Ok(Self::new(kind.as_str(), Bytes::from(payload)))
    }

    /// Decode the JSON payload
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Decode the payload after checking that the envelope has the expected type
    pub fn decode_as<T: DeserializeOwned>(&self, kind: MessageType) -> Result<T, ProtocolError> {
        if self.message_type != kind.as_str() {
            return Err(ProtocolError::UnexpectedType {
                expected: kind.as_str().to_string(),
                actual: self.message_type.clone(),
            });
        }
        self.decode()
    }

    /// Known message kind, if the type string is recognised
    pub fn kind(&self) -> Option<MessageType> {
        self.message_type.parse().ok()
    }
}

/// Sent by the agent when a connection opens
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentHandshake {
    /// Agent (entity) name
    pub id: String,
    /// Namespace the agent belongs to
    #[serde(default)]
    pub namespace: String,
    /// Subscriptions the agent wants check requests for
    #[serde(default)]
    pub subscriptions: Vec<String>,
}

/// Backend reply to [`AgentHandshake`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendHandshake {}

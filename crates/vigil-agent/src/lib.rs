//! # Vigil Agent
//!
//! Runtime of the Vigil monitoring agent: a reconnecting backend session
//! with keepalives, dispatch of backend requests, check and hook execution
//! gated by an allow-list, and a content-addressed cache of runtime assets.

#![warn(missing_docs)]

/// Agent assembly and lifecycle
pub mod agent;

/// Command allow-list
pub mod allow_list;

/// Runtime asset provisioning
pub mod assets;

/// Shell command execution
pub mod command;

/// Agent configuration
pub mod config;

/// Runtime context shared by agent tasks
pub mod context;

/// Routing of inbound messages to handlers
pub mod dispatch;

/// The agent's own entity
pub mod entity;

/// Error types for agent operations
pub mod error;

/// Check and hook execution
pub mod execution;

/// Handlers for backend-initiated messages
pub mod handlers;

/// Keepalive events
pub mod keepalive;

/// Bounded outbound message queue
pub mod outbound;

/// Per-connection send and receive loops
pub mod pump;

/// Backend endpoint selection
pub mod selector;

/// Backend session management
pub mod session;

/// Host information probing
pub mod system;

pub use agent::{Agent, AgentBuilder, AgentHandle, RunningAgent};
pub use config::AgentConfig;
pub use error::{AgentError, AssetError};
pub use session::SessionState;

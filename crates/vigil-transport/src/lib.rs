//! # Vigil Transport
//!
//! Message channels between an agent and its backend.

#![warn(missing_docs)]

/// Dialer abstraction and TCP dialer
pub mod transport;

/// Connection abstraction and TCP connection
pub mod connection;

/// In-process connections for tests and embedding
pub mod memory;

/// Transport-specific error types
pub mod error;

pub use connection::{Connection, TcpConnection};
pub use error::TransportError;
pub use transport::{Dialer, TcpDialer};

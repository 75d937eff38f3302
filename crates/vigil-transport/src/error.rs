//! Transport-specific error types

use thiserror::Error;
use vigil_proto::ProtocolError;
use std::io;

/// Transport-specific errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not establish or keep the connection
    #[error("Connection error: {0}")]
    Connection(String),

    /// The connection was closed by either side
    #[error("Connection closed")]
    Closed,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// A single frame could not be decoded; the stream is still usable
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Whether the connection is unusable after this error
    ///
    /// Connection-class errors tear the session down; protocol errors only
    /// affect the frame that produced them.
    pub fn is_connection_error(&self) -> bool {
        !matches!(self, Self::Protocol(_))
    }
}

impl From<ProtocolError> for TransportError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Serialization(msg) => Self::Protocol(msg),
            ProtocolError::UnexpectedType { .. } => Self::Protocol(err.to_string()),
            ProtocolError::Io(e) => Self::Io(e),
            // the stream cannot be resynchronised after these
            ProtocolError::InvalidFrame | ProtocolError::FrameTooLarge { .. } => {
                Self::Connection(err.to_string())
            }
        }
    }
}

//! Dialer abstraction and TCP dialer

use crate::{Connection, TcpConnection, TransportError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Opens connections to backend endpoints
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Connect to `endpoint`
    async fn dial(&self, endpoint: &str) -> Result<Arc<dyn Connection>, TransportError>;
}

/// Dials `host:port` endpoints over TCP
#[derive(Debug, Clone)]
pub struct TcpDialer {
    /// Connection timeout
    connect_timeout: Duration,
}

impl Default for TcpDialer {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl TcpDialer {
    /// Create a dialer with the given connect timeout
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    /// Strip an optional `tcp://` scheme and trailing slash
    fn address(endpoint: &str) -> &str {
        endpoint
            .strip_prefix("tcp://")
            .unwrap_or(endpoint)
            .trim_end_matches('/')
    }
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, endpoint: &str) -> Result<Arc<dyn Connection>, TransportError> {
        let address = Self::address(endpoint);
        debug!("Dialing {} (timeout {:?})", address, self.connect_timeout);

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| TransportError::Timeout)?
            .map_err(|e| TransportError::Connection(format!("{}: {}", address, e)))?;

        info!("Connected to backend {}", address);
        Ok(Arc::new(TcpConnection::new(stream)))
    }
}

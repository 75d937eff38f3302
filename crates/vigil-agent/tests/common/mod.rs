//! In-process backend used by the integration tests

#![allow(dead_code)]

use bytes::Bytes;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use vigil_agent::assets::Fetcher;
use vigil_agent::{Agent, AgentConfig, AssetError, RunningAgent};
use vigil_proto::{AgentHandshake, BackendHandshake, Event, Message, MessageType};
use vigil_transport::memory::{self, MemoryAcceptor, MemoryConnection, MemoryDialer};
use vigil_transport::Connection;

/// Upper bound for anything a test waits on
pub const WAIT: Duration = Duration::from_secs(5);

/// Configuration with short retry delays and no periodic keepalives
pub fn test_config(name: &str, backends: &[&str], cache_dir: &Path) -> AgentConfig {
    let mut config = AgentConfig::new(name);
    config.backend_urls = backends.iter().map(|b| b.to_string()).collect();
    config.cache_dir = cache_dir.to_path_buf();
    config.retry_min = Duration::from_millis(10);
    config.retry_max = Duration::from_millis(50);
    config.keepalive_interval = Duration::from_secs(60);
    config.handshake_timeout = Duration::from_secs(2);
    config.shutdown_timeout = Duration::from_secs(2);
    config
}

/// Base environment for commands run by test agents
pub fn test_env() -> Vec<(String, String)> {
    let path = std::env::var("PATH").unwrap_or_else(|_| "/usr/bin:/bin".to_string());
    vec![("PATH".to_string(), path)]
}

/// Backend side of the memory transport
pub struct TestBackend {
    dialer: MemoryDialer,
    acceptor: MemoryAcceptor,
}

impl TestBackend {
    pub fn new() -> Self {
        let (dialer, acceptor) = memory::listener();
        Self { dialer, acceptor }
    }

    /// Dialer to hand to the agent
    pub fn dialer(&self) -> MemoryDialer {
        self.dialer.clone()
    }

    /// Build and spawn an agent connected to this backend
    pub fn spawn_agent(&self, config: AgentConfig) -> RunningAgent {
        Agent::builder(config)
            .dialer(Arc::new(self.dialer()))
            .base_env(test_env())
            .build()
            .unwrap()
            .spawn()
    }

    /// Like [`TestBackend::spawn_agent`] with a custom asset fetcher
    pub fn spawn_agent_with(&self, config: AgentConfig, fetcher: Arc<dyn Fetcher>) -> RunningAgent {
        Agent::builder(config)
            .dialer(Arc::new(self.dialer()))
            .fetcher(fetcher)
            .base_env(test_env())
            .build()
            .unwrap()
            .spawn()
    }

    /// Accept the next connection and complete the handshake
    pub async fn accept(&mut self) -> BackendSession {
        let (endpoint, conn) = tokio::time::timeout(WAIT, self.acceptor.accept())
            .await
            .expect("no connection within timeout")
            .expect("dialer dropped");

        let first = tokio::time::timeout(WAIT, conn.receive()).await.unwrap().unwrap();
        let handshake: AgentHandshake = first.decode_as(MessageType::AgentHandshake).unwrap();
        let reply = Message::encode(MessageType::BackendHandshake, &BackendHandshake {}).unwrap();
        conn.send(reply).await.unwrap();

        BackendSession {
            endpoint,
            conn,
            handshake,
        }
    }
}

/// One accepted connection after the handshake
pub struct BackendSession {
    pub endpoint: String,
    pub conn: MemoryConnection,
    pub handshake: AgentHandshake,
}

impl BackendSession {
    /// Next message from the agent
    pub async fn recv(&self) -> Message {
        tokio::time::timeout(WAIT, self.conn.receive())
            .await
            .expect("no message within timeout")
            .expect("connection closed")
    }

    /// Next event that is not a keepalive
    pub async fn recv_event(&self) -> Event {
        loop {
            let message = self.recv().await;
            if message.kind() == Some(MessageType::Event) {
                return message.decode().unwrap();
            }
        }
    }

    /// Send a typed message to the agent
    pub async fn send<T: Serialize>(&self, kind: MessageType, value: &T) {
        self.conn.send(Message::encode(kind, value).unwrap()).await.unwrap();
    }

    /// Drop the connection from the backend side
    pub async fn close(&self) {
        self.conn.close().await.unwrap();
    }
}

/// Fetcher serving fixed bodies and counting requests
pub struct StaticFetcher {
    bodies: Vec<(String, Bytes)>,
    requests: std::sync::Mutex<Vec<String>>,
}

impl StaticFetcher {
    pub fn new(bodies: Vec<(String, Bytes)>) -> Self {
        Self {
            bodies,
            requests: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes, AssetError> {
        self.requests.lock().unwrap().push(url.to_string());
        self.bodies
            .iter()
            .find(|(u, _)| u == url)
            .map(|(_, body)| body.clone())
            .ok_or_else(|| AssetError::Download {
                url: url.to_string(),
                reason: "404 Not Found".to_string(),
            })
    }
}

/// Gzipped tarball holding an executable `bin/<name>` script
pub fn script_asset(name: &str, script: &str) -> Bytes {
    let mut builder = tar::Builder::new(flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default()));
    let mut header = tar::Header::new_gnu();
    header.set_size(script.len() as u64);
    header.set_mode(0o755);
    header.set_cksum();
    builder
        .append_data(&mut header, format!("bin/{}", name), script.as_bytes())
        .unwrap();
    Bytes::from(builder.into_inner().unwrap().finish().unwrap())
}

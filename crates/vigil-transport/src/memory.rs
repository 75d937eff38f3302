//! In-process connections for tests and embedding
//!
//! [`channel`] returns two connected ends; [`listener`] returns a
//! [`MemoryDialer`] whose dials surface on the paired [`MemoryAcceptor`],
//! which lets a backend run inside the same process as the agent.

use crate::{Connection, Dialer, TransportError};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{mpsc, watch, Mutex};
use tracing::debug;
use vigil_proto::Message;

/// Default per-direction buffer of a memory connection
pub const DEFAULT_CAPACITY: usize = 64;

/// One end of an in-memory connection
pub struct MemoryConnection {
    tx: StdMutex<Option<mpsc::Sender<Message>>>,
    rx: Mutex<mpsc::Receiver<Message>>,
    closed: watch::Sender<bool>,
}

/// Create two connected ends with `capacity` buffered messages per direction
pub fn channel(capacity: usize) -> (MemoryConnection, MemoryConnection) {
    let (a_tx, b_rx) = mpsc::channel(capacity);
    let (b_tx, a_rx) = mpsc::channel(capacity);
    (MemoryConnection::new(a_tx, a_rx), MemoryConnection::new(b_tx, b_rx))
}

impl MemoryConnection {
    fn new(tx: mpsc::Sender<Message>, rx: mpsc::Receiver<Message>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            tx: StdMutex::new(Some(tx)),
            rx: Mutex::new(rx),
            closed,
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<Message>> {
        self.tx.lock().ok().and_then(|tx| tx.clone())
    }
}

async fn wait_closed(mut closed: watch::Receiver<bool>) {
    loop {
        let done = *closed.borrow_and_update();
        if done || closed.changed().await.is_err() {
            return;
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn send(&self, message: Message) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let tx = self.sender().ok_or(TransportError::Closed)?;
        tx.send(message).await.map_err(|_| TransportError::Closed)
    }

    async fn receive(&self) -> Result<Message, TransportError> {
        // messages buffered before the peer closed are still delivered
        if *self.closed.borrow() {
            return Err(TransportError::Closed);
        }
        let closed = self.closed.subscribe();
        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            _ = wait_closed(closed) => {
                rx.close();
                Err(TransportError::Closed)
            }
            message = rx.recv() => match message {
                Some(message) => Ok(message),
                None => {
                    debug!("Memory connection closed by peer");
                    self.closed.send_replace(true);
                    Err(TransportError::Closed)
                }
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.send_replace(true) {
            return Ok(());
        }
        if let Ok(mut tx) = self.tx.lock() {
            tx.take();
        }
        if let Ok(mut rx) = self.rx.try_lock() {
            rx.close();
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow() || self.sender().map_or(true, |tx| tx.is_closed())
    }
}

/// Dialer whose connections are delivered to a [`MemoryAcceptor`]
#[derive(Clone)]
pub struct MemoryDialer {
    tx: mpsc::UnboundedSender<(String, MemoryConnection)>,
    unreachable: Arc<StdMutex<HashSet<String>>>,
    attempts: Arc<StdMutex<Vec<String>>>,
    capacity: usize,
}

/// Receives the backend ends of connections opened by a [`MemoryDialer`]
pub struct MemoryAcceptor {
    rx: mpsc::UnboundedReceiver<(String, MemoryConnection)>,
}

/// Create a connected dialer/acceptor pair
pub fn listener() -> (MemoryDialer, MemoryAcceptor) {
    let (tx, rx) = mpsc::unbounded_channel();
    let dialer = MemoryDialer {
        tx,
        unreachable: Arc::new(StdMutex::new(HashSet::new())),
        attempts: Arc::new(StdMutex::new(Vec::new())),
        capacity: DEFAULT_CAPACITY,
    };
    (dialer, MemoryAcceptor { rx })
}

impl MemoryDialer {
    /// Make dials to `endpoint` fail (or succeed again)
    pub fn set_unreachable(&self, endpoint: &str, unreachable: bool) {
        if let Ok(mut set) = self.unreachable.lock() {
            if unreachable {
                set.insert(endpoint.to_string());
            } else {
                set.remove(endpoint);
            }
        }
    }

    /// Every endpoint dialed so far, in order
    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().map(|a| a.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Dialer for MemoryDialer {
    async fn dial(&self, endpoint: &str) -> Result<Arc<dyn Connection>, TransportError> {
        if let Ok(mut attempts) = self.attempts.lock() {
            attempts.push(endpoint.to_string());
        }
        let unreachable = self
            .unreachable
            .lock()
            .map(|set| set.contains(endpoint))
            .unwrap_or(false);
        if unreachable {
            return Err(TransportError::Connection(format!("{} unreachable", endpoint)));
        }

        let (agent, backend) = channel(self.capacity);
        self.tx
            .send((endpoint.to_string(), backend))
            .map_err(|_| TransportError::Connection(format!("no listener for {}", endpoint)))?;
        Ok(Arc::new(agent))
    }
}

impl MemoryAcceptor {
    /// Wait for the next dialed connection
    pub async fn accept(&mut self) -> Option<(String, MemoryConnection)> {
        self.rx.recv().await
    }
}

//! Bounded outbound message queue

use crate::error::AgentError;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use vigil_proto::Message;

/// Producer side of the outbound queue
///
/// Enqueueing waits while the queue is full.
#[derive(Clone)]
pub struct Outbound {
    tx: mpsc::Sender<Message>,
}

/// Consumer side of the outbound queue, owned by the send pump
///
/// A message whose write failed is put back with [`OutboundQueue::requeue`]
/// and is handed out first on the next connection.
pub struct OutboundQueue {
    rx: mpsc::Receiver<Message>,
    pending: Option<Message>,
}

/// Create a queue holding at most `capacity` messages
pub fn queue(capacity: usize) -> (Outbound, OutboundQueue) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Outbound { tx }, OutboundQueue { rx, pending: None })
}

impl Outbound {
    /// Enqueue a message, waiting for space
    pub async fn enqueue(&self, message: Message) -> Result<(), AgentError> {
        self.tx.send(message).await.map_err(|_| AgentError::QueueClosed)
    }

    /// Enqueue without waiting; returns `false` if the queue is full
    pub fn try_enqueue(&self, message: Message) -> Result<bool, AgentError> {
        match self.tx.try_send(message) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => Ok(false),
            Err(TrySendError::Closed(_)) => Err(AgentError::QueueClosed),
        }
    }
}

impl OutboundQueue {
    /// Wait for the next message; `None` once every producer is gone
    ///
    /// Cancel safe.
    pub async fn next(&mut self) -> Option<Message> {
        if let Some(message) = self.pending.take() {
            return Some(message);
        }
        self.rx.recv().await
    }

    /// Next message if one is ready
    pub fn try_next(&mut self) -> Option<Message> {
        self.pending.take().or_else(|| self.rx.try_recv().ok())
    }

    /// Put back a message that could not be written
    pub fn requeue(&mut self, message: Message) {
        self.pending = Some(message);
    }

    /// Whether a requeued message is waiting
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

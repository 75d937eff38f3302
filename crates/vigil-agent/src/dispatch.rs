//! Routing of inbound messages to handlers

use crate::error::AgentError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use vigil_proto::{Message, MessageType};

/// Handler trait for inbound messages
///
/// Handlers are called from the receive loop one message at a time and must
/// return quickly; long work belongs in a spawned task.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handle one message
    async fn handle(&self, message: Message) -> Result<(), AgentError>;
}

/// Maps message types to handlers
///
/// The table is fixed once built and read without locking.
pub struct Dispatcher {
    handlers: HashMap<MessageType, Arc<dyn Handler>>,
}

/// Builder for [`Dispatcher`]
#[derive(Default)]
pub struct DispatcherBuilder {
    handlers: HashMap<MessageType, Arc<dyn Handler>>,
}

impl DispatcherBuilder {
    /// Register `handler` for `kind`, replacing any earlier registration
    pub fn register(mut self, kind: MessageType, handler: Arc<dyn Handler>) -> Self {
        debug!("Registered handler for message type: {}", kind);
        self.handlers.insert(kind, handler);
        self
    }

    /// Finish the table
    pub fn build(self) -> Dispatcher {
        Dispatcher {
            handlers: self.handlers,
        }
    }
}

impl Dispatcher {
    /// Start building a dispatcher
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    /// Hand a message to its handler
    ///
    /// Messages without a registered handler are reported, not fatal.
    pub async fn dispatch(&self, message: Message) -> Result<(), AgentError> {
        let handler = message.kind().and_then(|kind| self.handlers.get(&kind));
        match handler {
            Some(handler) => handler.handle(message).await,
            None => {
                warn!("No handler for message type: {}", message.message_type);
                Err(AgentError::UnknownMessageType(message.message_type))
            }
        }
    }

    /// Whether a handler is registered for `kind`
    pub fn handles(&self, kind: MessageType) -> bool {
        self.handlers.contains_key(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Message>>,
    }

    #[async_trait]
    impl Handler for Recorder {
        async fn handle(&self, message: Message) -> Result<(), AgentError> {
            self.seen.lock().unwrap().push(message);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_dispatch_to_registered_handler() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::builder()
            .register(MessageType::CheckRequest, recorder.clone())
            .build();

        let message = Message::new("check_request", Bytes::from_static(b"{}"));
        dispatcher.dispatch(message.clone()).await.unwrap();

        assert_eq!(recorder.seen.lock().unwrap().as_slice(), &[message]);
        assert!(dispatcher.handles(MessageType::CheckRequest));
        assert!(!dispatcher.handles(MessageType::EntityConfig));
    }

    #[tokio::test]
    async fn test_unknown_type_is_reported() {
        let dispatcher = Dispatcher::builder().build();

        let err = dispatcher
            .dispatch(Message::new("metrics_push", Bytes::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::UnknownMessageType(ref t) if t == "metrics_push"));

        let err = dispatcher
            .dispatch(Message::new("entity_config", Bytes::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::UnknownMessageType(_)));
    }
}

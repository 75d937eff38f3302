//! Handlers for backend-initiated messages

use crate::dispatch::Handler;
use crate::entity::EntityStore;
use crate::error::AgentError;
use crate::execution::CheckExecutor;
use crate::outbound::Outbound;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, Instrument};
use vigil_proto::{CheckRequest, Entity, Message, MessageType};

/// Handler for `check_request` messages
///
/// Validates the request, then runs it on its own task so the receive
/// loop is never blocked by a command. A second request for a check that
/// is still running is dropped.
#[derive(Clone)]
pub struct CheckRequestHandler {
    executor: CheckExecutor,
    outbound: Outbound,
    in_progress: Arc<Mutex<HashSet<String>>>,
    span: tracing::Span,
}

/// Clears the in-progress mark when the execution task ends
struct InProgress {
    set: Arc<Mutex<HashSet<String>>>,
    name: String,
}

impl Drop for InProgress {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.name);
        }
    }
}

impl CheckRequestHandler {
    /// Create a handler that publishes results to `outbound`
    pub fn new(executor: CheckExecutor, outbound: Outbound, span: tracing::Span) -> Self {
        Self {
            executor,
            outbound,
            in_progress: Arc::new(Mutex::new(HashSet::new())),
            span,
        }
    }

    fn begin(&self, name: &str) -> Option<InProgress> {
        let mut set = self.in_progress.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(name.to_string()) {
            return None;
        }
        Some(InProgress {
            set: Arc::clone(&self.in_progress),
            name: name.to_string(),
        })
    }

    /// Whether a check with this name is executing
    pub fn is_in_progress(&self, name: &str) -> bool {
        self.in_progress
            .lock()
            .map(|set| set.contains(name))
            .unwrap_or(false)
    }
}

#[async_trait]
impl Handler for CheckRequestHandler {
    async fn handle(&self, message: Message) -> Result<(), AgentError> {
        let request: CheckRequest = message.decode()?;
        request.config.validate()?;

        let name = request.config.name.clone();
        let Some(guard) = self.begin(&name) else {
            return Err(AgentError::CheckInProgress(name));
        };
        debug!("Scheduling check {}", name);

        let executor = self.executor.clone();
        let outbound = self.outbound.clone();
        let span = tracing::info_span!(parent: &self.span, "check", name = %name);
        tokio::spawn(
            async move {
                let _guard = guard;
                let event = match executor.run_check(request).await {
                    Ok(event) => event,
                    Err(e) => {
                        error!("Check execution failed: {}", e);
                        return;
                    }
                };
                match Message::encode(MessageType::Event, &event) {
                    Ok(message) => {
                        if let Err(e) = outbound.enqueue(message).await {
                            error!("Failed to publish check result: {}", e);
                        }
                    }
                    Err(e) => error!("Failed to encode check result: {}", e),
                }
            }
            .instrument(span),
        );
        Ok(())
    }
}

/// Handler for `entity_config` messages
pub struct EntityConfigHandler {
    entity: EntityStore,
}

impl EntityConfigHandler {
    /// Create a handler updating `entity`
    pub fn new(entity: EntityStore) -> Self {
        Self { entity }
    }
}

#[async_trait]
impl Handler for EntityConfigHandler {
    async fn handle(&self, message: Message) -> Result<(), AgentError> {
        let update: Entity = message.decode()?;
        self.entity.apply_config(update).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::allow_list::AllowList;
    use crate::assets::{AssetManager, HttpFetcher};
    use crate::config::AgentConfig;
    use crate::context::RuntimeContext;
    use crate::entity::build_entity;
    use crate::outbound;
    use std::time::Duration;
    use vigil_proto::{CheckConfig, Event, SystemInfo};

    fn handler(dir: &tempfile::TempDir) -> (CheckRequestHandler, outbound::OutboundQueue) {
        let config = AgentConfig::new("web-01");
        let entity = EntityStore::new(build_entity(&config, SystemInfo::default()));
        let ctx = RuntimeContext::new(config, entity);
        let fetcher = Arc::new(HttpFetcher::new(Duration::from_secs(1)).unwrap());
        let assets = AssetManager::with_base_env(
            dir.path(),
            fetcher,
            Duration::from_secs(1),
            vec![("PATH".to_string(), "/usr/bin:/bin".to_string())],
        )
        .unwrap();
        let executor = CheckExecutor::new(ctx.clone(), assets, Arc::new(AllowList::default()));
        let (tx, rx) = outbound::queue(8);
        (CheckRequestHandler::new(executor, tx, ctx.span.clone()), rx)
    }

    fn check_request(name: &str, command: &str) -> Message {
        let request = CheckRequest {
            config: CheckConfig::new(name, command, 60),
            ..Default::default()
        };
        Message::encode(MessageType::CheckRequest, &request).unwrap()
    }

    #[tokio::test]
    async fn test_result_is_enqueued() {
        let dir = tempfile::tempdir().unwrap();
        let (handler, mut queue) = handler(&dir);

        handler.handle(check_request("disk-usage", "true")).await.unwrap();

        let message = tokio::time::timeout(Duration::from_secs(5), queue.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.kind(), Some(MessageType::Event));
        let event: Event = message.decode().unwrap();
        assert_eq!(event.check.unwrap().status, 0);
    }

    #[tokio::test]
    async fn test_duplicate_request_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (handler, mut queue) = handler(&dir);

        handler.handle(check_request("slow", "sleep 1")).await.unwrap();
        assert!(handler.is_in_progress("slow"));
        let err = handler.handle(check_request("slow", "sleep 1")).await.unwrap_err();
        assert!(matches!(err, AgentError::CheckInProgress(_)));

        let _ = tokio::time::timeout(Duration::from_secs(5), queue.next()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handler.is_in_progress("slow"));
        handler.handle(check_request("slow", "true")).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (handler, _queue) = handler(&dir);

        let err = handler.handle(check_request("bad name!", "true")).await.unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
        assert!(!handler.is_in_progress("bad name!"));
    }

    #[tokio::test]
    async fn test_entity_config_handler() {
        let store = EntityStore::new(vigil_proto::Entity::agent("web-01", "default"));
        let handler = EntityConfigHandler::new(store.clone());

        let mut update = vigil_proto::Entity::agent("web-01", "default");
        update.subscriptions = vec!["linux".to_string()];
        let message = Message::encode(MessageType::EntityConfig, &update).unwrap();
        handler.handle(message).await.unwrap();
        assert!(store.snapshot().await.subscriptions.contains(&"linux".to_string()));

        let other = Message::encode(MessageType::EntityConfig, &vigil_proto::Entity::agent("db-01", "default")).unwrap();
        assert!(matches!(
            handler.handle(other).await,
            Err(AgentError::EntityMismatch { .. })
        ));
    }
}

//! Runtime context shared by every agent task

use crate::config::AgentConfig;
use crate::entity::EntityStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Span;

/// Configuration, entity and shutdown signal of a running agent
///
/// Cheap to clone; every task gets its own copy. Cancelling `shutdown`
/// stops the whole runtime.
#[derive(Clone)]
pub struct RuntimeContext {
    /// Immutable configuration
    pub config: Arc<AgentConfig>,
    /// The agent's entity
    pub entity: EntityStore,
    /// Global shutdown signal
    pub shutdown: CancellationToken,
    /// Span that agent tasks are instrumented with
    pub span: Span,
}

impl RuntimeContext {
    /// Create a context with a fresh shutdown token
    pub fn new(config: AgentConfig, entity: EntityStore) -> Self {
        let span = tracing::info_span!("agent", name = %config.name);
        Self {
            config: Arc::new(config),
            entity,
            shutdown: CancellationToken::new(),
            span,
        }
    }

    /// Whether shutdown was requested
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

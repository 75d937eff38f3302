//! Agent assembly and lifecycle

use crate::allow_list::AllowList;
use crate::assets::{AssetManager, Fetcher, HttpFetcher};
use crate::config::AgentConfig;
use crate::context::RuntimeContext;
use crate::dispatch::Dispatcher;
use crate::entity::{build_entity, EntityStore};
use crate::error::AgentError;
use crate::execution::CheckExecutor;
use crate::handlers::{CheckRequestHandler, EntityConfigHandler};
use crate::outbound::{self, Outbound};
use crate::selector::BackendSelector;
use crate::session::{SessionManager, SessionState};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn, Instrument};
use vigil_proto::{Entity, Event, Message, MessageType, SystemInfo};
use vigil_transport::{Dialer, TcpDialer};

/// Builder for [`Agent`]
pub struct AgentBuilder {
    config: AgentConfig,
    system: Option<SystemInfo>,
    dialer: Option<Arc<dyn Dialer>>,
    fetcher: Option<Arc<dyn Fetcher>>,
    selector: Option<BackendSelector>,
    base_env: Option<Vec<(String, String)>>,
}

impl AgentBuilder {
    /// Start from a configuration
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            system: None,
            dialer: None,
            fetcher: None,
            selector: None,
            base_env: None,
        }
    }

    /// Use these host facts instead of probing
    pub fn system(mut self, system: SystemInfo) -> Self {
        self.system = Some(system);
        self
    }

    /// Use a custom dialer, TCP by default
    pub fn dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = Some(dialer);
        self
    }

    /// Use a custom asset fetcher, HTTP by default
    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Use a custom endpoint selector
    pub fn selector(mut self, selector: BackendSelector) -> Self {
        self.selector = Some(selector);
        self
    }

    /// Environment commands start from, the process environment by default
    pub fn base_env(mut self, vars: Vec<(String, String)>) -> Self {
        self.base_env = Some(vars);
        self
    }

    /// Validate the configuration and assemble the agent
    ///
    /// Errors here are fatal: bad configuration, an unreadable allow-list
    /// or an unusable cache directory.
    pub fn build(self) -> Result<Agent, AgentError> {
        self.config.validate()?;

        let allow_list = Arc::new(AllowList::load(self.config.allow_list.as_deref())?);
        let fetcher: Arc<dyn Fetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpFetcher::new(self.config.asset_fetch_timeout)?.with_max_size(self.config.max_asset_size)),
        };
        let base_env = self.base_env.unwrap_or_else(|| std::env::vars().collect());
        let assets = AssetManager::with_base_env(
            self.config.cache_dir.clone(),
            fetcher,
            self.config.asset_fetch_timeout,
            base_env,
        )?;

        let dialer: Arc<dyn Dialer> = match self.dialer {
            Some(dialer) => dialer,
            None => Arc::new(TcpDialer::new(self.config.dial_timeout)),
        };
        let system = self.system.unwrap_or_else(crate::system::probe);
        let entity = EntityStore::new(build_entity(&self.config, system));
        let (outbound, queue) = outbound::queue(self.config.outbound_queue_size);
        let ctx = RuntimeContext::new(self.config, entity);

        let executor = CheckExecutor::new(ctx.clone(), assets, allow_list);
        let dispatcher = Dispatcher::builder()
            .register(
                MessageType::CheckRequest,
                Arc::new(CheckRequestHandler::new(executor, outbound.clone(), ctx.span.clone())),
            )
            .register(
                MessageType::EntityConfig,
                Arc::new(EntityConfigHandler::new(ctx.entity.clone())),
            )
            .build();

        let mut session = SessionManager::new(ctx.clone(), dialer, Arc::new(dispatcher), outbound.clone(), queue);
        if let Some(selector) = self.selector {
            session = session.with_selector(selector);
        }

        Ok(Agent {
            handle: AgentHandle {
                state: session.state(),
                connections: session.connections(),
                ctx,
                outbound,
            },
            session,
        })
    }
}

/// A configured agent, ready to run
pub struct Agent {
    handle: AgentHandle,
    session: SessionManager,
}

impl Agent {
    /// Build an agent with default dialer and fetcher
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        AgentBuilder::new(config).build()
    }

    /// Start building an agent
    pub fn builder(config: AgentConfig) -> AgentBuilder {
        AgentBuilder::new(config)
    }

    /// Handle for local producers and observers
    pub fn handle(&self) -> AgentHandle {
        self.handle.clone()
    }

    /// Run in the current task until shutdown
    pub async fn run(self) -> Result<(), AgentError> {
        let span = self.handle.ctx.span.clone();
        info!(parent: &span, "Starting agent");
        self.session.run().instrument(span).await
    }

    /// Run on a background task
    pub fn spawn(self) -> RunningAgent {
        let handle = self.handle();
        let task = tokio::spawn(self.run());
        RunningAgent { handle, task }
    }
}

/// Cloneable access to a running agent
#[derive(Clone)]
pub struct AgentHandle {
    ctx: RuntimeContext,
    outbound: Outbound,
    state: watch::Receiver<SessionState>,
    connections: Arc<AtomicU64>,
}

impl AgentHandle {
    /// Publish a locally produced event
    ///
    /// Missing entity, namespace, ID and timestamp are filled in. Waits
    /// while the outbound queue is full.
    pub async fn enqueue_event(&self, mut event: Event) -> Result<(), AgentError> {
        if event.entity.name.is_empty() {
            event.entity = self.ctx.entity.snapshot().await;
        }
        event.fill_defaults(&self.ctx.config.namespace);
        event.validate()?;
        let message = Message::encode(MessageType::Event, &event)?;
        self.outbound.enqueue(message).await
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Wait until the session reaches `state`
    pub async fn wait_for_state(&self, state: SessionState) -> Result<(), AgentError> {
        let mut rx = self.state.clone();
        rx.wait_for(|current| *current == state)
            .await
            .map(|_| ())
            .map_err(|_| AgentError::Config("session manager is gone".to_string()))
    }

    /// Number of successful handshakes so far
    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::SeqCst)
    }

    /// Snapshot of the agent entity
    pub async fn entity(&self) -> Entity {
        self.ctx.entity.snapshot().await
    }

    /// Request shutdown without waiting for it
    pub fn shutdown(&self) {
        self.ctx.shutdown.cancel();
    }

    /// Runtime context of the agent
    pub fn context(&self) -> &RuntimeContext {
        &self.ctx
    }
}

/// An agent running on a background task
pub struct RunningAgent {
    handle: AgentHandle,
    task: JoinHandle<Result<(), AgentError>>,
}

impl RunningAgent {
    /// Handle for local producers and observers
    pub fn handle(&self) -> AgentHandle {
        self.handle.clone()
    }

    /// Whether the agent task has ended on its own
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the agent, waiting at most the configured shutdown timeout
    ///
    /// Queued messages are flushed to a connected backend first. When the
    /// deadline passes the task is aborted.
    pub async fn stop(self) -> Result<(), AgentError> {
        let deadline = self.handle.ctx.config.shutdown_timeout;
        info!("Stopping agent (deadline {:?})", deadline);
        self.handle.shutdown();

        let mut task = self.task;
        match tokio::time::timeout(deadline, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!("Agent task failed: {}", e);
                Ok(())
            }
            Err(_) => {
                warn!("Agent did not stop within {:?}, aborting", deadline);
                task.abort();
                Err(AgentError::Timeout { duration: deadline })
            }
        }
    }

    /// Wait for the agent task to end on its own
    pub async fn join(self) -> Result<(), AgentError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                error!("Agent task failed: {}", e);
                Ok(())
            }
        }
    }
}


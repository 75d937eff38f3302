//! Backend session management
//!
//! The session manager owns the connection lifecycle: pick an endpoint,
//! dial, handshake, run the send and receive pumps until either fails,
//! then back off and start over on the next endpoint. The outbound queue
//! outlives every connection.

use crate::context::RuntimeContext;
use crate::dispatch::Dispatcher;
use crate::error::AgentError;
use crate::keepalive::keepalive_message;
use crate::outbound::{Outbound, OutboundQueue};
use crate::pump::{receive_pump, send_pump};
use crate::selector::BackendSelector;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn, Instrument};
use vigil_proto::{AgentHandshake, BackendHandshake, Message, MessageType};
use vigil_transport::{Connection, Dialer};

/// Observable connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection, waiting to dial
    Disconnected,
    /// Opening a connection
    Dialing,
    /// Connection open, handshake in progress
    Handshaking,
    /// Handshake done, pumps running
    Connected,
    /// Shut down for good
    Stopped,
}

/// Exponential reconnect delay
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    /// Delays start at `min` and double up to `max`
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
            current: min,
        }
    }

    /// Delay before the next attempt
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    /// Start over from the minimum delay
    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

/// Drives connections to the backend until shutdown
pub struct SessionManager {
    ctx: RuntimeContext,
    dialer: Arc<dyn Dialer>,
    selector: BackendSelector,
    dispatcher: Arc<Dispatcher>,
    outbound: Outbound,
    queue: Arc<Mutex<OutboundQueue>>,
    state: watch::Sender<SessionState>,
    connections: Arc<AtomicU64>,
}

impl SessionManager {
    /// Create a session manager over the configured backend endpoints
    pub fn new(
        ctx: RuntimeContext,
        dialer: Arc<dyn Dialer>,
        dispatcher: Arc<Dispatcher>,
        outbound: Outbound,
        queue: OutboundQueue,
    ) -> Self {
        let selector = BackendSelector::new(ctx.config.backend_urls.clone());
        let (state, _) = watch::channel(SessionState::Disconnected);
        Self {
            ctx,
            dialer,
            selector,
            dispatcher,
            outbound,
            queue: Arc::new(Mutex::new(queue)),
            state,
            connections: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Replace the endpoint selector
    pub fn with_selector(mut self, selector: BackendSelector) -> Self {
        self.selector = selector;
        self
    }

    /// Subscribe to state changes
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Counter of successful handshakes
    pub fn connections(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.connections)
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("Session state {:?} -> {:?}", previous, state);
        }
    }

    /// Run until the shutdown token is cancelled
    ///
    /// Connection failures never end the loop; only a configuration with
    /// no endpoints does.
    pub async fn run(mut self) -> Result<(), AgentError> {
        info!("Starting session manager with {} backend(s)", self.selector.len());
        let mut backoff = Backoff::new(self.ctx.config.retry_min, self.ctx.config.retry_max);

        while !self.ctx.is_shutting_down() {
            let Some(endpoint) = self.selector.select() else {
                self.set_state(SessionState::Stopped);
                return Err(AgentError::Config("no backend URLs configured".to_string()));
            };

            let connected = tokio::select! {
                biased;
                _ = self.ctx.shutdown.cancelled() => break,
                connected = self.connect(&endpoint) => connected,
            };
            let conn = match connected {
                Ok(conn) => conn,
                Err(e) => {
                    self.set_state(SessionState::Disconnected);
                    let delay = backoff.next_delay();
                    warn!("Failed to connect to {}: {}; retrying in {:?}", endpoint, e, delay);
                    if !self.sleep(delay).await {
                        break;
                    }
                    continue;
                }
            };

            backoff.reset();
            let count = self.connections.fetch_add(1, Ordering::SeqCst) + 1;
            info!("Connected to backend {} (connection #{})", endpoint, count);
            self.set_state(SessionState::Connected);

            self.run_pumps(conn).await;
            self.set_state(SessionState::Disconnected);
            if self.ctx.is_shutting_down() {
                break;
            }

            let delay = backoff.next_delay();
            info!("Disconnected from {}, reconnecting in {:?}", endpoint, delay);
            if !self.sleep(delay).await {
                break;
            }
        }

        self.set_state(SessionState::Stopped);
        info!("Session manager stopped");
        Ok(())
    }

    /// Sleep unless shutdown comes first; returns `false` on shutdown
    async fn sleep(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.ctx.shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn Connection>, AgentError> {
        self.set_state(SessionState::Dialing);
        debug!("Dialing backend {}", endpoint);
        let dial_timeout = self.ctx.config.dial_timeout;
        let conn = tokio::time::timeout(dial_timeout, self.dialer.dial(endpoint))
            .await
            .map_err(|_| AgentError::Timeout { duration: dial_timeout })??;

        self.set_state(SessionState::Handshaking);
        if let Err(e) = self.handshake(conn.as_ref()).await {
            if let Err(close_err) = conn.close().await {
                debug!("Error closing connection after failed handshake: {}", close_err);
            }
            return Err(e);
        }
        Ok(conn)
    }

    /// Agent handshake, backend handshake reply, then an immediate keepalive
    async fn handshake(&self, conn: &dyn Connection) -> Result<(), AgentError> {
        let entity = self.ctx.entity.snapshot().await;
        let handshake = AgentHandshake {
            id: entity.name,
            namespace: entity.namespace,
            subscriptions: entity.subscriptions,
        };
        self.send(conn, Message::encode(MessageType::AgentHandshake, &handshake)?)
            .await?;

        let handshake_timeout = self.ctx.config.handshake_timeout;
        let reply = tokio::time::timeout(handshake_timeout, conn.receive())
            .await
            .map_err(|_| AgentError::Handshake(format!("no reply within {:?}", handshake_timeout)))?
            .map_err(|e| AgentError::Handshake(e.to_string()))?;
        reply
            .decode_as::<BackendHandshake>(MessageType::BackendHandshake)
            .map_err(|e| AgentError::Handshake(e.to_string()))?;

        self.send(conn, keepalive_message(&self.ctx).await?).await
    }

    async fn send(&self, conn: &dyn Connection, message: Message) -> Result<(), AgentError> {
        let write_timeout = self.ctx.config.write_timeout;
        tokio::time::timeout(write_timeout, conn.send(message))
            .await
            .map_err(|_| AgentError::Timeout { duration: write_timeout })??;
        Ok(())
    }

    async fn run_pumps(&self, conn: Arc<dyn Connection>) {
        let token = self.ctx.shutdown.child_token();

        let send = tokio::spawn(
            send_pump(
                Arc::clone(&conn),
                Arc::clone(&self.queue),
                self.outbound.clone(),
                self.ctx.clone(),
                token.clone(),
            )
            .instrument(self.ctx.span.clone()),
        );
        let receive = tokio::spawn(
            receive_pump(Arc::clone(&conn), Arc::clone(&self.dispatcher), token.clone())
                .instrument(self.ctx.span.clone()),
        );

        let (send_exit, receive_exit) = tokio::join!(send, receive);
        match receive_exit {
            Ok(exit) => debug!("Receive pump exited: {:?}", exit),
            Err(e) => error!("Receive pump failed: {}", e),
        }
        match send_exit {
            Ok(exit) => debug!("Send pump exited: {:?}", exit),
            Err(e) => {
                // the send pump closes the connection unless it never finished
                error!("Send pump failed: {}", e);
                if let Err(e) = conn.close().await {
                    debug!("Error closing connection: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_up_to_max() {
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(5));
        let delays: Vec<u64> = (0..5).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_max_below_min() {
        let mut backoff = Backoff::new(Duration::from_secs(3), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(3));
        assert_eq!(backoff.next_delay(), Duration::from_secs(3));
    }
}

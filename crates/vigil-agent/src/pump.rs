//! Per-connection send and receive loops

use crate::context::RuntimeContext;
use crate::dispatch::Dispatcher;
use crate::keepalive::keepalive_message;
use crate::outbound::{Outbound, OutboundQueue};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use vigil_proto::Message;
use vigil_transport::{Connection, TransportError};

/// Why a pump stopped
#[derive(Debug)]
pub enum PumpExit {
    /// The connection token was cancelled
    Cancelled,
    /// The connection failed
    ConnectionError(TransportError),
    /// Every outbound producer is gone
    QueueClosed,
}

enum WriteOutcome {
    Written,
    Dropped,
    Failed(TransportError),
}

async fn write(conn: &dyn Connection, ctx: &RuntimeContext, message: Message) -> WriteOutcome {
    let message_type = message.message_type.clone();
    match tokio::time::timeout(ctx.config.write_timeout, conn.send(message)).await {
        Ok(Ok(())) => {
            debug!("Sent {} message", message_type);
            WriteOutcome::Written
        }
        Ok(Err(e)) if !e.is_connection_error() => {
            error!("Dropping unsendable {} message: {}", message_type, e);
            WriteOutcome::Dropped
        }
        Ok(Err(e)) => WriteOutcome::Failed(e),
        Err(_) => WriteOutcome::Failed(TransportError::Timeout),
    }
}

/// Drain the outbound queue onto `conn` and emit keepalives
///
/// A message whose write fails with a connection error is requeued and
/// the connection token cancelled. On global shutdown the queue is
/// flushed before the connection is closed.
pub async fn send_pump(
    conn: Arc<dyn Connection>,
    queue: Arc<Mutex<OutboundQueue>>,
    outbound: Outbound,
    ctx: RuntimeContext,
    token: CancellationToken,
) -> PumpExit {
    let _cancel_on_exit = token.clone().drop_guard();
    let mut queue = queue.lock().await;
    let period = ctx.config.keepalive_interval;
    let mut keepalive = interval_at(Instant::now() + period, period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let exit = loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break PumpExit::Cancelled,
            _ = keepalive.tick() => {
                match keepalive_message(&ctx).await {
                    Ok(message) => match outbound.try_enqueue(message) {
                        Ok(true) => {}
                        Ok(false) => warn!("Outbound queue full, skipping keepalive"),
                        Err(e) => warn!("Failed to enqueue keepalive: {}", e),
                    },
                    Err(e) => error!("Failed to build keepalive: {}", e),
                }
            }
            message = queue.next() => {
                let Some(message) = message else {
                    break PumpExit::QueueClosed;
                };
                match write(conn.as_ref(), &ctx, message.clone()).await {
                    WriteOutcome::Written | WriteOutcome::Dropped => {}
                    WriteOutcome::Failed(e) => {
                        warn!("Write failed, message kept for the next connection: {}", e);
                        queue.requeue(message);
                        break PumpExit::ConnectionError(e);
                    }
                }
            }
        }
    };

    if ctx.is_shutting_down() && !matches!(exit, PumpExit::ConnectionError(_)) {
        let mut flushed = 0;
        while let Some(message) = queue.try_next() {
            match write(conn.as_ref(), &ctx, message.clone()).await {
                WriteOutcome::Written => flushed += 1,
                WriteOutcome::Dropped => {}
                WriteOutcome::Failed(e) => {
                    warn!("Failed to flush outbound queue: {}", e);
                    queue.requeue(message);
                    break;
                }
            }
        }
        info!("Flushed {} queued messages before shutdown", flushed);
    }

    token.cancel();
    if let Err(e) = conn.close().await {
        debug!("Error closing connection: {}", e);
    }
    exit
}

/// Read messages from `conn` and hand them to the dispatcher in order
///
/// Per-frame decode errors are logged and skipped; connection errors
/// cancel the connection token.
pub async fn receive_pump(conn: Arc<dyn Connection>, dispatcher: Arc<Dispatcher>, token: CancellationToken) -> PumpExit {
    let _cancel_on_exit = token.clone().drop_guard();
    loop {
        let received = tokio::select! {
            biased;
            _ = token.cancelled() => break PumpExit::Cancelled,
            received = conn.receive() => received,
        };

        match received {
            Ok(message) => {
                let message_type = message.message_type.clone();
                debug!("Received {} message", message_type);
                if let Err(e) = dispatcher.dispatch(message).await {
                    warn!("Failed to handle {} message: {}", message_type, e);
                }
            }
            Err(e) if e.is_connection_error() => {
                info!("Connection lost: {}", e);
                break PumpExit::ConnectionError(e);
            }
            Err(e) => warn!("Discarding undecodable frame: {}", e),
        }
    }
}

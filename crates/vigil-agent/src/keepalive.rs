//! Keepalive events

use crate::context::RuntimeContext;
use crate::error::AgentError;
use vigil_proto::{unix_now, Check, CheckConfig, Event, Message, MessageType};

/// Name of the synthetic check carried by keepalives
pub const KEEPALIVE_CHECK_NAME: &str = "keepalive";

/// Build a keepalive event for the current entity
///
/// The attached check carries no result; its interval and timeout tell the
/// backend when to expect the next keepalive and when to warn.
pub async fn keepalive_event(ctx: &RuntimeContext) -> Event {
    let entity = ctx.entity.snapshot().await;
    let now = unix_now();

    let mut config = CheckConfig::new(
        KEEPALIVE_CHECK_NAME,
        "",
        u32::try_from(ctx.config.keepalive_interval.as_secs().max(1)).unwrap_or(u32::MAX),
    );
    config.timeout = u32::try_from(ctx.config.keepalive_warning_timeout.as_secs()).unwrap_or(u32::MAX);
    config.namespace = ctx.config.namespace.clone();

    let mut event = Event::with_check(
        entity,
        Check {
            config,
            executed: now,
            issued: now,
            ..Default::default()
        },
    );
    event.fill_defaults(&ctx.config.namespace);
    event
}

/// Encode a keepalive as a `keepalive` message
pub async fn keepalive_message(ctx: &RuntimeContext) -> Result<Message, AgentError> {
    let event = keepalive_event(ctx).await;
    Ok(Message::encode(MessageType::Keepalive, &event)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AgentConfig;
    use crate::entity::{build_entity, EntityStore};
    use std::time::Duration;
    use vigil_proto::SystemInfo;

    #[tokio::test]
    async fn test_keepalive_message() {
        let mut config = AgentConfig::new("web-01");
        config.keepalive_interval = Duration::from_secs(5);
        config.keepalive_warning_timeout = Duration::from_secs(30);
        let entity = EntityStore::new(build_entity(&config, SystemInfo::default()));
        let ctx = RuntimeContext::new(config, entity);

        let message = keepalive_message(&ctx).await.unwrap();
        assert_eq!(message.kind(), Some(MessageType::Keepalive));

        let event: Event = message.decode().unwrap();
        assert_eq!(event.entity.name, "web-01");
        assert_eq!(event.namespace, "default");
        let check = event.check.unwrap();
        assert_eq!(check.config.name, KEEPALIVE_CHECK_NAME);
        assert_eq!(check.config.interval, 5);
        assert_eq!(check.config.timeout, 30);
        assert!(event.entity.last_seen > 0);
    }
}

//! Local to remote direction: bus handlers that publish matching envelopes on
//! a broker channel.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, error, info, warn};
use weft_core::{Event, EventBus, EventHandler, EventKind, Filter, HandlerId, HandlerOptions};

use crate::broker::Broker;
use crate::message;
use crate::state::BridgeState;
use crate::Result;

/// Registers and removes outbound forwarding rules.
pub trait Forwarder: Send + Sync {
    /// Forwards envelopes of `kind` (accepted by `filter`, when given) to
    /// `channel`. Returns `None` without registering anything while outbound
    /// forwarding is disabled. Re-registering a kind replaces its rule.
    fn register_event_forwarder(
        &self,
        kind: EventKind,
        channel: &str,
        filter: Option<Arc<dyn Filter>>,
    ) -> Option<HandlerId>;

    fn unregister_event_forwarder(&self, kind: &EventKind) -> bool;

    /// Registered rules as `(kind, channel)`, sorted by kind.
    fn forwarded_kinds(&self) -> Vec<(EventKind, String)>;
}

struct Rule {
    channel: String,
    handler_id: HandlerId,
}

pub struct EventForwarder {
    bus: Arc<EventBus>,
    broker: Arc<dyn Broker>,
    state: Arc<BridgeState>,
    rules: DashMap<EventKind, Rule>,
}

impl EventForwarder {
    pub fn new(bus: Arc<EventBus>, broker: Arc<dyn Broker>, state: Arc<BridgeState>) -> Self {
        Self {
            bus,
            broker,
            state,
            rules: DashMap::new(),
        }
    }

    /// Removes every rule from the bus.
    pub fn unregister_all(&self) -> usize {
        let kinds: Vec<EventKind> = self.rules.iter().map(|r| r.key().clone()).collect();
        kinds
            .iter()
            .filter(|kind| self.unregister_event_forwarder(kind))
            .count()
    }
}

impl Forwarder for EventForwarder {
    fn register_event_forwarder(
        &self,
        kind: EventKind,
        channel: &str,
        filter: Option<Arc<dyn Filter>>,
    ) -> Option<HandlerId> {
        if !self.state.outbound_enabled() {
            debug!(target: "bridge", kind = %kind, channel, "Outbound disabled, forwarder not registered");
            return None;
        }

        let handler = ForwardHandler {
            channel: channel.to_string(),
            filter,
            broker: Arc::clone(&self.broker),
            state: Arc::clone(&self.state),
        };
        let handler_id = self
            .bus
            .add_async_handler(kind.clone(), Arc::new(handler), HandlerOptions::new());

        let previous = self.rules.insert(
            kind.clone(),
            Rule {
                channel: channel.to_string(),
                handler_id: handler_id.clone(),
            },
        );
        if let Some(old) = previous {
            self.bus.remove_handler(&kind, &old.handler_id);
        }

        info!(target: "bridge", kind = %kind, channel, handler_id = %handler_id, "Registered event forwarder");
        Some(handler_id)
    }

    fn unregister_event_forwarder(&self, kind: &EventKind) -> bool {
        match self.rules.remove(kind) {
            Some((_, rule)) => {
                self.bus.remove_handler(kind, &rule.handler_id);
                info!(target: "bridge", kind = %kind, channel = %rule.channel, "Unregistered event forwarder");
                true
            }
            None => false,
        }
    }

    fn forwarded_kinds(&self) -> Vec<(EventKind, String)> {
        let mut rules: Vec<(EventKind, String)> = self
            .rules
            .iter()
            .map(|r| (r.key().clone(), r.value().channel.clone()))
            .collect();
        rules.sort();
        rules
    }
}

/// Bus handler publishing one kind to one channel.
struct ForwardHandler {
    channel: String,
    filter: Option<Arc<dyn Filter>>,
    broker: Arc<dyn Broker>,
    state: Arc<BridgeState>,
}

impl ForwardHandler {
    async fn publish_with_retry(&self, payload: String) -> Result<usize> {
        let max_retries = self.state.settings().max_retries;
        let delay = self.state.settings().retry_delay();
        let mut attempt = 0;
        loop {
            match self.broker.publish(&self.channel, payload.clone()).await {
                Ok(receivers) => return Ok(receivers),
                Err(e) if attempt < max_retries => {
                    attempt += 1;
                    warn!(target: "bridge", channel = %self.channel, attempt, error = %e, "Publish failed, retrying");
                    tokio::time::sleep(delay.saturating_mul(attempt)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl EventHandler for ForwardHandler {
    async fn handle(&self, event: Arc<Event>) -> weft_core::Result<()> {
        if !self.state.outbound_enabled() {
            return Ok(());
        }
        if let Some(filter) = &self.filter {
            if !filter.matches(&event) {
                return Ok(());
            }
        }
        // Envelopes relayed in from the broker go no further.
        let relayed = event.source().starts_with(message::EXTERNAL_SOURCE_PREFIX)
            || event.instance_id().is_some_and(|origin| origin != self.state.instance_id());
        if relayed {
            debug!(target: "bridge", event = %event, "Skipping relayed envelope");
            return Ok(());
        }

        let payload = message::encode_event(&event, self.state.instance_id());
        match self.publish_with_retry(payload).await {
            Ok(receivers) => {
                self.state.stats().record_forwarded_out();
                debug!(target: "bridge", event = %event, channel = %self.channel, receivers, "Forwarded to broker");
            }
            Err(e) => {
                self.state.stats().record_error_out();
                error!(target: "bridge", event = %event, channel = %self.channel, error = %e, "Giving up on forward");
            }
        }
        Ok(())
    }
}

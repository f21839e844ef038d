//! Remote to local direction: broker subscriptions whose messages are
//! republished on the bus.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};
use weft_core::{Event, EventBus, EventKind, Payload};

use crate::broker::{Broker, MessageStream};
use crate::message;
use crate::state::BridgeState;

/// Message discriminant (`type`, then `event_type`) to envelope kind.
pub type KindMapping = HashMap<String, EventKind>;

/// What became of one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    Published(EventKind),
    /// Our own message coming back; dropped.
    SelfEcho,
    /// Inbound direction is switched off; dropped.
    Disabled,
    /// The local bus is not running, so nothing could be delivered.
    BusStopped,
    /// No listener is registered on the channel.
    UnknownChannel,
}

#[async_trait]
pub trait Listener: Send + Sync {
    /// Subscribes to `channel` and starts republishing its messages. Returns
    /// `false` when inbound is disabled or the subscription fails.
    async fn register_listener(&self, channel: &str, mapping: Option<KindMapping>) -> bool;

    fn unregister_listener(&self, channel: &str) -> bool;

    /// Turns one raw message from `channel` into an envelope and publishes it.
    async fn handle_message(&self, channel: &str, raw: &str) -> InboundOutcome;

    /// Channels with a registered listener, sorted.
    fn listened_channels(&self) -> Vec<String>;
}

struct Subscription {
    mapping: Arc<KindMapping>,
    task: JoinHandle<()>,
}

pub struct ChannelListener {
    relay: Arc<Relay>,
    subscriptions: DashMap<String, Subscription>,
    shutdown: watch::Sender<bool>,
}

/// Everything a listen loop needs to republish a message.
struct Relay {
    bus: Arc<EventBus>,
    broker: Arc<dyn Broker>,
    state: Arc<BridgeState>,
}

impl ChannelListener {
    pub fn new(bus: Arc<EventBus>, broker: Arc<dyn Broker>, state: Arc<BridgeState>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            relay: Arc::new(Relay { bus, broker, state }),
            subscriptions: DashMap::new(),
            shutdown,
        }
    }

    /// Signals every listen loop to stop and waits for them to finish.
    pub async fn stop_all(&self) {
        self.shutdown.send_replace(true);
        let channels: Vec<String> = self.subscriptions.iter().map(|s| s.key().clone()).collect();
        for channel in channels {
            if let Some((_, sub)) = self.subscriptions.remove(&channel) {
                if let Err(e) = sub.task.await {
                    if !e.is_cancelled() {
                        warn!(target: "bridge", channel = %channel, error = %e, "Listen loop ended abnormally");
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Listener for ChannelListener {
    async fn register_listener(&self, channel: &str, mapping: Option<KindMapping>) -> bool {
        if !self.relay.state.inbound_enabled() {
            debug!(target: "bridge", channel, "Inbound disabled, listener not registered");
            return false;
        }
        if *self.shutdown.borrow() {
            warn!(target: "bridge", channel, "Bridge is shut down, listener not registered");
            return false;
        }

        let stream = match self.relay.broker.subscribe(channel).await {
            Ok(stream) => stream,
            Err(e) => {
                self.relay.state.stats().record_error_in();
                error!(target: "bridge", channel, error = %e, "Subscribe failed");
                return false;
            }
        };

        let mapping = Arc::new(mapping.unwrap_or_default());
        let task = tokio::spawn(listen_loop(
            Arc::clone(&self.relay),
            channel.to_string(),
            Arc::clone(&mapping),
            stream,
            self.shutdown.subscribe(),
        ));
        if let Some(old) = self
            .subscriptions
            .insert(channel.to_string(), Subscription { mapping, task })
        {
            old.task.abort();
        }

        info!(target: "bridge", channel, "Registered channel listener");
        true
    }

    fn unregister_listener(&self, channel: &str) -> bool {
        match self.subscriptions.remove(channel) {
            Some((_, sub)) => {
                sub.task.abort();
                info!(target: "bridge", channel, "Unregistered channel listener");
                true
            }
            None => false,
        }
    }

    async fn handle_message(&self, channel: &str, raw: &str) -> InboundOutcome {
        let mapping = match self.subscriptions.get(channel) {
            Some(sub) => Arc::clone(&sub.mapping),
            None => return InboundOutcome::UnknownChannel,
        };
        self.relay.republish(channel, &mapping, raw).await
    }

    fn listened_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.subscriptions.iter().map(|s| s.key().clone()).collect();
        channels.sort();
        channels
    }
}

impl Relay {
    async fn republish(&self, channel: &str, mapping: &KindMapping, raw: &str) -> InboundOutcome {
        if !self.state.inbound_enabled() {
            return InboundOutcome::Disabled;
        }
        if !self.bus.is_running() {
            debug!(target: "bridge", channel, "Bus stopped, dropping broker message");
            return InboundOutcome::BusStopped;
        }

        let body = message::decode_inbound(raw);
        let origin = message::origin_instance(&body).map(str::to_string);
        if self.state.settings().suppress_self_echo && origin.as_deref() == Some(self.state.instance_id()) {
            debug!(target: "bridge", channel, "Dropping self-echo");
            return InboundOutcome::SelfEcho;
        }

        let kind = message::discriminant(&body)
            .and_then(|d| mapping.get(d))
            .cloned()
            .unwrap_or(EventKind::ExternalMessage);
        let correlation_id = message::correlation_id(&body).map(str::to_string);

        let mut payload = Payload::new();
        payload.insert("channel".into(), Value::String(channel.to_string()));
        payload.insert("message".into(), Value::Object(body));
        payload.insert("received_at".into(), Value::String(message::now_iso()));

        let mut event = Event::new(kind.clone(), message::external_source(channel)).with_payload(payload);
        if let Some(origin) = origin {
            event = event.with_instance_id(origin);
        }
        if let Some(correlation_id) = correlation_id {
            event = event.with_correlation_id(correlation_id);
        }

        self.bus.publish_async(event).await;
        self.state.stats().record_forwarded_in();
        debug!(target: "bridge", channel, kind = %kind, "Republished broker message");
        InboundOutcome::Published(kind)
    }
}

async fn listen_loop(
    relay: Arc<Relay>,
    channel: String,
    mapping: Arc<KindMapping>,
    mut stream: MessageStream,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(target: "bridge", channel = %channel, "Listen loop started");
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            next = stream.next() => match next {
                Some(Ok(raw)) => {
                    relay.republish(&channel, &mapping, &raw).await;
                }
                Some(Err(e)) => {
                    relay.state.stats().record_error_in();
                    error!(target: "bridge", channel = %channel, error = %e, "Broker delivery error");
                }
                None => {
                    warn!(target: "bridge", channel = %channel, "Subscription closed by broker");
                    break;
                }
            }
        }
    }
    debug!(target: "bridge", channel = %channel, "Listen loop stopped");
}

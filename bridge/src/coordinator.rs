use std::sync::Arc;

use tracing::{error, info, warn};
use weft_core::{EventBus, EventKind, Filter, HandlerId};

use crate::broker::Broker;
use crate::forwarder::{EventForwarder, Forwarder};
use crate::listener::{ChannelListener, KindMapping, Listener};
use crate::settings::{channel_names, BridgeSettings, Direction};
use crate::state::{BridgeState, BridgeStatsSnapshot};

/// Owns one bridge between a local bus and a broker.
pub struct BridgeCoordinator {
    state: Arc<BridgeState>,
    broker: Arc<dyn Broker>,
    forwarder: EventForwarder,
    listener: ChannelListener,
}

impl BridgeCoordinator {
    pub fn new(bus: Arc<EventBus>, broker: impl Broker + 'static, settings: BridgeSettings) -> Self {
        Self::with_shared_broker(bus, Arc::new(broker), settings)
    }

    pub fn with_shared_broker(bus: Arc<EventBus>, broker: Arc<dyn Broker>, settings: BridgeSettings) -> Self {
        let state = Arc::new(BridgeState::new(settings));
        info!(
            target: "bridge",
            instance_id = %state.instance_id(),
            outbound = state.outbound_enabled(),
            inbound = state.inbound_enabled(),
            "Bridge created"
        );
        Self {
            forwarder: EventForwarder::new(Arc::clone(&bus), Arc::clone(&broker), Arc::clone(&state)),
            listener: ChannelListener::new(bus, Arc::clone(&broker), Arc::clone(&state)),
            state,
            broker,
        }
    }

    pub fn instance_id(&self) -> &str {
        self.state.instance_id()
    }

    pub fn settings(&self) -> &BridgeSettings {
        self.state.settings()
    }

    pub fn forwarder(&self) -> &EventForwarder {
        &self.forwarder
    }

    pub fn listener(&self) -> &ChannelListener {
        &self.listener
    }

    pub fn register_event_forwarder(
        &self,
        kind: impl Into<EventKind>,
        channel: &str,
        filter: Option<Arc<dyn Filter>>,
    ) -> Option<HandlerId> {
        self.forwarder.register_event_forwarder(kind.into(), channel, filter)
    }

    pub async fn register_listener(&self, channel: &str, mapping: Option<KindMapping>) -> bool {
        self.listener.register_listener(channel, mapping).await
    }

    /// Forwards the framework kinds enabled in the settings to their
    /// configured channels. Returns how many forwarders were registered.
    pub fn register_framework_forwarders(&self) -> usize {
        let settings = self.state.settings();
        let mut plan: Vec<(EventKind, &str)> = Vec::new();
        if settings.forward_app_events {
            plan.push((EventKind::AppStarted, channel_names::APP_STARTED));
            plan.push((EventKind::AppStopped, channel_names::APP_STOPPED));
        }
        if settings.forward_component_events {
            plan.push((EventKind::ComponentStarted, channel_names::COMPONENT_STARTED));
            plan.push((EventKind::ComponentStopped, channel_names::COMPONENT_STOPPED));
        }
        if settings.forward_config_events {
            plan.push((EventKind::ConfigUpdated, channel_names::CONFIG_UPDATED));
        }
        if settings.forward_user_events {
            plan.push((EventKind::User, channel_names::USER_EVENTS));
        }

        let mut registered = 0;
        for (kind, name) in plan {
            let Some(channel) = settings.channel(name) else {
                warn!(target: "bridge", kind = %kind, name, "No channel configured, skipping forwarder");
                continue;
            };
            if self.forwarder.register_event_forwarder(kind, channel, None).is_some() {
                registered += 1;
            }
        }
        info!(target: "bridge", registered, "Framework forwarders registered");
        registered
    }

    pub fn enable(&self, direction: Direction) {
        self.state.set_enabled(direction, true);
        info!(target: "bridge", %direction, "Bridge direction enabled");
    }

    pub fn disable(&self, direction: Direction) {
        self.state.set_enabled(direction, false);
        info!(target: "bridge", %direction, "Bridge direction disabled");
    }

    pub fn is_enabled(&self, direction: Direction) -> bool {
        self.state.is_enabled(direction)
    }

    pub fn stats(&self) -> BridgeStatsSnapshot {
        self.state.stats().snapshot()
    }

    pub fn reset_stats(&self) {
        self.state.stats().reset();
    }

    /// Stops the listen loops, removes the forwarders from the bus and closes
    /// the broker. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.listener.stop_all().await;
        let removed = self.forwarder.unregister_all();
        if let Err(e) = self.broker.close().await {
            error!(target: "bridge", error = %e, "Error closing broker");
        }
        info!(target: "bridge", forwarders_removed = removed, stats = ?self.stats(), "Bridge shut down");
    }
}

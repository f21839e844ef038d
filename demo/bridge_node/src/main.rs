mod config;

use std::sync::Arc;
use std::time::Instant;

use config::NodeConfig;
use tokio::signal;
use tracing::{error, info};
use weft_bridge::{BridgeCoordinator, Broker};
use weft_core::standard::{app_started_event, app_stopped_event};
use weft_core::{handler_fn, EventBus, EventKind, HandlerOptions, LifecycleStage};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    weft_core::telemetry::init_logging("info,weft_core=info,weft_bridge=info,bridge_node=info");

    let cfg = NodeConfig::load();
    let settings = cfg.bridge.clone().validated()?;
    info!(
        target: "bridge_node",
        app = %cfg.app_name,
        instance_id = %settings.instance_id,
        broker = %settings.broker.url(),
        "Starting bridge node"
    );

    let started = Instant::now();
    let bus = Arc::new(EventBus::new());
    bus.start();
    let queue_worker = bus.spawn_queue_worker();

    let broker = connect_broker(&settings).await?;
    let bridge = BridgeCoordinator::with_shared_broker(Arc::clone(&bus), broker, settings);

    // Log whatever the other nodes announce
    for kind in [EventKind::AppStarted, EventKind::AppStopped, EventKind::ExternalMessage] {
        bus.add_async_handler(
            kind,
            handler_fn(|evt| async move {
                if evt.source().starts_with(weft_bridge::message::EXTERNAL_SOURCE_PREFIX) {
                    info!(target: "bridge_node", event = %evt, origin = ?evt.instance_id(), "Remote event");
                }
                Ok(())
            }),
            HandlerOptions::new().priority(-10),
        );
    }

    let forwarders = bridge.register_framework_forwarders();
    for rule in &cfg.forward {
        bridge.register_event_forwarder(EventKind::named(rule.kind.as_str()), &rule.channel, None);
    }
    let mut listening = 0;
    for rule in &cfg.listen {
        if bridge.register_listener(&rule.channel, Some(rule.kind_mapping())).await {
            listening += 1;
        }
    }
    info!(
        target: "bridge_node",
        forwarders = forwarders + cfg.forward.len(),
        listening,
        "Bridge wired"
    );

    bus.publish_lifecycle(&cfg.app_name, LifecycleStage::Started, true, Some(started.elapsed()), None);
    bus.publish_async(app_started_event(&cfg.app_name, forwarders)).await;

    signal::ctrl_c().await?;
    info!(target: "bridge_node", "Shutting down...");

    bus.publish_async(app_stopped_event(&cfg.app_name, "ctrl_c")).await;
    let stats = bridge.stats();
    bridge.shutdown().await;
    bus.shutdown();
    if let Err(e) = queue_worker.await {
        error!(target: "bridge_node", error = %e, "Queue worker failed");
    }

    info!(
        target: "bridge_node",
        forwarded_out = stats.forwarded_out,
        forwarded_in = stats.forwarded_in,
        errors = stats.total_errors(),
        "Bridge node stopped"
    );
    Ok(())
}

#[cfg(feature = "redis")]
async fn connect_broker(settings: &weft_bridge::BridgeSettings) -> weft_bridge::Result<Arc<dyn Broker>> {
    let broker = weft_bridge::RedisBroker::connect(&settings.broker).await?;
    Ok(Arc::new(broker))
}

#[cfg(not(feature = "redis"))]
async fn connect_broker(_settings: &weft_bridge::BridgeSettings) -> weft_bridge::Result<Arc<dyn Broker>> {
    info!(target: "bridge_node", "Built without the redis feature; using the in-memory broker");
    Ok(Arc::new(weft_bridge::InMemoryBroker::new()))
}

//! Two bridges on separate buses sharing one broker.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use weft_bridge::{BridgeCoordinator, BridgeSettings, InMemoryBroker, InboundOutcome, KindMapping, Listener};
use weft_core::{handler_fn, Event, EventBus, EventKind, HandlerOptions};

struct Node {
    bus: Arc<EventBus>,
    bridge: BridgeCoordinator,
}

fn node(instance_id: &str, broker: &InMemoryBroker) -> Node {
    weft_core::telemetry::init_test_logging();
    let bus = Arc::new(EventBus::new());
    bus.start();
    let settings = BridgeSettings {
        instance_id: instance_id.into(),
        ..Default::default()
    };
    let bridge = BridgeCoordinator::new(Arc::clone(&bus), broker.clone(), settings);
    Node { bus, bridge }
}

fn order_mapping() -> KindMapping {
    [("Order".to_string(), EventKind::named("Order"))].into_iter().collect()
}

async fn wait_until(mut done: impl FnMut() -> bool) {
    for _ in 0..200 {
        if done() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn envelope_crosses_to_the_other_node() {
    let broker = InMemoryBroker::new();
    let a = node("node-a", &broker);
    let b = node("node-b", &broker);

    let (tx, mut rx) = mpsc::unbounded_channel();
    b.bus.add_async_handler(
        "Order",
        handler_fn(move |evt| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(evt);
                Ok(())
            }
        }),
        HandlerOptions::new(),
    );

    a.bridge.register_event_forwarder("Order", "orders", None);
    assert!(b.bridge.register_listener("orders", Some(order_mapping())).await);

    let original = Event::new("Order", "checkout")
        .with_field("sku", "A-1")
        .with_field("qty", 2)
        .with_correlation_id("trace-7");
    a.bus.publish_async(original.clone()).await;

    let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out")
        .expect("closed");
    assert_eq!(received.kind(), &EventKind::named("Order"));
    assert_eq!(received.source(), "external:orders");
    assert_eq!(received.instance_id(), Some("node-a"));
    assert_eq!(received.correlation_id(), Some("trace-7"));
    let message = received.get("message").unwrap();
    assert_eq!(message["data"], json!(original.payload()));
    assert_eq!(message["source"], "checkout");

    wait_until(|| b.bridge.stats().forwarded_in == 1).await;
    assert_eq!(a.bridge.stats().forwarded_out, 1);
}

#[tokio::test]
async fn sender_ignores_its_own_message() {
    let broker = InMemoryBroker::new();
    let a = node("node-a", &broker);
    a.bridge.register_event_forwarder("Order", "orders", None);
    a.bridge.register_listener("orders", Some(order_mapping())).await;

    a.bus.publish_async(Event::new("Order", "checkout")).await;

    let raw = broker.published("orders").pop().unwrap();
    assert_eq!(a.bridge.listener().handle_message("orders", &raw).await, InboundOutcome::SelfEcho);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(a.bridge.stats().forwarded_in, 0);
    assert_eq!(broker.published("orders").len(), 1);
}

#[tokio::test]
async fn relayed_traffic_is_not_bounced_back() {
    let broker = InMemoryBroker::new();
    let a = node("node-a", &broker);
    let b = node("node-b", &broker);

    // Both nodes mirror the same kind in both directions.
    for n in [&a, &b] {
        n.bridge.register_event_forwarder("Order", "orders", None);
        n.bridge.register_listener("orders", Some(order_mapping())).await;
    }

    a.bus.publish_async(Event::new("Order", "checkout")).await;

    wait_until(|| b.bridge.stats().forwarded_in == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(broker.published("orders").len(), 1);
    assert_eq!(b.bridge.stats().forwarded_out, 0);
    assert_eq!(a.bridge.stats().forwarded_in, 0);
}

#[tokio::test]
async fn unmapped_round_trip_preserves_data() {
    let broker = InMemoryBroker::new();
    let a = node("node-a", &broker);
    let b = node("node-b", &broker);

    let (tx, mut rx) = mpsc::unbounded_channel();
    b.bus.add_async_handler(
        EventKind::ExternalMessage,
        handler_fn(move |evt| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(evt);
                Ok(())
            }
        }),
        HandlerOptions::new(),
    );

    a.bridge.register_event_forwarder("Order", "orders", None);
    a.bus
        .publish_async(Event::new("Order", "checkout").with_field("nested", json!({"k": [1, 2.5, "x"]})))
        .await;
    let raw = broker.published("orders").pop().unwrap();

    // Registered after the publish, so only the explicit replay is delivered.
    b.bridge.register_listener("orders", None).await;
    assert_eq!(
        b.bridge.listener().handle_message("orders", &raw).await,
        InboundOutcome::Published(EventKind::ExternalMessage)
    );

    let received = rx.recv().await.unwrap();
    let sent: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(received.get("message").unwrap()["data"], sent["data"]);
    assert_eq!(sent["data"], json!({"nested": {"k": [1, 2.5, "x"]}}));
}

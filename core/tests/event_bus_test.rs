use std::sync::{Arc, Mutex};

use serde_json::json;
use weft_core::{Event, EventBus, EventFilter, EventKind, HandlerOptions, Result, WeftError};

// Helper to create a running bus
fn running_bus() -> EventBus {
    let bus = EventBus::new();
    bus.start();
    bus
}

// Handler that appends `tag` to the shared log
fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &str) -> impl Fn(&Event) -> Result<()> + Send + Sync + 'static {
    let log = Arc::clone(log);
    let tag = tag.to_string();
    move |_evt: &Event| {
        log.lock().unwrap().push(tag.clone());
        Ok(())
    }
}

#[test]
fn equal_priorities_keep_registration_order() {
    let bus = running_bus();
    let log = Arc::new(Mutex::new(Vec::new()));

    bus.add_handler("Order", recorder(&log, "H3"), HandlerOptions::new().priority(5));
    bus.add_handler("Order", recorder(&log, "H1"), HandlerOptions::new().priority(10));
    bus.add_handler("Order", recorder(&log, "H2"), HandlerOptions::new().priority(10));

    bus.publish(Event::new("Order", "test"));

    assert_eq!(*log.lock().unwrap(), vec!["H1", "H2", "H3"]);
}

#[test]
fn distinct_priorities_run_descending() {
    let bus = running_bus();
    let log = Arc::new(Mutex::new(Vec::new()));
    for p in [3, -1, 7, 0, 12] {
        bus.add_handler("Order", recorder(&log, &p.to_string()), HandlerOptions::new().priority(p));
    }

    bus.publish(Event::new("Order", "test"));

    assert_eq!(*log.lock().unwrap(), vec!["12", "7", "3", "0", "-1"]);
}

#[test]
fn failing_and_panicking_handlers_are_isolated() {
    let bus = running_bus();
    let log = Arc::new(Mutex::new(Vec::new()));

    bus.add_handler(
        "Order",
        |_: &Event| Err(WeftError::handler("always fails")),
        HandlerOptions::new().priority(10),
    );
    bus.add_handler(
        "Order",
        |_: &Event| -> Result<()> { panic!("handler blew up") },
        HandlerOptions::new().priority(5),
    );
    bus.add_handler("Order", recorder(&log, "survivor"), HandlerOptions::new());

    bus.publish(Event::new("Order", "test"));
    bus.publish(Event::new("Order", "test"));

    assert_eq!(*log.lock().unwrap(), vec!["survivor", "survivor"]);
}

#[test]
fn payload_filter_selects_matching_envelopes() {
    let bus = running_bus();
    let log = Arc::new(Mutex::new(Vec::new()));
    let filter = EventFilter::new().with_pattern("a", 1).with_pattern("b", 2);
    bus.add_handler("Order", recorder(&log, "hit"), HandlerOptions::new().filter(filter));

    bus.publish(Event::new("Order", "test").with_field("a", 1).with_field("b", 2).with_field("c", 3));
    bus.publish(Event::new("Order", "test").with_field("a", 1).with_field("b", 5));

    assert_eq!(*log.lock().unwrap(), vec!["hit"]);
}

#[test]
fn every_filter_must_accept() {
    let bus = running_bus();
    let log = Arc::new(Mutex::new(Vec::new()));
    bus.add_handler(
        "Order",
        recorder(&log, "hit"),
        HandlerOptions::new()
            .filter(|e: &Event| e.source() == "shop")
            .filter(|e: &Event| e.get("qty").and_then(|v| v.as_i64()).unwrap_or(0) > 1),
    );

    bus.publish(Event::new("Order", "shop").with_field("qty", 1));
    bus.publish(Event::new("Order", "pos").with_field("qty", 4));
    bus.publish(Event::new("Order", "shop").with_field("qty", 4));

    assert_eq!(log.lock().unwrap().len(), 1);
}

#[test]
fn publish_before_start_and_after_shutdown_is_a_noop() {
    let bus = EventBus::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    bus.add_handler("Order", recorder(&log, "early"), HandlerOptions::new());

    bus.publish(Event::new("Order", "test"));
    assert!(log.lock().unwrap().is_empty());

    bus.start();
    bus.start();
    bus.publish(Event::new("Order", "test"));
    assert_eq!(log.lock().unwrap().len(), 1);

    bus.shutdown();
    bus.shutdown();
    assert!(!bus.is_running());
    assert_eq!(bus.handler_count(None), 0);

    bus.publish(Event::new("Order", "test"));
    assert_eq!(log.lock().unwrap().len(), 1);
}

#[test]
fn shutdown_without_start_still_clears_registrations() {
    let bus = EventBus::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    bus.add_handler("Order", recorder(&log, "stale"), HandlerOptions::new());
    bus.add_middleware(|e: &Event| -> Result<Option<Event>> { Ok(Some(e.clone().with_field("touched", true))) });

    bus.shutdown();
    assert_eq!(bus.handler_count(None), 0);

    bus.start();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    bus.add_handler(
        "Order",
        move |e: &Event| {
            sink.lock().unwrap().push(e.clone());
            Ok(())
        },
        HandlerOptions::new(),
    );
    bus.publish(Event::new("Order", "shop"));

    assert!(log.lock().unwrap().is_empty());
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].get("touched").is_none());
}

#[test]
fn remove_handler_by_id() {
    let bus = running_bus();
    let log = Arc::new(Mutex::new(Vec::new()));
    let kind = EventKind::named("Order");

    let first = bus.add_handler(kind.clone(), recorder(&log, "first"), HandlerOptions::new());
    let second = bus.add_handler(kind.clone(), recorder(&log, "second"), HandlerOptions::new());
    assert_eq!(first, "Order_0");
    assert_eq!(second, "Order_1");

    assert!(bus.remove_handler(&kind, &first));
    assert!(!bus.remove_handler(&kind, &first));
    assert!(!bus.remove_handler(&EventKind::named("Refund"), &second));

    bus.publish(Event::new("Order", "test"));
    assert_eq!(*log.lock().unwrap(), vec!["second"]);
}

#[test]
fn clear_handlers_counts_removed() {
    let bus = running_bus();
    let noop = |_: &Event| -> Result<()> { Ok(()) };
    bus.add_handler("Order", noop, HandlerOptions::new());
    bus.add_handler("Order", noop, HandlerOptions::new());
    bus.add_handler("Refund", noop, HandlerOptions::new());

    assert_eq!(bus.event_kinds(), vec![EventKind::named("Order"), EventKind::named("Refund")]);
    assert_eq!(bus.clear_handlers(Some(&EventKind::named("Order"))), 2);
    assert_eq!(bus.clear_handlers(Some(&EventKind::named("Order"))), 0);
    assert_eq!(bus.handler_count(None), 1);
    assert_eq!(bus.clear_handlers(None), 1);
    assert!(bus.event_kinds().is_empty());
}

#[test]
fn subscribe_returns_the_callback() {
    let bus = running_bus();
    let hits = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&hits);

    let handler = bus
        .subscribe("Order")
        .priority(3)
        .filter(EventFilter::new().with_source("shop"))
        .register(move |_: &Event| {
            *counter.lock().unwrap() += 1;
            Ok(())
        });

    bus.publish(Event::new("Order", "shop"));
    bus.publish(Event::new("Order", "elsewhere"));
    // Still an ordinary callable.
    handler(&Event::new("Order", "direct")).unwrap();

    assert_eq!(*hits.lock().unwrap(), 2);
    assert_eq!(bus.handler_count(Some(&EventKind::named("Order"))), 1);
}

#[test]
fn other_kinds_are_not_dispatched() {
    let bus = running_bus();
    let log = Arc::new(Mutex::new(Vec::new()));
    bus.add_handler("Order", recorder(&log, "order"), HandlerOptions::new());

    bus.publish(Event::new("Refund", "test"));
    bus.publish(Event::new(EventKind::AppStarted, "test"));

    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn middleware_transforms_before_filters_and_handlers() {
    let bus = running_bus();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    bus.add_middleware(|e: &Event| -> Result<Option<Event>> {
        Ok(Some(e.clone().with_correlation_id("corr-1")))
    });
    bus.add_middleware(|_: &Event| -> Result<Option<Event>> {
        Err(WeftError::MiddlewareError("broken".into()))
    });
    bus.add_middleware(|e: &Event| -> Result<Option<Event>> {
        Ok(Some(e.map_payload(|mut p| {
            p.remove("password");
            p
        })))
    });

    bus.add_handler(
        "Login",
        move |e: &Event| {
            sink.lock().unwrap().push(e.clone());
            Ok(())
        },
        HandlerOptions::new().filter(|e: &Event| e.correlation_id() == Some("corr-1")),
    );

    let original = Event::new("Login", "auth")
        .with_field("user", "ana")
        .with_field("password", "hunter2");
    bus.publish(original.clone());

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].get("user"), Some(&json!("ana")));
    assert!(seen[0].get("password").is_none());
    assert_eq!(seen[0].timestamp(), original.timestamp());
    // The producer's copy is untouched.
    assert!(original.get("password").is_some());
}

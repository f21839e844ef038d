//! Per-component event bus slot.
//!
//! Publishing through a component that never had a bus attached is a wiring
//! bug, so it fails with `WeftError::NoEventBus` instead of being dropped.

use std::sync::{Arc, OnceLock};

use tracing::error;

use crate::bus::EventBus;
use crate::event::Event;
use crate::{Result, WeftError};

pub struct BusAttachment {
    component: String,
    bus: OnceLock<Arc<EventBus>>,
}

impl BusAttachment {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            bus: OnceLock::new(),
        }
    }

    /// Attaches `bus`; returns false if a bus was already attached.
    pub fn attach(&self, bus: Arc<EventBus>) -> bool {
        self.bus.set(bus).is_ok()
    }

    pub fn bus(&self) -> Option<&Arc<EventBus>> {
        self.bus.get()
    }

    pub fn is_attached(&self) -> bool {
        self.bus.get().is_some()
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    fn require(&self) -> Result<&Arc<EventBus>> {
        self.bus.get().ok_or_else(|| {
            error!(target: "event_bus", component = %self.component, "Publish without an attached event bus");
            WeftError::NoEventBus {
                component: self.component.clone(),
            }
        })
    }

    pub fn publish(&self, event: Event) -> Result<()> {
        self.require()?.publish(event);
        Ok(())
    }

    pub async fn publish_async(&self, event: Event) -> Result<()> {
        self.require()?.publish_async(event).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unattached_publish_fails_loudly() {
        let slot = BusAttachment::new("orders");
        let err = slot.publish(Event::new("Order", "orders")).unwrap_err();
        assert!(matches!(err, WeftError::NoEventBus { ref component } if component == "orders"));
    }

    #[test]
    fn attach_only_once() {
        let slot = BusAttachment::new("orders");
        assert!(slot.attach(Arc::new(EventBus::new())));
        assert!(!slot.attach(Arc::new(EventBus::new())));
        // Attached but stopped: publish is a silent no-op, not an error.
        assert!(slot.publish(Event::new("Order", "orders")).is_ok());
    }
}

//! Standard envelope shapes shared by every component: lifecycle transitions,
//! component errors, performance metrics and generic component events.
//!
//! Components report through these constructors (or the `publish_*` helpers on
//! [`EventBus`]) instead of inventing ad hoc payloads.

use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::bus::EventBus;
use crate::event::{Event, EventKind, Payload};
use crate::WeftError;

/// Payload keys used by the standard shapes.
pub mod keys {
    pub const COMPONENT_NAME: &str = "component_name";
    pub const LIFECYCLE_TYPE: &str = "lifecycle_type";
    pub const SUCCESS: &str = "success";
    pub const DURATION: &str = "duration";
    pub const ERROR_DETAILS: &str = "error_details";
    pub const ERROR_TYPE: &str = "error_type";
    pub const ERROR_MESSAGE: &str = "error_message";
    pub const TRACEBACK: &str = "traceback";
    pub const CONTEXT: &str = "context";
    pub const METRIC_NAME: &str = "metric_name";
    pub const VALUE: &str = "value";
    pub const COMPONENT_TYPE: &str = "component_type";
    pub const TAGS: &str = "tags";
    pub const EVENT_TYPE: &str = "event_type";
    pub const DATA: &str = "data";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStage {
    Starting,
    Started,
    Stopping,
    Stopped,
}

impl LifecycleStage {
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleStage::Starting => "starting",
            LifecycleStage::Started => "started",
            LifecycleStage::Stopping => "stopping",
            LifecycleStage::Stopped => "stopped",
        }
    }
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleStage {
    type Err = WeftError;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "starting" => Ok(LifecycleStage::Starting),
            "started" => Ok(LifecycleStage::Started),
            "stopping" => Ok(LifecycleStage::Stopping),
            "stopped" => Ok(LifecycleStage::Stopped),
            other => Err(WeftError::InvalidKind(format!("lifecycle stage '{other}'"))),
        }
    }
}

pub fn lifecycle_event(
    component: &str,
    stage: LifecycleStage,
    success: bool,
    duration: Option<Duration>,
    error_details: Option<Payload>,
) -> Event {
    Event::new(EventKind::ComponentLifecycle, component)
        .with_field(keys::COMPONENT_NAME, component)
        .with_field(keys::LIFECYCLE_TYPE, stage.as_str())
        .with_field(keys::SUCCESS, success)
        .with_field(
            keys::DURATION,
            duration.map(|d| json!(d.as_secs_f64())).unwrap_or(Value::Null),
        )
        .with_field(
            keys::ERROR_DETAILS,
            error_details.map(Value::Object).unwrap_or(Value::Null),
        )
}

pub fn component_error_event(
    component: &str,
    error_type: &str,
    message: &str,
    traceback: &str,
    context: Payload,
) -> Event {
    Event::new(EventKind::ComponentError, component)
        .with_field(keys::COMPONENT_NAME, component)
        .with_field(keys::ERROR_TYPE, error_type)
        .with_field(keys::ERROR_MESSAGE, message)
        .with_field(keys::TRACEBACK, traceback)
        .with_field(keys::CONTEXT, Value::Object(context))
}

/// Error envelope built from a concrete error value. The error type name comes
/// from `E`, the trace from `Backtrace::capture` (empty unless `RUST_BACKTRACE`
/// is set).
pub fn error_event_from<E>(component: &str, error: &E, context: Payload) -> Event
where
    E: std::error::Error + 'static,
{
    let type_name = std::any::type_name::<E>();
    let short = type_name.rsplit("::").next().unwrap_or(type_name);
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    let trace = Backtrace::capture().to_string();
    component_error_event(component, short, &message, &trace, context)
}

pub fn performance_event(
    metric_name: &str,
    value: f64,
    component_type: &str,
    tags: HashMap<String, String>,
) -> Event {
    let source = if component_type.is_empty() { metric_name } else { component_type };
    Event::new(EventKind::PerformanceMetric, source)
        .with_field(keys::METRIC_NAME, metric_name)
        .with_field(keys::VALUE, json!(value))
        .with_field(keys::COMPONENT_TYPE, component_type)
        .with_field(keys::TAGS, json!(tags))
}

/// Generic component envelope; `context` entries are merged at top level.
pub fn component_event(component: &str, event_type: &str, data: Payload, context: Payload) -> Event {
    let mut payload = Payload::new();
    payload.insert(keys::COMPONENT_NAME.into(), json!(component));
    payload.insert(keys::EVENT_TYPE.into(), json!(event_type));
    payload.insert(keys::DATA.into(), Value::Object(data));
    payload.extend(context);
    Event::new(EventKind::User, component).with_payload(payload)
}

pub fn app_started_event(app_name: &str, component_count: usize) -> Event {
    Event::new(EventKind::AppStarted, app_name)
        .with_field("app_name", app_name)
        .with_field("component_count", component_count)
}

pub fn app_stopped_event(app_name: &str, stop_reason: &str) -> Event {
    Event::new(EventKind::AppStopped, app_name)
        .with_field("app_name", app_name)
        .with_field("stop_reason", stop_reason)
}

pub fn component_started_event(component: &str, component_type: &str) -> Event {
    Event::new(EventKind::ComponentStarted, component)
        .with_field(keys::COMPONENT_NAME, component)
        .with_field(keys::COMPONENT_TYPE, component_type)
}

pub fn component_stopped_event(component: &str, component_type: &str, reason: &str) -> Event {
    Event::new(EventKind::ComponentStopped, component)
        .with_field(keys::COMPONENT_NAME, component)
        .with_field(keys::COMPONENT_TYPE, component_type)
        .with_field("reason", reason)
}

pub fn config_updated_event(source: &str, updated_keys: &[&str], old_values: Payload, new_values: Payload) -> Event {
    Event::new(EventKind::ConfigUpdated, source)
        .with_field("updated_keys", json!(updated_keys))
        .with_field("old_values", Value::Object(old_values))
        .with_field("new_values", Value::Object(new_values))
}

impl EventBus {
    pub fn publish_lifecycle(
        &self,
        component: &str,
        stage: LifecycleStage,
        success: bool,
        duration: Option<Duration>,
        error_details: Option<Payload>,
    ) {
        self.publish(lifecycle_event(component, stage, success, duration, error_details));
    }

    /// Publishes a component error envelope and logs it immediately.
    pub fn publish_component_error<E>(&self, component: &str, error: &E, context: Payload)
    where
        E: std::error::Error + 'static,
    {
        tracing::error!(target: "event_bus", component, error = %error, "Component error");
        self.publish(error_event_from(component, error, context));
    }

    pub fn publish_performance(
        &self,
        metric_name: &str,
        value: f64,
        component_type: &str,
        tags: HashMap<String, String>,
    ) {
        self.publish(performance_event(metric_name, value, component_type, tags));
    }

    pub fn publish_component_event(&self, component: &str, event_type: &str, data: Payload, context: Payload) {
        self.publish(component_event(component, event_type, data, context));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_payload_shape() {
        let evt = lifecycle_event(
            "db",
            LifecycleStage::Started,
            true,
            Some(Duration::from_millis(1500)),
            None,
        );
        assert_eq!(evt.kind(), &EventKind::ComponentLifecycle);
        assert_eq!(evt.get(keys::LIFECYCLE_TYPE), Some(&json!("started")));
        assert_eq!(evt.get(keys::DURATION), Some(&json!(1.5)));
        assert_eq!(evt.get(keys::ERROR_DETAILS), Some(&Value::Null));
    }

    #[test]
    fn nan_metric_becomes_null() {
        let evt = performance_event("latency", f64::NAN, "", HashMap::new());
        assert_eq!(evt.get(keys::VALUE), Some(&Value::Null));
        assert_eq!(evt.source(), "latency");
    }

    #[test]
    fn stage_parses_case_insensitively() {
        assert_eq!("Stopping".parse::<LifecycleStage>().unwrap(), LifecycleStage::Stopping);
        assert!("paused".parse::<LifecycleStage>().is_err());
    }
}

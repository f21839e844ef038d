//! Envelope model: the immutable unit carried by the bus and the bridge.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::{Result, WeftError};

/// Unordered mapping of named values carried by an envelope. Opaque to the bus.
pub type Payload = serde_json::Map<String, Value>;

/// Dispatch key of an envelope.
///
/// The framework kinds cover the cross-cutting shapes every component reports
/// through; anything else travels as `Custom`. Names are stable because they
/// appear on the wire as `event_type`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(into = "String")]
pub enum EventKind {
    AppStarted,
    AppStopped,
    ComponentStarted,
    ComponentStopped,
    ComponentLifecycle,
    ComponentError,
    ConfigUpdated,
    PerformanceMetric,
    /// Generic user envelope (`publish_component_event`).
    User,
    /// Inbound broker traffic without a kind mapping.
    ExternalMessage,
    Custom(String),
}

impl EventKind {
    const BUILTIN: [EventKind; 10] = [
        EventKind::AppStarted,
        EventKind::AppStopped,
        EventKind::ComponentStarted,
        EventKind::ComponentStopped,
        EventKind::ComponentLifecycle,
        EventKind::ComponentError,
        EventKind::ConfigUpdated,
        EventKind::PerformanceMetric,
        EventKind::User,
        EventKind::ExternalMessage,
    ];

    /// Stable name of this kind.
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::AppStarted => "AppStarted",
            EventKind::AppStopped => "AppStopped",
            EventKind::ComponentStarted => "ComponentStarted",
            EventKind::ComponentStopped => "ComponentStopped",
            EventKind::ComponentLifecycle => "ComponentLifecycle",
            EventKind::ComponentError => "ComponentError",
            EventKind::ConfigUpdated => "ConfigUpdated",
            EventKind::PerformanceMetric => "PerformanceMetric",
            EventKind::User => "User",
            EventKind::ExternalMessage => "ExternalMessage",
            EventKind::Custom(name) => name,
        }
    }

    /// Builds a kind from a name, resolving framework names to their variant.
    ///
    /// ```
    /// use weft_core::EventKind;
    ///
    /// assert_eq!(EventKind::named("AppStarted"), EventKind::AppStarted);
    /// assert_eq!(EventKind::named("Order"), EventKind::Custom("Order".into()));
    /// ```
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::BUILTIN
            .iter()
            .find(|k| k.as_str() == name)
            .cloned()
            .unwrap_or(EventKind::Custom(name))
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, EventKind::Custom(_))
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = WeftError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(WeftError::InvalidKind(s.to_string()));
        }
        Ok(EventKind::named(trimmed))
    }
}

impl From<&str> for EventKind {
    fn from(s: &str) -> Self {
        EventKind::named(s)
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Custom(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

/// The envelope published on the bus.
///
/// Fields are read-only once built. Middleware that wants to change an
/// envelope clones it and uses the `with_*` builders, so envelopes already
/// handed to handlers are never mutated. `timestamp` is set at construction and
/// has no setter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    id: String,
    kind: EventKind,
    payload: Payload,
    source: String,
    timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instance_id: Option<String>,
}

impl Event {
    pub fn new(kind: impl Into<EventKind>, source: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: kind.into(),
            payload: Payload::new(),
            source: source.into(),
            timestamp: Utc::now(),
            correlation_id: None,
            instance_id: None,
        }
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = payload;
        self
    }

    /// Inserts one payload entry, replacing any previous value under `key`.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    /// Copy of this envelope with the payload replaced by `f(payload)`.
    pub fn map_payload<F>(&self, f: F) -> Self
    where
        F: FnOnce(Payload) -> Payload,
    {
        let mut next = self.clone();
        next.payload = f(next.payload);
        next
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.instance_id.as_deref()
    }

    /// Envelope attributes rendered as strings, used when a payload is empty
    /// but something still has to describe the envelope.
    pub fn attributes(&self) -> Payload {
        let mut attrs = Payload::new();
        attrs.insert("id".into(), Value::String(self.id.clone()));
        attrs.insert("kind".into(), Value::String(self.kind.to_string()));
        attrs.insert("source".into(), Value::String(self.source.clone()));
        attrs.insert("timestamp".into(), Value::String(self.timestamp.to_rfc3339()));
        if let Some(c) = &self.correlation_id {
            attrs.insert("correlation_id".into(), Value::String(c.clone()));
        }
        if let Some(i) = &self.instance_id {
            attrs.insert("instance_id".into(), Value::String(i.clone()));
        }
        attrs
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{} from {}", self.kind, self.id, self.source)
    }
}

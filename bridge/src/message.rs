//! Wire format of bridged messages.
//!
//! Outbound messages are JSON objects carrying the envelope fields plus the
//! sending bridge's instance id. Inbound text is accepted in any shape and
//! normalized to a JSON object before it is turned into an envelope.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use weft_core::{Event, Payload};

/// Marker identifying messages produced by a bridge.
pub const EVENT_BUS_SOURCE: &str = "ucore_framework";

/// Source prefix of envelopes republished from the broker.
pub const EXTERNAL_SOURCE_PREFIX: &str = "external:";

/// Keys consulted when reading inbound messages.
pub mod keys {
    pub const TYPE: &str = "type";
    pub const EVENT_TYPE: &str = "event_type";
    pub const INSTANCE_ID: &str = "instance_id";
    pub const CORRELATION_ID: &str = "correlation_id";
    pub const CONTENT: &str = "content";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub event_type: String,
    /// ISO-8601 timestamp of the envelope.
    pub timestamp: String,
    pub source: String,
    pub event_bus_source: String,
    pub instance_id: String,
    pub data: Payload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl OutboundMessage {
    /// Builds the wire form of `event`. An empty payload is replaced by the
    /// envelope's attributes so the message always says something.
    pub fn from_event(event: &Event, instance_id: &str) -> Self {
        let data = if event.payload().is_empty() {
            event.attributes()
        } else {
            event.payload().clone()
        };
        Self {
            event_type: event.kind().to_string(),
            timestamp: event.timestamp().to_rfc3339_opts(SecondsFormat::Micros, true),
            source: event.source().to_string(),
            event_bus_source: EVENT_BUS_SOURCE.to_string(),
            instance_id: instance_id.to_string(),
            data,
            correlation_id: event.correlation_id().map(str::to_string),
        }
    }
}

/// Sent in place of an envelope that could not be serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackMessage {
    pub event_type: String,
    pub error: String,
    pub original_event: String,
    pub instance_id: String,
    pub timestamp: String,
}

impl FallbackMessage {
    pub fn new(event: &Event, error: impl ToString, instance_id: &str) -> Self {
        Self {
            event_type: "unknown".to_string(),
            error: error.to_string(),
            original_event: event.to_string(),
            instance_id: instance_id.to_string(),
            timestamp: now_iso(),
        }
    }

    fn to_json(&self) -> String {
        json!({
            "event_type": self.event_type,
            "error": self.error,
            "original_event": self.original_event,
            "instance_id": self.instance_id,
            "timestamp": self.timestamp,
        })
        .to_string()
    }
}

/// Serializes `event` for the broker. Never fails: a serialization error
/// produces a [`FallbackMessage`] instead.
pub fn encode_event(event: &Event, instance_id: &str) -> String {
    encode_with(event, instance_id, |msg| serde_json::to_string(msg))
}

pub(crate) fn encode_with<F>(event: &Event, instance_id: &str, encode: F) -> String
where
    F: FnOnce(&OutboundMessage) -> serde_json::Result<String>,
{
    let message = OutboundMessage::from_event(event, instance_id);
    match encode(&message) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(target: "bridge", event = %event, error = %e, "Envelope not serializable, sending fallback");
            FallbackMessage::new(event, e, instance_id).to_json()
        }
    }
}

/// Normalizes raw inbound text into a JSON object.
///
/// A JSON object is used as-is, any other JSON value is wrapped as
/// `{"content": v, "type": "raw"}`, and text that is not JSON becomes
/// `{"content": text, "type": "plain_text"}`.
pub fn decode_inbound(raw: &str) -> Payload {
    let (content, kind) = match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => return map,
        Ok(other) => (other, "raw"),
        Err(_) => (Value::String(raw.to_string()), "plain_text"),
    };
    let mut body = Payload::new();
    body.insert(keys::CONTENT.into(), content);
    body.insert(keys::TYPE.into(), Value::String(kind.into()));
    body
}

/// The message's type discriminant: `type`, falling back to `event_type`.
pub fn discriminant(body: &Payload) -> Option<&str> {
    body.get(keys::TYPE)
        .and_then(Value::as_str)
        .or_else(|| body.get(keys::EVENT_TYPE).and_then(Value::as_str))
}

pub fn origin_instance(body: &Payload) -> Option<&str> {
    body.get(keys::INSTANCE_ID).and_then(Value::as_str)
}

pub fn correlation_id(body: &Payload) -> Option<&str> {
    body.get(keys::CORRELATION_ID).and_then(Value::as_str)
}

pub fn external_source(channel: &str) -> String {
    format!("{EXTERNAL_SOURCE_PREFIX}{channel}")
}

pub(crate) fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::EventKind;

    #[test]
    fn outbound_carries_envelope_fields() {
        let evt = Event::new(EventKind::AppStarted, "app")
            .with_field("app_name", "demo")
            .with_correlation_id("c-1");
        let text = encode_event(&evt, "abcd1234");
        let v: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(v["event_type"], "AppStarted");
        assert_eq!(v["source"], "app");
        assert_eq!(v["event_bus_source"], EVENT_BUS_SOURCE);
        assert_eq!(v["instance_id"], "abcd1234");
        assert_eq!(v["data"]["app_name"], "demo");
        assert_eq!(v["correlation_id"], "c-1");
        assert!(chrono::DateTime::parse_from_rfc3339(v["timestamp"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn empty_payload_sends_attributes() {
        let evt = Event::new("Ping", "probe");
        let msg = OutboundMessage::from_event(&evt, "abcd1234");
        assert_eq!(msg.data.get("id"), Some(&json!(evt.id())));
        assert_eq!(msg.data.get("source"), Some(&json!("probe")));
        assert!(msg.correlation_id.is_none());
    }

    #[test]
    fn serialization_failure_falls_back() {
        let evt = Event::new("Ping", "probe");
        let text = encode_with(&evt, "abcd1234", |_| serde_json::from_str::<String>("{"));
        let v: Value = serde_json::from_str(&text).unwrap();

        assert_eq!(v["event_type"], "unknown");
        assert_eq!(v["instance_id"], "abcd1234");
        assert_eq!(v["original_event"], evt.to_string());
        assert!(!v["error"].as_str().unwrap().is_empty());
    }

    #[test]
    fn inbound_shapes() {
        let obj = decode_inbound(r#"{"type":"order","qty":2}"#);
        assert_eq!(discriminant(&obj), Some("order"));

        let raw = decode_inbound("[1,2,3]");
        assert_eq!(raw.get("content"), Some(&json!([1, 2, 3])));
        assert_eq!(discriminant(&raw), Some("raw"));

        let text = decode_inbound("hello world");
        assert_eq!(text.get("content"), Some(&json!("hello world")));
        assert_eq!(discriminant(&text), Some("plain_text"));
    }

    #[test]
    fn event_type_is_secondary_discriminant() {
        let body = decode_inbound(r#"{"event_type":"AppStarted","instance_id":"n1"}"#);
        assert_eq!(discriminant(&body), Some("AppStarted"));
        assert_eq!(origin_instance(&body), Some("n1"));
    }
}

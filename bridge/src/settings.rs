//! Bridge configuration: direction switches, retry policy, channel table and
//! broker connection settings.
//!
//! Every section deserializes with defaults so partial TOML works, and
//! [`BridgeSettings::from_env`] overlays `WEFT_BRIDGE_*` / `WEFT_REDIS_*`
//! variables on top of the defaults.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::BridgeError;

/// Logical channel names used by the framework forwarders.
pub mod channel_names {
    pub const APP_STARTED: &str = "app_started";
    pub const APP_STOPPED: &str = "app_stopped";
    pub const COMPONENT_STARTED: &str = "component_started";
    pub const COMPONENT_STOPPED: &str = "component_stopped";
    pub const CONFIG_UPDATED: &str = "config_updated";
    pub const USER_EVENTS: &str = "user_events";
}

/// Which way traffic flows through the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Local bus to broker.
    Outbound,
    /// Broker to local bus.
    Inbound,
    Both,
}

impl Direction {
    pub fn includes_outbound(self) -> bool {
        matches!(self, Direction::Outbound | Direction::Both)
    }

    pub fn includes_inbound(self) -> bool {
        matches!(self, Direction::Inbound | Direction::Both)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Outbound => "outbound",
            Direction::Inbound => "inbound",
            Direction::Both => "both",
        })
    }
}

impl FromStr for Direction {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "both" => Ok(Direction::Both),
            "outbound" | "eventbus_to_redis" => Ok(Direction::Outbound),
            "inbound" | "redis_to_eventbus" => Ok(Direction::Inbound),
            other => Err(BridgeError::Config(format!("unknown bridge direction '{other}'"))),
        }
    }
}

/// Logical name to broker channel table, pre-populated with the framework
/// channels. Deserialized tables are merged over the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ChannelTable(BTreeMap<String, String>);

impl Default for ChannelTable {
    fn default() -> Self {
        use channel_names::*;
        let table = [
            (APP_STARTED, "ucore.events.app.started"),
            (APP_STOPPED, "ucore.events.app.stopped"),
            (COMPONENT_STARTED, "ucore.events.component.started"),
            (COMPONENT_STOPPED, "ucore.events.component.stopped"),
            (CONFIG_UPDATED, "ucore.events.config.updated"),
            (USER_EVENTS, "ucore.events.user"),
        ]
        .into_iter()
        .map(|(name, channel)| (name.to_string(), channel.to_string()))
        .collect();
        ChannelTable(table)
    }
}

impl<'de> Deserialize<'de> for ChannelTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let overrides = BTreeMap::<String, String>::deserialize(deserializer)?;
        let mut table = ChannelTable::default();
        table.0.extend(overrides);
        Ok(table)
    }
}

impl ChannelTable {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn set(&mut self, name: impl Into<String>, channel: impl Into<String>) {
        self.0.insert(name.into(), channel.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub password: Option<String>,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 6379,
            db: 0,
            password: None,
        }
    }
}

impl BrokerSettings {
    /// Connection URL in `redis://[:password@]host:port/db` form.
    pub fn url(&self) -> String {
        match &self.password {
            Some(pw) => format!("redis://:{}@{}:{}/{}", pw, self.host, self.port, self.db),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.db),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeSettings {
    pub outbound_enabled: bool,
    pub inbound_enabled: bool,
    /// Identity stamped on everything this process sends.
    pub instance_id: String,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub suppress_self_echo: bool,
    pub forward_app_events: bool,
    pub forward_component_events: bool,
    pub forward_config_events: bool,
    pub forward_user_events: bool,
    pub channels: ChannelTable,
    pub broker: BrokerSettings,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            outbound_enabled: true,
            inbound_enabled: true,
            instance_id: generate_instance_id(),
            max_retries: 3,
            retry_delay_ms: 1000,
            suppress_self_echo: true,
            forward_app_events: true,
            forward_component_events: true,
            forward_config_events: true,
            forward_user_events: true,
            channels: ChannelTable::default(),
            broker: BrokerSettings::default(),
        }
    }
}

/// Short random identity: the first 8 characters of a v4 UUID.
pub fn generate_instance_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

impl BridgeSettings {
    /// Defaults overlaid with process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with whatever `lookup` returns; unparsable values keep
    /// the default.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let flag = |key: &str, default: bool| var(key).and_then(|v| parse_flag(&v)).unwrap_or(default);

        let mut settings = Self::default();
        settings.outbound_enabled = flag("WEFT_BRIDGE_OUTBOUND", settings.outbound_enabled);
        settings.inbound_enabled = flag("WEFT_BRIDGE_INBOUND", settings.inbound_enabled);
        if let Some(id) = var("WEFT_BRIDGE_INSTANCE_ID") {
            settings.instance_id = id;
        }
        settings.max_retries = var("WEFT_BRIDGE_MAX_RETRIES")
            .and_then(|v| v.parse().ok())
            .unwrap_or(settings.max_retries);
        settings.retry_delay_ms = var("WEFT_BRIDGE_RETRY_DELAY_MS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(settings.retry_delay_ms);
        settings.suppress_self_echo = flag("WEFT_BRIDGE_SUPPRESS_SELF_ECHO", settings.suppress_self_echo);
        settings.forward_user_events = flag("WEFT_BRIDGE_FORWARD_USER_EVENTS", settings.forward_user_events);

        if let Some(host) = var("WEFT_REDIS_HOST") {
            settings.broker.host = host;
        }
        settings.broker.port = var("WEFT_REDIS_PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(settings.broker.port);
        settings.broker.db = var("WEFT_REDIS_DB")
            .and_then(|v| v.parse().ok())
            .unwrap_or(settings.broker.db);
        if let Some(pw) = var("WEFT_REDIS_PASSWORD") {
            settings.broker.password = Some(pw);
        }
        settings
    }

    /// Fills in a blank instance id and rejects settings the bridge cannot run with.
    pub fn validated(mut self) -> crate::Result<Self> {
        if self.instance_id.trim().is_empty() {
            self.instance_id = generate_instance_id();
        }
        if self.broker.host.trim().is_empty() {
            return Err(BridgeError::Config("broker host must not be empty".into()));
        }
        if let Some((name, _)) = self.channels.iter().find(|(_, channel)| channel.trim().is_empty()) {
            return Err(BridgeError::Config(format!("channel '{name}' has an empty name")));
        }
        Ok(self)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn channel(&self, name: &str) -> Option<&str> {
        self.channels.get(name)
    }
}

fn parse_flag(v: &str) -> Option<bool> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_framework_channels() {
        let s = BridgeSettings::default();
        assert_eq!(s.instance_id.len(), 8);
        assert_eq!(s.max_retries, 3);
        assert_eq!(s.retry_delay(), Duration::from_secs(1));
        assert_eq!(s.channel(channel_names::APP_STARTED), Some("ucore.events.app.started"));
        assert_eq!(s.channel(channel_names::USER_EVENTS), Some("ucore.events.user"));
        assert_eq!(s.broker.url(), "redis://localhost:6379/0");
    }

    #[test]
    fn env_overlay() {
        let env: HashMap<&str, &str> = [
            ("WEFT_BRIDGE_OUTBOUND", "off"),
            ("WEFT_BRIDGE_INSTANCE_ID", "node-a"),
            ("WEFT_BRIDGE_MAX_RETRIES", "not-a-number"),
            ("WEFT_REDIS_PORT", "6380"),
            ("WEFT_REDIS_PASSWORD", "s3cret"),
        ]
        .into_iter()
        .collect();
        let s = BridgeSettings::from_lookup(|k| env.get(k).map(|v| v.to_string()));

        assert!(!s.outbound_enabled);
        assert!(s.inbound_enabled);
        assert_eq!(s.instance_id, "node-a");
        assert_eq!(s.max_retries, 3);
        assert_eq!(s.broker.url(), "redis://:s3cret@localhost:6380/0");
    }

    #[test]
    fn partial_channel_table_keeps_defaults() {
        let s: BridgeSettings =
            serde_json::from_str(r#"{"channels": {"app_started": "custom.started", "audit": "ops.audit"}}"#).unwrap();
        assert_eq!(s.channel("app_started"), Some("custom.started"));
        assert_eq!(s.channel("app_stopped"), Some("ucore.events.app.stopped"));
        assert_eq!(s.channel("audit"), Some("ops.audit"));
        assert_eq!(s.instance_id.len(), 8);
    }

    #[test]
    fn blank_instance_id_is_regenerated() {
        let s = BridgeSettings {
            instance_id: "  ".into(),
            ..Default::default()
        }
        .validated()
        .unwrap();
        assert_eq!(s.instance_id.len(), 8);
    }

    #[test]
    fn direction_aliases() {
        assert_eq!("eventbus_to_redis".parse::<Direction>().unwrap(), Direction::Outbound);
        assert_eq!("Inbound".parse::<Direction>().unwrap(), Direction::Inbound);
        assert!(Direction::Both.includes_inbound() && Direction::Both.includes_outbound());
        assert!("sideways".parse::<Direction>().is_err());
    }
}

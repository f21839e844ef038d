use std::collections::HashMap;
use std::fs;
use std::path::Path;

use weft_bridge::{BridgeSettings, KindMapping};
use weft_core::EventKind;

/// Configuration for the bridge node demo
#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub app_name: String,
    pub bridge: BridgeSettings,
    /// Extra outbound rules on top of the framework forwarders
    pub forward: Vec<ForwardRule>,
    /// Broker channels republished on the local bus
    pub listen: Vec<ListenRule>,
}

#[derive(Clone, Debug, serde::Deserialize)]
pub struct ForwardRule {
    pub kind: String,
    pub channel: String,
}

#[derive(Clone, Debug, Default, serde::Deserialize)]
pub struct ListenRule {
    pub channel: String,
    /// Message `type` value to envelope kind name
    #[serde(default)]
    pub mapping: HashMap<String, String>,
}

impl ListenRule {
    pub fn kind_mapping(&self) -> KindMapping {
        self.mapping
            .iter()
            .map(|(discriminant, kind)| (discriminant.clone(), EventKind::named(kind.as_str())))
            .collect()
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        let bridge = BridgeSettings::from_env();
        let listen = [
            weft_bridge::settings::channel_names::APP_STARTED,
            weft_bridge::settings::channel_names::APP_STOPPED,
        ]
        .iter()
        .filter_map(|name| bridge.channel(name))
        .map(|channel| ListenRule {
            channel: channel.to_string(),
            mapping: [
                ("AppStarted".to_string(), "AppStarted".to_string()),
                ("AppStopped".to_string(), "AppStopped".to_string()),
            ]
            .into_iter()
            .collect(),
        })
        .collect();

        Self {
            app_name: std::env::var("WEFT_APP_NAME")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "bridge_node".to_string()),
            bridge,
            forward: Vec::new(),
            listen,
        }
    }
}

impl NodeConfig {
    /// Load configuration from a TOML file (path via WEFT_NODE_CONFIG or ./weft_node.toml),
    /// overlaying values onto env-driven defaults.
    pub fn load() -> Self {
        let default = Self::default();
        let path = std::env::var("WEFT_NODE_CONFIG").unwrap_or_else(|_| "weft_node.toml".into());
        let p = Path::new(&path);
        if !p.exists() {
            tracing::info!(target: "bridge_node", path = %path, "No TOML config found; using defaults/env");
            return default;
        }
        match fs::read_to_string(p) {
            Ok(s) => match toml::from_str::<NodeToml>(&s) {
                Ok(t) => t.overlay(default),
                Err(e) => {
                    tracing::warn!(target: "bridge_node", error = %e, "Failed to parse TOML; using defaults");
                    default
                }
            },
            Err(e) => {
                tracing::warn!(target: "bridge_node", error = %e, "Failed to read TOML; using defaults");
                default
            }
        }
    }
}

// TOML overlay

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct NodeToml {
    pub app_name: Option<String>,
    /// Replaces the env-derived bridge settings; missing keys take defaults
    pub bridge: Option<BridgeSettings>,
    #[serde(default)]
    pub forward: Vec<ForwardRule>,
    pub listen: Option<Vec<ListenRule>>,
}

impl NodeToml {
    fn overlay(self, mut base: NodeConfig) -> NodeConfig {
        if let Some(name) = self.app_name {
            base.app_name = name;
        }
        if let Some(bridge) = self.bridge {
            base.bridge = bridge;
        }
        base.forward.extend(self.forward);
        if let Some(listen) = self.listen {
            base.listen = listen;
        }
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toml_overlay() {
        let toml_src = r#"
            app_name = "edge-1"

            [bridge]
            instance_id = "edge0001"
            forward_user_events = true

            [bridge.channels]
            user_events = "edge.user"

            [[forward]]
            kind = "Order"
            channel = "edge.orders"

            [[listen]]
            channel = "edge.commands"
            mapping = { restart = "RestartRequested" }
        "#;
        let cfg = toml::from_str::<NodeToml>(toml_src).unwrap().overlay(NodeConfig::default());

        assert_eq!(cfg.app_name, "edge-1");
        assert_eq!(cfg.bridge.instance_id, "edge0001");
        assert!(cfg.bridge.forward_user_events);
        assert_eq!(cfg.bridge.channel("user_events"), Some("edge.user"));
        assert_eq!(cfg.bridge.channel("app_started"), Some("ucore.events.app.started"));
        assert_eq!(cfg.forward[0].channel, "edge.orders");
        assert_eq!(cfg.listen.len(), 1);
        assert_eq!(
            cfg.listen[0].kind_mapping().get("restart"),
            Some(&EventKind::named("RestartRequested"))
        );
    }
}

//! Weft Bridge: mirrors selected event bus traffic onto an external pub/sub
//! broker and republishes broker traffic on the local bus.
//!
//! The [`BridgeCoordinator`] owns the broker connection, the bridge settings and
//! the statistics. It composes an [`EventForwarder`] (local to remote) and a
//! [`ChannelListener`] (remote to local); all broker traffic goes through them
//! so instance-id stamping and counters stay consistent.

pub mod broker;
pub mod coordinator;
pub mod forwarder;
pub mod listener;
pub mod message;
#[cfg(feature = "redis")]
pub mod redis_broker;
pub mod settings;
pub mod state;

pub use broker::{Broker, InMemoryBroker, MessageStream};
pub use coordinator::BridgeCoordinator;
pub use forwarder::{EventForwarder, Forwarder};
pub use listener::{ChannelListener, InboundOutcome, KindMapping, Listener};
pub use message::{FallbackMessage, OutboundMessage, EVENT_BUS_SOURCE};
#[cfg(feature = "redis")]
pub use redis_broker::RedisBroker;
pub use settings::{BridgeSettings, BrokerSettings, ChannelTable, Direction};
pub use state::{BridgeState, BridgeStats, BridgeStatsSnapshot};

use weft_core::WeftError;

#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    #[error("broker connection error: {0}")]
    Connection(String),
    #[error("publish to '{channel}' failed: {reason}")]
    Publish { channel: String, reason: String },
    #[error("subscription to '{channel}' failed: {reason}")]
    Subscribe { channel: String, reason: String },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Core(#[from] WeftError),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

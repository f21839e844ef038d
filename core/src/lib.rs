// Weft Core Library
// In-process event bus: typed envelopes, priority dispatch, filters, middleware

pub mod attachment;
pub mod bus;
pub mod event;
pub mod filter;
pub mod middleware;
mod queue;
pub mod standard;
pub mod telemetry;

// Export core types
pub use attachment::BusAttachment;
pub use bus::{handler_fn, EventBus, EventHandler, HandlerId, HandlerOptions, Subscriber};
pub use event::{Event, EventKind, Payload};
pub use filter::{EventFilter, Filter};
pub use middleware::{AsyncMiddleware, Middleware};
pub use standard::LifecycleStage;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WeftError {
    #[error("Handler error: {0}")]
    HandlerError(String),

    #[error("Middleware error: {0}")]
    MiddlewareError(String),

    #[error("Invalid event kind: {0}")]
    InvalidKind(String),

    #[error("No event bus attached to component '{component}'")]
    NoEventBus { component: String },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl WeftError {
    /// Shorthand for handlers that want to fail with a message.
    pub fn handler(msg: impl Into<String>) -> Self {
        WeftError::HandlerError(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, WeftError>;

//! Pub/sub broker abstraction and the in-process implementation used by
//! tests and single-node deployments.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_core::Stream;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::debug;

use crate::{BridgeError, Result};

/// Raw text messages delivered on one subscription. An `Err` item is a
/// delivery problem on that subscription; the stream ends when the
/// subscription closes.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Channel-based publish/subscribe transport.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publishes `payload` on `channel`, returning how many subscribers got it.
    async fn publish(&self, channel: &str, payload: String) -> Result<usize>;

    async fn subscribe(&self, channel: &str) -> Result<MessageStream>;

    /// Releases connections. Open subscriptions end.
    async fn close(&self) -> Result<()>;
}

pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Broadcast-channel broker living inside the process.
///
/// Cloning shares the same channels, so two bridges holding clones of one
/// `InMemoryBroker` see each other's traffic. The most recent `capacity`
/// payloads of each channel are also kept for inspection.
#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<Inner>,
}

struct Inner {
    channels: DashMap<String, broadcast::Sender<String>>,
    history: DashMap<String, VecDeque<String>>,
    closed: AtomicBool,
    capacity: usize,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                channels: DashMap::new(),
                history: DashMap::new(),
                closed: AtomicBool::new(false),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Retained payloads published on `channel`, oldest first.
    pub fn published(&self, channel: &str) -> Vec<String> {
        self.inner
            .history
            .get(channel)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .channels
            .get(channel)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, channel: &str, payload: String) -> Result<usize> {
        if self.is_closed() {
            return Err(BridgeError::Connection("in-memory broker is closed".into()));
        }
        {
            let mut history = self.inner.history.entry(channel.to_string()).or_default();
            if history.len() == self.inner.capacity {
                history.pop_front();
            }
            history.push_back(payload.clone());
        }

        let receivers = match self.inner.channels.get(channel) {
            Some(tx) => tx.send(payload).unwrap_or(0),
            None => 0,
        };
        debug!(target: "bridge", channel, receivers, "Published to in-memory broker");
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream> {
        if self.is_closed() {
            return Err(BridgeError::Subscribe {
                channel: channel.to_string(),
                reason: "in-memory broker is closed".into(),
            });
        }
        let rx = self
            .inner
            .channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
            .subscribe();

        let name = channel.to_string();
        let stream = BroadcastStream::new(rx).map(move |item| {
            item.map_err(|e| BridgeError::Subscribe {
                channel: name.clone(),
                reason: e.to_string(),
            })
        });
        Ok(Box::pin(stream))
    }

    async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        // Dropping the senders ends every open stream.
        self.inner.channels.clear();
        Ok(())
    }
}

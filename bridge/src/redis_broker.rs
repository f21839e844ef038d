//! Redis pub/sub transport.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tokio_stream::StreamExt;
use tracing::info;

use crate::broker::{Broker, MessageStream};
use crate::settings::BrokerSettings;
use crate::{BridgeError, Result};

/// Publishes over one multiplexed connection; every subscription gets its own
/// pub/sub connection.
pub struct RedisBroker {
    client: redis::Client,
    conn: Mutex<Option<MultiplexedConnection>>,
}

impl RedisBroker {
    pub async fn connect(settings: &BrokerSettings) -> Result<Self> {
        let client = redis::Client::open(settings.url()).map_err(|e| BridgeError::Connection(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BridgeError::Connection(e.to_string()))?;
        info!(target: "bridge", host = %settings.host, port = settings.port, db = settings.db, "Connected to Redis");
        Ok(Self {
            client,
            conn: Mutex::new(Some(conn)),
        })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, channel: &str, payload: String) -> Result<usize> {
        let mut conn = match self.conn.lock().await.as_ref() {
            Some(conn) => conn.clone(),
            None => return Err(BridgeError::Connection("redis broker is closed".into())),
        };
        let receivers: usize = conn.publish(channel, payload).await.map_err(|e| BridgeError::Publish {
            channel: channel.to_string(),
            reason: e.to_string(),
        })?;
        Ok(receivers)
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream> {
        let subscribe_error = |e: redis::RedisError| BridgeError::Subscribe {
            channel: channel.to_string(),
            reason: e.to_string(),
        };
        let mut pubsub = self.client.get_async_pubsub().await.map_err(subscribe_error)?;
        pubsub.subscribe(channel).await.map_err(subscribe_error)?;

        let name = channel.to_string();
        let stream = pubsub.into_on_message().map(move |msg| {
            msg.get_payload::<String>().map_err(|e| BridgeError::Subscribe {
                channel: name.clone(),
                reason: e.to_string(),
            })
        });
        Ok(Box::pin(stream))
    }

    async fn close(&self) -> Result<()> {
        self.conn.lock().await.take();
        Ok(())
    }
}

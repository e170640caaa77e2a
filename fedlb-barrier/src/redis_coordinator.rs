//! Redis binding for the [`Coordinator`] trait (§4.2a): `SET`/`KEYS` for
//! readiness keys, `PUBLISH`/`SUBSCRIBE` for the `sync_start` signal.

use std::pin::Pin;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio_stream::{Stream, StreamExt};

use crate::coordinator::Coordinator;
use crate::error::CoordinationError;

pub struct RedisCoordinator {
    client: redis::Client,
}

impl RedisCoordinator {
    pub fn new(redis_url: &str) -> Result<Self, CoordinationError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| CoordinationError::Connect(e.to_string()))?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, CoordinationError> {
        self.client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| CoordinationError::Connect(e.to_string()))
    }
}

#[async_trait]
impl Coordinator for RedisCoordinator {
    async fn set(&self, key: &str, value: &str) -> Result<(), CoordinationError> {
        let mut conn = self.connection().await?;
        conn.set::<_, _, ()>(key, value)
            .await
            .map_err(|e| CoordinationError::Store(e.to_string()))
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, CoordinationError> {
        let mut conn = self.connection().await?;
        let pattern = format!("{prefix}*");
        conn.keys(pattern)
            .await
            .map_err(|e| CoordinationError::Store(e.to_string()))
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), CoordinationError> {
        let mut conn = self.connection().await?;
        conn.publish::<_, _, ()>(channel, payload)
            .await
            .map_err(|e| CoordinationError::Store(e.to_string()))
    }

    async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<Pin<Box<dyn Stream<Item = String> + Send>>, CoordinationError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| CoordinationError::Connect(e.to_string()))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| CoordinationError::Store(e.to_string()))?;

        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| msg.get_payload::<String>().ok());
        Ok(Box::pin(stream))
    }
}

//! The KV + pub/sub abstraction the barrier protocol is built on (§4.2).
//! Kept as a trait so the protocol logic in [`crate::barrier`] is testable
//! against an in-memory fake without a real Redis instance.

use std::pin::Pin;

use async_trait::async_trait;
use tokio_stream::Stream;

use crate::error::CoordinationError;

#[async_trait]
pub trait Coordinator: Send + Sync {
    async fn set(&self, key: &str, value: &str) -> Result<(), CoordinationError>;
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, CoordinationError>;
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), CoordinationError>;
    async fn subscribe(
        &self,
        channel: &str,
    ) -> Result<Pin<Box<dyn Stream<Item = String> + Send>>, CoordinationError>;
}

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::sync::{broadcast, Mutex};
    use tokio_stream::wrappers::BroadcastStream;
    use tokio_stream::StreamExt;

    /// An in-memory `Coordinator` for unit and integration tests: `keys`
    /// matches by prefix against a shared map, `publish`/`subscribe` are a
    /// broadcast channel per process.
    pub struct FakeCoordinator {
        store: Mutex<HashMap<String, String>>,
        tx: broadcast::Sender<String>,
    }

    impl FakeCoordinator {
        pub fn new() -> Arc<Self> {
            let (tx, _rx) = broadcast::channel(64);
            Arc::new(Self {
                store: Mutex::new(HashMap::new()),
                tx,
            })
        }
    }

    #[async_trait]
    impl Coordinator for FakeCoordinator {
        async fn set(&self, key: &str, value: &str) -> Result<(), CoordinationError> {
            self.store.lock().await.insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn keys(&self, prefix: &str) -> Result<Vec<String>, CoordinationError> {
            let store = self.store.lock().await;
            Ok(store
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect())
        }

        async fn publish(&self, _channel: &str, payload: &str) -> Result<(), CoordinationError> {
            // No subscribers yet is not an error: the barrier subscribes
            // before the leader ever publishes.
            let _ = self.tx.send(payload.to_string());
            Ok(())
        }

        async fn subscribe(
            &self,
            _channel: &str,
        ) -> Result<Pin<Box<dyn Stream<Item = String> + Send>>, CoordinationError> {
            let rx = self.tx.subscribe();
            let stream = BroadcastStream::new(rx).filter_map(|item| item.ok());
            Ok(Box::pin(stream))
        }
    }
}

//! Rendezvous barrier (C2) and its coordination-store binding (C2a).

pub mod barrier;
pub mod coordinator;
pub mod error;
pub mod redis_coordinator;

pub use barrier::{wait_for_start, START_PAYLOAD, SYNC_START_CHANNEL};
pub use coordinator::Coordinator;
pub use error::CoordinationError;
pub use redis_coordinator::RedisCoordinator;

#[cfg(any(test, feature = "test-util"))]
pub use coordinator::fake::FakeCoordinator;

//! The rendezvous protocol itself (§4.2), expressed purely in terms of the
//! [`Coordinator`] trait so it runs unmodified against Redis or the fake.

use std::sync::Arc;
use std::time::Duration;

use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

use crate::coordinator::Coordinator;
use crate::error::CoordinationError;

pub const SYNC_START_CHANNEL: &str = "sync_start";
pub const START_PAYLOAD: &str = "start";
const READY_PREFIX: &str = "ready:";
const POLL_INTERVAL: Duration = Duration::from_secs(1);

fn ready_key(own_address: &str) -> String {
    format!("{READY_PREFIX}{own_address}")
}

/// Block until the federation-wide `start` signal arrives.
///
/// 1. Announce readiness under `ready:<ownAddress>`.
/// 2. Subscribe to `sync_start`.
/// 3. If this is the leader LB, spawn a poll loop that publishes `start`
///    once `expected_size` readiness keys exist.
/// 4. Every LB (leader included) blocks here until `start` is observed.
pub async fn wait_for_start(
    coord: Arc<dyn Coordinator>,
    own_address: &str,
    expected_size: usize,
    is_leader: bool,
) -> Result<(), CoordinationError> {
    coord.set(&ready_key(own_address), "true").await?;
    info!(own_address, "announced readiness, waiting for barrier release");

    let mut start_events = coord.subscribe(SYNC_START_CHANNEL).await?;

    if is_leader {
        let leader_coord = coord.clone();
        tokio::spawn(leader_poll_loop(leader_coord, expected_size));
    }

    loop {
        match start_events.next().await {
            Some(payload) if payload == START_PAYLOAD => {
                info!("barrier released, starting service");
                return Ok(());
            }
            Some(other) => {
                debug!(payload = %other, "ignoring unrecognized sync_start payload");
            }
            None => return Err(CoordinationError::ChannelClosed),
        }
    }
}

async fn leader_poll_loop(coord: Arc<dyn Coordinator>, expected_size: usize) {
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    loop {
        ticker.tick().await;
        match coord.keys(READY_PREFIX).await {
            Ok(ready) if ready.len() >= expected_size => {
                match coord.publish(SYNC_START_CHANNEL, START_PAYLOAD).await {
                    Ok(()) => {
                        info!(
                            ready = ready.len(),
                            expected_size, "federation quorum reached, start published"
                        );
                        return;
                    }
                    Err(e) => {
                        warn!(error = %e, "failed to publish start signal, retrying next tick");
                    }
                }
            }
            Ok(ready) => {
                debug!(ready = ready.len(), expected_size, "waiting for more peers");
            }
            Err(e) => {
                warn!(error = %e, "coordination store error while polling readiness, retrying");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::fake::FakeCoordinator;

    #[tokio::test]
    async fn leader_releases_all_waiters_once_quorum_reached() {
        let coord = FakeCoordinator::new();

        let leader = tokio::spawn(wait_for_start(coord.clone(), "10.0.0.1", 3, true));
        let follower_a = tokio::spawn(wait_for_start(coord.clone(), "10.0.0.2", 3, false));

        // Give the leader's first poll tick a chance to run before the last
        // peer announces readiness.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let follower_b = tokio::spawn(wait_for_start(coord.clone(), "10.0.0.3", 3, false));

        leader.await.unwrap().unwrap();
        follower_a.await.unwrap().unwrap();
        follower_b.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn non_leader_never_polls_store_directly() {
        let coord = FakeCoordinator::new();
        // A single non-leader with expected_size 1 never releases on its
        // own; only a leader publishes. Race it against a short timeout to
        // prove it stays blocked.
        let waiter = wait_for_start(coord, "10.0.0.5", 1, false);
        let result = tokio::time::timeout(Duration::from_millis(100), waiter).await;
        assert!(result.is_err(), "non-leader should not self-release");
    }
}

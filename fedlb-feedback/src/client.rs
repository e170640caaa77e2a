//! C4 client side: one task per peer, established once at startup (no
//! reconnect — §9 design notes). Probes liveness, then runs the
//! `feedbackPeriod`-ticked stream loop for the lifetime of the connection.

use std::sync::Arc;

use fedlb_core::{LbInstance, TransportError};
use tonic::transport::Endpoint;
use tracing::{debug, trace, warn};

use crate::pb::control_plane_client::ControlPlaneClient;
use crate::pb::{BackendRequest, ControlMessage};

/// Run the feedback loop against one peer until the connection is lost or
/// the peer is never reachable in the first place. Marks the peer unhealthy
/// and returns on any terminal condition; the caller does not restart it.
/// The returned [`TransportError`] distinguishes a lost connection
/// (`CANCELLED`/`UNAVAILABLE`, §4.4) from any other transport failure; a
/// clean end-of-stream close is not an error and yields `Ok(())`.
pub async fn run_peer_feedback(
    instance: Arc<LbInstance>,
    peer_id: usize,
    peer_address: String,
    control_port: u16,
) -> Result<(), TransportError> {
    let uri = format!("http://{peer_address}:{control_port}");
    let endpoint = match Endpoint::from_shared(uri) {
        Ok(e) => e,
        Err(e) => {
            instance.set_peer_healthy(peer_id, false).await;
            let detail = e.to_string();
            warn!(peer = %peer_address, error = %detail, "invalid peer control-plane uri");
            return Err(TransportError::Other { peer: peer_address, detail });
        }
    };

    let channel = match endpoint.connect().await {
        Ok(c) => c,
        Err(e) => {
            instance.set_peer_healthy(peer_id, false).await;
            let detail = e.to_string();
            warn!(peer = %peer_address, error = %detail, "failed to connect to peer control plane");
            return Err(TransportError::Other { peer: peer_address, detail });
        }
    };
    let mut client = ControlPlaneClient::new(channel);

    if let Err(detail) = probe_peer(&mut client, &instance, &peer_address).await {
        instance.set_peer_healthy(peer_id, false).await;
        return Err(TransportError::Other { peer: peer_address, detail });
    }

    let period = instance.tunables.feedback_period;
    let tick_instance = instance.clone();
    let outbound = async_stream::stream! {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            yield ControlMessage {
                command: "update_policy".to_string(),
                payload: tick_instance.inflight(),
            };
        }
    };

    let response = match client.control_stream(outbound).await {
        Ok(r) => r,
        Err(status) => {
            instance.set_peer_healthy(peer_id, false).await;
            warn!(peer = %peer_address, error = %status, "failed to open control stream");
            return Err(TransportError::Other {
                peer: peer_address,
                detail: status.to_string(),
            });
        }
    };
    let mut inbound = response.into_inner();

    loop {
        match inbound.message().await {
            Ok(Some(resp)) => {
                trace!(peer = %peer_address, payload = resp.payload, "received peer feedback");
                instance.apply_feedback(peer_id, resp.payload).await;
            }
            Ok(None) => {
                debug!(peer = %peer_address, "control stream closed cleanly");
                instance.set_peer_healthy(peer_id, false).await;
                return Ok(());
            }
            Err(status) => {
                instance.set_peer_healthy(peer_id, false).await;
                return Err(if matches!(status.code(), tonic::Code::Cancelled | tonic::Code::Unavailable) {
                    warn!(peer = %peer_address, "connection to peer lost");
                    TransportError::ConnectionLost {
                        peer: peer_address,
                        detail: status.to_string(),
                    }
                } else {
                    warn!(peer = %peer_address, error = %status, "control stream error");
                    TransportError::Other {
                        peer: peer_address,
                        detail: status.to_string(),
                    }
                });
            }
        }
    }
}

async fn probe_peer(
    client: &mut ControlPlaneClient<tonic::transport::Channel>,
    instance: &Arc<LbInstance>,
    peer_address: &str,
) -> Result<(), String> {
    let request = BackendRequest {
        server_name: instance.own_address.clone(),
    };
    let probe = tokio::time::timeout(
        instance.tunables.feedback_period,
        client.get_backend_status(request),
    )
    .await;

    match probe {
        Ok(Ok(resp)) if resp.into_inner().is_healthy => {
            debug!(peer = %peer_address, "peer health probe succeeded");
            Ok(())
        }
        Ok(Ok(_)) => {
            warn!(peer = %peer_address, "peer reported itself unhealthy");
            Err("peer reported itself unhealthy".to_string())
        }
        Ok(Err(status)) => {
            warn!(peer = %peer_address, error = %status, "peer health probe rpc failed");
            Err(status.to_string())
        }
        Err(_) => {
            warn!(peer = %peer_address, "peer health probe timed out");
            Err("peer health probe timed out".to_string())
        }
    }
}

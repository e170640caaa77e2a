//! C8 server side: mirrors the per-peer control stream protocol and answers
//! the unary health probe.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use fedlb_core::LbInstance;
use tokio_stream::Stream;
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};
use tracing::{info, trace};

use crate::pb::control_plane_server::{ControlPlane, ControlPlaneServer};
use crate::pb::{BackendRequest, BackendStatus, ControlMessage, ControlResponse};

#[derive(Clone)]
pub struct ControlPlaneService {
    instance: Arc<LbInstance>,
}

impl ControlPlaneService {
    pub fn new(instance: Arc<LbInstance>) -> Self {
        Self { instance }
    }
}

#[tonic::async_trait]
impl ControlPlane for ControlPlaneService {
    type ControlStreamStream = Pin<Box<dyn Stream<Item = Result<ControlResponse, Status>> + Send>>;

    async fn control_stream(
        &self,
        request: Request<Streaming<ControlMessage>>,
    ) -> Result<Response<Self::ControlStreamStream>, Status> {
        let mut inbound = request.into_inner();
        let instance = self.instance.clone();

        let outbound = async_stream::stream! {
            loop {
                match inbound.message().await {
                    Ok(Some(msg)) => {
                        trace!(payload = msg.payload, "received peer control message");
                        yield Ok(ControlResponse {
                            status: "ok".to_string(),
                            payload: instance.inflight(),
                        });
                    }
                    Ok(None) => break,
                    Err(status) => {
                        yield Err(status);
                        break;
                    }
                }
            }
        };

        Ok(Response::new(Box::pin(outbound)))
    }

    async fn get_backend_status(
        &self,
        _request: Request<BackendRequest>,
    ) -> Result<Response<BackendStatus>, Status> {
        // Reachable only once the rendezvous barrier has released this
        // instance, so a successful reply always means "healthy".
        Ok(Response::new(BackendStatus { is_healthy: true }))
    }
}

/// Run the control-plane listener (C8) until the process exits. Every
/// inbound peer's `run_peer_feedback` (C4) dials into this on the same
/// fixed control port.
pub async fn run_control_plane_server(
    instance: Arc<LbInstance>,
    control_port: u16,
) -> Result<(), tonic::transport::Error> {
    let addr = SocketAddr::from(([0, 0, 0, 0], control_port));
    let service = ControlPlaneService::new(instance);
    info!(%addr, "control plane listening");
    Server::builder()
        .add_service(ControlPlaneServer::new(service))
        .serve(addr)
        .await
}

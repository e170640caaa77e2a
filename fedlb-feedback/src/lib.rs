//! Feedback transport (C4 client side, C8 server side): a long-lived
//! bidirectional gRPC stream per peer carrying queue depths, plus a unary
//! liveness probe.

pub mod client;
pub mod server;

/// Generated protobuf/gRPC code for the control plane service.
pub mod pb {
    tonic::include_proto!("fedlb.control");
}

pub use client::run_peer_feedback;
pub use server::{run_control_plane_server, ControlPlaneService};

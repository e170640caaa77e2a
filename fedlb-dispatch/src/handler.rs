//! C6 dispatch engine: the `serve(request)` operation of §4.6, wired as an
//! axum handler shared by every accepted connection.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use fedlb_core::{LbInstance, Target};
use http_body_util::BodyExt;
use tracing::{error, trace, warn};

use crate::proxy::{forward, HttpClient, ProxyError};

#[derive(Clone)]
pub struct DispatchState {
    pub instance: Arc<LbInstance>,
    pub client: HttpClient,
    pub backend_port: u16,
}

/// The sole handler C10 registers for every method and path; there is no
/// path-based routing (explicitly out of scope, §1).
pub async fn serve(State(state): State<DispatchState>, req: Request<Body>) -> Response {
    let original_lb = req
        .headers()
        .get("x-original-lb")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let _ingress = state.instance.admit(original_lb.as_deref());
    let target = state.instance.select_target().await;
    trace!(?target, "dispatch decision");

    let (target_address, target_port, is_offload) = match &target {
        Target::Local { address, .. } => (address.clone(), state.backend_port, false),
        Target::Offload { address, .. } => (address.clone(), state.offload_port(), true),
    };

    let result = forward(
        &state.client,
        &target_address,
        target_port,
        &state.instance.own_address,
        is_offload,
        req,
    )
    .await;

    match result {
        Ok(upstream_resp) => {
            state.instance.complete(&target, true);
            into_axum_response(upstream_resp)
        }
        Err(e) => {
            state.instance.complete(&target, false);
            warn!(target = %target_address, error = %e, "upstream proxy error");
            bad_gateway(e)
        }
    }
}

impl DispatchState {
    /// Offloaded requests are forwarded to the peer's own HTTP ingress
    /// port — the same fixed port every LB listens on, not the control
    /// plane port used for feedback.
    fn offload_port(&self) -> u16 {
        self.instance.tunables.http_port
    }
}

fn into_axum_response(resp: http::Response<hyper::body::Incoming>) -> Response {
    let (parts, body) = resp.into_parts();
    let body = Body::new(body.map_err(axum::Error::new));
    http::Response::from_parts(parts, body).into_response()
}

fn bad_gateway(e: ProxyError) -> Response {
    error!(error = %e, "returning 502 to client");
    (StatusCode::BAD_GATEWAY, format!("upstream error: {e}")).into_response()
}

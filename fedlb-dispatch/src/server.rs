//! C10: the public HTTP entry listener. Every method and path lands on the
//! same dispatch handler (§1 — no path-based routing).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::any;
use axum::Router;
use fedlb_core::LbInstance;
use tokio::net::TcpListener;
use tracing::info;

use crate::handler::{serve, DispatchState};
use crate::proxy::build_client;

pub async fn run_ingress(instance: Arc<LbInstance>) -> std::io::Result<()> {
    let backend_port = instance.tunables.backend_port;
    let http_port = instance.tunables.http_port;

    let state = DispatchState {
        instance,
        client: build_client(),
        backend_port,
    };

    let app = Router::new().fallback(any(serve)).with_state(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], http_port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "http ingress listening");
    axum::serve(listener, app.into_make_service()).await
}

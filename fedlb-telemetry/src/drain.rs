//! Drain port (C7): any HTTP request returns the CSV dump as an attachment
//! and arms process exit on the sampler's next tick.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::sampler::Sampler;

pub async fn run_drain_server(sampler: Arc<Sampler>, drain_port: u16) -> std::io::Result<()> {
    let app = Router::new().fallback(any(drain_handler)).with_state(sampler);
    let addr = SocketAddr::from(([0, 0, 0, 0], drain_port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "drain listener up");
    axum::serve(listener, app.into_make_service()).await
}

async fn drain_handler(State(sampler): State<Arc<Sampler>>) -> Response {
    match sampler.dump_csv().await {
        Ok(csv) => {
            info!("drain requested, serving csv dump");
            sampler.request_drain();
            (
                [
                    (header::CONTENT_TYPE, "text/csv"),
                    (
                        header::CONTENT_DISPOSITION,
                        "attachment; filename=\"output.csv\"",
                    ),
                ],
                csv,
            )
                .into_response()
        }
        Err(e) => {
            error!(error = %e, "failed to build csv dump");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("failed to build csv dump: {e}"))
                .into_response()
        }
    }
}

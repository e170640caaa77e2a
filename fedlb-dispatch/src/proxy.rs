//! Reverse-proxy transport: a single pooled `hyper-util` legacy client
//! shared across every upstream request (§5 — pooling is load-bearing,
//! without it offload fan-out produces connection storms).

use std::time::Duration;

use axum::body::Body;
use http::{Request, Response, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use thiserror::Error;

const MAX_IDLE_CONNS_PER_HOST: usize = 1000;
const IDLE_TIMEOUT: Duration = Duration::from_secs(90);

pub type HttpClient = Client<HttpConnector, Body>;

pub fn build_client() -> HttpClient {
    Client::builder(TokioExecutor::new())
        .pool_max_idle_per_host(MAX_IDLE_CONNS_PER_HOST)
        .pool_idle_timeout(IDLE_TIMEOUT)
        .build_http()
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to build upstream request: {0}")]
    BuildRequest(String),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),
}

/// Forward `req` to `target_address:target_port`, preserving method, path,
/// headers, and body. `original_lb_header` is set only on the offload path
/// (§4.6 step 4); local forwards carry no such header.
pub async fn forward(
    client: &HttpClient,
    target_address: &str,
    target_port: u16,
    own_address: &str,
    is_offload: bool,
    mut req: Request<Body>,
) -> Result<Response<hyper::body::Incoming>, ProxyError> {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let upstream_uri: Uri = format!("http://{target_address}:{target_port}{path_and_query}")
        .parse()
        .map_err(|e: http::uri::InvalidUri| ProxyError::BuildRequest(e.to_string()))?;
    *req.uri_mut() = upstream_uri;

    if is_offload {
        req.headers_mut().insert(
            "x-original-lb",
            http::HeaderValue::from_str(own_address)
                .map_err(|e| ProxyError::BuildRequest(e.to_string()))?,
        );
    }

    Ok(client.request(req).await?)
}

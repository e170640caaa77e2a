//! Metrics exporter (C9): a read-only gauge/counter surface over the same
//! counters C6 maintains, scraped by Prometheus on a separate listener
//! (§4.8, §6). This subsystem never mutates `LbInstance` — it only reads it
//! on a timer and republishes the numbers in Prometheus' wire format.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use fedlb_core::LbInstance;
use prometheus::{Encoder, IntGaugeVec, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tracing::info;

const SCRAPE_PATH: &str = "/federate";

/// The two gauges that characterize the core (§4.8): current in-flight
/// session count and cumulative admitted requests, both labeled by
/// `cluster`/`instance` so a federation-wide scrape can tell LBs apart.
pub struct Metrics {
    registry: Registry,
    active_sessions: IntGaugeVec,
    total_requests: IntGaugeVec,
    cluster: String,
    instance: String,
}

impl Metrics {
    pub fn new(cluster: impl Into<String>, instance: impl Into<String>) -> Self {
        let registry = Registry::new();

        let active_sessions = IntGaugeVec::new(
            Opts::new("active_sessions", "Current in-flight request count"),
            &["cluster", "instance"],
        )
        .expect("active_sessions metric is well-formed");
        registry
            .register(Box::new(active_sessions.clone()))
            .expect("active_sessions registers exactly once");

        let total_requests = IntGaugeVec::new(
            Opts::new("total_requests", "Cumulative admitted request count"),
            &["cluster", "instance"],
        )
        .expect("total_requests metric is well-formed");
        registry
            .register(Box::new(total_requests.clone()))
            .expect("total_requests registers exactly once");

        Self {
            registry,
            active_sessions,
            total_requests,
            cluster: cluster.into(),
            instance: instance.into(),
        }
    }

    /// Refresh both gauges from the instance's current counters. Called
    /// once per scrape rather than on every admission/completion, since the
    /// exporter is read-only and doesn't need to track every mutation.
    fn refresh(&self, instance: &LbInstance) {
        let labels: &[&str] = &[&self.cluster, &self.instance];
        self.active_sessions
            .with_label_values(labels)
            .set(instance.inflight());
        self.total_requests
            .with_label_values(labels)
            .set(instance.total_admitted() as i64);
    }

    fn encode(&self, instance: &LbInstance) -> String {
        self.refresh(instance);
        let metric_families = self.registry.gather();
        let encoder = TextEncoder::new();
        let mut buf = Vec::with_capacity(4096);
        encoder
            .encode(&metric_families, &mut buf)
            .expect("prometheus text encoding never fails for well-formed metrics");
        String::from_utf8(buf).expect("prometheus text encoder emits valid utf-8")
    }
}

#[derive(Clone)]
struct ExporterState {
    instance: Arc<LbInstance>,
    metrics: Arc<Metrics>,
}

async fn federate(State(state): State<ExporterState>) -> Response {
    let body = state.metrics.encode(&state.instance);
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}

/// Run the metrics listener until the process exits. Independent of the
/// HTTP ingress (C10) and drain (C7) listeners — a scrape never touches the
/// dispatch path.
pub async fn run_metrics_server(
    instance: Arc<LbInstance>,
    cluster: String,
    metrics_port: u16,
) -> std::io::Result<()> {
    let metrics = Arc::new(Metrics::new(cluster, instance.own_address.clone()));
    let state = ExporterState { instance, metrics };

    let app = Router::new()
        .route(SCRAPE_PATH, get(federate))
        .with_state(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], metrics_port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, path = SCRAPE_PATH, "metrics listener up");
    axum::serve(listener, app.into_make_service()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use fedlb_core::{Backend, Peer, Tunables};

    fn instance() -> Arc<LbInstance> {
        LbInstance::new(
            "10.0.0.2".to_string(),
            None,
            Tunables::default(),
            vec![Peer::new(0, "10.0.0.3".to_string())],
            vec![Backend::new(0, "10.0.1.10".to_string())],
        )
    }

    #[test]
    fn encode_reports_current_counters() {
        let inst = instance();
        inst.admit(None);
        inst.admit(None);
        let metrics = Metrics::new("clusterA", "10.0.0.2");
        let text = metrics.encode(&inst);
        assert!(text.contains("active_sessions{cluster=\"clusterA\",instance=\"10.0.0.2\"} 2"));
        assert!(text.contains("total_requests{cluster=\"clusterA\",instance=\"10.0.0.2\"} 2"));
    }

    #[test]
    fn inflight_drops_back_down_after_completion() {
        let inst = instance();
        inst.admit(None);
        let metrics = Metrics::new("clusterA", "10.0.0.2");
        let before = metrics.encode(&inst);
        assert!(before.contains("active_sessions{cluster=\"clusterA\",instance=\"10.0.0.2\"} 1"));

        let target = fedlb_core::Target::Local {
            backend_id: 0,
            address: "10.0.1.10".to_string(),
        };
        inst.complete(&target, true);
        let after = metrics.encode(&inst);
        assert!(after.contains("active_sessions{cluster=\"clusterA\",instance=\"10.0.0.2\"} 0"));
    }
}

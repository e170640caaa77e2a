//! Dispatch engine (C6) and HTTP entry server (C10).

pub mod handler;
pub mod proxy;
pub mod server;

pub use handler::{serve, DispatchState};
pub use proxy::{build_client, forward, HttpClient, ProxyError};
pub use server::run_ingress;

#[cfg(test)]
mod tests {
    use super::*;
    use fedlb_core::{Backend, Peer, Tunables};
    use std::sync::Arc;

    fn instance() -> Arc<fedlb_core::LbInstance> {
        fedlb_core::LbInstance::new(
            "10.0.0.2".to_string(),
            None,
            Tunables::default(),
            vec![Peer::new(0, "10.0.0.3".to_string())],
            vec![Backend::new(0, "10.0.1.10".to_string())],
        )
    }

    #[tokio::test]
    async fn admit_then_complete_keeps_inflight_at_zero() {
        let inst = instance();
        let kind = inst.admit(None);
        assert_eq!(kind, fedlb_core::IngressKind::External);
        let target = inst.select_target().await;
        inst.complete(&target, true);
        assert_eq!(inst.inflight(), 0);
    }
}

//! `LbInstance` is the single encapsulated value holding everything the
//! original tool kept in global variables: the peer registry (C3), the
//! backend list, the admission counters, and the per-LB RNG used for
//! weighted selection. One `Arc<LbInstance>` is shared by every task.

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::{debug, trace};

use crate::diffusion::diffusion_weight;
use crate::model::{Backend, Peer, Tunables};

/// Monotonic admission/completion counters (§3 invariants I1/I3).
#[derive(Debug, Default)]
pub struct Counters {
    pub total_admitted: AtomicU64,
    pub inflight: AtomicI64,
    pub first_hop_ingress: AtomicU64,
    pub second_hop_ingress: AtomicU64,
    pub local_responses: AtomicU64,
    pub offloads: AtomicU64,
    pub errors: AtomicU64,
}

impl Counters {
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            total_admitted: self.total_admitted.load(Ordering::SeqCst),
            inflight: self.inflight.load(Ordering::SeqCst),
            first_hop_ingress: self.first_hop_ingress.load(Ordering::SeqCst),
            second_hop_ingress: self.second_hop_ingress.load(Ordering::SeqCst),
            local_responses: self.local_responses.load(Ordering::SeqCst),
            offloads: self.offloads.load(Ordering::SeqCst),
            errors: self.errors.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CounterSnapshot {
    pub total_admitted: u64,
    pub inflight: i64,
    pub first_hop_ingress: u64,
    pub second_hop_ingress: u64,
    pub local_responses: u64,
    pub offloads: u64,
    pub errors: u64,
}

/// How an admitted request's origin was classified (C6 step 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngressKind {
    External,
    FirstHop,
    SecondHop,
}

/// The target a dispatch decision resolved to (C6 steps 2-3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Local { backend_id: usize, address: String },
    Offload { peer_id: usize, address: String },
}

pub struct LbInstance {
    pub own_address: String,
    /// The peer address that counts as "first hop" for ingress
    /// classification (§9: derived once at startup, never recomputed).
    pub first_hop_address: Option<String>,
    pub tunables: Tunables,
    peers: RwLock<Vec<Peer>>,
    backends: RwLock<Vec<Backend>>,
    round_robin: AtomicUsize,
    rng: AsyncMutex<SmallRng>,
    counters: Counters,
}

impl LbInstance {
    pub fn new(
        own_address: String,
        first_hop_address: Option<String>,
        tunables: Tunables,
        peers: Vec<Peer>,
        backends: Vec<Backend>,
    ) -> Arc<Self> {
        Arc::new(Self {
            own_address,
            first_hop_address,
            tunables,
            peers: RwLock::new(peers),
            backends: RwLock::new(backends),
            round_robin: AtomicUsize::new(0),
            rng: AsyncMutex::new(SmallRng::from_entropy()),
            counters: Counters::default(),
        })
    }

    /// Construct with a caller-supplied RNG, for deterministic tests of the
    /// weighted selection law (P4).
    #[doc(hidden)]
    pub fn new_with_rng(
        own_address: String,
        first_hop_address: Option<String>,
        tunables: Tunables,
        peers: Vec<Peer>,
        backends: Vec<Backend>,
        rng: SmallRng,
    ) -> Arc<Self> {
        Arc::new(Self {
            own_address,
            first_hop_address,
            tunables,
            peers: RwLock::new(peers),
            backends: RwLock::new(backends),
            round_robin: AtomicUsize::new(0),
            rng: AsyncMutex::new(rng),
            counters: Counters::default(),
        })
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub async fn peers_snapshot(&self) -> Vec<Peer> {
        self.peers.read().await.clone()
    }

    pub async fn backends_snapshot(&self) -> Vec<Backend> {
        self.backends.read().await.clone()
    }

    pub fn inflight(&self) -> i64 {
        self.counters.inflight.load(Ordering::SeqCst)
    }

    pub fn total_admitted(&self) -> u64 {
        self.counters.total_admitted.load(Ordering::SeqCst)
    }

    /// C6 step 1: admit the request and classify its ingress from the
    /// `X-Original-LB` header value, if any.
    pub fn admit(&self, original_lb_header: Option<&str>) -> IngressKind {
        self.counters.total_admitted.fetch_add(1, Ordering::SeqCst);
        self.counters.inflight.fetch_add(1, Ordering::SeqCst);

        let kind = match original_lb_header {
            None => IngressKind::External,
            Some(addr) if Some(addr) == self.first_hop_address.as_deref() => {
                IngressKind::FirstHop
            }
            Some(_) => IngressKind::SecondHop,
        };
        match kind {
            IngressKind::External => {}
            IngressKind::FirstHop => {
                self.counters.first_hop_ingress.fetch_add(1, Ordering::SeqCst);
            }
            IngressKind::SecondHop => {
                self.counters.second_hop_ingress.fetch_add(1, Ordering::SeqCst);
            }
        }
        kind
    }

    /// C6 steps 2-3: the offload predicate followed by target selection.
    ///
    /// Unhealthy peers are never explicitly filtered here: `set_peer_healthy`
    /// zeroes a peer's weight the moment it goes unhealthy (§3 I2), so they
    /// fall out of both the predicate and the weighted draw on their own.
    pub async fn select_target(&self) -> Target {
        let local_queue = self.inflight();
        let peers = self.peers.read().await;

        let should_offload = if self.tunables.threshold > 0 {
            peers
                .iter()
                .any(|p| local_queue - p.last_queue > self.tunables.threshold)
        } else {
            peers.iter().any(|p| p.weight > 0)
        };

        if !should_offload {
            drop(peers);
            return self.select_local().await;
        }

        let total_weight: i64 = peers.iter().map(|p| p.weight.max(0)).sum();
        if total_weight <= 0 {
            drop(peers);
            return self.select_local().await;
        }

        let draw = {
            let mut rng = self.rng.lock().await;
            rng.gen_range(0..total_weight)
        };
        let mut remainder = draw;
        let mut chosen = None;
        for p in peers.iter() {
            let w = p.weight.max(0);
            if remainder < w {
                chosen = Some((p.id, p.address.clone()));
                break;
            }
            remainder -= w;
        }
        drop(peers);

        match chosen {
            Some((peer_id, address)) => {
                let mut peers = self.peers.write().await;
                if let Some(p) = peers.iter_mut().find(|p| p.id == peer_id) {
                    p.offloads += 1;
                }
                Target::Offload { peer_id, address }
            }
            // Unreachable in practice (total_weight > 0 guarantees a hit),
            // but the local fallback keeps the draw total.
            None => self.select_local().await,
        }
    }

    async fn select_local(&self) -> Target {
        let mut backends = self.backends.write().await;
        let len = backends.len();
        let idx = self.round_robin.fetch_add(1, Ordering::SeqCst) % len;
        let backend = &mut backends[idx];
        backend.sessions += 1;
        Target::Local {
            backend_id: backend.id,
            address: backend.address.clone(),
        }
    }

    /// C6 step 5: completion hook. Runs on both the success and error path
    /// so the inflight decrement always happens (§7).
    pub fn complete(&self, target: &Target, success: bool) {
        self.counters.inflight.fetch_sub(1, Ordering::SeqCst);
        if !success {
            self.counters.errors.fetch_add(1, Ordering::SeqCst);
            return;
        }
        match target {
            Target::Local { .. } => {
                self.counters.local_responses.fetch_add(1, Ordering::SeqCst);
            }
            Target::Offload { .. } => {
                self.counters.offloads.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// C4/C5: record a fresh feedback value from `peer_id` and recompute its
    /// diffusion weight against the current local queue.
    pub async fn apply_feedback(&self, peer_id: usize, peer_queue: i64) {
        let local_queue = self.inflight();
        let weight = diffusion_weight(self.tunables.kappa, local_queue, peer_queue);
        let mut peers = self.peers.write().await;
        if let Some(p) = peers.iter_mut().find(|p| p.id == peer_id) {
            p.last_queue = peer_queue;
            p.weight = weight;
            trace!(peer = %p.address, weight, peer_queue, local_queue, "diffusion weight updated");
        }
    }

    /// Mark a peer healthy/unhealthy. Going unhealthy zeroes its weight
    /// immediately rather than waiting for the next feedback tick.
    pub async fn set_peer_healthy(&self, peer_id: usize, healthy: bool) {
        let mut peers = self.peers.write().await;
        if let Some(p) = peers.iter_mut().find(|p| p.id == peer_id) {
            if p.healthy != healthy {
                debug!(peer = %p.address, healthy, "peer health changed");
            }
            p.healthy = healthy;
            if !healthy {
                p.weight = 0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Tunables;

    fn instance(threshold: i64, kappa: f64, n_peers: usize, n_backends: usize) -> Arc<LbInstance> {
        let peers = (0..n_peers)
            .map(|i| Peer::new(i, format!("10.0.0.{}", 10 + i)))
            .collect();
        let backends = (0..n_backends)
            .map(|i| Backend::new(i, format!("10.0.1.{}", 10 + i)))
            .collect();
        let tunables = Tunables {
            threshold,
            kappa,
            ..Tunables::default()
        };
        LbInstance::new("10.0.0.2".to_string(), None, tunables, peers, backends)
    }

    #[tokio::test]
    async fn round_robin_is_exact_modulo_sequence() {
        let inst = instance(0, 0.0, 1, 3);
        let mut seen = Vec::new();
        for _ in 0..9 {
            match inst.select_target().await {
                Target::Local { backend_id, .. } => seen.push(backend_id),
                Target::Offload { .. } => panic!("expected local selection with all-zero weights"),
            }
        }
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2, 0, 1, 2]);
    }

    #[tokio::test]
    async fn round_robin_splits_evenly_for_non_divisible_n() {
        let inst = instance(0, 0.0, 1, 3);
        let mut counts = [0u64; 3];
        for _ in 0..10 {
            if let Target::Local { backend_id, .. } = inst.select_target().await {
                counts[backend_id] += 1;
            }
        }
        // 10 requests over 3 backends: counts must be {4,3,3} in some order.
        let mut sorted = counts;
        sorted.sort_unstable();
        assert_eq!(sorted, [3, 3, 4]);
    }

    #[tokio::test]
    async fn zero_weights_never_offload_with_threshold_zero() {
        let inst = instance(0, 0.5, 2, 2);
        for _ in 0..20 {
            assert!(matches!(
                inst.select_target().await,
                Target::Local { .. }
            ));
        }
    }

    #[tokio::test]
    async fn positive_weight_makes_offload_reachable() {
        let inst = instance(0, 0.5, 1, 2);
        inst.apply_feedback(0, -100).await; // peer deeply underloaded -> positive weight
        let mut offloaded = false;
        for _ in 0..50 {
            if matches!(inst.select_target().await, Target::Offload { .. }) {
                offloaded = true;
                break;
            }
        }
        assert!(offloaded);
    }

    #[tokio::test]
    async fn unhealthy_peer_contributes_no_weight() {
        let inst = instance(0, 1.0, 1, 2);
        inst.apply_feedback(0, -1000).await;
        inst.set_peer_healthy(0, false).await;
        for _ in 0..20 {
            assert!(matches!(
                inst.select_target().await,
                Target::Local { .. }
            ));
        }
    }

    #[tokio::test]
    async fn conservation_holds_under_interleaved_completions() {
        let inst = instance(0, 0.3, 2, 2);
        let mut targets = Vec::new();
        for _ in 0..30 {
            inst.admit(None);
            targets.push(inst.select_target().await);
        }
        for (i, t) in targets.iter().enumerate() {
            inst.complete(t, i % 7 != 0); // sprinkle in a few errors
        }
        let snap = inst.counters().snapshot();
        assert_eq!(
            snap.total_admitted as i64,
            snap.inflight + snap.local_responses as i64 + snap.offloads as i64 + snap.errors as i64
        );
    }

    #[tokio::test]
    async fn ingress_classification() {
        let peers = vec![Peer::new(0, "10.0.0.11".to_string())];
        let inst = LbInstance::new(
            "10.0.0.2".to_string(),
            Some("10.0.0.11".to_string()),
            Tunables::default(),
            peers,
            vec![Backend::new(0, "10.0.1.10".to_string())],
        );
        assert_eq!(inst.admit(None), IngressKind::External);
        assert_eq!(inst.admit(Some("10.0.0.11")), IngressKind::FirstHop);
        assert_eq!(inst.admit(Some("10.0.0.99")), IngressKind::SecondHop);
        let snap = inst.counters().snapshot();
        assert_eq!(snap.first_hop_ingress, 1);
        assert_eq!(snap.second_hop_ingress, 1);
        assert_eq!(snap.total_admitted, 3);
    }
}

use std::time::Duration;

/// An adjacent load balancer this instance may offload to (C3 entry).
///
/// `id` is the stable ordinal assigned at startup (§3 I5) and never changes;
/// it is the only handle the rest of the system uses to address a peer.
#[derive(Debug, Clone)]
pub struct Peer {
    pub id: usize,
    pub address: String,
    pub healthy: bool,
    pub last_queue: i64,
    pub weight: i64,
    pub offloads: u64,
}

impl Peer {
    pub fn new(id: usize, address: String) -> Self {
        Self {
            id,
            address,
            healthy: true,
            last_queue: 0,
            weight: 0,
            offloads: 0,
        }
    }
}

/// A local web server behind this LB.
#[derive(Debug, Clone)]
pub struct Backend {
    pub id: usize,
    pub address: String,
    pub sessions: u64,
}

impl Backend {
    pub fn new(id: usize, address: String) -> Self {
        Self {
            id,
            address,
            sessions: 0,
        }
    }
}

/// Tunables fixed for the lifetime of the process (§3).
#[derive(Debug, Clone, Copy)]
pub struct Tunables {
    pub feedback_period: Duration,
    pub threshold: i64,
    pub kappa: f64,
    pub sampling_period: Duration,
    pub http_port: u16,
    pub drain_port: u16,
    pub backend_port: u16,
    pub control_port: u16,
}

impl Tunables {
    pub fn with_ports(mut self, http: u16, drain: u16, backend: u16, control: u16) -> Self {
        self.http_port = http;
        self.drain_port = drain;
        self.backend_port = backend;
        self.control_port = control;
        self
    }
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            feedback_period: Duration::from_millis(100),
            threshold: 0,
            kappa: 0.0,
            sampling_period: Duration::from_millis(100),
            http_port: 8001,
            drain_port: 8002,
            backend_port: 80,
            control_port: 50051,
        }
    }
}

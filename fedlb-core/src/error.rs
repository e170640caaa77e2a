use thiserror::Error;

/// Fatal startup errors (C13): these abort the process before it serves
/// any traffic.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to read topology file {path}: {source}")]
    TopologyIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse topology file {path}: {reason}")]
    TopologyParse { path: String, reason: String },

    #[error("own address {address} not found in topology file {path}")]
    SelfNotFound { address: String, path: String },

    #[error("invalid argument --{name}: {reason}")]
    InvalidArg { name: &'static str, reason: String },

    #[error("coordination store error: {0}")]
    Coordination(String),
}

/// Transient per-peer transport errors (C4). These never abort the process;
/// they terminate the one feedback task for the affected peer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The underlying RPC reported `CANCELLED` or `UNAVAILABLE` — the
    /// connection itself is gone, not merely a single call that failed.
    #[error("connection to peer {peer} was lost: {detail}")]
    ConnectionLost { peer: String, detail: String },

    #[error("transport error with peer {peer}: {detail}")]
    Other { peer: String, detail: String },
}

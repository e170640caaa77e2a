use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("failed to connect to coordination store: {0}")]
    Connect(String),

    #[error("coordination store error: {0}")]
    Store(String),

    #[error("sync_start channel closed before the start signal arrived")]
    ChannelClosed,
}

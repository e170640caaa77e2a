use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("csv encoding failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("csv buffer was not valid utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

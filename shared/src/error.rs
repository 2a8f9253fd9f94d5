use thiserror::Error;

/// Failures that end an invocation. Per-record parse problems never surface here.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("failed to decrypt collector credentials: {0}")]
    Decryption(String),
    #[error("inbound event could not be read: {0}")]
    InvalidEvent(#[from] serde_json::Error),
    #[error("{0}")]
    Delegate(String),
}

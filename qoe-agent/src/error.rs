use crate::codec::DecodeError;
use qoe_offline_worker::WorkerError;

/// Errors raised by the QoE agent
#[derive(Debug, thiserror::Error)]
pub enum QoeError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("probe failed: {0}")]
    Probe(String),
    #[error("classification failed: {0}")]
    Classification(String),
    #[error("push subscription failed: {0}")]
    Subscription(String),
    #[error("notification permission denied")]
    PermissionDenied,
    #[error("notification failed: {0}")]
    Notification(String),
    #[error("render failed: {0}")]
    Render(#[from] std::io::Error),
    #[error("worker error: {0}")]
    Worker(#[from] WorkerError),
    #[error("invalid configuration: {0}")]
    Config(String),
}

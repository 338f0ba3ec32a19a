use crate::lifecycle::Lifecycle;

/// Errors raised by the offline worker and its stores
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("cache install failed: {0}")]
    CacheInstall(String),
    #[error("fetch of {url} failed: {reason}")]
    Fetch { url: String, reason: String },
    #[error("invalid cache generation name: {0}")]
    InvalidGeneration(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("notification error: {0}")]
    Notification(String),
    #[error("push subscription error: {0}")]
    Subscription(String),
    #[error("worker is not active (state: {0:?})")]
    NotActive(Lifecycle),
    #[error("worker stopped")]
    Stopped,
    #[error("invalid configuration: {0}")]
    Config(String),
}

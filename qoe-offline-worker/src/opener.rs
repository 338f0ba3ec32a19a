//! Opening the app in a new window

use crate::error::WorkerError;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::Command as AsyncCommand;
use tracing::info;

#[async_trait]
pub trait WindowOpener: Send + Sync {
    async fn open(&self, url: &str) -> Result<(), WorkerError>;
}

/// Hands the URL to the desktop's default handler
pub struct SystemOpener;

#[async_trait]
impl WindowOpener for SystemOpener {
    async fn open(&self, url: &str) -> Result<(), WorkerError> {
        let status = if cfg!(target_os = "windows") {
            AsyncCommand::new("cmd").args(["/C", "start", "", url]).status().await?
        } else if cfg!(target_os = "macos") {
            AsyncCommand::new("open").arg(url).status().await?
        } else {
            AsyncCommand::new("xdg-open").arg(url).status().await?
        };

        if status.success() {
            info!("opened {}", url);
            Ok(())
        } else {
            Err(WorkerError::Notification(format!(
                "could not open {} (exit status {})",
                url, status
            )))
        }
    }
}

/// Records opened URLs
#[derive(Default)]
pub struct MemoryOpener {
    opened: Mutex<Vec<String>>,
}

impl MemoryOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }
}

#[async_trait]
impl WindowOpener for MemoryOpener {
    async fn open(&self, url: &str) -> Result<(), WorkerError> {
        self.opened.lock().push(url.to_string());
        Ok(())
    }
}

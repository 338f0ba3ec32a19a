//! Worker configuration
//!
//! Handles:
//! - Cache generation name and asset manifest
//! - Asset origin and the local HTTP front address
//! - State directory (cache store, push subscription)
//! - Default texts for push notifications

use crate::error::WorkerError;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Name of the live cache generation; bump it to roll the cache
    pub cache_name: String,
    /// Asset paths cached verbatim at install, relative to `asset_origin`
    pub assets: Vec<String>,
    pub asset_origin: String,
    pub listen_addr: SocketAddr,
    /// URL under which clients and the push backend reach this worker.
    /// Defaults to `http://{bound address}/`.
    pub public_url: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub fetch_timeout_secs: u64,
    pub notification: NotificationDefaults,
}

/// Defaults applied to push payloads with missing fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationDefaults {
    pub title: String,
    pub body: String,
    pub tag: String,
    pub icon: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_name: "qoeapp-cache-v1".to_string(),
            assets: [
                "./",
                "./index.html",
                "./manifest.json",
                "./network.js",
                "./icons/icon-192.png",
                "./icons/icon-512.png",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            asset_origin: "http://127.0.0.1:8000/".to_string(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8787)),
            public_url: None,
            data_dir: None,
            fetch_timeout_secs: 15,
            notification: NotificationDefaults::default(),
        }
    }
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            title: "QoE Alert".to_string(),
            body: "Network status changed".to_string(),
            tag: "qoe".to_string(),
            icon: Some("./icons/icon-192.png".to_string()),
        }
    }
}

impl WorkerConfig {
    /// Load config from `$QOE_WORKER_CONFIG` or the OS-specific location
    pub async fn load() -> Result<Self, WorkerError> {
        let path = match std::env::var("QOE_WORKER_CONFIG") {
            Ok(p) => PathBuf::from(p),
            Err(_) => Self::config_file_path()?,
        };

        if !path.exists() {
            tracing::info!("no worker config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(&path).await?;
        toml::from_str(&content)
            .map_err(|e| WorkerError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn config_file_path() -> Result<PathBuf, WorkerError> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| WorkerError::Config("could not find config directory".into()))?;
        path.push("qoe-offline-worker");
        path.push("config.toml");
        Ok(path)
    }

    /// State directory holding the cache store and the push subscription
    pub fn data_dir(&self) -> Result<PathBuf, WorkerError> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        let mut path = dirs::data_local_dir()
            .ok_or_else(|| WorkerError::Config("could not find data directory".into()))?;
        path.push("qoe-offline-worker");
        Ok(path)
    }

    pub fn cache_dir(&self) -> Result<PathBuf, WorkerError> {
        Ok(self.data_dir()?.join("cache"))
    }

    pub fn subscription_path(&self) -> Result<PathBuf, WorkerError> {
        Ok(self.data_dir()?.join("subscription.json"))
    }

    /// Public URL of the worker once bound to `local_addr`
    pub fn resolve_public_url(&self, local_addr: SocketAddr) -> String {
        let url = self
            .public_url
            .clone()
            .unwrap_or_else(|| format!("http://{}/", local_addr));
        if url.ends_with('/') {
            url
        } else {
            format!("{}/", url)
        }
    }

    pub fn validate(&self) -> Result<(), WorkerError> {
        if self.cache_name.is_empty() {
            return Err(WorkerError::Config("cache_name must not be empty".into()));
        }
        reqwest::Url::parse(&self.asset_origin)
            .map_err(|e| WorkerError::Config(format!("asset_origin: {}", e)))?;
        Ok(())
    }
}

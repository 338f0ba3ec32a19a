//! QoE Offline Worker - keeps the QoE app usable without a network
//!
//! The worker:
//! - Caches the app's static assets at install, one generation at a time
//! - Answers asset requests network-first, falling back to the cache
//! - Turns push messages into desktop notifications
//! - Hands out push subscriptions that point back at its own HTTP front
//!
//! It runs as a host task (see [`host`]) behind an axum server (see [`server`]).
//! The agent embeds it; `qoe-offline-worker` runs it standalone.

pub mod cache;
pub mod clients;
pub mod config;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod host;
pub mod lifecycle;
pub mod notify;
pub mod opener;
pub mod server;
pub mod subscription;

pub use clients::{ClientId, ClientMessage};
pub use config::{NotificationDefaults, WorkerConfig};
pub use error::WorkerError;
pub use host::{FetchOutcome, FetchSource, WorkerHandle};
pub use lifecycle::Lifecycle;
pub use notify::{NotificationRequest, NotificationSink};
pub use subscription::PushSubscription;

use cache::DiskCacheStorage;
use events::CacheState;
use fetcher::OriginFetcher;
use host::{spawn_host, WorkerDeps};
use notify::{notification_service_available, DesktopNotifier, MemoryNotifier};
use opener::{SystemOpener, WindowOpener};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use subscription::SubscriptionStore;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Notification and window services of the host OS
pub struct Platform {
    pub sink: Arc<dyn NotificationSink>,
    pub opener: Arc<dyn WindowOpener>,
    /// Tags of clicked notifications
    pub clicks: Option<mpsc::UnboundedReceiver<String>>,
}

impl Platform {
    /// Desktop notifications when a notification service is reachable,
    /// in-memory notifications otherwise
    pub async fn detect(app_name: &str) -> Self {
        let available = tokio::task::spawn_blocking(notification_service_available)
            .await
            .unwrap_or(false);
        if available {
            let (tx, rx) = mpsc::unbounded_channel();
            Self {
                sink: Arc::new(DesktopNotifier::new(app_name, Some(tx))),
                opener: Arc::new(SystemOpener),
                clicks: Some(rx),
            }
        } else {
            warn!("no desktop notification service, push notifications stay in memory");
            Self {
                sink: Arc::new(MemoryNotifier::new()),
                opener: Arc::new(SystemOpener),
                clicks: None,
            }
        }
    }
}

/// A started worker and its HTTP front
pub struct RunningWorker {
    pub handle: WorkerHandle,
    pub local_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningWorker {
    pub fn public_url(&self) -> &str {
        self.handle.public_url()
    }

    /// Stop serving HTTP and forwarding clicks
    pub fn shutdown(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

pub async fn start(config: WorkerConfig) -> Result<RunningWorker, WorkerError> {
    start_with(config, Platform::detect("QoE Agent").await).await
}

pub async fn start_with(
    config: WorkerConfig,
    platform: Platform,
) -> Result<RunningWorker, WorkerError> {
    config.validate()?;

    let listener = TcpListener::bind(config.listen_addr).await?;
    let local_addr = listener.local_addr()?;
    let public_url = config.resolve_public_url(local_addr);

    let deps = WorkerDeps {
        storage: Arc::new(DiskCacheStorage::open(config.cache_dir()?).await?),
        fetcher: Arc::new(OriginFetcher::new(
            &config.asset_origin,
            Duration::from_secs(config.fetch_timeout_secs),
        )?),
        sink: platform.sink,
        opener: platform.opener,
        subscriptions: SubscriptionStore::open(config.subscription_path()?).await?,
    };
    let handle = spawn_host(CacheState::from_config(&config), public_url, deps);

    let mut tasks = Vec::new();
    if let Some(mut clicks) = platform.clicks {
        let handle = handle.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(tag) = clicks.recv().await {
                if handle.notification_click(&tag).await.is_err() {
                    break;
                }
            }
        }));
    }

    let router = server::build_router(handle.clone());
    tasks.push(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!("worker HTTP server failed: {}", e);
        }
    }));

    info!("offline worker listening on {}", handle.public_url());
    Ok(RunningWorker {
        handle,
        local_addr,
        tasks,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_detect_follows_service_availability() {
        let available = tokio::task::spawn_blocking(notification_service_available)
            .await
            .unwrap();
        let platform = Platform::detect("QoE Agent").await;
        assert_eq!(platform.clicks.is_some(), available);
    }
}

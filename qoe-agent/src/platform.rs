//! Host platform glue: the embedded offline worker and direct notifications

use crate::alert::NotificationChannel;
use crate::error::QoeError;
use crate::push::{WorkerContainer, WorkerRegistration};
use async_trait::async_trait;
use parking_lot::Mutex;
use qoe_offline_worker::notify::{notification_service_available, DesktopNotifier};
use qoe_offline_worker::{
    ClientMessage, NotificationRequest, NotificationSink, Platform, PushSubscription,
    RunningWorker, WorkerConfig, WorkerHandle,
};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Offline worker started inside the agent process on first registration
pub struct EmbeddedWorker {
    config: WorkerConfig,
    platform: Mutex<Option<Platform>>,
    running: OnceCell<RunningWorker>,
}

impl EmbeddedWorker {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            platform: Mutex::new(None),
            running: OnceCell::new(),
        }
    }

    /// Use `platform` instead of detecting the desktop's services
    pub fn with_platform(config: WorkerConfig, platform: Platform) -> Self {
        Self {
            config,
            platform: Mutex::new(Some(platform)),
            running: OnceCell::new(),
        }
    }

    pub fn handle(&self) -> Option<&WorkerHandle> {
        self.running.get().map(|w| &w.handle)
    }

    async fn start(&self) -> Result<RunningWorker, QoeError> {
        let platform = self.platform.lock().take();
        let platform = match platform {
            Some(platform) => platform,
            None => Platform::detect("QoE Agent").await,
        };
        let worker = qoe_offline_worker::start_with(self.config.clone(), platform).await?;

        // the agent is the worker's client: clicks on alerts focus it
        let (id, mut messages) = worker.handle.attach().await?;
        tokio::spawn(async move {
            while let Some(message) = messages.recv().await {
                match message {
                    ClientMessage::Controlled => debug!("agent {} controlled by worker", id),
                    ClientMessage::Focus => info!("alert clicked, agent brought to front"),
                }
            }
        });

        Ok(worker)
    }
}

#[async_trait]
impl WorkerContainer for EmbeddedWorker {
    async fn register(&self) -> Result<Arc<dyn WorkerRegistration>, QoeError> {
        let worker = self.running.get_or_try_init(|| self.start()).await?;
        Ok(Arc::new(worker.handle.clone()))
    }
}

#[async_trait]
impl NotificationChannel for EmbeddedWorker {
    fn is_available(&self) -> bool {
        self.handle().is_some_and(|h| h.is_active())
    }

    async fn show(&self, notification: &NotificationRequest) -> Result<(), QoeError> {
        let handle = self
            .handle()
            .ok_or_else(|| QoeError::Notification("worker not registered".into()))?;
        handle.show_notification(notification.clone()).await?;
        Ok(())
    }
}

#[async_trait]
impl WorkerRegistration for WorkerHandle {
    async fn ready(&self) -> Result<(), QoeError> {
        Ok(WorkerHandle::ready(self).await?)
    }

    async fn subscribe(&self, application_server_key: &[u8]) -> Result<PushSubscription, QoeError> {
        Ok(WorkerHandle::subscribe(self, application_server_key).await?)
    }
}

/// Desktop notifications shown by the agent itself
pub struct DirectNotifier {
    sink: Arc<dyn NotificationSink>,
    available: bool,
}

impl DirectNotifier {
    pub async fn desktop() -> Self {
        let available = tokio::task::spawn_blocking(notification_service_available)
            .await
            .unwrap_or(false);
        Self {
            sink: Arc::new(DesktopNotifier::new("QoE Agent", None)),
            available,
        }
    }

    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            sink,
            available: true,
        }
    }
}

#[async_trait]
impl NotificationChannel for DirectNotifier {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn show(&self, notification: &NotificationRequest) -> Result<(), QoeError> {
        let sink = self.sink.clone();
        let notification = notification.clone();
        tokio::task::spawn_blocking(move || sink.show(&notification))
            .await
            .map_err(|e| QoeError::Notification(e.to_string()))??;
        Ok(())
    }
}

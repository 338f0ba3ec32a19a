//! Alert dispatcher
//!
//! Raises a desktop notification when the classifier reports Poor or Bad QoE.
//! Notifications go through the offline worker when it is active, otherwise
//! straight to the desktop. Permission is requested once per process; a
//! denial is final.

use crate::error::QoeError;
use crate::models::QoeResult;
use async_trait::async_trait;
use qoe_offline_worker::notify::notification_service_available;
use qoe_offline_worker::NotificationRequest;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_ALERT_TAG: &str = "qoe-alert";
pub const DEFAULT_ALERT_TITLE: &str = "Network Warning: Poor QoE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PermissionState {
    #[default]
    Unrequested,
    Granted,
    Denied,
}

/// Alert state carried across report cycles
#[derive(Debug, Clone, Default)]
pub struct AlertState {
    pub permission: PermissionState,
    pub last_tag: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertOutcome {
    NotWarranted,
    Suppressed,
    DeliveredViaWorker,
    DeliveredDirect,
}

#[async_trait]
pub trait PermissionSource: Send + Sync {
    async fn request(&self) -> PermissionState;
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn is_available(&self) -> bool;
    async fn show(&self, notification: &NotificationRequest) -> Result<(), QoeError>;
}

/// Configured answer to a permission request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionPolicy {
    Allow,
    Deny,
    /// Granted if a desktop notification service answers
    #[default]
    Ask,
}

#[async_trait]
impl PermissionSource for PermissionPolicy {
    async fn request(&self) -> PermissionState {
        match self {
            PermissionPolicy::Allow => PermissionState::Granted,
            PermissionPolicy::Deny => PermissionState::Denied,
            PermissionPolicy::Ask => {
                match tokio::task::spawn_blocking(notification_service_available).await {
                    Ok(true) => PermissionState::Granted,
                    _ => PermissionState::Denied,
                }
            }
        }
    }
}

pub struct AlertDispatcher {
    permission: Arc<dyn PermissionSource>,
    worker: Option<Arc<dyn NotificationChannel>>,
    direct: Option<Arc<dyn NotificationChannel>>,
    tag: String,
    title: String,
}

impl AlertDispatcher {
    pub fn new(permission: Arc<dyn PermissionSource>) -> Self {
        Self {
            permission,
            worker: None,
            direct: None,
            tag: DEFAULT_ALERT_TAG.to_string(),
            title: DEFAULT_ALERT_TITLE.to_string(),
        }
    }

    pub fn with_worker(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.worker = Some(channel);
        self
    }

    pub fn with_direct(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.direct = Some(channel);
        self
    }

    pub fn with_text(mut self, tag: &str, title: &str) -> Self {
        self.tag = tag.to_string();
        self.title = title.to_string();
        self
    }

    pub async fn maybe_alert(
        &self,
        state: &mut AlertState,
        result: &QoeResult,
        body: &str,
    ) -> AlertOutcome {
        if !result.label.warrants_alert() {
            return AlertOutcome::NotWarranted;
        }
        if let Err(e) = self.ensure_permission(state).await {
            debug!("alert suppressed: {}", e);
            return AlertOutcome::Suppressed;
        }

        let notification = NotificationRequest {
            title: self.title.clone(),
            body: body.to_string(),
            tag: self.tag.clone(),
            icon: None,
            renotify: true,
        };

        if let Some(worker) = self.worker.as_ref().filter(|w| w.is_available()) {
            match worker.show(&notification).await {
                Ok(()) => {
                    state.last_tag = Some(self.tag.clone());
                    return AlertOutcome::DeliveredViaWorker;
                }
                Err(e) => warn!("worker notification failed, showing directly: {}", e),
            }
        }

        if let Some(direct) = self.direct.as_ref().filter(|d| d.is_available()) {
            match direct.show(&notification).await {
                Ok(()) => {
                    state.last_tag = Some(self.tag.clone());
                    return AlertOutcome::DeliveredDirect;
                }
                Err(e) => warn!("direct notification failed: {}", e),
            }
        }

        AlertOutcome::Suppressed
    }

    async fn ensure_permission(&self, state: &mut AlertState) -> Result<(), QoeError> {
        if state.permission == PermissionState::Unrequested {
            state.permission = match self.permission.request().await {
                PermissionState::Granted => PermissionState::Granted,
                _ => PermissionState::Denied,
            };
            info!("notification permission: {:?}", state.permission);
        }
        match state.permission {
            PermissionState::Granted => Ok(()),
            _ => Err(QoeError::PermissionDenied),
        }
    }
}

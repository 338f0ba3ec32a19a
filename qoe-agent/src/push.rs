//! Push registration
//!
//! Registers the offline worker, waits for it to activate, subscribes with the
//! application server key and uploads the subscription to the push backend.
//! A failure at any step is logged once and registration is abandoned for
//! this run; the report loop is never held up by it.

use crate::codec::decode_key;
use crate::error::QoeError;
use crate::transport::Transport;
use async_trait::async_trait;
use qoe_offline_worker::PushSubscription;
use std::sync::Arc;
use tracing::{info, warn};

/// Worker support of the host
#[async_trait]
pub trait WorkerContainer: Send + Sync {
    /// Start (or reuse) the worker registration
    async fn register(&self) -> Result<Arc<dyn WorkerRegistration>, QoeError>;
}

#[async_trait]
pub trait WorkerRegistration: Send + Sync {
    /// Resolves once the worker is active
    async fn ready(&self) -> Result<(), QoeError>;
    async fn subscribe(&self, application_server_key: &[u8]) -> Result<PushSubscription, QoeError>;
}

pub struct PushRegistrar {
    container: Option<Arc<dyn WorkerContainer>>,
    transport: Arc<dyn Transport>,
    push_server_url: String,
    vapid_public_key: String,
}

impl PushRegistrar {
    pub fn new(
        container: Option<Arc<dyn WorkerContainer>>,
        transport: Arc<dyn Transport>,
        push_server_url: &str,
        vapid_public_key: &str,
    ) -> Self {
        Self {
            container,
            transport,
            push_server_url: push_server_url.trim_end_matches('/').to_string(),
            vapid_public_key: vapid_public_key.to_string(),
        }
    }

    /// Register and upload the subscription. Returns None when the host has no
    /// worker support.
    pub async fn register(&self) -> Result<Option<PushSubscription>, QoeError> {
        let Some(container) = &self.container else {
            info!("no worker support, skipping push registration");
            return Ok(None);
        };

        let registration = container.register().await?;
        registration.ready().await?;

        let key = decode_key(&self.vapid_public_key)?;
        let subscription = registration.subscribe(&key).await?;

        let url = format!("{}/subscribe", self.push_server_url);
        let body = serde_json::to_value(&subscription)
            .map_err(|e| QoeError::Subscription(e.to_string()))?;
        let response = self
            .transport
            .post_json(&url, &body)
            .await
            .map_err(|e| QoeError::Subscription(e.to_string()))?;
        if !response.is_success() {
            return Err(QoeError::Subscription(format!(
                "{} returned status {}",
                url, response.status
            )));
        }

        info!("push subscription sent to {}", url);
        Ok(Some(subscription))
    }

    /// [`PushRegistrar::register`], logging instead of returning the failure
    pub async fn run(&self) {
        if let Err(e) = self.register().await {
            warn!("push registration failed: {}", e);
        }
    }
}

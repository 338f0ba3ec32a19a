//! Push subscriptions handed out by the worker
//!
//! A subscription is created once per installation and persisted in the
//! worker's state directory. Subscribing again with the same application
//! server key returns the stored subscription unchanged, so the push backend
//! may receive the same subscription more than once.
//!
//! Payloads are delivered unencrypted to `{public_url}/push`; the keys only
//! identify this installation and are opaque to everything here.

use crate::error::WorkerError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscription {
    pub endpoint: String,
    pub expiration_time: Option<i64>,
    pub keys: SubscriptionKeys,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSubscription {
    application_server_key: String,
    subscription: PushSubscription,
    created_at: DateTime<Utc>,
}

pub struct SubscriptionStore {
    path: Option<PathBuf>,
    current: Option<StoredSubscription>,
}

impl SubscriptionStore {
    /// Open the store at `path`, loading a previously persisted subscription
    pub async fn open<P: Into<PathBuf>>(path: P) -> Result<Self, WorkerError> {
        let path = path.into();
        let current = match tokio::fs::read(&path).await {
            Ok(bytes) => Some(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path: Some(path),
            current,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            current: None,
        }
    }

    pub fn current(&self) -> Option<&PushSubscription> {
        self.current.as_ref().map(|s| &s.subscription)
    }

    pub async fn subscribe(
        &mut self,
        endpoint: &str,
        application_server_key: &[u8],
    ) -> Result<PushSubscription, WorkerError> {
        if application_server_key.is_empty() {
            return Err(WorkerError::Subscription(
                "application server key is empty".into(),
            ));
        }
        let key = URL_SAFE_NO_PAD.encode(application_server_key);

        if let Some(stored) = &self.current {
            if stored.application_server_key == key && stored.subscription.endpoint == endpoint {
                return Ok(stored.subscription.clone());
            }
        }

        let stored = StoredSubscription {
            application_server_key: key,
            subscription: PushSubscription {
                endpoint: endpoint.to_string(),
                expiration_time: None,
                keys: generate_keys(),
            },
            created_at: Utc::now(),
        };

        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, serde_json::to_vec_pretty(&stored)?).await?;
        }
        info!("created push subscription for {}", endpoint);

        let subscription = stored.subscription.clone();
        self.current = Some(stored);
        Ok(subscription)
    }
}

fn generate_keys() -> SubscriptionKeys {
    let mut rng = rand::thread_rng();
    // same sizes as an uncompressed P-256 point and a web-push auth secret
    let mut p256dh = [0u8; 65];
    rng.fill_bytes(&mut p256dh);
    p256dh[0] = 0x04;
    let mut auth = [0u8; 16];
    rng.fill_bytes(&mut auth);

    SubscriptionKeys {
        p256dh: URL_SAFE_NO_PAD.encode(p256dh),
        auth: URL_SAFE_NO_PAD.encode(auth),
    }
}

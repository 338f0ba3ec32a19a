//! Network side of the worker: fetching assets from the origin

use crate::cache::CachedResponse;
use crate::error::WorkerError;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Url;
use std::time::Duration;

#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Fetch `key` (a normalized path-and-query) from the network.
    /// Any HTTP status is a response; only transport failures are errors.
    async fn fetch(&self, key: &str) -> Result<CachedResponse, WorkerError>;
}

/// Fetches assets relative to a fixed origin URL
pub struct OriginFetcher {
    client: reqwest::Client,
    origin: Url,
}

impl OriginFetcher {
    pub fn new(origin: &str, timeout: Duration) -> Result<Self, WorkerError> {
        let mut origin =
            Url::parse(origin).map_err(|e| WorkerError::Config(format!("asset_origin: {}", e)))?;
        if !origin.path().ends_with('/') {
            let path = format!("{}/", origin.path());
            origin.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WorkerError::Config(e.to_string()))?;
        Ok(Self { client, origin })
    }

    pub fn resolve(&self, key: &str) -> Result<Url, WorkerError> {
        self.origin
            .join(key.trim_start_matches('/'))
            .map_err(|e| WorkerError::Fetch {
                url: key.to_string(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl AssetFetcher for OriginFetcher {
    async fn fetch(&self, key: &str) -> Result<CachedResponse, WorkerError> {
        let url = self.resolve(key)?;
        let fail = |e: reqwest::Error| WorkerError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let response = self.client.get(url.clone()).send().await.map_err(fail)?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(fail)?;

        Ok(CachedResponse {
            status,
            content_type,
            body: body.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_against_origin() {
        let fetcher = OriginFetcher::new("http://127.0.0.1:8000/app", Duration::from_secs(1)).unwrap();
        assert_eq!(fetcher.resolve("/").unwrap().as_str(), "http://127.0.0.1:8000/app/");
        assert_eq!(
            fetcher.resolve("/icons/icon-192.png").unwrap().as_str(),
            "http://127.0.0.1:8000/app/icons/icon-192.png"
        );
        assert_eq!(
            fetcher.resolve("/network.js?v=2").unwrap().as_str(),
            "http://127.0.0.1:8000/app/network.js?v=2"
        );
    }

    #[test]
    fn test_invalid_origin_rejected() {
        assert!(OriginFetcher::new("not a url", Duration::from_secs(1)).is_err());
    }
}

/*!
Test harness for QoE agent integration tests

Starts a [`StubServer`], initializes logging and offers polling helpers for
effects that happen on background tasks.
*/

use crate::stub_server::StubServer;
use anyhow::Result;
use serde_json::Value;
use std::time::Duration;

pub struct TestHarness {
    pub stub: StubServer,
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        env_logger::try_init().ok();

        let stub = StubServer::start().await?;
        Ok(Self { stub })
    }

    /// Same as [`TestHarness::new`], with the app assets served
    pub async fn with_app_assets() -> Result<Self> {
        let harness = Self::new().await?;
        harness.stub.serve_app_assets();
        Ok(harness)
    }

    /// Poll `check` every 20 ms until it returns true or `timeout_ms` elapses
    pub async fn wait_until<F>(&self, timeout_ms: u64, mut check: F) -> bool
    where
        F: FnMut(&StubServer) -> bool,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < Duration::from_millis(timeout_ms) {
            if check(&self.stub) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        log::warn!("timeout after {} ms", timeout_ms);
        check(&self.stub)
    }

    /// Wait until the push backend received `count` subscriptions
    pub async fn wait_for_subscriptions(&self, count: usize, timeout_ms: u64) -> Result<Vec<Value>> {
        if self
            .wait_until(timeout_ms, |stub| stub.subscriptions().len() >= count)
            .await
        {
            log::info!("received {} subscriptions", count);
            Ok(self.stub.subscriptions())
        } else {
            anyhow::bail!(
                "expected {} subscriptions, got {}",
                count,
                self.stub.subscriptions().len()
            );
        }
    }
}

//! Agent configuration
//!
//! Handles:
//! - Classifier, push backend and VAPID key
//! - Report cadence and probe settings
//! - Alert text and notification permission policy
//! - Summary output and the embedded offline worker

use crate::alert::{PermissionPolicy, DEFAULT_ALERT_TAG, DEFAULT_ALERT_TITLE};
use crate::error::QoeError;
use crate::models::ReportOptions;
use crate::sampler::SamplerSettings;
use anyhow::Result;
use qoe_offline_worker::WorkerConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub endpoints: EndpointsConfig,
    pub report: ReportConfig,
    pub alerts: AlertsConfig,
    pub render: RenderConfig,
    pub worker: EmbeddedWorkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointsConfig {
    pub predict_url: String,
    pub push_server_url: String,
    /// Base64url application server key
    pub vapid_public_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub interval_secs: u64,
    pub probe_count: u32,
    pub probe_delay_ms: u64,
    pub penalty_latency_ms: f64,
    pub include_packet_loss: bool,
    pub loss_trials: u32,
    /// Defaults to the classifier URL
    pub loss_probe_url: Option<String>,
    pub throughput_fallback_mbps: f64,
    /// Timed download for throughput; the link-speed hint is used without it
    pub throughput_sample_url: Option<String>,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub tag: String,
    pub title: String,
    pub permission: PermissionPolicy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Summary file; stdout when unset
    pub output_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddedWorkerConfig {
    pub enabled: bool,
    #[serde(flatten)]
    pub config: WorkerConfig,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            predict_url: "https://qoeapi.onrender.com/predict".to_string(),
            push_server_url: "https://qoepushserver.onrender.com".to_string(),
            vapid_public_key: "BJgtmyqbQNvXqZHZM6mAHkWoPJ1_fa2niOl9F_3draoZp7rgCoWRA9TIhjExgsdtBkF5fuYfhPCI0QNuTt_w7gA".to_string(),
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        let options = ReportOptions::default();
        Self {
            interval_secs: 10,
            probe_count: options.probe_count,
            probe_delay_ms: 150,
            penalty_latency_ms: 9999.0,
            include_packet_loss: options.include_packet_loss,
            loss_trials: 5,
            loss_probe_url: None,
            throughput_fallback_mbps: options.throughput_fallback_mbps,
            throughput_sample_url: None,
            request_timeout_secs: 30,
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            tag: DEFAULT_ALERT_TAG.to_string(),
            title: DEFAULT_ALERT_TITLE.to_string(),
            permission: PermissionPolicy::Ask,
        }
    }
}

impl Default for EmbeddedWorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            config: WorkerConfig::default(),
        }
    }
}

impl ReportConfig {
    pub fn options(&self) -> ReportOptions {
        ReportOptions {
            include_packet_loss: self.include_packet_loss,
            throughput_fallback_mbps: self.throughput_fallback_mbps,
            probe_count: self.probe_count,
        }
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl AgentConfig {
    /// Load config from `$QOE_AGENT_CONFIG` or the OS-specific location
    pub async fn load() -> Result<Self> {
        let config_path = Self::resolve_path()?;

        if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path).await?;
            let config: AgentConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            // First time setup - return default config
            Ok(Self::default())
        }
    }

    /// Save config to `$QOE_AGENT_CONFIG` or the OS-specific location
    pub async fn save(&self) -> Result<()> {
        let config_path = Self::resolve_path()?;

        if let Some(parent) = config_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(&config_path, content).await?;
        Ok(())
    }

    /// Get OS-specific config file path
    pub fn config_file_path() -> Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;

        path.push("qoe-agent");
        path.push("config.toml");
        Ok(path)
    }

    fn resolve_path() -> Result<PathBuf> {
        match std::env::var("QOE_AGENT_CONFIG") {
            Ok(path) => Ok(PathBuf::from(path)),
            Err(_) => Self::config_file_path(),
        }
    }

    /// Check if this is first time setup (no config file exists)
    pub fn is_first_time_setup() -> bool {
        Self::resolve_path().map(|p| !p.exists()).unwrap_or(true)
    }

    pub fn validate(&self) -> Result<(), QoeError> {
        for (name, url) in [
            ("endpoints.predict_url", &self.endpoints.predict_url),
            ("endpoints.push_server_url", &self.endpoints.push_server_url),
        ] {
            reqwest::Url::parse(url).map_err(|e| QoeError::Config(format!("{}: {}", name, e)))?;
        }
        if self.report.interval_secs == 0 {
            return Err(QoeError::Config("report.interval_secs must be positive".into()));
        }
        if self.report.throughput_fallback_mbps <= 0.0 {
            return Err(QoeError::Config(
                "report.throughput_fallback_mbps must be positive".into(),
            ));
        }
        if self.worker.enabled {
            self.worker.config.validate()?;
        }
        Ok(())
    }

    pub fn sampler_settings(&self) -> SamplerSettings {
        SamplerSettings {
            classifier_url: self.endpoints.predict_url.clone(),
            probe_delay: Duration::from_millis(self.report.probe_delay_ms),
            penalty_latency_ms: self.report.penalty_latency_ms,
            loss_probe_url: self
                .report
                .loss_probe_url
                .clone()
                .unwrap_or_else(|| self.endpoints.predict_url.clone()),
            loss_trials: self.report.loss_trials,
            throughput_sample_url: self.report.throughput_sample_url.clone(),
        }
    }
}

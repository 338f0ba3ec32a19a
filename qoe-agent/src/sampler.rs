//! Network sampler
//!
//! Measures latency and jitter against the classifier endpoint, download
//! throughput (timed download or link-speed hint) and a rough loss rate.
//!
//! The loss figure is the share of failed HTTP requests. A failed request is
//! not a lost packet, and TCP retransmits hide real loss from a request that
//! eventually succeeds, so treat it as a coarse signal only.

use crate::models::{LatencyStats, Measurement, ReportOptions, ThroughputReading};
use crate::transport::Transport;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Query the latency probes send to the classifier
pub const PROBE_QUERY: &str = "throughput=1&delay=1&jitter=1&loss=0";

/// Platform hint for the downlink speed, in Mbps
pub trait LinkSpeedHint: Send + Sync {
    fn downlink_mbps(&self) -> Option<f64>;
}

/// Fastest advertised speed of an up, non-loopback interface (Linux sysfs)
pub struct SysfsLinkSpeed;

impl LinkSpeedHint for SysfsLinkSpeed {
    fn downlink_mbps(&self) -> Option<f64> {
        let interfaces = match if_addrs::get_if_addrs() {
            Ok(interfaces) => interfaces,
            Err(e) => {
                debug!("could not enumerate interfaces: {}", e);
                return None;
            }
        };

        interfaces
            .iter()
            .filter(|iface| !iface.is_loopback())
            .filter_map(|iface| read_link_speed(&iface.name))
            .fold(None, |best: Option<f64>, speed| {
                Some(best.map_or(speed, |b| b.max(speed)))
            })
    }
}

#[cfg(target_os = "linux")]
fn read_link_speed(name: &str) -> Option<f64> {
    let base = std::path::Path::new("/sys/class/net").join(name);
    let operstate = std::fs::read_to_string(base.join("operstate")).ok()?;
    if operstate.trim() != "up" {
        return None;
    }
    // -1 on links that do not report a speed
    let speed: i64 = std::fs::read_to_string(base.join("speed"))
        .ok()?
        .trim()
        .parse()
        .ok()?;
    (speed > 0).then_some(speed as f64)
}

#[cfg(not(target_os = "linux"))]
fn read_link_speed(_name: &str) -> Option<f64> {
    None
}

/// Constant hint, for hosts without sysfs and for tests
pub struct FixedLinkSpeed(pub Option<f64>);

impl LinkSpeedHint for FixedLinkSpeed {
    fn downlink_mbps(&self) -> Option<f64> {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct SamplerSettings {
    pub classifier_url: String,
    pub probe_delay: Duration,
    /// Recorded for a probe that failed
    pub penalty_latency_ms: f64,
    pub loss_probe_url: String,
    pub loss_trials: u32,
    pub throughput_sample_url: Option<String>,
}

pub struct Sampler {
    transport: Arc<dyn Transport>,
    link_speed: Arc<dyn LinkSpeedHint>,
    settings: SamplerSettings,
}

impl Sampler {
    pub fn new(
        transport: Arc<dyn Transport>,
        link_speed: Arc<dyn LinkSpeedHint>,
        settings: SamplerSettings,
    ) -> Self {
        Self {
            transport,
            link_speed,
            settings,
        }
    }

    /// Sequential round trips to the classifier. Never fails: a failed probe
    /// counts as the penalty latency.
    pub async fn measure_latency(&self, repetitions: u32) -> LatencyStats {
        let repetitions = repetitions.max(1);
        let url = append_query(&self.settings.classifier_url, PROBE_QUERY);
        let mut samples = Vec::with_capacity(repetitions as usize);

        for i in 0..repetitions {
            if i > 0 {
                tokio::time::sleep(self.settings.probe_delay).await;
            }
            let start = Instant::now();
            match self.transport.get(&url).await {
                Ok(_) => samples.push(start.elapsed().as_secs_f64() * 1000.0),
                Err(e) => {
                    debug!("latency probe failed: {}", e);
                    samples.push(self.settings.penalty_latency_ms);
                }
            }
        }

        LatencyStats::from_samples(&samples)
    }

    pub async fn measure_throughput(&self, sample_url: Option<&str>) -> ThroughputReading {
        let Some(url) = sample_url else {
            return ThroughputReading {
                download_mbps: self.link_speed.downlink_mbps(),
                error: None,
            };
        };

        let start = Instant::now();
        let result = self.transport.get(url).await;
        let seconds = start.elapsed().as_secs_f64().max(0.001);

        match result {
            Ok(response) if response.is_success() => {
                let bits = (response.body.len() * 8) as f64;
                ThroughputReading {
                    download_mbps: Some(bits / seconds / (1024.0 * 1024.0)),
                    error: None,
                }
            }
            Ok(response) => ThroughputReading {
                download_mbps: None,
                error: Some(format!("{} returned status {}", url, response.status)),
            },
            Err(e) => ThroughputReading {
                download_mbps: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// Percentage of `trials` requests to `url` that failed or returned a
    /// non-success status
    pub async fn estimate_packet_loss(&self, url: &str, trials: u32) -> f64 {
        let trials = trials.max(1);
        let mut failed = 0u32;
        for _ in 0..trials {
            match self.transport.get(url).await {
                Ok(response) if response.is_success() => {}
                _ => failed += 1,
            }
        }
        100.0 * failed as f64 / trials as f64
    }

    /// Latency, then throughput, then (if enabled) loss
    pub async fn sample(&self, options: &ReportOptions) -> Measurement {
        let latency = self.measure_latency(options.probe_count).await;

        let throughput = self
            .measure_throughput(self.settings.throughput_sample_url.as_deref())
            .await;
        if let Some(error) = &throughput.error {
            warn!("throughput unknown: {}", error);
        }

        let loss_percent = if options.include_packet_loss {
            Some(
                self.estimate_packet_loss(&self.settings.loss_probe_url, self.settings.loss_trials)
                    .await,
            )
        } else {
            None
        };

        Measurement {
            avg_latency_ms: latency.avg_latency_ms,
            jitter_ms: latency.jitter_ms,
            throughput_mbps: throughput.download_mbps.filter(|t| *t > 0.0),
            loss_percent,
            sampled_at: Utc::now(),
        }
    }
}

/// Append `query` to `url`, joining with `&` when it already has a query
pub fn append_query(url: &str, query: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}", url, separator, query)
}

//! Measurement and classification data

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One cycle's network measurement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    pub avg_latency_ms: f64,
    pub jitter_ms: f64,
    /// None when no throughput reading was available
    pub throughput_mbps: Option<f64>,
    /// None when loss is not measured
    pub loss_percent: Option<f64>,
    pub sampled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyStats {
    pub avg_latency_ms: f64,
    pub jitter_ms: f64,
}

impl LatencyStats {
    /// Mean and population standard deviation of `samples`
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self {
                avg_latency_ms: 0.0,
                jitter_ms: 0.0,
            };
        }
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let variance = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
        Self {
            avg_latency_ms: mean,
            jitter_ms: variance.sqrt(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThroughputReading {
    pub download_mbps: Option<f64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum QoeLabel {
    Good,
    Fair,
    Poor,
    Bad,
    Unknown,
}

impl QoeLabel {
    /// Case-insensitive match of a classifier prediction
    pub fn from_prediction(prediction: &str) -> Self {
        match prediction.trim().to_ascii_lowercase().as_str() {
            "good" => QoeLabel::Good,
            "fair" => QoeLabel::Fair,
            "poor" => QoeLabel::Poor,
            "bad" => QoeLabel::Bad,
            _ => QoeLabel::Unknown,
        }
    }

    pub fn warrants_alert(self) -> bool {
        matches!(self, QoeLabel::Poor | QoeLabel::Bad)
    }
}

impl fmt::Display for QoeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            QoeLabel::Good => "Good",
            QoeLabel::Fair => "Fair",
            QoeLabel::Poor => "Poor",
            QoeLabel::Bad => "Bad",
            QoeLabel::Unknown => "Unknown",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QoeResult {
    pub label: QoeLabel,
    pub raw: Measurement,
}

/// Per-cycle sampling and reporting options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportOptions {
    pub include_packet_loss: bool,
    /// Sent to the classifier when throughput is unknown
    pub throughput_fallback_mbps: f64,
    pub probe_count: u32,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            include_packet_loss: true,
            throughput_fallback_mbps: 5.0,
            probe_count: 4,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_variance_has_zero_jitter() {
        let stats = LatencyStats::from_samples(&[42.0, 42.0, 42.0, 42.0]);
        assert_eq!(stats.avg_latency_ms, 42.0);
        assert_eq!(stats.jitter_ms, 0.0);
    }

    #[test]
    fn test_population_std_dev() {
        let stats = LatencyStats::from_samples(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(stats.avg_latency_ms, 5.0);
        assert_eq!(stats.jitter_ms, 2.0);
    }

    #[test]
    fn test_label_matching() {
        assert_eq!(QoeLabel::from_prediction("Poor"), QoeLabel::Poor);
        assert_eq!(QoeLabel::from_prediction("BAD"), QoeLabel::Bad);
        assert_eq!(QoeLabel::from_prediction(" good "), QoeLabel::Good);
        assert_eq!(QoeLabel::from_prediction("excellent"), QoeLabel::Unknown);
        assert!(QoeLabel::Poor.warrants_alert());
        assert!(QoeLabel::Bad.warrants_alert());
        assert!(!QoeLabel::Fair.warrants_alert());
        assert!(!QoeLabel::Unknown.warrants_alert());
        assert_eq!(QoeLabel::Fair.to_string(), "Fair");
    }
}

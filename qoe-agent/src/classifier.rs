//! Remote QoE classifier client

use crate::models::{Measurement, QoeLabel, QoeResult};
use crate::sampler::append_query;
use crate::transport::Transport;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Values as sent to the classifier and shown to the user
#[derive(Debug, Clone, PartialEq)]
pub struct ReportedValues {
    pub throughput_mbps: f64,
    pub delay_ms: i64,
    pub jitter_ms: i64,
    pub loss_percent: Option<f64>,
}

impl ReportedValues {
    pub fn from_measurement(measurement: &Measurement, throughput_fallback_mbps: f64) -> Self {
        Self {
            throughput_mbps: measurement
                .throughput_mbps
                .filter(|t| *t > 0.0)
                .unwrap_or(throughput_fallback_mbps),
            delay_ms: measurement.avg_latency_ms.round() as i64,
            jitter_ms: measurement.jitter_ms.round() as i64,
            loss_percent: measurement.loss_percent,
        }
    }

    /// `?throughput=..&delay=..&jitter=..&loss=..`; unmeasured loss is sent as 0
    pub fn query_string(&self) -> String {
        format!(
            "?throughput={:.2}&delay={}&jitter={}&loss={:.1}",
            self.throughput_mbps,
            self.delay_ms,
            self.jitter_ms,
            self.loss_percent.unwrap_or(0.0)
        )
    }
}

#[derive(Debug, Deserialize)]
struct PredictionBody {
    prediction: Option<String>,
    predicted: Option<String>,
}

/// Label from a classifier response body: `prediction`, else `predicted`
pub fn label_from_body(body: &[u8]) -> Option<QoeLabel> {
    let parsed: PredictionBody = serde_json::from_slice(body).ok()?;
    let raw = parsed
        .prediction
        .filter(|p| !p.is_empty())
        .or(parsed.predicted.filter(|p| !p.is_empty()))?;
    Some(QoeLabel::from_prediction(&raw))
}

pub struct ClassifierClient {
    transport: Arc<dyn Transport>,
    predict_url: String,
    throughput_fallback_mbps: f64,
}

impl ClassifierClient {
    pub fn new(transport: Arc<dyn Transport>, predict_url: &str, throughput_fallback_mbps: f64) -> Self {
        Self {
            transport,
            predict_url: predict_url.to_string(),
            throughput_fallback_mbps,
        }
    }

    pub fn reported_values(&self, measurement: &Measurement) -> ReportedValues {
        ReportedValues::from_measurement(measurement, self.throughput_fallback_mbps)
    }

    /// Classify a measurement. Any failure yields `Unknown`.
    pub async fn classify(&self, measurement: &Measurement) -> QoeResult {
        let query = self.reported_values(measurement).query_string();
        let url = append_query(&self.predict_url, query.trim_start_matches('?'));

        let label = match self.transport.get(&url).await {
            Ok(response) if response.is_success() => match label_from_body(&response.body) {
                Some(label) => label,
                None => {
                    warn!(
                        "classifier response has no usable label: {}",
                        String::from_utf8_lossy(&response.body)
                    );
                    QoeLabel::Unknown
                }
            },
            Ok(response) => {
                warn!("classifier returned status {}", response.status);
                QoeLabel::Unknown
            }
            Err(e) => {
                warn!("classifier unreachable: {}", e);
                QoeLabel::Unknown
            }
        };
        debug!("classified {} as {}", query, label);

        QoeResult {
            label,
            raw: measurement.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::ScriptedTransport;
    use chrono::Utc;

    fn measurement(throughput: Option<f64>, loss: Option<f64>) -> Measurement {
        Measurement {
            avg_latency_ms: 50.0,
            jitter_ms: 5.0,
            throughput_mbps: throughput,
            loss_percent: loss,
            sampled_at: Utc::now(),
        }
    }

    #[test]
    fn test_query_string() {
        let values = ReportedValues::from_measurement(&measurement(Some(12.34), Some(2.0)), 5.0);
        assert_eq!(
            values.query_string(),
            "?throughput=12.34&delay=50&jitter=5&loss=2.0"
        );
    }

    #[test]
    fn test_unknown_throughput_and_loss_use_fallbacks() {
        let values = ReportedValues::from_measurement(&measurement(None, None), 5.0);
        assert_eq!(values.query_string(), "?throughput=5.00&delay=50&jitter=5&loss=0.0");
    }

    #[test]
    fn test_delay_and_jitter_are_rounded() {
        let mut m = measurement(Some(1.0), Some(0.0));
        m.avg_latency_ms = 49.6;
        m.jitter_ms = 4.4;
        let values = ReportedValues::from_measurement(&m, 5.0);
        assert_eq!(values.delay_ms, 50);
        assert_eq!(values.jitter_ms, 4);
    }

    #[test]
    fn test_label_from_body() {
        assert_eq!(label_from_body(br#"{"prediction":"Poor"}"#), Some(QoeLabel::Poor));
        assert_eq!(label_from_body(br#"{"predicted":"good"}"#), Some(QoeLabel::Good));
        assert_eq!(
            label_from_body(br#"{"prediction":"","predicted":"Bad"}"#),
            Some(QoeLabel::Bad)
        );
        assert_eq!(label_from_body(br#"{"prediction":"Stellar"}"#), Some(QoeLabel::Unknown));
        assert_eq!(label_from_body(br#"{"status":"ok"}"#), None);
        assert_eq!(label_from_body(b"<html>"), None);
    }

    #[tokio::test]
    async fn test_classify_sends_query() {
        let transport = Arc::new(ScriptedTransport::new().respond(200, r#"{"prediction":"Poor"}"#));
        let client = ClassifierClient::new(transport.clone(), "http://classifier/predict", 5.0);

        let result = client.classify(&measurement(Some(12.34), Some(2.0))).await;
        assert_eq!(result.label, QoeLabel::Poor);
        assert_eq!(
            transport.requests(),
            vec!["http://classifier/predict?throughput=12.34&delay=50&jitter=5&loss=2.0".to_string()]
        );
    }

    #[tokio::test]
    async fn test_classify_failures_are_unknown() {
        for transport in [
            ScriptedTransport::new().respond(200, r#"{"status":"ok"}"#),
            ScriptedTransport::new().respond(502, r#"{"prediction":"Poor"}"#),
            ScriptedTransport::new().respond(200, "not json"),
            ScriptedTransport::new().fail(),
        ] {
            let client = ClassifierClient::new(Arc::new(transport), "http://classifier/predict", 5.0);
            let result = client.classify(&measurement(None, None)).await;
            assert_eq!(result.label, QoeLabel::Unknown);
        }
    }
}

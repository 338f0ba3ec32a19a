//! Summary rendering and output sinks

use crate::classifier::ReportedValues;
use crate::models::QoeLabel;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::PathBuf;

/// Human-readable summary; the loss line is left out when loss was not measured
pub fn format_summary(label: QoeLabel, values: &ReportedValues) -> String {
    let mut summary = format!(
        "Predicted QoE: {}\nThroughput: {:.2} Mbps\nDelay: {} ms\nJitter: {} ms",
        label, values.throughput_mbps, values.delay_ms, values.jitter_ms
    );
    if let Some(loss) = values.loss_percent {
        summary.push_str(&format!("\nPacket Loss: {:.1}%", loss));
    }
    summary
}

/// Where the latest summary is shown. Each render replaces the previous one.
#[async_trait]
pub trait RenderSink: Send + Sync {
    async fn render(&self, summary: &str) -> std::io::Result<()>;
}

/// Writes the summary to a file, replacing it atomically
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RenderSink for FileSink {
    async fn render(&self, summary: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        tokio::fs::write(&tmp, summary).await?;
        tokio::fs::rename(&tmp, &self.path).await
    }
}

/// Prints the summary to stdout
pub struct ConsoleSink;

#[async_trait]
impl RenderSink for ConsoleSink {
    async fn render(&self, summary: &str) -> std::io::Result<()> {
        println!("{}\n", summary);
        Ok(())
    }
}

/// Keeps the latest summary in memory
#[derive(Default)]
pub struct MemorySink {
    latest: Mutex<Option<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest(&self) -> Option<String> {
        self.latest.lock().clone()
    }
}

#[async_trait]
impl RenderSink for MemorySink {
    async fn render(&self, summary: &str) -> std::io::Result<()> {
        *self.latest.lock() = Some(summary.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(loss: Option<f64>) -> ReportedValues {
        ReportedValues {
            throughput_mbps: 12.34,
            delay_ms: 50,
            jitter_ms: 5,
            loss_percent: loss,
        }
    }

    #[test]
    fn test_summary_format() {
        assert_eq!(
            format_summary(QoeLabel::Poor, &values(Some(2.0))),
            "Predicted QoE: Poor\nThroughput: 12.34 Mbps\nDelay: 50 ms\nJitter: 5 ms\nPacket Loss: 2.0%"
        );
        assert_eq!(
            format_summary(QoeLabel::Unknown, &values(None)),
            "Predicted QoE: Unknown\nThroughput: 12.34 Mbps\nDelay: 50 ms\nJitter: 5 ms"
        );
    }

    #[tokio::test]
    async fn test_file_sink_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("qoe.txt");
        let sink = FileSink::new(&path);

        sink.render("first").await.unwrap();
        sink.render("second").await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "second");
    }
}

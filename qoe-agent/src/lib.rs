//! QoE Agent - client-side network quality telemetry
//!
//! The agent:
//! - Samples latency, jitter, throughput and a rough loss rate
//! - Asks a remote classifier for a QoE label (Good, Fair, Poor, Bad)
//! - Renders a summary and alerts on Poor or Bad QoE
//! - Registers for push notifications through the embedded offline worker

pub mod agent;
pub mod alert;
pub mod classifier;
pub mod codec;
pub mod config;
pub mod error;
pub mod models;
pub mod platform;
pub mod push;
pub mod render;
pub mod report;
pub mod sampler;
pub mod transport;

pub use agent::{Agent, AgentParts};
pub use config::AgentConfig;
pub use error::QoeError;
pub use models::{Measurement, QoeLabel, QoeResult, ReportOptions};

//! Report loop
//!
//! One cycle right away, then one per interval: sample, classify, render,
//! alert. Each cycle runs in its own task, so a slow cycle may overlap the
//! next one. A failed cycle is logged and the next tick is the retry.

use crate::alert::{AlertDispatcher, AlertOutcome, AlertState};
use crate::classifier::ClassifierClient;
use crate::error::QoeError;
use crate::models::{QoeResult, ReportOptions};
use crate::render::{format_summary, RenderSink};
use crate::sampler::Sampler;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info};

/// What one cycle produced
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub result: QoeResult,
    pub summary: String,
    pub alert: AlertOutcome,
}

pub struct ReportLoop {
    sampler: Sampler,
    classifier: ClassifierClient,
    sink: Arc<dyn RenderSink>,
    dispatcher: AlertDispatcher,
    options: ReportOptions,
    period: Duration,
    alert_state: Mutex<AlertState>,
}

impl ReportLoop {
    pub fn new(
        sampler: Sampler,
        classifier: ClassifierClient,
        sink: Arc<dyn RenderSink>,
        dispatcher: AlertDispatcher,
        options: ReportOptions,
        period: Duration,
    ) -> Self {
        Self {
            sampler,
            classifier,
            sink,
            dispatcher,
            options,
            period,
            alert_state: Mutex::new(AlertState::default()),
        }
    }

    pub async fn alert_state(&self) -> AlertState {
        self.alert_state.lock().await.clone()
    }

    /// Sample, classify, render and alert once
    pub async fn run_cycle(&self) -> Result<CycleReport, QoeError> {
        let measurement = self.sampler.sample(&self.options).await;
        let result = self.classifier.classify(&measurement).await;

        let values = self.classifier.reported_values(&measurement);
        let summary = format_summary(result.label, &values);
        self.sink.render(&summary).await?;

        let alert = {
            let mut state = self.alert_state.lock().await;
            self.dispatcher
                .maybe_alert(&mut state, &result, &summary)
                .await
        };
        info!("QoE {} ({:?})", result.label, alert);

        Ok(CycleReport {
            result,
            summary,
            alert,
        })
    }

    /// Run cycles forever. The first tick fires immediately.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("report loop started (every {:?})", self.period);

        loop {
            ticker.tick().await;
            let this = self.clone();
            tokio::spawn(async move {
                match this.run_cycle().await {
                    Ok(report) => debug!("cycle done: {:?}", report.result.label),
                    Err(e) => error!("report cycle failed: {}", e),
                }
            });
        }
    }
}

//! Agent wiring: builds the report loop and push registration from config

use crate::alert::{AlertDispatcher, NotificationChannel};
use crate::classifier::ClassifierClient;
use crate::config::AgentConfig;
use crate::error::QoeError;
use crate::platform::{DirectNotifier, EmbeddedWorker};
use crate::push::{PushRegistrar, WorkerContainer};
use crate::render::{ConsoleSink, FileSink, RenderSink};
use crate::report::ReportLoop;
use crate::sampler::{LinkSpeedHint, Sampler, SysfsLinkSpeed};
use crate::transport::{HttpTransport, Transport};
use std::sync::Arc;
use tracing::info;

/// Platform pieces the agent runs on
pub struct AgentParts {
    pub transport: Arc<dyn Transport>,
    pub link_speed: Arc<dyn LinkSpeedHint>,
    pub sink: Arc<dyn RenderSink>,
    pub worker: Option<Arc<EmbeddedWorker>>,
    pub direct: Option<Arc<dyn NotificationChannel>>,
}

impl AgentParts {
    pub async fn from_config(config: &AgentConfig) -> Result<Self, QoeError> {
        let transport = HttpTransport::new(config.report.request_timeout())
            .map_err(|e| QoeError::Config(e.to_string()))?;
        let sink: Arc<dyn RenderSink> = match &config.render.output_path {
            Some(path) => Arc::new(FileSink::new(path)),
            None => Arc::new(ConsoleSink),
        };
        let worker = config
            .worker
            .enabled
            .then(|| Arc::new(EmbeddedWorker::new(config.worker.config.clone())));

        Ok(Self {
            transport: Arc::new(transport),
            link_speed: Arc::new(SysfsLinkSpeed),
            sink,
            worker,
            direct: Some(Arc::new(DirectNotifier::desktop().await)),
        })
    }
}

pub struct Agent {
    report_loop: Arc<ReportLoop>,
    registrar: PushRegistrar,
}

impl Agent {
    pub async fn new(config: &AgentConfig) -> Result<Self, QoeError> {
        Self::with_parts(config, AgentParts::from_config(config).await?)
    }

    pub fn with_parts(config: &AgentConfig, parts: AgentParts) -> Result<Self, QoeError> {
        config.validate()?;

        let sampler = Sampler::new(
            parts.transport.clone(),
            parts.link_speed,
            config.sampler_settings(),
        );
        let classifier = ClassifierClient::new(
            parts.transport.clone(),
            &config.endpoints.predict_url,
            config.report.throughput_fallback_mbps,
        );

        let mut dispatcher = AlertDispatcher::new(Arc::new(config.alerts.permission))
            .with_text(&config.alerts.tag, &config.alerts.title);
        if let Some(worker) = &parts.worker {
            dispatcher = dispatcher.with_worker(worker.clone());
        }
        if let Some(direct) = parts.direct {
            dispatcher = dispatcher.with_direct(direct);
        }

        let report_loop = Arc::new(ReportLoop::new(
            sampler,
            classifier,
            parts.sink,
            dispatcher,
            config.report.options(),
            config.report.period(),
        ));

        let container = parts
            .worker
            .map(|worker| worker as Arc<dyn WorkerContainer>);
        let registrar = PushRegistrar::new(
            container,
            parts.transport,
            &config.endpoints.push_server_url,
            &config.endpoints.vapid_public_key,
        );

        Ok(Self {
            report_loop,
            registrar,
        })
    }

    pub fn report_loop(&self) -> Arc<ReportLoop> {
        self.report_loop.clone()
    }

    pub fn registrar(&self) -> &PushRegistrar {
        &self.registrar
    }

    /// Push registration in the background, the report loop in the foreground
    pub async fn run(self) {
        info!("Starting agent main loop...");
        let registrar = self.registrar;
        tokio::spawn(async move { registrar.run().await });
        self.report_loop.run().await;
    }
}

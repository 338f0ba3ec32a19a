//! Worker host
//!
//! The host is a single task that owns the [`CacheState`] and the client
//! registry. Everything else talks to it through [`WorkerHandle`], which sends
//! [`WorkerCommand`]s over an mpsc channel and observes the lifecycle through a
//! watch channel. Slow work (precaching, answering fetches) runs in spawned
//! tasks so the host keeps serving commands while an install is in flight.

use crate::cache::{normalize_key, CacheStorage, CachedResponse};
use crate::clients::{ClientId, ClientMessage, ClientRegistry};
use crate::error::WorkerError;
use crate::events::{handle, Action, CacheState, FetchPlan, WorkerEvent};
use crate::fetcher::AssetFetcher;
use crate::lifecycle::Lifecycle;
use crate::notify::{NotificationRequest, NotificationSink};
use crate::opener::WindowOpener;
use crate::subscription::{PushSubscription, SubscriptionStore};
use futures::future::try_join_all;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

const COMMAND_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchSource {
    Network,
    Cache,
    /// Neither the network nor the cache could answer
    Unavailable,
}

#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub source: FetchSource,
    pub response: CachedResponse,
}

impl FetchOutcome {
    fn unavailable() -> Self {
        Self {
            source: FetchSource::Unavailable,
            response: CachedResponse {
                status: 503,
                content_type: Some("text/plain; charset=utf-8".to_string()),
                body: b"offline and not cached".to_vec(),
            },
        }
    }
}

pub enum WorkerCommand {
    Fetch {
        key: String,
        reply: oneshot::Sender<FetchOutcome>,
    },
    Push {
        data: Option<Vec<u8>>,
    },
    NotificationClick {
        tag: String,
    },
    ShowNotification {
        request: NotificationRequest,
        reply: oneshot::Sender<Result<(), WorkerError>>,
    },
    Subscribe {
        application_server_key: Vec<u8>,
        reply: oneshot::Sender<Result<PushSubscription, WorkerError>>,
    },
    Attach {
        tx: mpsc::UnboundedSender<ClientMessage>,
        reply: oneshot::Sender<ClientId>,
    },
    Detach {
        id: ClientId,
    },
}

/// Platform services the host acts through
pub struct WorkerDeps {
    pub storage: Arc<dyn CacheStorage>,
    pub fetcher: Arc<dyn AssetFetcher>,
    pub sink: Arc<dyn NotificationSink>,
    pub opener: Arc<dyn WindowOpener>,
    pub subscriptions: SubscriptionStore,
}

/// Start the host task and begin installing
pub fn spawn_host(state: CacheState, public_url: String, deps: WorkerDeps) -> WorkerHandle {
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
    let (lifecycle_tx, lifecycle_rx) = watch::channel(state.lifecycle);
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let host = WorkerHost {
        state,
        deps,
        clients: ClientRegistry::new(),
        public_url: public_url.clone(),
        lifecycle_tx,
        events_tx,
    };
    tokio::spawn(host.run(commands_rx, events_rx));

    WorkerHandle {
        commands: commands_tx,
        lifecycle: lifecycle_rx,
        public_url,
    }
}

struct WorkerHost {
    state: CacheState,
    deps: WorkerDeps,
    clients: ClientRegistry,
    public_url: String,
    lifecycle_tx: watch::Sender<Lifecycle>,
    /// Completion events from spawned tasks
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl WorkerHost {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<WorkerCommand>,
        mut events: mpsc::UnboundedReceiver<WorkerEvent>,
    ) {
        info!("offline worker starting (cache: {})", self.state.manifest.generation);
        self.dispatch(WorkerEvent::Install).await;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command).await,
                    None => break,
                },
                Some(event) = events.recv() => {
                    self.dispatch(event).await;
                }
            }
        }
        debug!("offline worker stopped");
    }

    async fn on_command(&mut self, command: WorkerCommand) {
        match command {
            WorkerCommand::Fetch { key, reply } => {
                let plans = self.dispatch(WorkerEvent::Fetch { key }).await;
                let Some(plan) = plans.into_iter().next() else {
                    let _ = reply.send(FetchOutcome::unavailable());
                    return;
                };
                let storage = self.deps.storage.clone();
                let fetcher = self.deps.fetcher.clone();
                tokio::spawn(async move {
                    let outcome = respond(plan, storage.as_ref(), fetcher.as_ref()).await;
                    let _ = reply.send(outcome);
                });
            }
            WorkerCommand::Push { data } => {
                self.dispatch(WorkerEvent::Push { data }).await;
            }
            WorkerCommand::NotificationClick { tag } => {
                let clients = self.clients.ids();
                self.dispatch(WorkerEvent::NotificationClick { tag, clients })
                    .await;
            }
            WorkerCommand::ShowNotification { request, reply } => {
                let result = if self.state.lifecycle.is_active() {
                    show(self.deps.sink.clone(), request).await
                } else {
                    Err(WorkerError::NotActive(self.state.lifecycle))
                };
                let _ = reply.send(result);
            }
            WorkerCommand::Subscribe {
                application_server_key,
                reply,
            } => {
                let result = if self.state.lifecycle.is_active() {
                    let endpoint = format!("{}push", self.public_url);
                    self.deps
                        .subscriptions
                        .subscribe(&endpoint, &application_server_key)
                        .await
                } else {
                    Err(WorkerError::NotActive(self.state.lifecycle))
                };
                let _ = reply.send(result);
            }
            WorkerCommand::Attach { tx, reply } => {
                let id = self.clients.attach(tx, self.state.lifecycle.is_active());
                let _ = reply.send(id);
            }
            WorkerCommand::Detach { id } => self.clients.detach(id),
        }
    }

    /// Run an event and everything it triggers. Returns the fetch plans to answer.
    async fn dispatch(&mut self, event: WorkerEvent) -> Vec<FetchPlan> {
        let mut queue = VecDeque::from([event]);
        let mut plans = Vec::new();

        while let Some(event) = queue.pop_front() {
            if let WorkerEvent::InstallFailed { reason } = &event {
                error!("{}", reason);
            }
            let (actions, next) = handle(&event, &self.state);
            self.set_state(next);

            for action in actions {
                if let Action::Respond(plan) = action {
                    plans.push(plan);
                } else if let Some(follow_up) = self.execute(action).await {
                    queue.push_back(follow_up);
                }
            }
        }
        plans
    }

    fn set_state(&mut self, next: CacheState) {
        if next.lifecycle != self.state.lifecycle {
            info!("offline worker {:?} -> {:?}", self.state.lifecycle, next.lifecycle);
            self.lifecycle_tx.send_replace(next.lifecycle);
        }
        self.state = next;
    }

    async fn execute(&mut self, action: Action) -> Option<WorkerEvent> {
        match action {
            Action::Precache { generation, assets } => {
                let storage = self.deps.storage.clone();
                let fetcher = self.deps.fetcher.clone();
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    let event = match precache(storage.as_ref(), fetcher.as_ref(), &generation, &assets).await {
                        Ok(count) => {
                            info!("cached {} assets into {}", count, generation);
                            WorkerEvent::InstallSucceeded
                        }
                        Err(e) => WorkerEvent::InstallFailed {
                            reason: e.to_string(),
                        },
                    };
                    let _ = events.send(event);
                });
                None
            }
            Action::SkipWaiting => {
                // activation must see every generation on disk, not only ours
                match self.deps.storage.keys().await {
                    Ok(keys) => self.state.generations.extend(keys),
                    Err(e) => warn!("could not list cache generations: {}", e),
                }
                Some(WorkerEvent::Activate)
            }
            Action::DeleteGeneration(generation) => {
                match self.deps.storage.delete(&generation).await {
                    Ok(_) => info!("deleted stale cache generation {}", generation),
                    Err(e) => warn!("could not delete cache generation {}: {}", generation, e),
                }
                None
            }
            Action::ClaimClients => {
                let claimed = self.clients.claim();
                debug!("claimed {} clients", claimed);
                Some(WorkerEvent::Activated)
            }
            Action::ShowNotification(request) => {
                if let Err(e) = show(self.deps.sink.clone(), request).await {
                    warn!("push notification not shown: {}", e);
                }
                None
            }
            Action::CloseNotification { tag } => {
                if let Err(e) = self.deps.sink.close(&tag) {
                    warn!("could not close notification {}: {}", tag, e);
                }
                None
            }
            Action::FocusClient(id) => {
                if !self.clients.focus(id) {
                    warn!("client {} went away before it could be focused", id);
                }
                None
            }
            Action::OpenWindow { url } => {
                match reqwest::Url::parse(&self.public_url).and_then(|base| base.join(&url)) {
                    Ok(target) => {
                        // the opener may run as long as the window does
                        let opener = self.deps.opener.clone();
                        tokio::spawn(async move {
                            if let Err(e) = opener.open(target.as_str()).await {
                                warn!("could not open {}: {}", target, e);
                            }
                        });
                    }
                    Err(e) => warn!("invalid window url {}: {}", url, e),
                }
                None
            }
            Action::Respond(_) => None,
        }
    }
}

/// Fetch every asset concurrently and store them only if all succeeded
async fn precache(
    storage: &dyn CacheStorage,
    fetcher: &dyn AssetFetcher,
    generation: &str,
    assets: &[String],
) -> Result<usize, WorkerError> {
    let fetches = assets.iter().map(|asset| async move {
        let response = fetcher.fetch(&normalize_key(asset)).await?;
        if !response.is_success() {
            return Err(WorkerError::CacheInstall(format!(
                "{} returned status {}",
                asset, response.status
            )));
        }
        Ok((asset.clone(), response))
    });
    let entries = try_join_all(fetches).await?;
    let count = entries.len();
    storage.put_all(generation, entries).await?;
    Ok(count)
}

async fn respond(
    plan: FetchPlan,
    storage: &dyn CacheStorage,
    fetcher: &dyn AssetFetcher,
) -> FetchOutcome {
    match plan {
        FetchPlan::NetworkOnly { key } => match fetcher.fetch(&key).await {
            Ok(response) => FetchOutcome {
                source: FetchSource::Network,
                response,
            },
            Err(e) => {
                debug!("network fetch failed: {}", e);
                FetchOutcome::unavailable()
            }
        },
        FetchPlan::NetworkFirst { key, generation } => {
            let error = match fetcher.fetch(&key).await {
                Ok(response) => {
                    return FetchOutcome {
                        source: FetchSource::Network,
                        response,
                    }
                }
                Err(e) => e,
            };
            debug!("network fetch failed, trying cache: {}", error);
            match storage.lookup(&generation, &key).await {
                Ok(Some(response)) => FetchOutcome {
                    source: FetchSource::Cache,
                    response,
                },
                Ok(None) => FetchOutcome::unavailable(),
                Err(e) => {
                    warn!("cache lookup for {} failed: {}", key, e);
                    FetchOutcome::unavailable()
                }
            }
        }
    }
}

async fn show(
    sink: Arc<dyn NotificationSink>,
    request: NotificationRequest,
) -> Result<(), WorkerError> {
    tokio::task::spawn_blocking(move || sink.show(&request))
        .await
        .map_err(|e| WorkerError::Notification(e.to_string()))?
}

/// Cloneable handle to a running worker
#[derive(Clone)]
pub struct WorkerHandle {
    commands: mpsc::Sender<WorkerCommand>,
    lifecycle: watch::Receiver<Lifecycle>,
    public_url: String,
}

impl WorkerHandle {
    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.lifecycle().is_active()
    }

    pub fn public_url(&self) -> &str {
        &self.public_url
    }

    /// Wait until the worker is activated. Fails if the install failed.
    pub async fn ready(&self) -> Result<(), WorkerError> {
        let mut lifecycle = self.lifecycle.clone();
        let state = *lifecycle
            .wait_for(|s| matches!(s, Lifecycle::Activated | Lifecycle::Redundant))
            .await
            .map_err(|_| WorkerError::Stopped)?;
        if state.is_active() {
            Ok(())
        } else {
            Err(WorkerError::NotActive(state))
        }
    }

    async fn send(&self, command: WorkerCommand) -> Result<(), WorkerError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| WorkerError::Stopped)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> WorkerCommand,
    ) -> Result<T, WorkerError> {
        let (reply, rx) = oneshot::channel();
        self.send(command(reply)).await?;
        rx.await.map_err(|_| WorkerError::Stopped)
    }

    pub async fn fetch(&self, path: &str) -> Result<FetchOutcome, WorkerError> {
        let key = normalize_key(path);
        self.request(|reply| WorkerCommand::Fetch { key, reply }).await
    }

    pub async fn push(&self, data: Option<Vec<u8>>) -> Result<(), WorkerError> {
        self.send(WorkerCommand::Push { data }).await
    }

    pub async fn notification_click(&self, tag: &str) -> Result<(), WorkerError> {
        self.send(WorkerCommand::NotificationClick {
            tag: tag.to_string(),
        })
        .await
    }

    pub async fn show_notification(&self, request: NotificationRequest) -> Result<(), WorkerError> {
        self.request(|reply| WorkerCommand::ShowNotification { request, reply })
            .await?
    }

    pub async fn subscribe(
        &self,
        application_server_key: &[u8],
    ) -> Result<PushSubscription, WorkerError> {
        let application_server_key = application_server_key.to_vec();
        self.request(|reply| WorkerCommand::Subscribe {
            application_server_key,
            reply,
        })
        .await?
    }

    /// Attach a client. The receiver gets `Controlled` and `Focus` messages.
    pub async fn attach(
        &self,
    ) -> Result<(ClientId, mpsc::UnboundedReceiver<ClientMessage>), WorkerError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.request(|reply| WorkerCommand::Attach { tx, reply }).await?;
        Ok((id, rx))
    }

    pub async fn detach(&self, id: ClientId) -> Result<(), WorkerError> {
        self.send(WorkerCommand::Detach { id }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStorage;
    use crate::config::WorkerConfig;
    use crate::notify::MemoryNotifier;
    use crate::opener::MemoryOpener;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Serves a fixed set of assets; can be switched offline
    #[derive(Default)]
    struct ScriptedFetcher {
        assets: Mutex<HashMap<String, &'static str>>,
        offline: Mutex<bool>,
    }

    impl ScriptedFetcher {
        fn with_assets(config: &WorkerConfig) -> Self {
            let fetcher = Self::default();
            for asset in &config.assets {
                fetcher.assets.lock().insert(normalize_key(asset), "asset");
            }
            fetcher
        }

        fn go_offline(&self) {
            *self.offline.lock() = true;
        }
    }

    #[async_trait]
    impl AssetFetcher for ScriptedFetcher {
        async fn fetch(&self, key: &str) -> Result<CachedResponse, WorkerError> {
            if *self.offline.lock() {
                return Err(WorkerError::Fetch {
                    url: key.to_string(),
                    reason: "connection refused".into(),
                });
            }
            let body = self.assets.lock().get(key).copied();
            Ok(match body {
                Some(body) => CachedResponse {
                    status: 200,
                    content_type: Some("text/plain".into()),
                    body: format!("{} {}", body, key).into_bytes(),
                },
                None => CachedResponse {
                    status: 404,
                    content_type: None,
                    body: Vec::new(),
                },
            })
        }
    }

    struct Fixture {
        handle: WorkerHandle,
        storage: Arc<MemoryCacheStorage>,
        fetcher: Arc<ScriptedFetcher>,
        sink: Arc<MemoryNotifier>,
        opener: Arc<MemoryOpener>,
    }

    fn start(config: &WorkerConfig, fetcher: ScriptedFetcher, storage: MemoryCacheStorage) -> Fixture {
        let storage = Arc::new(storage);
        let fetcher = Arc::new(fetcher);
        let sink = Arc::new(MemoryNotifier::new());
        let opener = Arc::new(MemoryOpener::new());
        let handle = spawn_host(
            CacheState::from_config(config),
            "http://127.0.0.1:8787/".to_string(),
            WorkerDeps {
                storage: storage.clone(),
                fetcher: fetcher.clone(),
                sink: sink.clone(),
                opener: opener.clone(),
                subscriptions: SubscriptionStore::in_memory(),
            },
        );
        Fixture {
            handle,
            storage,
            fetcher,
            sink,
            opener,
        }
    }

    #[tokio::test]
    async fn test_install_and_activate() {
        let config = WorkerConfig::default();
        let storage = MemoryCacheStorage::new();
        storage.put_all("qoeapp-cache-v0", Vec::new()).await.unwrap();

        let fixture = start(&config, ScriptedFetcher::with_assets(&config), storage);
        fixture.handle.ready().await.unwrap();

        assert_eq!(fixture.handle.lifecycle(), Lifecycle::Activated);
        assert_eq!(
            fixture.storage.keys().await.unwrap(),
            vec!["qoeapp-cache-v1".to_string()]
        );
        let root = fixture.storage.lookup("qoeapp-cache-v1", "/").await.unwrap();
        assert!(root.is_some());
    }

    #[tokio::test]
    async fn test_install_is_all_or_nothing() {
        let config = WorkerConfig::default();
        let fetcher = ScriptedFetcher::with_assets(&config);
        fetcher.assets.lock().remove("/manifest.json");

        let fixture = start(&config, fetcher, MemoryCacheStorage::new());
        let err = fixture.handle.ready().await.unwrap_err();
        assert!(matches!(err, WorkerError::NotActive(Lifecycle::Redundant)));
        assert!(fixture.storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_network_first_falls_back_to_cache() {
        let config = WorkerConfig::default();
        let fixture = start(&config, ScriptedFetcher::with_assets(&config), MemoryCacheStorage::new());
        fixture.handle.ready().await.unwrap();

        let online = fixture.handle.fetch("./index.html").await.unwrap();
        assert_eq!(online.source, FetchSource::Network);

        fixture.fetcher.go_offline();
        let cached = fixture.handle.fetch("/index.html").await.unwrap();
        assert_eq!(cached.source, FetchSource::Cache);
        assert_eq!(cached.response.body, b"asset /index.html");

        let missing = fixture.handle.fetch("/not-cached.css").await.unwrap();
        assert_eq!(missing.source, FetchSource::Unavailable);
        assert_eq!(missing.response.status, 503);
    }

    #[tokio::test]
    async fn test_push_shows_notification() {
        let config = WorkerConfig::default();
        let fixture = start(&config, ScriptedFetcher::with_assets(&config), MemoryCacheStorage::new());
        fixture.handle.ready().await.unwrap();

        fixture
            .handle
            .push(Some(br#"{"title":"Alert","body":"Slow link"}"#.to_vec()))
            .await
            .unwrap();

        // the push is handled after the command is queued
        for _ in 0..50 {
            if fixture.sink.shown_count() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let visible = fixture.sink.visible();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].title, "Alert");
        assert_eq!(visible[0].tag, "qoe");
    }

    #[tokio::test]
    async fn test_click_focuses_client_else_opens_root() {
        let config = WorkerConfig::default();
        let fixture = start(&config, ScriptedFetcher::with_assets(&config), MemoryCacheStorage::new());
        fixture.handle.ready().await.unwrap();

        // no clients yet
        fixture.handle.push(None).await.unwrap();
        fixture.handle.notification_click("qoe").await.unwrap();
        // attach round-trips through the host, so the click above is done
        let (id, mut messages) = fixture.handle.attach().await.unwrap();
        assert!(fixture.sink.visible().is_empty());
        for _ in 0..50 {
            if !fixture.opener.opened().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(fixture.opener.opened(), vec!["http://127.0.0.1:8787/".to_string()]);

        fixture.handle.notification_click("qoe").await.unwrap();
        assert_eq!(messages.recv().await, Some(ClientMessage::Focus));
        assert_eq!(fixture.opener.opened().len(), 1);

        fixture.handle.detach(id).await.unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_requires_activation() {
        let config = WorkerConfig::default();
        let fetcher = ScriptedFetcher::with_assets(&config);
        fetcher.go_offline();
        let fixture = start(&config, fetcher, MemoryCacheStorage::new());
        assert!(fixture.handle.ready().await.is_err());

        let err = fixture.handle.subscribe(&[4, 2]).await.unwrap_err();
        assert!(matches!(err, WorkerError::NotActive(Lifecycle::Redundant)));
    }

    #[tokio::test]
    async fn test_subscribe_uses_push_endpoint() {
        let config = WorkerConfig::default();
        let fixture = start(&config, ScriptedFetcher::with_assets(&config), MemoryCacheStorage::new());
        fixture.handle.ready().await.unwrap();

        let subscription = fixture.handle.subscribe(&[4, 2]).await.unwrap();
        assert_eq!(subscription.endpoint, "http://127.0.0.1:8787/push");
    }

    /// Never returns, like a browser that stays in the foreground
    struct BlockingOpener;

    #[async_trait]
    impl WindowOpener for BlockingOpener {
        async fn open(&self, _url: &str) -> Result<(), WorkerError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_open_window_does_not_stall_the_host() {
        let config = WorkerConfig::default();
        let handle = spawn_host(
            CacheState::from_config(&config),
            "http://127.0.0.1:8787/".to_string(),
            WorkerDeps {
                storage: Arc::new(MemoryCacheStorage::new()),
                fetcher: Arc::new(ScriptedFetcher::with_assets(&config)),
                sink: Arc::new(MemoryNotifier::new()),
                opener: Arc::new(BlockingOpener),
                subscriptions: SubscriptionStore::in_memory(),
            },
        );
        handle.ready().await.unwrap();

        handle.notification_click("qoe").await.unwrap();
        let fetched = tokio::time::timeout(Duration::from_secs(5), handle.fetch("/index.html"))
            .await
            .expect("host stalled behind the window opener")
            .unwrap();
        assert_eq!(fetched.source, FetchSource::Network);
    }

    #[tokio::test]
    async fn test_precache_error_names_the_asset() {
        let config = WorkerConfig::default();
        let fetcher = ScriptedFetcher::with_assets(&config);
        fetcher.assets.lock().remove("/manifest.json");
        let storage = MemoryCacheStorage::new();

        let err = precache(&storage, &fetcher, "qoeapp-cache-v1", &config.assets)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "cache install failed: ./manifest.json returned status 404"
        );
        assert!(storage.keys().await.unwrap().is_empty());
    }
}

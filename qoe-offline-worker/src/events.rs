//! Worker event handlers
//!
//! Each lifecycle callback, fetch, push and notification click is a
//! [`WorkerEvent`]. [`handle`] maps an event and the current [`CacheState`] to
//! the actions to perform and the next state, without touching storage, the
//! network or the notification service. The host executes the actions.

use crate::clients::ClientId;
use crate::config::{NotificationDefaults, WorkerConfig};
use crate::lifecycle::Lifecycle;
use crate::notify::NotificationRequest;
use std::collections::BTreeSet;

/// Versioned asset set cached at install
#[derive(Debug, Clone, PartialEq)]
pub struct CacheManifest {
    pub generation: String,
    pub assets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheState {
    pub manifest: CacheManifest,
    /// Generations known to exist in storage
    pub generations: BTreeSet<String>,
    pub lifecycle: Lifecycle,
    pub defaults: NotificationDefaults,
}

impl CacheState {
    pub fn new(manifest: CacheManifest, defaults: NotificationDefaults) -> Self {
        Self {
            manifest,
            generations: BTreeSet::new(),
            lifecycle: Lifecycle::Parsed,
            defaults,
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(
            CacheManifest {
                generation: config.cache_name.clone(),
                assets: config.assets.clone(),
            },
            config.notification.clone(),
        )
    }

    fn with_lifecycle(&self, next: Lifecycle) -> Self {
        Self {
            lifecycle: next,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Install,
    InstallSucceeded,
    InstallFailed { reason: String },
    Activate,
    Activated,
    Fetch { key: String },
    Push { data: Option<Vec<u8>> },
    NotificationClick { tag: String, clients: Vec<ClientId> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Fetch every asset and store them as one generation
    Precache { generation: String, assets: Vec<String> },
    SkipWaiting,
    DeleteGeneration(String),
    ClaimClients,
    Respond(FetchPlan),
    ShowNotification(NotificationRequest),
    CloseNotification { tag: String },
    FocusClient(ClientId),
    /// Open `url`, relative to the worker's public URL
    OpenWindow { url: String },
}

/// How a fetch is answered
#[derive(Debug, Clone, PartialEq)]
pub enum FetchPlan {
    /// Not yet in control: straight to the network
    NetworkOnly { key: String },
    /// Network, falling back to `generation` on transport failure
    NetworkFirst { key: String, generation: String },
}

pub fn handle(event: &WorkerEvent, state: &CacheState) -> (Vec<Action>, CacheState) {
    match event {
        WorkerEvent::Install => {
            if !state.lifecycle.can_transition_to(Lifecycle::Installing) {
                return (Vec::new(), state.clone());
            }
            let actions = vec![Action::Precache {
                generation: state.manifest.generation.clone(),
                assets: state.manifest.assets.clone(),
            }];
            (actions, state.with_lifecycle(Lifecycle::Installing))
        }

        WorkerEvent::InstallSucceeded => {
            if state.lifecycle != Lifecycle::Installing {
                return (Vec::new(), state.clone());
            }
            let mut next = state.with_lifecycle(Lifecycle::Installed);
            next.generations.insert(state.manifest.generation.clone());
            (vec![Action::SkipWaiting], next)
        }

        WorkerEvent::InstallFailed { .. } => {
            if state.lifecycle != Lifecycle::Installing {
                return (Vec::new(), state.clone());
            }
            (Vec::new(), state.with_lifecycle(Lifecycle::Redundant))
        }

        WorkerEvent::Activate => {
            if state.lifecycle != Lifecycle::Installed {
                return (Vec::new(), state.clone());
            }
            let current = &state.manifest.generation;
            let mut actions: Vec<Action> = state
                .generations
                .iter()
                .filter(|g| *g != current)
                .cloned()
                .map(Action::DeleteGeneration)
                .collect();
            actions.push(Action::ClaimClients);

            let mut next = state.with_lifecycle(Lifecycle::Activating);
            next.generations.retain(|g| g == current);
            (actions, next)
        }

        WorkerEvent::Activated => {
            if state.lifecycle != Lifecycle::Activating {
                return (Vec::new(), state.clone());
            }
            (Vec::new(), state.with_lifecycle(Lifecycle::Activated))
        }

        WorkerEvent::Fetch { key } => {
            let plan = if state.lifecycle.is_active() {
                FetchPlan::NetworkFirst {
                    key: key.clone(),
                    generation: state.manifest.generation.clone(),
                }
            } else {
                FetchPlan::NetworkOnly { key: key.clone() }
            };
            (vec![Action::Respond(plan)], state.clone())
        }

        WorkerEvent::Push { data } => {
            let request = parse_push(data.as_deref(), &state.defaults);
            (vec![Action::ShowNotification(request)], state.clone())
        }

        WorkerEvent::NotificationClick { tag, clients } => {
            let mut actions = vec![Action::CloseNotification { tag: tag.clone() }];
            match clients.first() {
                Some(id) => actions.push(Action::FocusClient(*id)),
                None => actions.push(Action::OpenWindow {
                    url: "./".to_string(),
                }),
            }
            (actions, state.clone())
        }
    }
}

/// Turn a push payload into a notification.
///
/// A JSON object supplies `title`, `body` and `tag`, each falling back to the
/// defaults when missing or empty. Any other payload is taken as plain text
/// for the body. No payload yields the defaults.
pub fn parse_push(data: Option<&[u8]>, defaults: &NotificationDefaults) -> NotificationRequest {
    let mut request = NotificationRequest {
        title: defaults.title.clone(),
        body: defaults.body.clone(),
        tag: defaults.tag.clone(),
        icon: defaults.icon.clone(),
        renotify: true,
    };

    let Some(data) = data.filter(|d| !d.is_empty()) else {
        return request;
    };

    match serde_json::from_slice::<serde_json::Value>(data) {
        Ok(serde_json::Value::Object(fields)) => {
            let field = |name: &str| {
                fields
                    .get(name)
                    .and_then(|v| v.as_str())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            };
            if let Some(title) = field("title") {
                request.title = title;
            }
            if let Some(body) = field("body") {
                request.body = body;
            }
            if let Some(tag) = field("tag") {
                request.tag = tag;
            }
        }
        _ => request.body = String::from_utf8_lossy(data).into_owned(),
    }

    request
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn state(lifecycle: Lifecycle) -> CacheState {
        let mut state = CacheState::from_config(&WorkerConfig::default());
        state.lifecycle = lifecycle;
        state
    }

    #[test]
    fn test_install_precaches_manifest() {
        let (actions, next) = handle(&WorkerEvent::Install, &state(Lifecycle::Parsed));
        assert_eq!(next.lifecycle, Lifecycle::Installing);
        match &actions[..] {
            [Action::Precache { generation, assets }] => {
                assert_eq!(generation, "qoeapp-cache-v1");
                assert_eq!(assets.len(), 6);
            }
            other => panic!("unexpected actions: {:?}", other),
        }

        let (actions, next) = handle(&WorkerEvent::InstallSucceeded, &next);
        assert_eq!(actions, vec![Action::SkipWaiting]);
        assert_eq!(next.lifecycle, Lifecycle::Installed);
        assert!(next.generations.contains("qoeapp-cache-v1"));
    }

    #[test]
    fn test_install_failure_makes_worker_redundant() {
        let failed = WorkerEvent::InstallFailed {
            reason: "404 for ./manifest.json".into(),
        };
        let (actions, next) = handle(&failed, &state(Lifecycle::Installing));
        assert!(actions.is_empty());
        assert_eq!(next.lifecycle, Lifecycle::Redundant);
        assert!(next.generations.is_empty());
    }

    #[test]
    fn test_activate_deletes_stale_generations() {
        let mut installed = state(Lifecycle::Installed);
        installed.manifest.generation = "v2".into();
        installed.generations = ["v1".to_string(), "v2".to_string()].into_iter().collect();

        let (actions, next) = handle(&WorkerEvent::Activate, &installed);
        assert_eq!(
            actions,
            vec![Action::DeleteGeneration("v1".into()), Action::ClaimClients]
        );
        assert_eq!(next.lifecycle, Lifecycle::Activating);
        assert_eq!(next.generations.iter().collect::<Vec<_>>(), vec!["v2"]);

        let (_, next) = handle(&WorkerEvent::Activated, &next);
        assert!(next.lifecycle.is_active());
    }

    #[test]
    fn test_out_of_order_events_are_ignored() {
        let parsed = state(Lifecycle::Parsed);
        let (actions, next) = handle(&WorkerEvent::Activate, &parsed);
        assert!(actions.is_empty());
        assert_eq!(next, parsed);

        let active = state(Lifecycle::Activated);
        let (actions, _) = handle(&WorkerEvent::Install, &active);
        assert!(actions.is_empty());
    }

    #[test]
    fn test_fetch_plan_depends_on_activation() {
        let fetch = WorkerEvent::Fetch { key: "/index.html".into() };

        let (actions, _) = handle(&fetch, &state(Lifecycle::Installing));
        assert_eq!(
            actions,
            vec![Action::Respond(FetchPlan::NetworkOnly { key: "/index.html".into() })]
        );

        let (actions, _) = handle(&fetch, &state(Lifecycle::Activated));
        assert_eq!(
            actions,
            vec![Action::Respond(FetchPlan::NetworkFirst {
                key: "/index.html".into(),
                generation: "qoeapp-cache-v1".into(),
            })]
        );
    }

    #[test]
    fn test_push_with_title_and_body() {
        let push = WorkerEvent::Push {
            data: Some(br#"{"title":"Alert","body":"Slow link"}"#.to_vec()),
        };
        let (actions, _) = handle(&push, &state(Lifecycle::Activated));
        let [Action::ShowNotification(request)] = &actions[..] else {
            panic!("unexpected actions: {:?}", actions);
        };
        assert_eq!(request.title, "Alert");
        assert_eq!(request.body, "Slow link");
        assert_eq!(request.tag, "qoe");
        assert_eq!(request.icon.as_deref(), Some("./icons/icon-192.png"));
        assert!(request.renotify);
    }

    #[test]
    fn test_push_plain_text_and_empty() {
        let defaults = NotificationDefaults::default();

        let text = parse_push(Some(b"link down"), &defaults);
        assert_eq!(text.title, "QoE Alert");
        assert_eq!(text.body, "link down");
        assert_eq!(text.tag, "qoe");

        // a JSON string is not an object
        let quoted = parse_push(Some(br#""hello""#), &defaults);
        assert_eq!(quoted.body, r#""hello""#);

        let empty = parse_push(None, &defaults);
        assert_eq!(empty.title, "QoE Alert");
        assert_eq!(empty.body, "Network status changed");

        let custom_tag = parse_push(Some(br#"{"tag":"link"}"#), &defaults);
        assert_eq!(custom_tag.tag, "link");
        assert_eq!(custom_tag.body, "Network status changed");
    }

    #[test]
    fn test_click_focuses_first_client_or_opens_root() {
        let first = Uuid::new_v4();
        let click = WorkerEvent::NotificationClick {
            tag: "qoe".into(),
            clients: vec![first, Uuid::new_v4()],
        };
        let (actions, _) = handle(&click, &state(Lifecycle::Activated));
        assert_eq!(
            actions,
            vec![
                Action::CloseNotification { tag: "qoe".into() },
                Action::FocusClient(first)
            ]
        );

        let click = WorkerEvent::NotificationClick {
            tag: "qoe".into(),
            clients: Vec::new(),
        };
        let (actions, _) = handle(&click, &state(Lifecycle::Activated));
        assert_eq!(
            actions,
            vec![
                Action::CloseNotification { tag: "qoe".into() },
                Action::OpenWindow { url: "./".into() }
            ]
        );
    }
}

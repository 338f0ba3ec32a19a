/*!
Stub HTTP server standing in for the QoE backends

One axum server on an ephemeral port plays three roles:
- the classifier (`GET /predict`), with a scripted reply
- the push backend (`POST /subscribe`), recording every subscription
- the asset origin: any other `GET` is answered from a map of served assets,
  plus `GET /blob` returning a fixed-size body for throughput probes
*/

use anyhow::Result;
use axum::body::Body;
use axum::extract::{RawQuery, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Assets of the QoE app, as served under `/app/`
pub const APP_ASSETS: [&str; 6] = [
    "/app/",
    "/app/index.html",
    "/app/manifest.json",
    "/app/network.js",
    "/app/icons/icon-192.png",
    "/app/icons/icon-512.png",
];

#[derive(Debug, Clone)]
struct Reply {
    status: u16,
    body: String,
}

#[derive(Debug, Clone)]
struct Asset {
    content_type: String,
    body: Vec<u8>,
}

#[derive(Clone)]
struct StubState {
    prediction: Arc<Mutex<Reply>>,
    predict_queries: Arc<Mutex<Vec<String>>>,
    subscribe_status: Arc<Mutex<u16>>,
    subscriptions: Arc<Mutex<Vec<Value>>>,
    assets: Arc<Mutex<HashMap<String, Asset>>>,
    asset_requests: Arc<Mutex<Vec<String>>>,
    blob_size: Arc<Mutex<usize>>,
}

impl Default for StubState {
    fn default() -> Self {
        Self {
            prediction: Arc::new(Mutex::new(Reply {
                status: 200,
                body: json!({"prediction": "Good"}).to_string(),
            })),
            predict_queries: Arc::new(Mutex::new(Vec::new())),
            subscribe_status: Arc::new(Mutex::new(201)),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            assets: Arc::new(Mutex::new(HashMap::new())),
            asset_requests: Arc::new(Mutex::new(Vec::new())),
            blob_size: Arc::new(Mutex::new(256 * 1024)),
        }
    }
}

/// Running stub server. Dropping it stops accepting connections.
pub struct StubServer {
    pub addr: SocketAddr,
    state: StubState,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl StubServer {
    /// Start the stub on `127.0.0.1:0`
    pub async fn start() -> Result<Self> {
        let state = StubState::default();
        let app = Router::new()
            .route("/predict", get(predict))
            .route("/subscribe", post(subscribe))
            .route("/blob", get(blob))
            .fallback(asset)
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                log::error!("stub server failed: {}", e);
            }
        });

        log::info!("stub server listening on {}", addr);
        Ok(Self {
            addr,
            state,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// `http://{addr}` with no trailing slash
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    pub fn predict_url(&self) -> String {
        self.url("/predict")
    }

    /// Origin serving [`APP_ASSETS`]
    pub fn asset_origin(&self) -> String {
        self.url("/app/")
    }

    /// Reply to `/predict` with `body` and status 200
    pub fn set_prediction(&self, body: Value) {
        self.set_predict_reply(200, &body.to_string());
    }

    pub fn set_predict_reply(&self, status: u16, body: &str) {
        *self.state.prediction.lock().unwrap() = Reply {
            status,
            body: body.to_string(),
        };
    }

    /// Raw query strings received on `/predict`, in order
    pub fn predict_queries(&self) -> Vec<String> {
        self.state.predict_queries.lock().unwrap().clone()
    }

    pub fn set_subscribe_status(&self, status: u16) {
        *self.state.subscribe_status.lock().unwrap() = status;
    }

    /// JSON bodies received on `/subscribe`
    pub fn subscriptions(&self) -> Vec<Value> {
        self.state.subscriptions.lock().unwrap().clone()
    }

    pub fn serve_asset(&self, path: &str, content_type: &str, body: &[u8]) {
        self.state.assets.lock().unwrap().insert(
            path.to_string(),
            Asset {
                content_type: content_type.to_string(),
                body: body.to_vec(),
            },
        );
    }

    pub fn remove_asset(&self, path: &str) {
        self.state.assets.lock().unwrap().remove(path);
    }

    /// Serve every app asset with a body naming its path
    pub fn serve_app_assets(&self) {
        for path in APP_ASSETS {
            let content_type = if path.ends_with(".png") {
                "image/png"
            } else if path.ends_with(".js") {
                "text/javascript"
            } else if path.ends_with(".json") {
                "application/json"
            } else {
                "text/html"
            };
            self.serve_asset(path, content_type, format!("asset {}", path).as_bytes());
        }
    }

    /// Paths requested from the asset origin, in order
    pub fn asset_requests(&self) -> Vec<String> {
        self.state.asset_requests.lock().unwrap().clone()
    }

    pub fn set_blob_size(&self, bytes: usize) {
        *self.state.blob_size.lock().unwrap() = bytes;
    }

    /// Stop the server and wait until every connection is closed.
    /// Later requests to its address are refused.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        log::info!("stub server on {} stopped", self.addr);
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn predict(State(state): State<StubState>, RawQuery(query): RawQuery) -> Response {
    state
        .predict_queries
        .lock()
        .unwrap()
        .push(query.unwrap_or_default());
    let reply = state.prediction.lock().unwrap().clone();
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, [(header::CONTENT_TYPE, "application/json")], reply.body).into_response()
}

async fn subscribe(State(state): State<StubState>, Json(body): Json<Value>) -> StatusCode {
    log::info!("subscription received: {}", body);
    state.subscriptions.lock().unwrap().push(body);
    let status = *state.subscribe_status.lock().unwrap();
    StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

async fn blob(State(state): State<StubState>) -> Vec<u8> {
    let size = *state.blob_size.lock().unwrap();
    vec![0u8; size]
}

async fn asset(State(state): State<StubState>, req: Request) -> Response {
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    state.asset_requests.lock().unwrap().push(path.clone());

    let asset = state.assets.lock().unwrap().get(&path).cloned();
    match asset {
        Some(asset) => (
            [(header::CONTENT_TYPE, asset.content_type)],
            Body::from(asset.body),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

//! HTTP front of the offline worker
//!
//! Routes:
//! - `GET /health`: lifecycle state
//! - `POST /push`: push message, raw body as payload
//! - any other `GET`: fetch interception (network first, cache fallback)
//!
//! Intercepted responses carry an `x-qoe-source` header naming where the
//! bytes came from (`network`, `cache` or `unavailable`).

use crate::host::{FetchSource, WorkerHandle};
use crate::lifecycle::Lifecycle;
use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tracing::warn;

pub const SOURCE_HEADER: &str = "x-qoe-source";

#[derive(Serialize)]
struct HealthView {
    lifecycle: Lifecycle,
    active: bool,
}

pub fn build_router(handle: WorkerHandle) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/push", post(push))
        .fallback(intercept)
        .with_state(handle)
}

async fn health(State(handle): State<WorkerHandle>) -> Json<HealthView> {
    let lifecycle = handle.lifecycle();
    Json(HealthView {
        lifecycle,
        active: lifecycle.is_active(),
    })
}

async fn push(State(handle): State<WorkerHandle>, body: Bytes) -> StatusCode {
    let data = (!body.is_empty()).then(|| body.to_vec());
    match handle.push(data).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(e) => {
            warn!("push not delivered to worker: {}", e);
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn intercept(State(handle): State<WorkerHandle>, req: Request) -> Response {
    if req.method() != Method::GET {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let outcome = match handle.fetch(&path).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("fetch of {} not handled: {}", path, e);
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };

    let source = match outcome.source {
        FetchSource::Network => "network",
        FetchSource::Cache => "cache",
        FetchSource::Unavailable => "unavailable",
    };
    let status =
        StatusCode::from_u16(outcome.response.status).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut builder = Response::builder()
        .status(status)
        .header(SOURCE_HEADER, source);
    if let Some(content_type) = &outcome.response.content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    builder
        .body(Body::from(outcome.response.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

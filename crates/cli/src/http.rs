// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP surface: the submission interface for producers and the read-only
//! inspection interface for dashboards.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::error::Error;
use crate::queue::CancelOutcome;
use crate::run::Daemon;
use crate::sentinel::Provider;
use crate::store::{epoch_ms, NewPrompt, PromptState, SessionStatus};

pub fn build_router(daemon: Arc<Daemon>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/prompts", post(submit).get(list_prompts))
        .route("/api/v1/prompts/{id}", get(get_prompt))
        .route("/api/v1/prompts/{id}/cancel", post(cancel_prompt))
        .route("/api/v1/prompts/{id}/retry", post(retry_prompt))
        .route("/api/v1/sessions", get(list_sessions).post(register_session))
        .route("/api/v1/sessions/{name}", delete(deregister_session))
        .route("/api/v1/locks", get(list_locks))
        .route("/api/v1/history", get(history))
        .route("/api/v1/stats", get(stats))
        .layer(TraceLayer::new_for_http())
        .with_state(daemon)
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = axum::http::StatusCode::from_u16(self.kind().http_status())
            .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
        let body = Json(serde_json::json!({
            "error": { "code": self.kind().as_str(), "message": self.message() }
        }));
        (status, body).into_response()
    }
}

// -- Submission ---------------------------------------------------------------

#[derive(Debug, Serialize)]
struct SubmitResponse {
    id: i64,
}

/// `POST /api/v1/prompts`: accept a new prompt.
async fn submit(
    State(daemon): State<Arc<Daemon>>,
    Json(new): Json<NewPrompt>,
) -> Result<Json<SubmitResponse>, Error> {
    let id = daemon.queue.submit(&new)?;
    Ok(Json(SubmitResponse { id }))
}

/// `POST /api/v1/prompts/{id}/cancel`
async fn cancel_prompt(
    State(daemon): State<Arc<Daemon>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, Error> {
    let outcome = daemon.queue.cancel(id)?;
    let outcome = match outcome {
        CancelOutcome::Cancelled => "cancelled",
        CancelOutcome::CancelRequested => "cancel_requested",
    };
    Ok(Json(serde_json::json!({ "id": id, "outcome": outcome })))
}

/// `POST /api/v1/prompts/{id}/retry`
async fn retry_prompt(
    State(daemon): State<Arc<Daemon>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, Error> {
    daemon.queue.retry(id)?;
    Ok(Json(serde_json::json!({ "id": id, "outcome": "requeued" })))
}

// -- Inspection ---------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ListPromptsQuery {
    status: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_limit() -> usize {
    50
}

/// `GET /api/v1/prompts?status=&limit=&offset=`
async fn list_prompts(
    State(daemon): State<Arc<Daemon>>,
    Query(query): Query<ListPromptsQuery>,
) -> Result<Json<serde_json::Value>, Error> {
    let status = query.status.as_deref().map(PromptState::from_str).transpose()?;
    let prompts = daemon.store.list_prompts(status, query.limit.min(1000), query.offset)?;
    Ok(Json(serde_json::json!({ "prompts": prompts })))
}

/// `GET /api/v1/prompts/{id}`
async fn get_prompt(
    State(daemon): State<Arc<Daemon>>,
    Path(id): Path<i64>,
) -> Result<Json<serde_json::Value>, Error> {
    let prompt = daemon.store.get_prompt(id)?;
    Ok(Json(serde_json::json!({ "prompt": prompt })))
}

#[derive(Debug, Deserialize)]
struct ListSessionsQuery {
    status: Option<String>,
}

/// `GET /api/v1/sessions?status=`
async fn list_sessions(
    State(daemon): State<Arc<Daemon>>,
    Query(query): Query<ListSessionsQuery>,
) -> Result<Json<serde_json::Value>, Error> {
    let status = query.status.as_deref().map(SessionStatus::from_str).transpose()?;
    let sessions = daemon.store.list_sessions(status)?;
    Ok(Json(serde_json::json!({ "sessions": sessions })))
}

#[derive(Debug, Deserialize)]
struct RegisterBody {
    name: String,
    #[serde(default)]
    provider: Option<Provider>,
}

/// `POST /api/v1/sessions`: register a session by name.
async fn register_session(
    State(daemon): State<Arc<Daemon>>,
    Json(body): Json<RegisterBody>,
) -> Result<Json<serde_json::Value>, Error> {
    let session =
        daemon.registry.register(&body.name, body.provider.unwrap_or(Provider::Unknown)).await?;
    Ok(Json(serde_json::json!({ "session": session })))
}

/// `DELETE /api/v1/sessions/{name}`: refuses while prompts are held.
async fn deregister_session(
    State(daemon): State<Arc<Daemon>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, Error> {
    daemon.registry.deregister(&name).await?;
    daemon.probe.forget(&name);
    Ok(Json(serde_json::json!({ "deregistered": name })))
}

/// `GET /api/v1/locks`: active locks only.
async fn list_locks(State(daemon): State<Arc<Daemon>>) -> Result<Json<serde_json::Value>, Error> {
    let locks = daemon.locks.list(true)?;
    Ok(Json(serde_json::json!({ "locks": locks })))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    prompt_id: Option<i64>,
    session: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
}

/// `GET /api/v1/history?prompt_id=&session=&limit=`
async fn history(
    State(daemon): State<Arc<Daemon>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<serde_json::Value>, Error> {
    let records = daemon.store.assignment_history(
        query.prompt_id,
        query.session.as_deref(),
        query.limit.min(1000),
    )?;
    Ok(Json(serde_json::json!({ "history": records })))
}

/// `GET /api/v1/stats`
async fn stats(State(daemon): State<Arc<Daemon>>) -> Result<Json<serde_json::Value>, Error> {
    let stats = daemon.store.stats()?;
    Ok(Json(serde_json::json!({ "stats": stats })))
}

/// `GET /api/v1/health`
async fn health(State(daemon): State<Arc<Daemon>>) -> Json<serde_json::Value> {
    let queue = daemon.store.stats().ok();
    Json(serde_json::json!({
        "status": "running",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_ms": epoch_ms().saturating_sub(daemon.started_at),
        "pid": std::process::id(),
        "queue": queue,
    }))
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;

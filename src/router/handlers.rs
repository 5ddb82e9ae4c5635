//! Control-plane HTTP handlers (§6). Thin translation layer: extract,
//! call the supervisor façade, map the result to a response. All
//! business logic lives in [`crate::supervisor::Supervisor`].

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::Request,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::instance::options::Options;

use super::AppState;

pub async fn list_instances(State(state): State<AppState>) -> Response {
    Json(state.supervisor.list()).into_response()
}

#[derive(Debug, Deserialize)]
pub struct CreateBody {
    #[serde(flatten)]
    pub options: Options,
    #[serde(default)]
    pub owner: Option<String>,
}

pub async fn create_instance(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<CreateBody>,
) -> Response {
    match state.supervisor.create(name, body.options, body.owner).await {
        Ok(snapshot) => (axum::http::StatusCode::CREATED, Json(snapshot)).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn get_instance(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.supervisor.get(&name) {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn update_instance(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(options): Json<Options>,
) -> Response {
    match state.supervisor.update(&name, options).await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn delete_instance(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.supervisor.delete(&name).await {
        Ok(()) => axum::http::StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn start_instance(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.supervisor.start(&name).await {
        Ok(()) => Json(json!({"status": "ok"})).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn stop_instance(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.supervisor.stop(&name).await {
        Ok(()) => Json(json!({"status": "ok"})).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn restart_instance(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.supervisor.restart(&name).await {
        Ok(()) => Json(json!({"status": "ok"})).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    #[serde(default = "default_lines")]
    pub lines: i64,
}

fn default_lines() -> i64 {
    200
}

pub async fn get_logs(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Response {
    match state.supervisor.logs(&name, query.lines) {
        Ok(lines) => Json(json!({"lines": lines})).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `ANY /instances/{name}/proxy/*rest` — the `/instances/{name}/proxy`
/// prefix is stripped from the request's URI before dispatch, so the
/// subprocess sees the path as if it were talking to it directly (e.g.
/// `/v1/chat/completions`, not `/instances/alpha/proxy/v1/chat/completions`).
pub async fn proxy_instance(
    State(state): State<AppState>,
    Path((name, rest)): Path<(String, String)>,
    mut request: Request<Body>,
) -> Response {
    let query = request.uri().query().map(|q| format!("?{q}")).unwrap_or_default();
    let new_path_and_query = format!("/{rest}{query}");
    match new_path_and_query.parse() {
        Ok(pq) => {
            let mut parts = request.uri().clone().into_parts();
            parts.path_and_query = Some(pq);
            match axum::http::Uri::from_parts(parts) {
                Ok(uri) => *request.uri_mut() = uri,
                Err(e) => return crate::error::SupervisorError::Internal(e.to_string()).into_response(),
            }
        }
        Err(e) => return crate::error::SupervisorError::Internal(format!("invalid proxied path: {e}")).into_response(),
    }

    match state.supervisor.proxy(&name, request).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

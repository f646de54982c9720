use std::fmt::Display;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use hyper::StatusCode;
use hyper::header;
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::cors::{Any, CorsLayer};

use super::AppState;
use super::middleware;
use crate::inspect::{DEFAULT_LIST_PATH, DEFAULT_LOG_TAIL, MAX_LOG_TAIL};
use crate::lifecycle::{RepoRef, SandboxConfig};

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(vec![header::CONTENT_TYPE, header::AUTHORIZATION]);

    let sandbox_routes = Router::new()
        .route("/create", post(create_sandbox))
        .route("/pause", post(pause_sandbox))
        .route("/resume", post(resume_sandbox))
        .route("/terminate", post(terminate_sandbox))
        .route("/list_files", post(list_files))
        .route("/read_file", post(read_file))
        .route("/get_logs", post(get_logs))
        .route_layer(axum::middleware::from_fn_with_state(
            state.api_secret.clone(),
            middleware::require_api_secret,
        ));

    Router::new()
        .route("/health", get(|| async { Json(json!({ "status": "ok" })) }))
        .merge(sandbox_routes)
        .fallback(not_found)
        .with_state(state)
        .layer(cors)
        .layer(axum::middleware::from_fn(middleware::strip_trailing_slash))
        .layer(axum::middleware::from_fn(
            middleware::enrich_current_span_middleware,
        ))
}

async fn not_found(req: axum::extract::Request) -> impl IntoResponse {
    tracing::warn!("unhandled path: {}", req.uri());
    (StatusCode::NOT_FOUND, "Not Found")
}

/// Operation failures are reported in the body with a 200 status.
fn error_body(e: impl Display) -> Json<Value> {
    Json(json!({ "error": e.to_string() }))
}

/// Empty strings count as absent.
fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

// --- Lifecycle ---

#[derive(Deserialize)]
pub struct CreateRequest {
    pub repo: Option<String>,
    pub pat: Option<String>,
    pub anthropic_api_key: Option<String>,
}

#[derive(Deserialize)]
pub struct SandboxRequest {
    pub sandbox_id: Option<String>,
}

#[derive(Deserialize)]
pub struct ResumeRequest {
    pub snapshot_id: Option<String>,
    pub anthropic_api_key: Option<String>,
}

async fn create_sandbox(
    State(state): State<AppState>,
    body: Result<Json<CreateRequest>, JsonRejection>,
) -> Json<Value> {
    let Json(body) = match body {
        Ok(body) => body,
        Err(e) => return error_body(e.body_text()),
    };

    let repo = match present(body.repo).map(|r| r.parse::<RepoRef>()).transpose() {
        Ok(repo) => repo,
        Err(e) => return error_body(e),
    };
    let config = SandboxConfig {
        repo,
        access_token: present(body.pat),
        model_api_key: present(body.anthropic_api_key),
    };

    match state.orchestrator.provision(config).await {
        Ok(provisioned) => Json(json!(provisioned)),
        Err(e) => {
            tracing::error!(error = %e, "sandbox creation failed");
            error_body(e)
        }
    }
}

async fn pause_sandbox(
    State(state): State<AppState>,
    body: Result<Json<SandboxRequest>, JsonRejection>,
) -> Json<Value> {
    let Json(body) = match body {
        Ok(body) => body,
        Err(e) => return error_body(e.body_text()),
    };
    let Some(sandbox_id) = present(body.sandbox_id) else {
        return error_body("Missing sandbox_id");
    };

    match state.orchestrator.pause(&sandbox_id).await {
        Ok(snapshot_id) => Json(json!({ "snapshot_id": snapshot_id })),
        Err(e) => error_body(e),
    }
}

async fn resume_sandbox(
    State(state): State<AppState>,
    body: Result<Json<ResumeRequest>, JsonRejection>,
) -> Json<Value> {
    let Json(body) = match body {
        Ok(body) => body,
        Err(e) => return error_body(e.body_text()),
    };
    let Some(snapshot_id) = present(body.snapshot_id) else {
        return error_body("Missing snapshot_id");
    };
    let model_api_key = present(body.anthropic_api_key);

    match state
        .orchestrator
        .resume(&snapshot_id, model_api_key.as_deref())
        .await
    {
        Ok(provisioned) => Json(json!(provisioned)),
        Err(e) => {
            tracing::error!(snapshot_id = %snapshot_id, error = %e, "sandbox resume failed");
            error_body(e)
        }
    }
}

async fn terminate_sandbox(
    State(state): State<AppState>,
    body: Result<Json<SandboxRequest>, JsonRejection>,
) -> Json<Value> {
    let Json(body) = match body {
        Ok(body) => body,
        Err(e) => return error_body(e.body_text()),
    };
    let Some(sandbox_id) = present(body.sandbox_id) else {
        return error_body("Missing sandbox_id");
    };

    Json(json!(state.orchestrator.terminate(&sandbox_id).await))
}

// --- Inspection ---

#[derive(Deserialize)]
pub struct ListFilesRequest {
    pub sandbox_id: Option<String>,
    pub path: Option<String>,
}

#[derive(Deserialize)]
pub struct ReadFileRequest {
    pub sandbox_id: Option<String>,
    pub path: Option<String>,
}

#[derive(Deserialize)]
pub struct GetLogsRequest {
    pub sandbox_id: Option<String>,
    pub tail: Option<i64>,
}

async fn list_files(
    State(state): State<AppState>,
    body: Result<Json<ListFilesRequest>, JsonRejection>,
) -> Json<Value> {
    let Json(body) = match body {
        Ok(body) => body,
        Err(e) => return error_body(e.body_text()),
    };
    let Some(sandbox_id) = present(body.sandbox_id) else {
        return error_body("Missing sandbox_id");
    };
    let path = present(body.path).unwrap_or_else(|| DEFAULT_LIST_PATH.to_string());

    match state.inspector.list_files(&sandbox_id, &path).await {
        Ok(files) => Json(json!({ "files": files })),
        Err(e) => error_body(e),
    }
}

async fn read_file(
    State(state): State<AppState>,
    body: Result<Json<ReadFileRequest>, JsonRejection>,
) -> Json<Value> {
    let Json(body) = match body {
        Ok(body) => body,
        Err(e) => return error_body(e.body_text()),
    };
    let (Some(sandbox_id), Some(path)) = (present(body.sandbox_id), present(body.path)) else {
        return error_body("Missing sandbox_id or path");
    };

    match state.inspector.read_file(&sandbox_id, &path).await {
        Ok(content) => Json(json!({ "content": content })),
        Err(e) => error_body(e),
    }
}

async fn get_logs(
    State(state): State<AppState>,
    body: Result<Json<GetLogsRequest>, JsonRejection>,
) -> Json<Value> {
    let Json(body) = match body {
        Ok(body) => body,
        Err(e) => return error_body(e.body_text()),
    };
    let Some(sandbox_id) = present(body.sandbox_id) else {
        return error_body("Missing sandbox_id");
    };
    let tail = body
        .tail
        .unwrap_or(i64::from(DEFAULT_LOG_TAIL))
        .clamp(1, i64::from(MAX_LOG_TAIL)) as u32;

    match state.inspector.get_logs(&sandbox_id, tail).await {
        Ok(logs) => Json(json!({ "logs": logs })),
        Err(e) => error_body(e),
    }
}

use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode, Uri, header},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use serde_json::json;
use subtle::ConstantTimeEq;
use tracing::Span;

pub async fn enrich_current_span_middleware(req: Request<Body>, next: Next) -> Response {
    let uri: &Uri = req.uri();

    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("UNKNOWN");

    let current_span = Span::current();

    current_span.record("http.uri", uri.path());
    current_span.record("http.host", host);

    next.run(req).await
}

pub async fn strip_trailing_slash(req: Request<Body>, next: Next) -> Response {
    let uri = req.uri();

    match uri.path().strip_suffix('/') {
        Some(path) if !path.is_empty() => {
            let location = match uri.query() {
                Some(query) => format!("{path}?{query}"),
                None => path.to_string(),
            };
            Redirect::permanent(&location).into_response()
        }
        _ => next.run(req).await,
    }
}

fn reject(status: StatusCode, detail: &str) -> Response {
    (status, Json(json!({ "detail": detail }))).into_response()
}

/// Bearer check against the shared secret. With no secret configured every
/// request passes; this is only meant for local development.
pub async fn require_api_secret(
    State(secret): State<Option<Arc<str>>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(secret) = secret else {
        return next.run(req).await;
    };

    let Some(value) = req.headers().get(header::AUTHORIZATION) else {
        tracing::warn!(path = %req.uri().path(), "missing authorization header");
        return reject(StatusCode::UNAUTHORIZED, "Missing Authorization header");
    };

    let Some(presented) = value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
    else {
        tracing::warn!(path = %req.uri().path(), "malformed authorization header");
        return reject(
            StatusCode::UNAUTHORIZED,
            "Invalid Authorization header format",
        );
    };

    if !bool::from(presented.as_bytes().ct_eq(secret.as_bytes())) {
        tracing::warn!(path = %req.uri().path(), "api secret mismatch");
        return reject(StatusCode::FORBIDDEN, "Invalid API secret");
    }

    next.run(req).await
}

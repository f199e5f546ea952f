//! Shared-secret check for every route except `/health`.

use super::ApiError;
use axum::extract::{Query, Request, State};
use axum::http::Method;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Deserialize)]
struct KeyParam {
    key: Option<String>,
}

/// Accepts the key from the `x-api-key` header or the `key` query
/// parameter. Browsers cannot set headers on websocket upgrades, hence the
/// query form.
pub async fn require_api_key(State(expected): State<Arc<str>>, request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        return next.run(request).await;
    }

    match presented_key(&request) {
        Some(key) if key == *expected => next.run(request).await,
        _ => {
            debug!(path = %request.uri().path(), "rejected request without valid api key");
            ApiError::Unauthorized.into_response()
        }
    }
}

fn presented_key(request: &Request) -> Option<String> {
    if let Some(value) = request.headers().get(API_KEY_HEADER) {
        return value.to_str().ok().map(str::to_string);
    }
    Query::<KeyParam>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(param)| param.key)
}

pub mod api;
pub mod auth;
pub mod server;

use crate::config::{ConfigError, PathStore};
use crate::health::HealthMonitor;
use crate::monitor::WatcherRegistry;
use crate::service::{ServiceControl, ServiceError};
use crate::storage::{Storage, StorageError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::sync::Arc;

pub use server::{build_router, run_server};

/// Shared state of the HTTP API.
pub struct AppState {
    /// Identity of this agent; keys its log paths.
    pub agent: String,
    pub storage: Arc<dyn Storage>,
    pub registry: WatcherRegistry,
    pub paths: Arc<PathStore>,
    pub health: Arc<HealthMonitor>,
    pub services: Arc<dyn ServiceControl>,
    /// Name filter used when `/api/services` has no `filter` parameter.
    pub service_filter: String,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    NotFound(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        tracing::error!(error = %e, "storage request failed");
        ApiError::InternalError(e.to_string())
    }
}

impl From<ConfigError> for ApiError {
    fn from(e: ConfigError) -> Self {
        tracing::error!(error = %e, "failed to persist state file");
        ApiError::InternalError(e.to_string())
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::InvalidAction(_) => ApiError::BadRequest("invalid action".to_string()),
            ServiceError::InvalidName(_) => ApiError::BadRequest(e.to_string()),
            other => {
                tracing::error!(error = %other, "service command failed");
                ApiError::InternalError(other.to_string())
            }
        }
    }
}

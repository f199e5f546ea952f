use super::{ApiError, AppState};
use crate::config::expand_tilde;
use crate::health::HealthStatus;
use crate::monitor::{Activation, ErrorEvent, WatchKey, WatcherStatus};
use crate::service::{ServiceAction, UNKNOWN_STATUS};
use crate::storage::{EventQuery, SortOrder};
use axum::extract::{Path, Query, State};
use axum::Json;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, warn};

pub const MAX_ERRORS_LIMIT: usize = 1000;

pub async fn health_check() -> &'static str {
    "OK"
}

// --- log paths ---

#[derive(Debug, Serialize)]
pub struct LogPathResponse {
    pub file: Option<String>,
}

pub async fn get_log_path(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
) -> Json<LogPathResponse> {
    let file = state
        .paths
        .log_path(&state.agent, &service)
        .map(|p| p.display().to_string());
    Json(LogPathResponse { file })
}

#[derive(Debug, Deserialize)]
pub struct SetLogPathRequest {
    pub file: String,
}

#[derive(Debug, Serialize)]
pub struct SetLogPathResponse {
    pub success: bool,
    pub service: String,
    pub file: String,
    pub watcher: Activation,
}

/// Saves the path and starts watching it right away instead of waiting
/// for the next reconciliation.
pub async fn set_log_path(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
    Json(request): Json<SetLogPathRequest>,
) -> Result<Json<SetLogPathResponse>, ApiError> {
    let file = request.file.trim();
    if file.is_empty() {
        return Err(ApiError::BadRequest("file must not be empty".to_string()));
    }
    let path = expand_tilde(std::path::Path::new(file));

    state.paths.set_log_path(&state.agent, &service, &path)?;
    let watcher = state
        .registry
        .activate(WatchKey::new(&state.agent, &service, &path));
    info!(service = %service, path = %path.display(), watcher = ?watcher, "log path saved");

    Ok(Json(SetLogPathResponse {
        success: true,
        service,
        file: path.display().to_string(),
        watcher,
    }))
}

// --- errors ---

#[derive(Debug, Deserialize)]
pub struct ErrorsParams {
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub order: SortOrder,
    pub service: Option<String>,
    pub agent: Option<String>,
}

fn default_limit() -> usize {
    200
}

pub async fn list_errors(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ErrorsParams>,
) -> Result<Json<Vec<ErrorEvent>>, ApiError> {
    let query = EventQuery {
        limit: params.limit.min(MAX_ERRORS_LIMIT),
        offset: params.offset,
        order: params.order,
        service: params.service.filter(|s| !s.is_empty()),
        agent: params.agent.filter(|s| !s.is_empty()),
    };
    Ok(Json(state.storage.query_events(&query).await?))
}

#[derive(Debug, Serialize)]
pub struct Counts {
    pub services: usize,
    pub webapps: usize,
    pub errors: u64,
}

pub async fn get_counts(State(state): State<Arc<AppState>>) -> Result<Json<Counts>, ApiError> {
    Ok(Json(Counts {
        services: state.paths.entries_for_agent(&state.agent).len(),
        webapps: state.paths.webapps().len(),
        errors: state.storage.count_events().await?,
    }))
}

pub async fn list_watchers(State(state): State<Arc<AppState>>) -> Json<Vec<WatcherStatus>> {
    Json(state.registry.snapshot())
}

// --- services ---

#[derive(Debug, Serialize)]
pub struct ServiceStatus {
    pub name: String,
    pub status: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServicesParams {
    /// Case-insensitive substring; empty lists every installed service.
    pub filter: Option<String>,
}

/// Installed services whose name matches the filter, plus every service that
/// already has a log path or a webapp, each with its OS status.
pub async fn list_services(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ServicesParams>,
) -> Json<Vec<ServiceStatus>> {
    let filter = params
        .filter
        .unwrap_or_else(|| state.service_filter.clone())
        .to_lowercase();

    let installed = match state.services.list().await {
        Ok(names) => names,
        Err(e) => {
            warn!(error = %e, "service discovery failed");
            Vec::new()
        }
    };

    let names: BTreeSet<String> = installed
        .into_iter()
        .filter(|name| name.to_lowercase().contains(&filter))
        .chain(
            state
                .paths
                .entries_for_agent(&state.agent)
                .into_iter()
                .map(|e| e.service),
        )
        .chain(state.paths.webapps().into_keys())
        .collect();

    let statuses = names.into_iter().map(|name| {
        let state = state.clone();
        async move {
            let status = match state.services.status(&name).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(service = %name, error = %e, "service status query failed");
                    UNKNOWN_STATUS.to_string()
                }
            };
            ServiceStatus { name, status }
        }
    });

    Json(join_all(statuses).await)
}

pub async fn service_action(
    State(state): State<Arc<AppState>>,
    Path((name, action)): Path<(String, String)>,
) -> Result<Json<ServiceStatus>, ApiError> {
    let action: ServiceAction = action.parse()?;
    state.services.apply(&name, action).await?;

    let status = match state.services.status(&name).await {
        Ok(status) => status,
        Err(e) => {
            warn!(service = %name, error = %e, "service status query failed");
            UNKNOWN_STATUS.to_string()
        }
    };
    Ok(Json(ServiceStatus { name, status }))
}

// --- webapps ---

pub async fn list_webapps(State(state): State<Arc<AppState>>) -> Json<BTreeMap<String, String>> {
    Json(state.paths.webapps())
}

#[derive(Debug, Deserialize)]
pub struct SetWebAppRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
pub struct WebAppResponse {
    pub ok: bool,
    pub service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

pub async fn set_webapp(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
    Json(request): Json<SetWebAppRequest>,
) -> Result<Json<WebAppResponse>, ApiError> {
    let url = request.url.trim();
    match reqwest::Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
        _ => return Err(ApiError::BadRequest(format!("invalid webapp url: {}", url))),
    }

    state.paths.set_webapp(&service, url)?;
    Ok(Json(WebAppResponse {
        ok: true,
        service,
        url: Some(url.to_string()),
    }))
}

pub async fn delete_webapp(
    State(state): State<Arc<AppState>>,
    Path(service): Path<String>,
) -> Result<Json<WebAppResponse>, ApiError> {
    if !state.paths.remove_webapp(&service)? {
        return Err(ApiError::NotFound(format!("webapp not found: {}", service)));
    }
    Ok(Json(WebAppResponse {
        ok: true,
        service,
        url: None,
    }))
}

pub async fn webapp_status(State(state): State<Arc<AppState>>) -> Json<BTreeMap<String, HealthStatus>> {
    Json(state.health.results().await)
}

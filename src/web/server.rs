use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use super::api::{
    delete_webapp, get_counts, get_log_path, health_check, list_errors, list_services,
    list_watchers, list_webapps, service_action, set_log_path, set_webapp, webapp_status,
};
use super::auth::require_api_key;
use super::AppState;
use crate::stream::{self, StreamState};

/// All routes. Everything but `/health` requires the api key.
pub fn build_router(state: Arc<AppState>, stream_state: Arc<StreamState>, api_key: Arc<str>) -> Router {
    let protected = Router::new()
        .route("/api/logpath/:service", get(get_log_path).post(set_log_path))
        .route("/api/errors", get(list_errors))
        .route("/api/counts", get(get_counts))
        .route("/api/watchers", get(list_watchers))
        .route("/api/services", get(list_services))
        .route("/api/service/:name/:action", post(service_action))
        .route("/api/webapps", get(list_webapps))
        .route("/api/webapp/:service", post(set_webapp).delete(delete_webapp))
        .route("/api/webappstatus", get(webapp_status))
        .with_state(state)
        .merge(stream::router(stream_state))
        .route_layer(middleware::from_fn_with_state(api_key, require_api_key));

    Router::new()
        .route("/health", get(health_check))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
}

/// Serves `app` on `listen` until `shutdown_rx` turns true.
pub async fn run_server(
    app: Router,
    listen: &str,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(listen).await?;
    tracing::info!(listen = %listener.local_addr()?, "web server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|&v| v).await;
            tracing::info!("web server shutting down");
        })
        .await
}

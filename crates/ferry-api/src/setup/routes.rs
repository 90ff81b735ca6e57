//! Route configuration

use crate::api_doc::ApiDoc;
use crate::constants::{API_PREFIX, MULTIPART_OVERHEAD_BYTES};
use crate::handlers::{dispatch, files, health};
use crate::state::AppState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Json, Router,
};
use ferry_core::Config;
use ferry_infra::request_id_middleware;
use std::sync::Arc;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/files", post(files::upload_file).get(files::list_files))
        .route("/files/presign", post(files::presign_upload))
        .route("/files/{id}", get(files::get_file))
        .route("/files/{id}/complete", post(files::complete_upload))
        .route("/files/{id}/content", get(files::get_file_content))
        .route("/files/{id}/extend", post(files::extend_retention))
        .route("/dispatch", post(dispatch::dispatch_tick))
}

pub fn setup_routes(config: &Config, state: Arc<AppState>) -> Router {
    let body_limit = config
        .max_file_size_bytes()
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        .nest(API_PREFIX, api_routes())
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .with_state(state)
        .route("/api/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .layer(axum::middleware::from_fn(request_id_middleware))
}

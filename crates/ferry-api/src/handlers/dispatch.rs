use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use ferry_core::AppError;
use ferry_worker::CommitReport;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::constants::DISPATCH_TOKEN_HEADER;
use crate::error::{ErrorResponse, HttpAppError};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct DispatchQuery {
    /// Hold the response until every commit started by this tick has finished
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DispatchResponse {
    pub reaped: usize,
    /// Presigned uploads found in staging or past their window this tick
    pub uploads_released: usize,
    pub in_flight: usize,
    pub available_slots: usize,
    pub dispatched: Vec<Uuid>,
    pub staging_cleared: usize,
    /// Only present with `wait=true`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<usize>,
}

fn presented_token(headers: &HeaderMap) -> Option<&str> {
    if let Some(value) = headers.get(DISPATCH_TOKEN_HEADER) {
        return value.to_str().ok();
    }
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn authorize(expected: Option<&str>, headers: &HeaderMap) -> Result<(), AppError> {
    let Some(expected) = expected else {
        return Ok(());
    };
    let matches = presented_token(headers)
        .map(|token| bool::from(token.as_bytes().ct_eq(expected.as_bytes())))
        .unwrap_or(false);
    if matches {
        Ok(())
    } else {
        Err(AppError::Unauthorized("Invalid dispatch token".to_string()))
    }
}

/// Run one dispatcher tick
///
/// Reaps stale claims, releases presigned uploads that have landed, starts commits
/// for eligible files within the concurrency caps and cleans up staged copies past
/// their grace window. Meant for an external
/// scheduler; protected by `DISPATCH_TOKEN` when configured.
#[utoipa::path(
    post,
    path = "/api/v0/dispatch",
    tag = "dispatch",
    params(DispatchQuery),
    responses(
        (status = 200, description = "Tick finished", body = DispatchResponse),
        (status = 401, description = "Invalid dispatch token", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, headers), fields(operation = "dispatch_tick"))]
pub async fn dispatch_tick(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<DispatchQuery>,
) -> Result<impl IntoResponse, HttpAppError> {
    authorize(state.config.dispatch_token.as_deref(), &headers)?;

    let report = state.dispatcher.tick().await?;
    let summary = report.summary();
    let mut response = DispatchResponse {
        reaped: summary.reaped,
        uploads_released: summary.uploads_released,
        in_flight: summary.in_flight,
        available_slots: summary.available_slots,
        dispatched: summary.dispatched,
        staging_cleared: summary.staging_cleared,
        completed: None,
        failed: None,
    };

    if query.wait {
        let reports = report.wait().await;
        response.completed = Some(
            reports
                .iter()
                .filter(|r| matches!(r, CommitReport::Completed { .. }))
                .count(),
        );
        response.failed = Some(
            reports
                .iter()
                .filter(|r| matches!(r, CommitReport::Failed { .. }))
                .count(),
        );
    }

    Ok(Json(response))
}

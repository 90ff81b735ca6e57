use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use ferry_core::models::{
    ExtendRetentionRequest, FileResponse, IngestResponse, PresignedUploadRequest,
    PresignedUploadResponse,
};
use ferry_core::AppError;
use ferry_services::{IngestRequest, PresignRequest};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::auth::OwnerContext;
use crate::constants::{DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT};
use crate::error::{ErrorResponse, HttpAppError, ValidatedJson};
use crate::state::AppState;
use crate::utils::upload::extract_upload_form;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    /// Page size, at most 200
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FileListResponse {
    pub files: Vec<FileResponse>,
    pub limit: i64,
    pub offset: i64,
}

/// Sweep the owner's expired files before answering a read.
async fn sweep_owner(state: &AppState, owner_id: Uuid) -> Result<(), HttpAppError> {
    state.sweeper.sweep(owner_id).await?;
    Ok(())
}

/// Kick off a dispatcher tick without holding the request.
fn dispatch_in_background(state: &Arc<AppState>) {
    let dispatcher = state.dispatcher.clone();
    tokio::spawn(async move {
        if let Err(e) = dispatcher.tick().await {
            tracing::error!(error = %e, "Dispatch after ingest failed");
        }
    });
}

/// Upload a file
///
/// The bytes are staged and a `pending` record is created. The commit to the
/// durable network happens in the background; poll the status route to follow it.
#[utoipa::path(
    post,
    path = "/api/v0/files",
    tag = "files",
    request_body(content = inline(Object), content_type = "multipart/form-data"),
    responses(
        (status = 202, description = "File staged and queued for commit", body = IngestResponse),
        (status = 400, description = "Invalid input", body = ErrorResponse),
        (status = 402, description = "Payment required", body = ErrorResponse),
        (status = 413, description = "File too large", body = ErrorResponse),
        (status = 503, description = "Staging unavailable", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, multipart), fields(owner_id = %owner.owner_id, operation = "upload_file"))]
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    owner: OwnerContext,
    multipart: Multipart,
) -> Result<impl IntoResponse, HttpAppError> {
    let start = Instant::now();
    let form = extract_upload_form(multipart).await?;

    let record = state
        .gateway
        .ingest(IngestRequest {
            owner_id: owner.owner_id,
            filename: form.filename,
            content_type: form.content_type,
            data: form.data,
            encrypted: form.encrypted,
            retention_units: form.retention_units,
        })
        .await?;

    if state.config.dispatch_on_ingest {
        dispatch_in_background(&state);
    }

    tracing::info!(
        file_id = %record.id,
        size_bytes = record.size_bytes,
        duration_ms = start.elapsed().as_secs_f64() * 1000.0,
        "Upload accepted"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            id: record.id,
            placeholder_id: record.placeholder_id,
            status: record.status,
        }),
    ))
}

/// Request a presigned staging upload
#[utoipa::path(
    post,
    path = "/api/v0/files/presign",
    tag = "files",
    request_body = PresignedUploadRequest,
    responses(
        (status = 201, description = "Pending record created", body = PresignedUploadResponse),
        (status = 400, description = "Invalid input or staging backend without presigning", body = ErrorResponse),
        (status = 413, description = "File too large", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, request), fields(owner_id = %owner.owner_id, operation = "presign_upload"))]
pub async fn presign_upload(
    State(state): State<Arc<AppState>>,
    owner: OwnerContext,
    ValidatedJson(request): ValidatedJson<PresignedUploadRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    request.validate()?;
    let size_bytes = i64::try_from(request.file_size)
        .map_err(|_| AppError::PayloadTooLarge("Declared file size is too large".to_string()))?;

    let presigned = state
        .gateway
        .ingest_presigned(PresignRequest {
            owner_id: owner.owner_id,
            filename: request.filename,
            content_type: request.content_type,
            size_bytes,
            encrypted: request.encrypted,
            retention_units: request.retention_units,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(PresignedUploadResponse {
            id: presigned.record.id,
            placeholder_id: presigned.record.placeholder_id,
            upload_url: presigned.upload_url,
            expires_in: presigned.expires_in.as_secs(),
        }),
    ))
}

/// Confirm a presigned upload
///
/// Releases the file for commit as soon as its bytes are in staging, without
/// waiting for the next dispatcher tick to notice them.
#[utoipa::path(
    post,
    path = "/api/v0/files/{id}/complete",
    tag = "files",
    params(("id" = Uuid, Path, description = "File ID")),
    responses(
        (status = 200, description = "Upload confirmed, file queued for commit", body = FileResponse),
        (status = 400, description = "Upload window expired", body = ErrorResponse),
        (status = 404, description = "File or staged upload not found", body = ErrorResponse),
        (status = 409, description = "File is not awaiting an upload", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state), fields(owner_id = %owner.owner_id, file_id = %id, operation = "complete_upload"))]
pub async fn complete_upload(
    State(state): State<Arc<AppState>>,
    owner: OwnerContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpAppError> {
    let record = state.gateway.confirm_upload(owner.owner_id, id).await?;
    Ok(Json(FileResponse::from(record)))
}

/// List the caller's files, newest first
#[utoipa::path(
    get,
    path = "/api/v0/files",
    tag = "files",
    params(ListQuery),
    responses(
        (status = 200, description = "Files of the caller", body = FileListResponse),
        (status = 401, description = "Missing owner", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state), fields(owner_id = %owner.owner_id, operation = "list_files"))]
pub async fn list_files(
    State(state): State<Arc<AppState>>,
    owner: OwnerContext,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, HttpAppError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    let offset = query.offset.unwrap_or(0).max(0);

    sweep_owner(&state, owner.owner_id).await?;
    let records = state
        .files
        .list_by_owner(owner.owner_id, limit, offset)
        .await?;

    Ok(Json(FileListResponse {
        files: records.into_iter().map(FileResponse::from).collect(),
        limit,
        offset,
    }))
}

/// Status of one file
#[utoipa::path(
    get,
    path = "/api/v0/files/{id}",
    tag = "files",
    params(("id" = Uuid, Path, description = "File ID")),
    responses(
        (status = 200, description = "File status", body = FileResponse),
        (status = 404, description = "File not found", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state), fields(owner_id = %owner.owner_id, file_id = %id))]
pub async fn get_file(
    State(state): State<Arc<AppState>>,
    owner: OwnerContext,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, HttpAppError> {
    sweep_owner(&state, owner.owner_id).await?;
    let record = state
        .files
        .get_for_owner(owner.owner_id, id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("File {} not found", id)))?;
    Ok(Json(FileResponse::from(record)))
}

/// Download file content
///
/// Served from staging while the staged copy exists, otherwise from the durable
/// network. A 503 with code `REPLICATION_DELAY` means the content is committed but
/// not yet readable; retry later.
#[utoipa::path(
    get,
    path = "/api/v0/files/{id}/content",
    tag = "files",
    params(("id" = Uuid, Path, description = "File ID")),
    responses(
        (status = 200, description = "File bytes", content_type = "application/octet-stream"),
        (status = 404, description = "File not found", body = ErrorResponse),
        (status = 409, description = "Not committed yet", body = ErrorResponse),
        (status = 503, description = "Still replicating", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state), fields(owner_id = %owner.owner_id, file_id = %id))]
pub async fn get_file_content(
    State(state): State<Arc<AppState>>,
    owner: OwnerContext,
    Path(id): Path<Uuid>,
) -> Result<Response, HttpAppError> {
    sweep_owner(&state, owner.owner_id).await?;
    let retrieved = state.retrieval.fetch(owner.owner_id, id).await?;

    let content_type = HeaderValue::from_str(&retrieved.record.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        retrieved.record.filename
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    let source = match retrieved.source {
        ferry_services::ContentSource::Staging => HeaderValue::from_static("staging"),
        ferry_services::ContentSource::Durable => HeaderValue::from_static("durable"),
    };

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
            (header::HeaderName::from_static("x-content-source"), source),
        ],
        retrieved.data,
    )
        .into_response())
}

/// Extend retention of a committed file
#[utoipa::path(
    post,
    path = "/api/v0/files/{id}/extend",
    tag = "files",
    params(("id" = Uuid, Path, description = "File ID")),
    request_body = ExtendRetentionRequest,
    responses(
        (status = 200, description = "Retention extended", body = FileResponse),
        (status = 400, description = "Invalid units", body = ErrorResponse),
        (status = 404, description = "File not found", body = ErrorResponse),
        (status = 409, description = "File not committed", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state, request), fields(owner_id = %owner.owner_id, file_id = %id))]
pub async fn extend_retention(
    State(state): State<Arc<AppState>>,
    owner: OwnerContext,
    Path(id): Path<Uuid>,
    ValidatedJson(request): ValidatedJson<ExtendRetentionRequest>,
) -> Result<impl IntoResponse, HttpAppError> {
    request.validate()?;
    let record = state
        .retention
        .extend(owner.owner_id, id, request.additional_units)
        .await?;
    Ok(Json(FileResponse::from(record)))
}

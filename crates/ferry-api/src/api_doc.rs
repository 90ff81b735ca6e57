//! OpenAPI document served at `/api/openapi.json`.

use utoipa::OpenApi;

use crate::error::ErrorResponse;
use crate::handlers;
use ferry_core::models;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Ferry API",
        version = "0.1.0",
        description = "Staged ingestion with background commit to a durable storage network. Uploads return immediately with a placeholder; commits run in the background under global and per-owner concurrency caps."
    ),
    paths(
        handlers::files::upload_file,
        handlers::files::presign_upload,
        handlers::files::complete_upload,
        handlers::files::list_files,
        handlers::files::get_file,
        handlers::files::get_file_content,
        handlers::files::extend_retention,
        handlers::dispatch::dispatch_tick,
        handlers::health::health_check,
        handlers::health::readiness_check,
    ),
    components(schemas(
        ErrorResponse,
        models::FileStatus,
        models::FileResponse,
        models::IngestResponse,
        models::PresignedUploadRequest,
        models::PresignedUploadResponse,
        models::ExtendRetentionRequest,
        handlers::files::FileListResponse,
        handlers::dispatch::DispatchResponse,
        handlers::health::HealthResponse,
    )),
    tags(
        (name = "files", description = "Upload, status, content and retention"),
        (name = "dispatch", description = "Commit scheduling trigger"),
        (name = "health", description = "Probes")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_every_file_route() {
        let spec = ApiDoc::openapi();
        for path in [
            "/api/v0/files",
            "/api/v0/files/presign",
            "/api/v0/files/{id}",
            "/api/v0/files/{id}/complete",
            "/api/v0/files/{id}/content",
            "/api/v0/files/{id}/extend",
            "/api/v0/dispatch",
        ] {
            assert!(spec.paths.paths.contains_key(path), "missing {}", path);
        }
    }
}

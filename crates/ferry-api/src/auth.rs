//! Caller identity
//!
//! Authentication happens upstream. The authenticator forwards the owner it resolved
//! in the `X-Owner-Id` header, and every file route is scoped to that owner.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use ferry_core::constants::OWNER_HEADER;
use ferry_core::AppError;
use uuid::Uuid;

use crate::error::HttpAppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnerContext {
    pub owner_id: Uuid,
}

impl<S> FromRequestParts<S> for OwnerContext
where
    S: Send + Sync,
{
    type Rejection = HttpAppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(OWNER_HEADER)
            .ok_or_else(|| AppError::Unauthorized("Missing X-Owner-Id header".to_string()))?;
        let owner_id = value
            .to_str()
            .ok()
            .and_then(|s| Uuid::parse_str(s.trim()).ok())
            .ok_or_else(|| AppError::Unauthorized("X-Owner-Id must be a UUID".to_string()))?;
        Ok(OwnerContext { owner_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(header: Option<&str>) -> Result<OwnerContext, HttpAppError> {
        let mut builder = Request::builder().uri("/");
        if let Some(value) = header {
            builder = builder.header(OWNER_HEADER, value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        OwnerContext::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn parses_owner_header() {
        let owner = Uuid::new_v4();
        let ctx = extract(Some(&owner.to_string())).await.unwrap();
        assert_eq!(ctx.owner_id, owner);
    }

    #[tokio::test]
    async fn missing_or_malformed_header_is_unauthorized() {
        for header in [None, Some("not-a-uuid")] {
            let HttpAppError(err) = extract(header).await.unwrap_err();
            assert!(matches!(err, AppError::Unauthorized(_)));
        }
    }
}

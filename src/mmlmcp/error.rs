//! Error types shared by the storage layers and the HTTP façades.
//!
//! Storage signals "not found" through `Ok(None)` / `Ok(false)`; [`StorageError`] is reserved for
//! real I/O or serialization failures. The HTTP layer converts everything into an [`ApiError`],
//! which renders as the `{error:{code,message}}` envelope both servers share.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Failures raised by [`ObjectStorage`](crate::object_storage::ObjectStorage) and
/// [`WorldStorage`](crate::world_storage::WorldStorage).
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A project or record id that cannot be mapped onto a file name.
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("At least one MML document is required")]
    MissingDocuments,
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors surfaced to HTTP callers.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// Envelope code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "VALIDATION_ERROR",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidKey(key) => {
                ApiError::Validation(format!("Invalid identifier: {}", key))
            }
            StorageError::MissingDocuments => ApiError::Validation(err.to_string()),
            other => {
                // Full detail stays in the local log; callers only see the sanitized message.
                log::error!("storage failure: {}", other);
                ApiError::Internal("Internal server error".to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });
        (self.status(), Json(body)).into_response()
    }
}

/// Result type for HTTP handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_and_statuses() {
        let validation = ApiError::Validation("Name and source are required".into());
        assert_eq!(validation.code(), "VALIDATION_ERROR");
        assert_eq!(validation.status(), StatusCode::BAD_REQUEST);

        let not_found = ApiError::NotFound("MML Object Instance not found".into());
        assert_eq!(not_found.code(), "NOT_FOUND");
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_io_failures_are_sanitized() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "/secret/path denied");
        let api: ApiError = StorageError::from(io).into();
        assert_eq!(api.code(), "INTERNAL_ERROR");
        assert!(!api.to_string().contains("/secret/path"));
    }

    #[test]
    fn test_missing_documents_is_validation() {
        let api: ApiError = StorageError::MissingDocuments.into();
        assert_eq!(api.code(), "VALIDATION_ERROR");
        assert_eq!(api.to_string(), "At least one MML document is required");
    }
}

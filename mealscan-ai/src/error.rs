//! Error types for mealscan-ai
//!
//! Every error reaching a client is rendered as `{"error": <code>, "msg": <text>}`.
//! Stage failures in blocking mode add the dish guessed so far.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::pipeline::InvalidModel;
use crate::services::job_manager::JobError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// No usable image part in an upload (400)
    #[error("no image uploaded")]
    MissingFile,

    /// Upload carried a file type outside the whitelist (400)
    #[error("unsupported file extension: {0}")]
    BadExtension(String),

    /// `job_id` query parameter absent (400)
    #[error("job_id is required")]
    MissingJobId,

    /// `job_id` malformed or unknown (404)
    #[error("unknown job id: {0}")]
    InvalidJobId(String),

    /// `model` outside the accepted name pattern (400)
    #[error(transparent)]
    InvalidModel(#[from] InvalidModel),

    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// A pipeline stage failed in blocking mode (400)
    #[error("{code}: {message}")]
    StageFailed {
        code: &'static str,
        message: String,
        dish: Option<String>,
    },

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// mealscan-common error
    #[error("Common error: {0}")]
    Common(#[from] mealscan_common::Error),
}

impl ApiError {
    /// Stable machine-readable code carried in the `error` field
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::MissingFile => "missing_file",
            ApiError::BadExtension(_) => "bad_extension",
            ApiError::MissingJobId => "missing_job_id",
            ApiError::InvalidJobId(_) => "invalid_job_id",
            ApiError::InvalidModel(_) => "invalid_model",
            ApiError::NotFound(_) => "not_found",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::StageFailed { code, .. } => code,
            ApiError::Internal(_) | ApiError::Io(_) | ApiError::Common(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingFile
            | ApiError::BadExtension(_)
            | ApiError::MissingJobId
            | ApiError::InvalidModel(_)
            | ApiError::BadRequest(_)
            | ApiError::StageFailed { .. } => StatusCode::BAD_REQUEST,
            ApiError::InvalidJobId(_) | ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) | ApiError::Io(_) | ApiError::Common(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::NoArtifacts => ApiError::MissingFile,
            JobError::NotFound(id) => ApiError::InvalidJobId(id),
            JobError::Storage(e) => ApiError::Common(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        if status.is_server_error() {
            tracing::error!(code, "Request failed: {}", self);
        }

        let body = match &self {
            ApiError::StageFailed { message, dish, .. } => json!({
                "error": code,
                "msg": message,
                "dish": dish,
            }),
            other => json!({
                "error": code,
                "msg": other.to_string(),
            }),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::MissingFile.status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::MissingJobId.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::InvalidJobId("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::Internal("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_stage_failure_uses_stage_code() {
        let err = ApiError::StageFailed {
            code: "ingredients_failed",
            message: "bad json".into(),
            dish: Some("ramen".into()),
        };
        assert_eq!(err.code(), "ingredients_failed");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_invalid_model_is_bad_request() {
        let err = ApiError::from(InvalidModel("../admin".into()));
        assert_eq!(err.code(), "invalid_model");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_job_error_conversion() {
        assert_eq!(ApiError::from(JobError::NoArtifacts).code(), "missing_file");
        assert_eq!(
            ApiError::from(JobError::NotFound("abc".into())).code(),
            "invalid_job_id"
        );
    }
}

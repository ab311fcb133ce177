use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use super::domain::ModerationStatus;
use super::moderation::ModerationError;
use crate::repository::RepositoryError;
use crate::storage::{StorageError, UploadRejection};

/// Typed outcome of every marketplace and account operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    InvalidInput(String),
    #[error("Status cannot change from {current} to {requested}")]
    InvalidTransition {
        current: ModerationStatus,
        requested: ModerationStatus,
    },
    #[error("Rejection reason is required")]
    MissingReason,
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    UpstreamFailure(String),
    #[error("{0}")]
    Internal(String),
    #[error(transparent)]
    Repository(RepositoryError),
}

/// Coarse classification used for the wire code and HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Forbidden,
    InvalidInput,
    InvalidTransition,
    MissingReason,
    Unauthorized,
    UpstreamFailure,
    Internal,
}

impl ErrorKind {
    pub const fn code(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::Forbidden => "FORBIDDEN",
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::InvalidTransition => "INVALID_TRANSITION",
            ErrorKind::MissingReason => "MISSING_REASON",
            ErrorKind::Unauthorized => "UNAUTHORIZED",
            ErrorKind::UpstreamFailure => "UPSTREAM_FAILURE",
            ErrorKind::Internal => "INTERNAL",
        }
    }

    pub const fn status(self) -> StatusCode {
        match self {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::InvalidInput
            | ErrorKind::InvalidTransition
            | ErrorKind::MissingReason => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorKind::UpstreamFailure => StatusCode::BAD_GATEWAY,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ServiceError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::NotFound(_) | ServiceError::Repository(RepositoryError::NotFound) => {
                ErrorKind::NotFound
            }
            ServiceError::Conflict(_) | ServiceError::Repository(RepositoryError::Conflict) => {
                ErrorKind::Conflict
            }
            ServiceError::Forbidden(_) => ErrorKind::Forbidden,
            ServiceError::InvalidInput(_) => ErrorKind::InvalidInput,
            ServiceError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            ServiceError::MissingReason => ErrorKind::MissingReason,
            ServiceError::Unauthorized(_) => ErrorKind::Unauthorized,
            ServiceError::UpstreamFailure(_) => ErrorKind::UpstreamFailure,
            ServiceError::Internal(_)
            | ServiceError::Repository(RepositoryError::Unavailable(_)) => ErrorKind::Internal,
        }
    }
}

impl From<RepositoryError> for ServiceError {
    fn from(value: RepositoryError) -> Self {
        Self::Repository(value)
    }
}

impl From<ModerationError> for ServiceError {
    fn from(value: ModerationError) -> Self {
        match value {
            ModerationError::InvalidTransition { current, requested } => {
                Self::InvalidTransition { current, requested }
            }
            ModerationError::MissingReason => Self::MissingReason,
        }
    }
}

impl From<UploadRejection> for ServiceError {
    fn from(value: UploadRejection) -> Self {
        Self::InvalidInput(value.to_string())
    }
}

impl From<StorageError> for ServiceError {
    fn from(value: StorageError) -> Self {
        Self::UpstreamFailure(value.to_string())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        match kind {
            ErrorKind::Internal | ErrorKind::UpstreamFailure => {
                tracing::error!(error = %self, code = kind.code(), "request failed");
            }
            _ => tracing::debug!(error = %self, code = kind.code(), "request rejected"),
        }

        let message = match &self {
            ServiceError::Internal(_)
            | ServiceError::Repository(RepositoryError::Unavailable(_)) => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let payload = match &self {
            ServiceError::InvalidTransition { current, requested } => json!({
                "error": message,
                "code": kind.code(),
                "current": current,
                "requested": requested,
            }),
            _ => json!({
                "error": message,
                "code": kind.code(),
            }),
        };

        (kind.status(), Json(payload)).into_response()
    }
}

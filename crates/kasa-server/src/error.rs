use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Every failure the core can report. Each variant maps to one HTTP status
/// and one stable `code` string at the transport boundary.
#[derive(Debug, Error)]
pub enum Error {
    #[error("server is already initialized")]
    AlreadyInitialized,

    #[error("server is not initialized")]
    NotInitialized,

    #[error("server is sealed")]
    Sealed,

    #[error("{0}")]
    MalformedInput(String),

    #[error("unseal keys failed verification")]
    VerificationFailed,

    #[error("no such path: {0}")]
    NotFound(String),

    #[error("permission denied")]
    PermissionDenied,

    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    #[error("storage failure: {0:#}")]
    StorageFailure(#[from] anyhow::Error),

    #[error("internal invariant violated: {0}")]
    InternalInvariantViolation(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedInput(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::AlreadyInitialized => StatusCode::CONFLICT,
            Self::NotInitialized => StatusCode::NOT_IMPLEMENTED,
            Self::Sealed => StatusCode::SERVICE_UNAVAILABLE,
            Self::MalformedInput(_) => StatusCode::BAD_REQUEST,
            Self::VerificationFailed => StatusCode::UNPROCESSABLE_ENTITY,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::UnsupportedConfiguration(_)
            | Self::StorageFailure(_)
            | Self::InternalInvariantViolation(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyInitialized => "already_initialized",
            Self::NotInitialized => "not_initialized",
            Self::Sealed => "sealed",
            Self::MalformedInput(_) => "bad_request",
            Self::VerificationFailed => "verification_failed",
            Self::NotFound(_) => "not_found",
            Self::PermissionDenied => "permission_denied",
            Self::UnsupportedConfiguration(_) => "unsupported_configuration",
            Self::StorageFailure(_) => "storage_failure",
            Self::InternalInvariantViolation(_) => "internal",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!(error = %self, code = self.code(), "internal error");
        }
        (
            status,
            Json(json!({"errors": [self.to_string()], "code": self.code()})),
        )
            .into_response()
    }
}

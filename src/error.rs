// Error taxonomy for the diagnostics service

use axum::http::StatusCode;
use thiserror::Error;

/// Every failure a diagnostic request can end in
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiagError {
    #[error("Invalid '{field}' parameter: {message}")]
    Validation { field: &'static str, message: String },

    #[error("Unsupported method '{0}'")]
    UnsupportedMethod(String),

    #[error("HTTP method {0} is not allowed, use GET")]
    MethodNotAllowed(String),

    #[error("Could not resolve {0}")]
    Resolution(String),

    #[error("Host unreachable: {0}")]
    Unreachable(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Insufficient privileges: {0}")]
    Permission(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using DiagError
pub type DiagResult<T> = Result<T, DiagError>;

impl DiagError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        DiagError::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn missing(field: &'static str) -> Self {
        DiagError::Validation {
            field,
            message: "value is required".to_string(),
        }
    }

    /// HTTP status this error is reported with
    pub fn status_code(&self) -> StatusCode {
        match self {
            DiagError::Validation { .. } => StatusCode::BAD_REQUEST,
            DiagError::UnsupportedMethod(_) => StatusCode::NOT_FOUND,
            DiagError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            DiagError::Resolution(_) | DiagError::Unreachable(_) => StatusCode::BAD_GATEWAY,
            DiagError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            DiagError::Permission(_) | DiagError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Short machine-friendly name, used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            DiagError::Validation { .. } => "validation",
            DiagError::UnsupportedMethod(_) => "unsupported_method",
            DiagError::MethodNotAllowed(_) => "method_not_allowed",
            DiagError::Resolution(_) => "resolution",
            DiagError::Unreachable(_) => "unreachable",
            DiagError::Timeout(_) => "timeout",
            DiagError::Permission(_) => "permission",
            DiagError::Internal(_) => "internal",
        }
    }
}

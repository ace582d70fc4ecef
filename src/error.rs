//! Error types for the lookup service.
//!
//! This module provides the structured errors surfaced to API clients,
//! with HTTP status code mappings for the REST surface.

/// Result type for service operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Service errors with structured context.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Malformed request: bad JSON, unknown operator, non-integer skip/limit.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Access token mismatch, or lease denial on renew.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Unknown record URI or subscription id.
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation not supported for this namespace.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Request deadline exceeded.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Store failure or format error after validation.
    #[error("internal error: {0}")]
    Internal(String),

    /// Lease capacity exhausted.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl Error {
    /// Get the appropriate HTTP status code for this error.
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::Forbidden(_) => 403,
            Self::NotFound(_) => 404,
            Self::NotSupported(_) => 405,
            Self::Timeout(_) => 408,
            Self::Internal(_) => 500,
            Self::ServiceUnavailable(_) => 503,
        }
    }

    /// Get a client-safe error message (doesn't leak internal details).
    pub fn client_message(&self) -> String {
        match self {
            Self::Internal(_) => "internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

//! Error taxonomy for remote task service calls

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    /// Connectivity problem or service-side failure worth retrying
    #[error("transient network error: {0}")]
    Transient(String),

    /// Service asked us to back off; retriable after the given delay
    #[error("rate limited by service")]
    RateLimited { retry_after: Option<Duration> },

    /// Session credentials rejected; fatal for the current sync run
    #[error("authorization failed: {0}")]
    Unauthorized(String),

    /// The supplied delta cursor was rejected as invalid or expired
    #[error("delta cursor rejected by service")]
    InvalidCursor,

    /// The request itself was malformed; retrying will not help
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl ApiError {
    /// Whether retrying the same call can succeed
    pub fn is_retriable(&self) -> bool {
        matches!(self, ApiError::Transient(_) | ApiError::RateLimited { .. })
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

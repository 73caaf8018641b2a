use thiserror::Error;

/// Error kinds surfaced by the core (spec §7). Each variant maps to exactly
/// one HTTP status at the server boundary; `healarr-server::errors::AppError`
/// owns that mapping.
#[derive(Error, Debug)]
pub enum HealarrError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Path traversal, null bytes, or a non-absolute path reached the
    /// filesystem browser or a path-mapper reload (spec §4.6, P6).
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// Bulk operation where some ids resolved and others did not. Carries the
    /// count that *did* succeed so the caller can still report `{retried: N}`.
    #[error("Partial success: {succeeded} of {requested} ids resolved")]
    PartialSuccess { succeeded: usize, requested: usize },
}

pub type Result<T> = std::result::Result<T, HealarrError>;

impl HealarrError {
    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::Internal(format!("event store unavailable: {}", msg.into()))
    }
}

//! Application-wide error types.

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conversion minutes limit exceeded: {used}/{limit} used")]
    QuotaExceeded { used: i64, limit: i64 },

    #[error("File size {size} exceeds limit {limit} for tier {tier}")]
    SizeExceeded { size: i64, limit: i64, tier: String },

    #[error("Input file not found: {0}")]
    FileNotFound(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Illegal state transition: cannot go from {from} to {to}")]
    IllegalState { from: String, to: String },

    #[error("Failed to enqueue task: {0}")]
    EnqueueFailed(String),

    #[error("Unknown operation type: {0}")]
    UnknownOperation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Media tool error: {0}")]
    Media(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn illegal_state(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self::IllegalState {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    pub fn media(msg: impl Into<String>) -> Self {
        Self::Media(msg.into())
    }

    /// Machine-readable code surfaced at the service boundary.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            Self::SizeExceeded { .. } => "SIZE_EXCEEDED",
            Self::FileNotFound(_) => "FILE_NOT_FOUND",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::IllegalState { .. } => "ILLEGAL_STATE",
            Self::EnqueueFailed(_) => "ENQUEUE_FAILED",
            Self::UnknownOperation(_) => "OP_UNKNOWN",
            Self::Media(_) => "PROCESSING_ERROR",
            _ => "INTERNAL",
        }
    }

    /// Advisory retryability, recorded alongside job errors for UIs.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database(_)
                | Self::Io(_)
                | Self::EnqueueFailed(_)
                | Self::Storage(_)
                | Self::Media(_)
        )
    }
}

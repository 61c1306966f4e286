use thiserror::Error;

/// Main error type for the pool scout
#[derive(Error, Debug)]
pub enum ScoutError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // Pool data source errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Pool data source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Pool data fetch timed out after {secs}s")]
    SourceTimeout { secs: u64 },

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // Portfolio errors
    #[error("Position not found: {0}")]
    PositionNotFound(i64),

    #[error("Invalid state transition: from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl ScoutError {
    /// Transient failures degrade a cycle phase instead of failing the process.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ScoutError::Http(_) | ScoutError::SourceUnavailable(_) | ScoutError::SourceTimeout { .. }
        )
    }

    /// Errors raised by the storage layer.
    pub fn is_persistence(&self) -> bool {
        matches!(self, ScoutError::Database(_) | ScoutError::Migration(_))
    }
}

/// Result type alias for ScoutError
pub type Result<T> = std::result::Result<T, ScoutError>;

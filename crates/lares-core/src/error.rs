use thiserror::Error;

/// Application-wide error types for Lares.
#[derive(Error, Debug)]
pub enum AppError {
    /// A referenced entity (platform, query, run, listing, group) does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The query already has an active run, or the row is already being processed.
    #[error("already active: {0}")]
    AlreadyActive(String),

    /// A subsystem (dedup, synthesis) is disabled via persisted feature flags.
    #[error("feature disabled: {0}")]
    FeatureDisabled(&'static str),

    /// A conditional status transition found the row in an unexpected state.
    ///
    /// Concurrent workers treat this as "skip, don't overwrite".
    #[error("conflict on {entity} {id}: expected {expected}, found {actual}")]
    Conflict {
        entity: &'static str,
        id: String,
        expected: String,
        actual: String,
    },

    /// Fetch collaborator failed transiently (network, bot detection).
    /// Retryable via an explicit retry action, never automatically.
    #[error("transient fetch failure: {0}")]
    TransientFetch(String),

    /// The target page or listing disappeared from the source. No retry.
    #[error("target not found: {0}")]
    TargetNotFound(String),

    /// The collaborator returned a payload we could not interpret.
    #[error("parse failure: {0}")]
    ParseFailure(String),

    /// Synthesis collaborator explicitly declined the group.
    #[error("synthesis rejected: {0}")]
    SynthesisRejected(String),

    /// Request timed out.
    #[error("request timed out after {0} seconds")]
    Timeout(u64),

    /// Network/connection error.
    #[error("network error: {0}")]
    NetworkError(String),

    /// Database operation failed.
    #[error("database error: {0}")]
    DatabaseError(String),

    /// Invalid or missing configuration.
    #[error("config error: {0}")]
    ConfigError(String),

    /// JSON serialization/deserialization failed.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth an explicit retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::TransientFetch(_) | AppError::Timeout(_) | AppError::NetworkError(_)
        )
    }

    /// Conflict shorthand used by services after a failed conditional update.
    pub fn conflict(
        entity: &'static str,
        id: impl ToString,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        AppError::Conflict {
            entity,
            id: id.to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        AppError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

use thiserror::Error;

/// Result type for tierce operations.
pub type Result<T> = std::result::Result<T, TierceError>;

/// Errors that can occur in the tier selection and budget accounting engine.
#[derive(Debug, Error)]
pub enum TierceError {
    /// The referenced API has never been provisioned
    #[error("API not configured: {0}")]
    ApiNotFound(String),

    /// A threshold update referenced a tier that does not exist in the catalog
    #[error("tier '{tier}' not found for API '{api}'")]
    TierNotFound { api: String, tier: String },

    /// The catalog for the API exists but contains no tiers
    #[error("no tiers available for API: {0}")]
    NoTiersAvailable(String),

    /// Malformed threshold configuration, rejected before any state mutation
    #[error("invalid threshold configuration: {0}")]
    Validation(String),

    /// The usage record append failed after the spend was already applied.
    /// The spend stays counted; this is surfaced for observability, not retried.
    #[error("usage record write failed after spend was applied: {0}")]
    Record(String),

    /// Seed configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

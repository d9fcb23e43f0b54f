use thiserror::Error;

/// Main error type for the trading swarm
#[derive(Error, Debug)]
pub enum SwarmError {
    // Caller errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    // Risk gating errors
    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    #[error("Kill switch active: {0}")]
    KillSwitchActive(String),

    #[error("Market closed: {0}")]
    MarketClosed(String),

    #[error("Insufficient buying power: {0}")]
    InsufficientBuyingPower(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    // Upstream provider errors
    #[error("Provider error: {0}")]
    Provider(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for SwarmError
pub type Result<T> = std::result::Result<T, SwarmError>;

impl SwarmError {
    /// Abstract error kind consumed by the HTTP edge for status mapping.
    pub fn kind(&self) -> &'static str {
        match self {
            SwarmError::InvalidInput(_) => "INVALID_INPUT",
            SwarmError::Unauthorized(_) => "UNAUTHORIZED",
            SwarmError::NotFound(_) => "NOT_FOUND",
            SwarmError::Conflict(_) => "CONFLICT",
            SwarmError::RateLimited(_) => "RATE_LIMITED",
            SwarmError::PolicyViolation(_) => "POLICY_VIOLATION",
            SwarmError::KillSwitchActive(_) => "KILL_SWITCH_ACTIVE",
            SwarmError::MarketClosed(_) => "MARKET_CLOSED",
            SwarmError::InsufficientBuyingPower(_) => "INSUFFICIENT_BUYING_POWER",
            SwarmError::NotSupported(_) => "NOT_SUPPORTED",
            SwarmError::Provider(_) | SwarmError::Http(_) => "PROVIDER_ERROR",
            _ => "INTERNAL_ERROR",
        }
    }

    /// Whether a provider call that failed with this error may be retried.
    /// `UNAUTHORIZED` and `INVALID_INPUT` are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SwarmError::RateLimited(_) | SwarmError::Provider(_) | SwarmError::Http(_)
        )
    }
}

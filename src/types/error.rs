//! Error types for tiprelay

/// Main error type for tiprelay operations
#[derive(Debug, thiserror::Error)]
pub enum TipRelayError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Network failure, timeout, rate limit or 5xx from a gateway.
    /// Retried by the polling loop on its next cycle.
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// The provider refused the request and repeating it will not help.
    #[error("Provider rejected request: {0}")]
    ProviderRejected(String),

    /// Optimistic version check still failing after local retries
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TipRelayError {
    /// Whether the event that produced this error should be retried on the
    /// next poll cycle instead of being marked processed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ProviderUnavailable(_) | Self::Conflict(_) | Self::Database(_)
        )
    }

    /// Short label used in structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::ProviderUnavailable(_) => "provider_unavailable",
            Self::ProviderRejected(_) => "provider_rejected",
            Self::Conflict(_) => "conflict",
            Self::Database(_) => "database",
            Self::Config(_) => "config",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<rusqlite::Error> for TipRelayError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for TipRelayError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(format!("JSON error: {}", err))
    }
}

impl From<reqwest::Error> for TipRelayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            return Self::ProviderUnavailable(err.to_string());
        }
        match err.status() {
            Some(status) if status.as_u16() == 429 || status.is_server_error() => {
                Self::ProviderUnavailable(err.to_string())
            }
            Some(_) => Self::ProviderRejected(err.to_string()),
            None => Self::ProviderUnavailable(err.to_string()),
        }
    }
}

/// Result type alias for tiprelay operations
pub type Result<T> = std::result::Result<T, TipRelayError>;

//! Error types for the loading engine.

use std::time::Duration;

/// Load errors.
///
/// Every failure a subscriber can observe is one of these. Only
/// [`LoadError::Cancelled`] reports `is_cancelled() == true`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadError {
    /// The subscription (or every subscription for the key) was cancelled.
    #[error("load cancelled")]
    Cancelled,

    /// The resource identifier cannot be turned into a key.
    #[error("invalid resource identifier: {identifier} - {reason}")]
    InvalidKey { identifier: String, reason: String },

    /// The origin does not have the resource.
    #[error("resource not found: {key}")]
    NotFound { key: String },

    /// Transport failure or unexpected status from the origin.
    #[error("network error: {message}")]
    Network { message: String },

    /// Rate limit exceeded.
    #[error("rate limited: retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    /// The origin answered with neither a payload nor "not modified".
    #[error("invalid response: {message}")]
    InvalidResponse { message: String },

    /// A subscriber's transform rejected the bytes.
    #[error("transform failed for {key}: {message}")]
    Transform { key: String, message: String },

    /// Cache backend failure (disk I/O, corrupt record).
    #[error("cache error: {message}")]
    Cache { message: String },

    /// Configuration or environment error.
    #[error("configuration error: {message}")]
    Config { message: String },
}

impl LoadError {
    /// The `isCancelled` flag handed to failure continuations.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether the fetch that produced this error may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Network { .. })
    }

    /// Whether the error came from talking to the origin.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::Network { .. }
                | Self::RateLimited { .. }
                | Self::InvalidResponse { .. }
        )
    }

    pub(crate) fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for LoadError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network {
            message: err.to_string(),
        }
    }
}

/// Result type for loading operations.
pub type LoadResult<T> = Result<T, LoadError>;

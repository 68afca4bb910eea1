//! Provider error taxonomy
//!
//! Every provider call resolves into one of these kinds; the retry policy
//! hangs off the kind, not the channel. Transient failures go back to the
//! job queue, permanent ones dead-letter and surface as alerts.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// 401/403. The channel needs re-authorization; never retried.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The external id does not exist on the channel. Never retried.
    #[error("Not found: {0}")]
    NotFound(String),

    /// 429. Retried after backoff.
    #[error("Rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// 5xx. Retried.
    #[error("Server error: {0}")]
    Server(String),

    /// Connection refused, DNS failure, reset. Retried.
    #[error("Network error: {0}")]
    Network(String),

    /// Call exceeded its deadline. Retried.
    #[error("Provider call timed out")]
    Timeout,

    /// 400. The payload is wrong, retrying cannot help.
    #[error("Validation error: {0}")]
    Validation(String),

    /// No live connection or missing credentials. Surfaces as a
    /// channel_disconnected alert; never retried.
    #[error("Provider not connected")]
    NotConnected,
}

impl ProviderError {
    /// Whether the job queue should retry after this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. }
                | ProviderError::Server(_)
                | ProviderError::Network(_)
                | ProviderError::Timeout
        )
    }

    /// Whether this failure means the channel itself is unusable, as opposed
    /// to one bad request. Drives the channel_disconnected alert.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ProviderError::Auth(_) | ProviderError::NotConnected)
    }

    /// Map an HTTP status to the error kind, for adapters that speak HTTP.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            401 | 403 => ProviderError::Auth(message.into()),
            404 | 410 => ProviderError::NotFound(message.into()),
            429 => ProviderError::RateLimited { retry_after: None },
            400..=499 => ProviderError::Validation(message.into()),
            500..=599 => ProviderError::Server(message.into()),
            other => ProviderError::Server(format!("unexpected status {other}")),
        }
    }
}

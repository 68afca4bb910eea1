//! Error types for StockSync
//!
//! One workspace-level error enum wrapping the failure sources the services
//! share: database, Redis, serialization, configuration. Provider-call errors
//! have their own taxonomy in `stocksync-provider` because their retry policy
//! is richer than anything here.

use thiserror::Error;

/// Main error type for StockSync operations
#[derive(Debug, Error)]
pub enum Error {
    /// Database errors (PostgreSQL via sqlx)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Redis errors (queues, dedupe KV, poll cursors)
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Webhook signature rejected
    #[error("Invalid webhook signature: {0}")]
    Signature(String),

    /// Generic errors
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Result type alias for StockSync operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Validation("sku is required".to_string());
        assert_eq!(err.to_string(), "Validation error: sku is required");
    }

    #[test]
    fn test_error_conversion() {
        let sql_err = sqlx::Error::RowNotFound;
        let our_err: Error = sql_err.into();
        assert!(matches!(our_err, Error::Database(_)));
    }
}

//! # StockSync Provider Layer
//!
//! The abstract contract the engine uses to talk to external commerce
//! systems, plus the plumbing every adapter shares: a per-channel rate
//! limiter, a circuit breaker, and a registry holding one live provider per
//! channel. Concrete SDK adapters live outside this workspace; tests use the
//! in-memory mock.

pub mod breaker;
pub mod error;
pub mod mock;
pub mod rate_limit;
pub mod registry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use stocksync_domain::ChannelType;

pub use breaker::{BreakerState, ChannelBreaker};
pub use error::ProviderError;
pub use rate_limit::RateLimitedProvider;
pub use registry::{ProviderFactory, ProviderRegistry};

/// Health of a channel connection as reported by the adapter.
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub connected: bool,
    pub last_checked: DateTime<Utc>,
    pub error: Option<String>,
}

impl HealthStatus {
    pub fn connected() -> Self {
        Self {
            connected: true,
            last_checked: Utc::now(),
            error: None,
        }
    }

    pub fn disconnected(error: impl Into<String>) -> Self {
        Self {
            connected: false,
            last_checked: Utc::now(),
            error: Some(error.into()),
        }
    }
}

/// A product as the external channel sees it.
#[derive(Debug, Clone)]
pub struct ExternalProduct {
    pub external_id: String,
    pub quantity: i64,
    pub name: Option<String>,
    pub sku: Option<String>,
}

/// One completed POS transaction, used by the polling fallback.
#[derive(Debug, Clone)]
pub struct PosTransaction {
    pub transaction_id: String,
    pub completed_at: DateTime<Utc>,
    pub lines: Vec<PosTransactionLine>,
}

#[derive(Debug, Clone)]
pub struct PosTransactionLine {
    pub external_product_id: String,
    pub quantity_sold: i64,
}

/// Per-channel adapter contract.
///
/// One instance per channel; the instance owns connection state and is safe
/// to share across tasks. Webhook payload normalization is NOT part of this
/// contract; the Watcher owns typed per-channel decoders.
#[async_trait]
pub trait Provider: Send + Sync {
    fn channel_type(&self) -> ChannelType;

    /// Establish a connection using the channel's opaque credentials blob.
    async fn connect(&self, credentials: &str) -> Result<(), ProviderError>;

    async fn disconnect(&self);

    async fn health_check(&self) -> HealthStatus;

    async fn get_product(&self, external_id: &str) -> Result<ExternalProduct, ProviderError>;

    async fn update_stock(&self, external_id: &str, quantity: i64) -> Result<(), ProviderError>;

    /// Completed transactions since `since`, newest last. Only meaningful for
    /// POS channels; the default is empty.
    async fn recent_transactions(
        &self,
        _since: DateTime<Utc>,
    ) -> Result<Vec<PosTransaction>, ProviderError> {
        Ok(Vec::new())
    }
}

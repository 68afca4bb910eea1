//! Per-channel provider rate limiting
//!
//! Channel APIs allow on the order of 50-100 requests per minute. Each live
//! provider is wrapped in a direct rate limiter; callers await quota instead
//! of eating 429s.

use std::num::NonZeroU32;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

use crate::{ExternalProduct, HealthStatus, PosTransaction, Provider, ProviderError};
use stocksync_domain::ChannelType;

/// Wraps a provider so every outbound call first waits for quota.
///
/// Health checks are deliberately not limited: they are cheap, infrequent,
/// and must not queue behind a burst of stock pushes.
pub struct RateLimitedProvider {
    inner: Arc<dyn Provider>,
    limiter: DefaultDirectRateLimiter,
}

impl RateLimitedProvider {
    pub fn new(inner: Arc<dyn Provider>, requests_per_minute: u32) -> Self {
        let per_minute = NonZeroU32::new(requests_per_minute.max(1)).expect("nonzero");
        let limiter = RateLimiter::direct(Quota::per_minute(per_minute));

        Self { inner, limiter }
    }
}

#[async_trait]
impl Provider for RateLimitedProvider {
    fn channel_type(&self) -> ChannelType {
        self.inner.channel_type()
    }

    async fn connect(&self, credentials: &str) -> Result<(), ProviderError> {
        self.limiter.until_ready().await;
        self.inner.connect(credentials).await
    }

    async fn disconnect(&self) {
        self.inner.disconnect().await;
    }

    async fn health_check(&self) -> HealthStatus {
        self.inner.health_check().await
    }

    async fn get_product(&self, external_id: &str) -> Result<ExternalProduct, ProviderError> {
        self.limiter.until_ready().await;
        self.inner.get_product(external_id).await
    }

    async fn update_stock(&self, external_id: &str, quantity: i64) -> Result<(), ProviderError> {
        self.limiter.until_ready().await;
        self.inner.update_stock(external_id, quantity).await
    }

    async fn recent_transactions(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<PosTransaction>, ProviderError> {
        self.limiter.until_ready().await;
        self.inner.recent_transactions(since).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProvider;

    #[tokio::test]
    async fn test_calls_pass_through() {
        let mock = Arc::new(MockProvider::new(ChannelType::OnlineStore));
        mock.seed_product("ext-1", 40).await;

        let limited = RateLimitedProvider::new(mock.clone(), 600);

        let product = limited.get_product("ext-1").await.unwrap();
        assert_eq!(product.quantity, 40);

        limited.update_stock("ext-1", 35).await.unwrap();
        assert_eq!(mock.stock_of("ext-1").await, Some(35));
    }

    #[tokio::test]
    async fn test_generous_quota_does_not_block_burst() {
        let mock = Arc::new(MockProvider::new(ChannelType::Pos));
        mock.seed_product("ext-1", 10).await;

        // 6000/min leaves a 100-call burst well inside quota.
        let limited = RateLimitedProvider::new(mock, 6000);
        for _ in 0..20 {
            limited.get_product("ext-1").await.unwrap();
        }
    }
}

//! Provider registry
//!
//! Holds one live, rate-limited provider per channel. Providers are created
//! lazily through the injected factory (dependency injection at process boot;
//! no runtime module loading) and connected with the channel's credentials on
//! first use.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::breaker::ChannelBreaker;
use crate::rate_limit::RateLimitedProvider;
use crate::{Provider, ProviderError};
use stocksync_domain::Channel;

/// Creates a provider instance for a channel. Implemented by the adapter
/// package in production and by the mock factory in tests.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, channel: &Channel) -> Result<Arc<dyn Provider>, ProviderError>;
}

pub struct ProviderRegistry {
    factory: Arc<dyn ProviderFactory>,
    providers: RwLock<HashMap<Uuid, Arc<dyn Provider>>>,
    breaker: ChannelBreaker,
    rate_limit_per_minute: u32,
}

impl ProviderRegistry {
    pub fn new(
        factory: Arc<dyn ProviderFactory>,
        rate_limit_per_minute: u32,
        breaker_threshold: u32,
        breaker_cooldown: Duration,
    ) -> Self {
        Self {
            factory,
            providers: RwLock::new(HashMap::new()),
            breaker: ChannelBreaker::new(breaker_threshold, breaker_cooldown),
            rate_limit_per_minute,
        }
    }

    /// The live provider for a channel, creating and connecting it on first
    /// use. Inactive channels never get a provider.
    pub async fn provider_for(
        &self,
        channel: &Channel,
    ) -> Result<Arc<dyn Provider>, ProviderError> {
        if !channel.is_active {
            return Err(ProviderError::NotConnected);
        }

        {
            let providers = self.providers.read().await;
            if let Some(provider) = providers.get(&channel.id) {
                return Ok(Arc::clone(provider));
            }
        }

        let mut providers = self.providers.write().await;
        // Another task may have created it while we waited for the lock.
        if let Some(provider) = providers.get(&channel.id) {
            return Ok(Arc::clone(provider));
        }

        let raw = self.factory.create(channel)?;
        raw.connect(&channel.credentials).await?;

        let provider: Arc<dyn Provider> = Arc::new(RateLimitedProvider::new(
            raw,
            self.rate_limit_per_minute,
        ));

        info!(
            channel_id = %channel.id,
            channel_type = %channel.channel_type,
            "provider connected"
        );

        providers.insert(channel.id, Arc::clone(&provider));
        Ok(provider)
    }

    /// Disconnect and forget a channel's provider, e.g. on deactivation.
    pub async fn drop_channel(&self, channel_id: Uuid) {
        let provider = {
            let mut providers = self.providers.write().await;
            providers.remove(&channel_id)
        };

        if let Some(provider) = provider {
            provider.disconnect().await;
            self.breaker.reset(channel_id).await;
            info!(%channel_id, "provider disconnected");
        }
    }

    pub fn breaker(&self) -> &ChannelBreaker {
        &self.breaker
    }
}

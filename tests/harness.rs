//! Shared test harness
//!
//! Builds a complete tenant engine on in-memory fakes: memory repository,
//! memory KV, scripted mock providers for a POS + online store + delivery
//! platform trio, and the real bus pumps running. Tests drive webhooks in
//! and observe providers, repository rows, and bus events.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use stocksync_config::{
    AlertConfig, DatabaseConfig, EngineConfig, GuardianConfig, ProviderConfig, QueueConfig,
    RedisConfig, SyncConfig, WatcherConfig,
};
use stocksync_domain::{
    Channel, ChannelType, Product, ProductChannelMapping, StockChange, WebhookJob,
};
use stocksync_engine::repository::MemoryRepository;
use stocksync_engine::{KvStore, MemoryKv, Repository, TenantEngine};
use stocksync_provider::ProviderRegistry;
use stocksync_provider::mock::{MockProvider, MockProviderFactory};

pub struct ChannelHandle {
    pub id: Uuid,
    pub mock: Arc<MockProvider>,
}

pub struct Harness {
    pub tenant_id: Uuid,
    pub product_id: Uuid,
    pub repo: Arc<MemoryRepository>,
    pub engine: TenantEngine,
    pub shutdown: CancellationToken,
    pub pos: ChannelHandle,
    pub online: ChannelHandle,
    pub delivery: ChannelHandle,
}

/// Engine configuration used by every scenario; no environment needed.
pub fn engine_config() -> EngineConfig {
    EngineConfig {
        database: DatabaseConfig {
            url: "postgresql://unused-in-tests".into(),
            max_connections: 1,
            min_connections: 1,
            acquire_timeout_secs: 5,
            idle_timeout_secs: 60,
            max_lifetime_secs: 600,
        },
        redis: RedisConfig {
            url: "redis://unused-in-tests".into(),
        },
        queue: QueueConfig {
            max_attempts: 3,
            webhook_max_attempts: 5,
            backoff_base_ms: 1_000,
            backoff_max_ms: 60_000,
            concurrency: 4,
            completed_ttl_secs: 86_400,
            completed_max: 100,
            failed_ttl_secs: 604_800,
        },
        watcher: WatcherConfig {
            dedupe_ttl_secs: 3_600,
            pos_poll_interval_secs: 30,
        },
        sync: SyncConfig {
            provider_timeout_secs: 5,
            full_sync_parallelism: 4,
        },
        guardian: GuardianConfig {
            reconcile_interval_secs: 900,
            drift_auto_repair_threshold: 5,
        },
        alert: AlertConfig {
            check_interval_secs: 300,
            low_stock_margin: 5,
        },
        provider: ProviderConfig {
            rate_limit_per_minute: 6_000,
            breaker_threshold: 5,
            breaker_cooldown_secs: 60,
        },
        bus_capacity: 256,
    }
}

impl Harness {
    /// Fresh tenant with product WH-001 {currentStock: 100, bufferStock: 10}
    /// mapped on all three channels.
    pub fn new() -> Self {
        Self::with_repo_and_product(Arc::new(MemoryRepository::new()), 100, 10)
    }

    pub fn with_product(current_stock: i64, buffer_stock: i64) -> Self {
        Self::with_repo_and_product(Arc::new(MemoryRepository::new()), current_stock, buffer_stock)
    }

    pub fn with_repo_and_product(
        repo: Arc<MemoryRepository>,
        current_stock: i64,
        buffer_stock: i64,
    ) -> Self {
        let tenant_id = Uuid::new_v4();
        let product_id = Uuid::new_v4();

        repo.insert_product(Product {
            id: product_id,
            tenant_id,
            sku: "WH-001".into(),
            name: "Wireless Headphones".into(),
            current_stock,
            buffer_stock,
            metadata: Value::Null,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });

        let factory = Arc::new(MockProviderFactory::new());
        let mut channels = Vec::new();
        for (channel_type, name, external_id, age_secs) in [
            (ChannelType::Pos, "POS", "12345", 0),
            (ChannelType::OnlineStore, "ONLINE", "web-12345", 60),
            (ChannelType::DeliveryPlatform, "DELIVERY", "del-12345", 120),
        ] {
            let channel = Channel {
                id: Uuid::new_v4(),
                tenant_id,
                channel_type,
                name: name.into(),
                credentials: "{}".into(),
                is_active: true,
                external_instance_id: None,
                webhook_secret: None,
                last_sync_at: None,
                deactivated_at: None,
                created_at: Utc::now() + chrono::Duration::seconds(age_secs),
            };
            let mock = Arc::new(MockProvider::new(channel_type));
            factory.register(channel.id, mock.clone());
            repo.insert_channel(channel.clone());
            repo.insert_mapping(ProductChannelMapping {
                id: Uuid::new_v4(),
                product_id,
                channel_id: channel.id,
                external_id: external_id.into(),
                external_sku: None,
                created_at: Utc::now(),
            });
            channels.push(ChannelHandle {
                id: channel.id,
                mock,
            });
        }

        let registry = Arc::new(ProviderRegistry::new(
            factory,
            6_000,
            5,
            Duration::from_secs(60),
        ));
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let engine = TenantEngine::new(
            tenant_id,
            repo.clone() as Arc<dyn Repository>,
            registry,
            kv,
            &engine_config(),
        );

        let shutdown = CancellationToken::new();
        let _pumps = engine.spawn_pumps(shutdown.clone());

        let delivery = channels.pop().unwrap();
        let online = channels.pop().unwrap();
        let pos = channels.pop().unwrap();

        Self {
            tenant_id,
            product_id,
            repo,
            engine,
            shutdown,
            pos,
            online,
            delivery,
        }
    }

    /// Feed a webhook into the watcher as the queue consumer would.
    pub async fn webhook(
        &self,
        channel: &ChannelHandle,
        channel_type: ChannelType,
        event_type: &str,
        payload: Value,
    ) -> Vec<StockChange> {
        let job = WebhookJob::new(self.tenant_id, channel.id, channel_type, event_type, payload);
        self.engine.watcher.process(&job).await.expect("webhook processing")
    }

    /// Wait for a condition with a deadline; pumps run asynchronously.
    pub async fn wait_until<F, Fut>(&self, mut cond: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while tokio::time::Instant::now() < deadline {
            if cond().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cond().await
    }

    /// Let in-flight pump work settle (used before asserting absence).
    pub async fn settle(&self) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

//! Repository contract
//!
//! The thin typed read/write surface the engine calls. Every method is scoped
//! by tenant id; nothing here can reach across the isolation boundary. The
//! Postgres implementation serves production, the in-memory one serves tests
//! and the degraded in-process path.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use stocksync_common::Result;
use stocksync_domain::{
    Alert, AlertRule, AlertType, Channel, Product, ProductChannelMapping, SyncEvent, SyncStatus,
    Tenant,
};

pub use memory::MemoryRepository;
pub use postgres::PgRepository;

#[async_trait]
pub trait Repository: Send + Sync {
    // --- Tenants ---

    async fn get_all_tenant_ids(&self) -> Result<Vec<Uuid>>;

    async fn get_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>>;

    // --- Channels ---

    async fn get_channel(&self, tenant_id: Uuid, channel_id: Uuid) -> Result<Option<Channel>>;

    /// Active channels, oldest first. The ordering matters: the guardian's
    /// source-of-truth fallback takes the oldest active channel.
    async fn get_active_channels(&self, tenant_id: Uuid) -> Result<Vec<Channel>>;

    /// Look up a channel by the instance id carried on inbound webhooks.
    async fn find_channel_by_instance(
        &self,
        tenant_id: Uuid,
        external_instance_id: &str,
    ) -> Result<Option<Channel>>;

    /// Stamp `last_sync_at = now` after a successful push.
    async fn touch_channel_sync(&self, tenant_id: Uuid, channel_id: Uuid) -> Result<()>;

    // --- Products ---

    async fn get_product(&self, tenant_id: Uuid, product_id: Uuid) -> Result<Option<Product>>;

    async fn get_products(&self, tenant_id: Uuid) -> Result<Vec<Product>>;

    /// Persist canonical stock. Values are clamped to zero; stock is never
    /// negative.
    async fn update_product_stock(
        &self,
        tenant_id: Uuid,
        product_id: Uuid,
        new_stock: i64,
    ) -> Result<()>;

    /// Stock update and its audit row in one transaction, so a crash between
    /// the two never leaves an orphan.
    async fn apply_stock_update(
        &self,
        tenant_id: Uuid,
        product_id: Uuid,
        new_stock: i64,
        event: &SyncEvent,
    ) -> Result<()>;

    // --- Mappings ---

    async fn get_mapping(
        &self,
        tenant_id: Uuid,
        channel_id: Uuid,
        external_id: &str,
    ) -> Result<Option<ProductChannelMapping>>;

    async fn get_mappings_for_product(
        &self,
        tenant_id: Uuid,
        product_id: Uuid,
    ) -> Result<Vec<ProductChannelMapping>>;

    async fn get_mappings_for_channel(
        &self,
        tenant_id: Uuid,
        channel_id: Uuid,
    ) -> Result<Vec<ProductChannelMapping>>;

    // --- Sync events ---

    async fn create_sync_event(&self, event: &SyncEvent) -> Result<()>;

    /// Advance a sync event's status. Transitions must follow the monotonic
    /// lifecycle; anything else is a validation error.
    async fn update_sync_event_status(
        &self,
        tenant_id: Uuid,
        event_id: Uuid,
        status: SyncStatus,
        error_message: Option<&str>,
    ) -> Result<()>;

    /// Delete terminal sync events older than the cutoff. Returns rows removed.
    async fn prune_sync_events(&self, tenant_id: Uuid, older_than: DateTime<Utc>) -> Result<u64>;

    // --- Alerts ---

    async fn create_alert(&self, alert: &Alert) -> Result<()>;

    /// Whether an unread alert already exists for the de-duplication key
    /// (tenant, type, product?, channel?).
    async fn alert_exists(
        &self,
        tenant_id: Uuid,
        alert_type: AlertType,
        product_id: Option<Uuid>,
        channel_id: Option<Uuid>,
    ) -> Result<bool>;

    /// Mark matching unread alerts read (the condition resolved on its own).
    /// Returns how many were resolved.
    async fn resolve_alerts(
        &self,
        tenant_id: Uuid,
        alert_type: AlertType,
        product_id: Option<Uuid>,
        channel_id: Option<Uuid>,
    ) -> Result<u64>;

    async fn get_alert_rules(&self, tenant_id: Uuid) -> Result<Vec<AlertRule>>;
}

//! In-memory repository
//!
//! Same contract and the same invariants as the Postgres implementation
//! monotonic sync-event status, clamped stock, unread-alert de-duplication
//! keys), over plain maps. Drives the test suites and the in-process
//! fallback engine.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use stocksync_common::{Error, Result};
use stocksync_domain::{
    Alert, AlertRule, AlertType, Channel, Product, ProductChannelMapping, SyncEvent,
    SyncEventType, SyncStatus, Tenant,
};

use super::Repository;

#[derive(Default)]
struct Inner {
    tenants: HashMap<Uuid, Tenant>,
    channels: HashMap<Uuid, Channel>,
    products: HashMap<Uuid, Product>,
    mappings: Vec<ProductChannelMapping>,
    sync_events: Vec<SyncEvent>,
    alerts: Vec<Alert>,
    rules: HashMap<Uuid, Vec<AlertRule>>,
}

#[derive(Default)]
pub struct MemoryRepository {
    inner: Mutex<Inner>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    // --- seeding (test support) ---

    pub fn insert_tenant(&self, tenant: Tenant) {
        let mut inner = self.inner.lock().expect("repo lock");
        inner.tenants.insert(tenant.id, tenant);
    }

    pub fn insert_channel(&self, channel: Channel) {
        let mut inner = self.inner.lock().expect("repo lock");
        inner.channels.insert(channel.id, channel);
    }

    pub fn insert_product(&self, product: Product) {
        let mut inner = self.inner.lock().expect("repo lock");
        inner.products.insert(product.id, product);
    }

    pub fn insert_mapping(&self, mapping: ProductChannelMapping) {
        let mut inner = self.inner.lock().expect("repo lock");
        inner.mappings.push(mapping);
    }

    pub fn set_alert_rules(&self, tenant_id: Uuid, rules: Vec<AlertRule>) {
        let mut inner = self.inner.lock().expect("repo lock");
        inner.rules.insert(tenant_id, rules);
    }

    pub fn set_channel_active(&self, channel_id: Uuid, active: bool) {
        let mut inner = self.inner.lock().expect("repo lock");
        if let Some(channel) = inner.channels.get_mut(&channel_id) {
            channel.is_active = active;
            channel.deactivated_at = (!active).then(Utc::now);
        }
    }

    // --- inspection (test support) ---

    pub fn sync_events(&self) -> Vec<SyncEvent> {
        let inner = self.inner.lock().expect("repo lock");
        inner.sync_events.clone()
    }

    pub fn sync_events_of_type(&self, event_type: SyncEventType) -> Vec<SyncEvent> {
        let inner = self.inner.lock().expect("repo lock");
        inner
            .sync_events
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        let inner = self.inner.lock().expect("repo lock");
        inner.alerts.clone()
    }

    pub fn unread_alerts(&self, alert_type: AlertType) -> Vec<Alert> {
        let inner = self.inner.lock().expect("repo lock");
        inner
            .alerts
            .iter()
            .filter(|a| a.alert_type == alert_type && !a.is_read)
            .cloned()
            .collect()
    }

    pub fn mark_alert_read(&self, alert_id: Uuid) {
        let mut inner = self.inner.lock().expect("repo lock");
        if let Some(alert) = inner.alerts.iter_mut().find(|a| a.id == alert_id) {
            alert.is_read = true;
        }
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn get_all_tenant_ids(&self) -> Result<Vec<Uuid>> {
        let inner = self.inner.lock().expect("repo lock");
        let mut tenants: Vec<&Tenant> = inner.tenants.values().collect();
        tenants.sort_by_key(|t| t.created_at);
        Ok(tenants.iter().map(|t| t.id).collect())
    }

    async fn get_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>> {
        let inner = self.inner.lock().expect("repo lock");
        Ok(inner.tenants.get(&tenant_id).cloned())
    }

    async fn get_channel(&self, tenant_id: Uuid, channel_id: Uuid) -> Result<Option<Channel>> {
        let inner = self.inner.lock().expect("repo lock");
        Ok(inner
            .channels
            .get(&channel_id)
            .filter(|c| c.tenant_id == tenant_id)
            .cloned())
    }

    async fn get_active_channels(&self, tenant_id: Uuid) -> Result<Vec<Channel>> {
        let inner = self.inner.lock().expect("repo lock");
        let mut channels: Vec<Channel> = inner
            .channels
            .values()
            .filter(|c| c.tenant_id == tenant_id && c.is_active)
            .cloned()
            .collect();
        channels.sort_by_key(|c| c.created_at);
        Ok(channels)
    }

    async fn find_channel_by_instance(
        &self,
        tenant_id: Uuid,
        external_instance_id: &str,
    ) -> Result<Option<Channel>> {
        let inner = self.inner.lock().expect("repo lock");
        Ok(inner
            .channels
            .values()
            .find(|c| {
                c.tenant_id == tenant_id
                    && c.is_active
                    && c.external_instance_id.as_deref() == Some(external_instance_id)
            })
            .cloned())
    }

    async fn touch_channel_sync(&self, tenant_id: Uuid, channel_id: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().expect("repo lock");
        if let Some(channel) = inner.channels.get_mut(&channel_id) {
            if channel.tenant_id == tenant_id {
                channel.last_sync_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn get_product(&self, tenant_id: Uuid, product_id: Uuid) -> Result<Option<Product>> {
        let inner = self.inner.lock().expect("repo lock");
        Ok(inner
            .products
            .get(&product_id)
            .filter(|p| p.tenant_id == tenant_id)
            .cloned())
    }

    async fn get_products(&self, tenant_id: Uuid) -> Result<Vec<Product>> {
        let inner = self.inner.lock().expect("repo lock");
        let mut products: Vec<Product> = inner
            .products
            .values()
            .filter(|p| p.tenant_id == tenant_id)
            .cloned()
            .collect();
        products.sort_by(|a, b| a.sku.cmp(&b.sku));
        Ok(products)
    }

    async fn update_product_stock(
        &self,
        tenant_id: Uuid,
        product_id: Uuid,
        new_stock: i64,
    ) -> Result<()> {
        let mut inner = self.inner.lock().expect("repo lock");
        if let Some(product) = inner.products.get_mut(&product_id) {
            if product.tenant_id == tenant_id {
                product.current_stock = new_stock.max(0);
                product.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn apply_stock_update(
        &self,
        tenant_id: Uuid,
        product_id: Uuid,
        new_stock: i64,
        event: &SyncEvent,
    ) -> Result<()> {
        // Single lock hold = the in-memory transaction.
        let mut inner = self.inner.lock().expect("repo lock");
        if let Some(product) = inner.products.get_mut(&product_id) {
            if product.tenant_id == tenant_id {
                product.current_stock = new_stock.max(0);
                product.updated_at = Utc::now();
            }
        }
        inner.sync_events.push(event.clone());
        Ok(())
    }

    async fn get_mapping(
        &self,
        tenant_id: Uuid,
        channel_id: Uuid,
        external_id: &str,
    ) -> Result<Option<ProductChannelMapping>> {
        let inner = self.inner.lock().expect("repo lock");
        let channel_owned = inner
            .channels
            .get(&channel_id)
            .map(|c| c.tenant_id == tenant_id)
            .unwrap_or(false);
        if !channel_owned {
            return Ok(None);
        }

        Ok(inner
            .mappings
            .iter()
            .find(|m| m.channel_id == channel_id && m.external_id == external_id)
            .cloned())
    }

    async fn get_mappings_for_product(
        &self,
        tenant_id: Uuid,
        product_id: Uuid,
    ) -> Result<Vec<ProductChannelMapping>> {
        let inner = self.inner.lock().expect("repo lock");
        let product_owned = inner
            .products
            .get(&product_id)
            .map(|p| p.tenant_id == tenant_id)
            .unwrap_or(false);
        if !product_owned {
            return Ok(Vec::new());
        }

        Ok(inner
            .mappings
            .iter()
            .filter(|m| m.product_id == product_id)
            .cloned()
            .collect())
    }

    async fn get_mappings_for_channel(
        &self,
        tenant_id: Uuid,
        channel_id: Uuid,
    ) -> Result<Vec<ProductChannelMapping>> {
        let inner = self.inner.lock().expect("repo lock");
        let channel_owned = inner
            .channels
            .get(&channel_id)
            .map(|c| c.tenant_id == tenant_id)
            .unwrap_or(false);
        if !channel_owned {
            return Ok(Vec::new());
        }

        Ok(inner
            .mappings
            .iter()
            .filter(|m| m.channel_id == channel_id)
            .cloned()
            .collect())
    }

    async fn create_sync_event(&self, event: &SyncEvent) -> Result<()> {
        let mut inner = self.inner.lock().expect("repo lock");
        inner.sync_events.push(event.clone());
        Ok(())
    }

    async fn update_sync_event_status(
        &self,
        tenant_id: Uuid,
        event_id: Uuid,
        status: SyncStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().expect("repo lock");
        let event = inner
            .sync_events
            .iter_mut()
            .find(|e| e.id == event_id && e.tenant_id == tenant_id);

        match event {
            Some(event) if event.status.can_transition_to(status) => {
                event.status = status;
                if let Some(message) = error_message {
                    event.error_message = Some(message.to_string());
                }
                Ok(())
            }
            _ => Err(Error::Validation(format!(
                "invalid status transition for sync event {event_id} -> {}",
                status.as_str()
            ))),
        }
    }

    async fn prune_sync_events(&self, tenant_id: Uuid, older_than: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.inner.lock().expect("repo lock");
        let before = inner.sync_events.len();
        inner.sync_events.retain(|e| {
            !(e.tenant_id == tenant_id && e.created_at < older_than && e.status.is_terminal())
        });
        Ok((before - inner.sync_events.len()) as u64)
    }

    async fn create_alert(&self, alert: &Alert) -> Result<()> {
        let mut inner = self.inner.lock().expect("repo lock");
        inner.alerts.push(alert.clone());
        Ok(())
    }

    async fn alert_exists(
        &self,
        tenant_id: Uuid,
        alert_type: AlertType,
        product_id: Option<Uuid>,
        channel_id: Option<Uuid>,
    ) -> Result<bool> {
        let inner = self.inner.lock().expect("repo lock");
        Ok(inner.alerts.iter().any(|a| {
            a.tenant_id == tenant_id
                && a.alert_type == alert_type
                && !a.is_read
                && a.product_id == product_id
                && a.channel_id == channel_id
        }))
    }

    async fn resolve_alerts(
        &self,
        tenant_id: Uuid,
        alert_type: AlertType,
        product_id: Option<Uuid>,
        channel_id: Option<Uuid>,
    ) -> Result<u64> {
        let mut inner = self.inner.lock().expect("repo lock");
        let mut resolved = 0;
        for alert in inner.alerts.iter_mut() {
            if alert.tenant_id == tenant_id
                && alert.alert_type == alert_type
                && !alert.is_read
                && alert.product_id == product_id
                && alert.channel_id == channel_id
            {
                alert.is_read = true;
                resolved += 1;
            }
        }
        Ok(resolved)
    }

    async fn get_alert_rules(&self, tenant_id: Uuid) -> Result<Vec<AlertRule>> {
        let inner = self.inner.lock().expect("repo lock");
        Ok(inner.rules.get(&tenant_id).cloned().unwrap_or_default())
    }
}

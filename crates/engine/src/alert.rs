//! Alert: surfaced conditions with de-duplication
//!
//! Evaluates low-stock, channel-disconnect, and sync-error conditions from
//! scheduled sweeps and from bus events. The core contract is the unread set:
//! at most one unread alert per (tenant, type, product?, channel?) key. When
//! a condition resolves on its own the prior unread alert is marked read:
//! resolving creates nothing, and an operator marking an alert read does NOT
//! count as the condition resolving.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::EventBus;
use crate::metrics;
use crate::repository::Repository;
use stocksync_common::Result;
use stocksync_domain::{Alert, AlertRule, AlertType, EngineEvent, Product};
use stocksync_provider::ProviderRegistry;

/// Counts from one scheduled sweep.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlertSweep {
    pub low_stock_created: usize,
    pub disconnects_created: usize,
    pub resolved: usize,
}

pub struct AlertEngine {
    tenant_id: Uuid,
    repo: Arc<dyn Repository>,
    bus: EventBus,
    registry: Arc<ProviderRegistry>,
    /// Read-through rules cache; `None` means next read hits the repository.
    rules_cache: RwLock<Option<Arc<Vec<AlertRule>>>>,
    low_stock_margin: i64,
    health_timeout: Duration,
}

impl AlertEngine {
    pub fn new(
        tenant_id: Uuid,
        repo: Arc<dyn Repository>,
        bus: EventBus,
        registry: Arc<ProviderRegistry>,
        low_stock_margin: i64,
        health_timeout: Duration,
    ) -> Self {
        Self {
            tenant_id,
            repo,
            bus,
            registry,
            rules_cache: RwLock::new(None),
            low_stock_margin,
            health_timeout,
        }
    }

    async fn rules(&self) -> Result<Arc<Vec<AlertRule>>> {
        {
            let cache = self.rules_cache.read().await;
            if let Some(rules) = cache.as_ref() {
                return Ok(Arc::clone(rules));
            }
        }

        let rules = Arc::new(self.repo.get_alert_rules(self.tenant_id).await?);
        *self.rules_cache.write().await = Some(Arc::clone(&rules));
        Ok(rules)
    }

    /// Drop the cached rules; the next evaluation re-reads the repository.
    pub async fn invalidate_rules(&self) {
        *self.rules_cache.write().await = None;
        debug!(tenant_id = %self.tenant_id, "alert rules cache invalidated");
    }

    /// Create an alert unless an unread one already exists for the key.
    /// Returns whether a new alert was created.
    pub async fn raise(
        &self,
        alert_type: AlertType,
        message: String,
        product_id: Option<Uuid>,
        channel_id: Option<Uuid>,
        metadata: serde_json::Value,
    ) -> Result<bool> {
        if self
            .repo
            .alert_exists(self.tenant_id, alert_type, product_id, channel_id)
            .await?
        {
            debug!(
                alert_type = alert_type.as_str(),
                "unread alert already exists, not duplicating"
            );
            return Ok(false);
        }

        let alert = Alert::new(
            self.tenant_id,
            alert_type,
            message.clone(),
            product_id,
            channel_id,
            metadata.clone(),
        );
        self.repo.create_alert(&alert).await?;

        metrics::ALERTS_CREATED_TOTAL
            .with_label_values(&[&self.tenant_id.to_string(), alert_type.as_str()])
            .inc();
        info!(
            alert_type = alert_type.as_str(),
            message, "alert created"
        );

        self.bus.publish(EngineEvent::AlertTriggered {
            tenant_id: self.tenant_id,
            alert_type,
            message,
            product_id,
            channel_id,
            metadata,
        });
        Ok(true)
    }

    fn threshold_for(&self, product: &Product, rules: &[AlertRule]) -> i64 {
        rules
            .iter()
            .filter(|rule| rule.applies_to_product(product.id))
            .map(|rule| rule.threshold)
            .max()
            .unwrap_or(product.buffer_stock + self.low_stock_margin)
    }

    /// Low-stock check for one product. Creates an alert below the threshold,
    /// resolves the standing alert once stock recovers. Returns whether a new
    /// alert was created.
    pub async fn evaluate_product(&self, product: &Product) -> Result<bool> {
        let rules = self.rules().await?;
        let threshold = self.threshold_for(product, &rules);

        if product.current_stock <= threshold {
            self.raise(
                AlertType::LowStock,
                format!(
                    "Low stock for {}: {} remaining (threshold {})",
                    product.sku, product.current_stock, threshold
                ),
                Some(product.id),
                None,
                json!({
                    "sku": product.sku,
                    "current_stock": product.current_stock,
                    "buffer_stock": product.buffer_stock,
                    "threshold": threshold,
                }),
            )
            .await
        } else {
            let resolved = self
                .repo
                .resolve_alerts(self.tenant_id, AlertType::LowStock, Some(product.id), None)
                .await?;
            if resolved > 0 {
                info!(sku = product.sku, "stock recovered, low-stock alert resolved");
            }
            Ok(false)
        }
    }

    /// Sweep all products (or a rule-scoped subset) for low stock.
    pub async fn check_low_stock(&self) -> Result<usize> {
        let products = self.repo.get_products(self.tenant_id).await?;

        let mut created = 0;
        for product in &products {
            if self.evaluate_product(product).await? {
                created += 1;
            }
        }
        Ok(created)
    }

    /// Health-check every active channel; alert on disconnect, resolve (and
    /// announce reconnection) on recovery.
    pub async fn check_channels(&self) -> Result<usize> {
        let channels = self.repo.get_active_channels(self.tenant_id).await?;

        let mut created = 0;
        for channel in &channels {
            let connected = match self.registry.provider_for(channel).await {
                Ok(provider) => {
                    match tokio::time::timeout(self.health_timeout, provider.health_check()).await
                    {
                        Ok(status) => status.connected,
                        Err(_) => false,
                    }
                }
                Err(e) => {
                    warn!(channel_id = %channel.id, error = %e, "provider unavailable");
                    false
                }
            };

            if connected {
                let resolved = self
                    .repo
                    .resolve_alerts(
                        self.tenant_id,
                        AlertType::ChannelDisconnected,
                        None,
                        Some(channel.id),
                    )
                    .await?;
                if resolved > 0 {
                    info!(channel_id = %channel.id, "channel healthy again");
                    self.bus.publish(EngineEvent::ChannelConnected {
                        tenant_id: self.tenant_id,
                        channel_id: channel.id,
                    });
                }
            } else if self
                .raise(
                    AlertType::ChannelDisconnected,
                    format!("Channel '{}' is not responding", channel.name),
                    None,
                    Some(channel.id),
                    json!({ "channel_name": channel.name, "channel_type": channel.channel_type }),
                )
                .await?
            {
                created += 1;
                self.bus.publish(EngineEvent::ChannelDisconnected {
                    tenant_id: self.tenant_id,
                    channel_id: channel.id,
                });
            }
        }
        Ok(created)
    }

    /// Scheduled sweep: low stock plus channel health.
    pub async fn run_checks(&self) -> Result<AlertSweep> {
        let low_stock_created = self.check_low_stock().await?;
        let disconnects_created = self.check_channels().await?;

        Ok(AlertSweep {
            low_stock_created,
            disconnects_created,
            resolved: 0,
        })
    }

    /// React to a bus event.
    pub async fn handle_event(&self, event: &EngineEvent) -> Result<()> {
        match event {
            EngineEvent::StockUpdated { product_id, .. } => {
                if let Some(product) = self.repo.get_product(self.tenant_id, *product_id).await? {
                    self.evaluate_product(&product).await?;
                }
            }

            EngineEvent::SyncFailed {
                channel_id,
                product_id,
                error,
                retryable: false,
                ..
            } => {
                self.raise(
                    AlertType::SyncError,
                    format!("Sync failed permanently: {error}"),
                    *product_id,
                    *channel_id,
                    json!({ "error": error }),
                )
                .await?;
            }

            EngineEvent::ChannelDisconnected { channel_id, .. } => {
                // Raised by Sync when a push hits an auth failure. The alert
                // key carries only the channel.
                self.raise(
                    AlertType::ChannelDisconnected,
                    "Channel connection lost".to_string(),
                    None,
                    Some(*channel_id),
                    json!({}),
                )
                .await?;
            }

            EngineEvent::AlertRulesInvalidated { .. } => {
                self.invalidate_rules().await;
            }

            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryRepository;
    use chrono::Utc;
    use stocksync_domain::{Channel, ChannelType};
    use stocksync_provider::mock::{MockProvider, MockProviderFactory};

    struct Fixture {
        alerts: AlertEngine,
        repo: Arc<MemoryRepository>,
        tenant_id: Uuid,
    }

    fn fixture() -> Fixture {
        let tenant_id = Uuid::new_v4();
        let repo = Arc::new(MemoryRepository::new());
        let factory = Arc::new(MockProviderFactory::new());
        let registry = Arc::new(ProviderRegistry::new(
            factory,
            6000,
            5,
            Duration::from_secs(60),
        ));

        let alerts = AlertEngine::new(
            tenant_id,
            repo.clone() as Arc<dyn Repository>,
            EventBus::new(64),
            registry,
            5,
            Duration::from_secs(5),
        );

        Fixture {
            alerts,
            repo,
            tenant_id,
        }
    }

    fn product(tenant_id: Uuid, current: i64, buffer: i64) -> Product {
        Product {
            id: Uuid::new_v4(),
            tenant_id,
            sku: "WH-001".into(),
            name: "Headphones".into(),
            current_stock: current,
            buffer_stock: buffer,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_low_stock_alert_created_once() {
        let f = fixture();
        let p = product(f.tenant_id, 5, 20);
        f.repo.insert_product(p.clone());

        // 5 <= 20 + 5: alert.
        assert!(f.alerts.evaluate_product(&p).await.unwrap());

        let unread = f.repo.unread_alerts(AlertType::LowStock);
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].metadata["current_stock"], 5);
        assert_eq!(unread[0].metadata["buffer_stock"], 20);

        // Identical condition again: nothing new.
        assert!(!f.alerts.evaluate_product(&p).await.unwrap());
        assert_eq!(f.repo.unread_alerts(AlertType::LowStock).len(), 1);
    }

    #[tokio::test]
    async fn test_recovery_resolves_without_new_alert() {
        let f = fixture();
        let mut p = product(f.tenant_id, 5, 20);
        f.repo.insert_product(p.clone());

        assert!(f.alerts.evaluate_product(&p).await.unwrap());

        // Stock restored above threshold: the unread alert flips to read.
        p.current_stock = 80;
        assert!(!f.alerts.evaluate_product(&p).await.unwrap());

        assert!(f.repo.unread_alerts(AlertType::LowStock).is_empty());
        assert_eq!(f.repo.alerts().len(), 1, "no new alert on resolution");
    }

    #[tokio::test]
    async fn test_read_is_not_resolved() {
        let f = fixture();
        let p = product(f.tenant_id, 5, 20);
        f.repo.insert_product(p.clone());

        assert!(f.alerts.evaluate_product(&p).await.unwrap());
        let alert_id = f.repo.unread_alerts(AlertType::LowStock)[0].id;

        // Operator marks it read while the condition persists.
        f.repo.mark_alert_read(alert_id);

        // Re-evaluation creates a NEW alert: read is acknowledgement, not
        // resolution.
        assert!(f.alerts.evaluate_product(&p).await.unwrap());
        assert_eq!(f.repo.alerts().len(), 2);
        assert_eq!(f.repo.unread_alerts(AlertType::LowStock).len(), 1);
    }

    #[tokio::test]
    async fn test_rule_threshold_overrides_default() {
        let f = fixture();
        let p = product(f.tenant_id, 40, 0);
        f.repo.insert_product(p.clone());

        // Default threshold would be 0 + 5; stock 40 is fine.
        assert!(!f.alerts.evaluate_product(&p).await.unwrap());

        // A tenant rule with threshold 50 makes 40 low.
        f.repo.set_alert_rules(
            f.tenant_id,
            vec![AlertRule {
                id: Uuid::new_v4(),
                tenant_id: f.tenant_id,
                threshold: 50,
                product_ids: None,
                channel_ids: None,
                enabled: true,
                created_at: Utc::now(),
            }],
        );
        f.alerts.invalidate_rules().await;

        assert!(f.alerts.evaluate_product(&p).await.unwrap());
    }

    #[tokio::test]
    async fn test_channel_health_alert_and_recovery() {
        let f = fixture();
        let channel_id = Uuid::new_v4();

        let channel = Channel {
            id: channel_id,
            tenant_id: f.tenant_id,
            channel_type: ChannelType::OnlineStore,
            name: "Webshop".into(),
            credentials: "{}".into(),
            is_active: true,
            external_instance_id: None,
            webhook_secret: None,
            last_sync_at: None,
            deactivated_at: None,
            created_at: Utc::now(),
        };
        f.repo.insert_channel(channel.clone());

        let mock = Arc::new(MockProvider::new(ChannelType::OnlineStore));
        mock.set_healthy(false);

        // Rebuild the registry with the scripted mock registered.
        let factory = Arc::new(MockProviderFactory::new());
        factory.register(channel_id, mock.clone());
        let alerts = AlertEngine::new(
            f.tenant_id,
            f.repo.clone() as Arc<dyn Repository>,
            EventBus::new(64),
            Arc::new(ProviderRegistry::new(factory, 6000, 5, Duration::from_secs(60))),
            5,
            Duration::from_secs(5),
        );

        assert_eq!(alerts.check_channels().await.unwrap(), 1);
        assert_eq!(alerts.check_channels().await.unwrap(), 0, "deduplicated");
        assert_eq!(
            f.repo.unread_alerts(AlertType::ChannelDisconnected).len(),
            1
        );

        mock.set_healthy(true);
        alerts.check_channels().await.unwrap();
        assert!(f
            .repo
            .unread_alerts(AlertType::ChannelDisconnected)
            .is_empty());
    }

    #[tokio::test]
    async fn test_sync_failed_events_alert_only_when_permanent() {
        let f = fixture();
        let channel_id = Uuid::new_v4();

        let transient = EngineEvent::SyncFailed {
            tenant_id: f.tenant_id,
            channel_id: Some(channel_id),
            product_id: None,
            error: "timeout".into(),
            retryable: true,
        };
        f.alerts.handle_event(&transient).await.unwrap();
        assert!(f.repo.unread_alerts(AlertType::SyncError).is_empty());

        let permanent = EngineEvent::SyncFailed {
            tenant_id: f.tenant_id,
            channel_id: Some(channel_id),
            product_id: None,
            error: "400 validation".into(),
            retryable: false,
        };
        f.alerts.handle_event(&permanent).await.unwrap();
        assert_eq!(f.repo.unread_alerts(AlertType::SyncError).len(), 1);
    }
}

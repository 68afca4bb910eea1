//! Sync: stock propagation across channels
//!
//! Consumes normalized [`StockChange`]s from the bus and sync jobs from the
//! queue. The propagation contract, in order:
//!
//! 1. resolve the product (direct id or mapping lookup),
//! 2. persist canonical stock together with its audit row,
//! 3. enumerate active target mappings excluding the source channel,
//! 4. fan out `update_stock` to all targets in parallel, each with its own
//!    deadline, buffer arithmetic, and audit trail,
//! 5. report `sync:completed` with the tally.
//!
//! A target's failure never aborts its siblings, and never touches the
//! canonical value written in step 2; the Guardian converges lagging
//! channels later.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bus::EventBus;
use crate::locks::ProductLocks;
use crate::metrics;
use crate::repository::Repository;
use stocksync_common::Result;
use stocksync_domain::{
    Channel, EngineEvent, Product, ProductChannelMapping, StockChange, SyncEvent, SyncEventType,
    SyncJob, SyncOperation, SyncStatus,
};
use stocksync_provider::{ProviderError, ProviderRegistry};

/// What one propagation did.
#[derive(Debug, Clone, Default)]
pub struct PropagationOutcome {
    pub product_id: Option<Uuid>,
    pub targets_succeeded: usize,
    pub targets_failed: usize,
    /// A newer change had already been applied; this one was dropped.
    pub superseded: bool,
    /// No mapping resolved; nothing to act on.
    pub unmatched: bool,
}

pub struct SyncAgent {
    tenant_id: Uuid,
    repo: Arc<dyn Repository>,
    registry: Arc<ProviderRegistry>,
    bus: EventBus,
    locks: Arc<ProductLocks>,
    /// Timestamp of the last change applied per product, for conflict
    /// resolution inside the serialization window.
    applied: Mutex<HashMap<Uuid, DateTime<Utc>>>,
    provider_timeout: Duration,
    full_sync_parallelism: usize,
}

impl SyncAgent {
    pub fn new(
        tenant_id: Uuid,
        repo: Arc<dyn Repository>,
        registry: Arc<ProviderRegistry>,
        bus: EventBus,
        locks: Arc<ProductLocks>,
        provider_timeout: Duration,
        full_sync_parallelism: usize,
    ) -> Self {
        Self {
            tenant_id,
            repo,
            registry,
            bus,
            locks,
            applied: Mutex::new(HashMap::new()),
            provider_timeout,
            full_sync_parallelism: full_sync_parallelism.max(1),
        }
    }

    /// Apply one stock change: persist the canonical value and fan out to
    /// every other active channel.
    pub async fn apply_stock_change(&self, change: &StockChange) -> Result<PropagationOutcome> {
        let started = Instant::now();

        let Some(product) = self.resolve_product(change).await? else {
            let event = SyncEvent::new(
                self.tenant_id,
                SyncEventType::WebhookUnmatched,
                Some(change.source_channel_id),
                None,
                SyncStatus::Failed,
            )
            .with_error(format!(
                "No product mapping found for external id '{}'",
                change.external_id
            ));
            self.repo.create_sync_event(&event).await?;

            return Ok(PropagationOutcome {
                unmatched: true,
                ..Default::default()
            });
        };

        let new_quantity = change.new_quantity.max(0);
        let previous_quantity = product.current_stock;

        // Serialize per product. The lock covers the conflict check, the
        // canonical write, and target enumeration, not the provider calls.
        let targets = {
            let _guard = self.locks.acquire(self.tenant_id, product.id).await;

            {
                let mut applied = self.applied.lock().await;
                if let Some(&last) = applied.get(&product.id) {
                    if change.timestamp < last {
                        debug!(
                            product_id = %product.id,
                            "stock change superseded by a newer one, dropping"
                        );
                        let event = SyncEvent::new(
                            self.tenant_id,
                            SyncEventType::StockUpdate,
                            Some(change.source_channel_id),
                            Some(product.id),
                            SyncStatus::Failed,
                        )
                        .with_values(
                            Some(json!({ "quantity": previous_quantity })),
                            Some(json!({ "quantity": new_quantity })),
                        )
                        .with_error("superseded by a newer stock change");
                        self.repo.create_sync_event(&event).await?;

                        return Ok(PropagationOutcome {
                            product_id: Some(product.id),
                            superseded: true,
                            ..Default::default()
                        });
                    }
                }
                applied.insert(product.id, change.timestamp);
            }

            let stock_event = SyncEvent::new(
                self.tenant_id,
                SyncEventType::StockUpdate,
                Some(change.source_channel_id),
                Some(product.id),
                SyncStatus::Completed,
            )
            .with_values(
                Some(json!({ "quantity": previous_quantity })),
                Some(json!({ "quantity": new_quantity })),
            );

            self.repo
                .apply_stock_update(self.tenant_id, product.id, new_quantity, &stock_event)
                .await?;

            self.bus.publish(EngineEvent::StockUpdated {
                tenant_id: self.tenant_id,
                product_id: product.id,
                sku: product.sku.clone(),
                previous_quantity,
                new_quantity,
            });

            self.enumerate_targets(product.id, Some(change.source_channel_id))
                .await?
        };

        let updated = Product {
            current_stock: new_quantity,
            ..product.clone()
        };

        let (succeeded, failed) = self
            .push_to_targets(&updated, &targets, Some(previous_quantity))
            .await;

        let duration_ms = started.elapsed().as_millis() as u64;
        self.bus.publish(EngineEvent::SyncCompleted {
            tenant_id: self.tenant_id,
            product_id: Some(product.id),
            targets_succeeded: succeeded,
            targets_failed: failed,
            duration_ms,
        });

        info!(
            product_id = %product.id,
            sku = product.sku,
            new_quantity,
            succeeded,
            failed,
            duration_ms,
            "stock change propagated"
        );

        Ok(PropagationOutcome {
            product_id: Some(product.id),
            targets_succeeded: succeeded,
            targets_failed: failed,
            ..Default::default()
        })
    }

    /// Handle a queued sync job (full, incremental, or targeted push).
    pub async fn handle_sync_job(&self, job: &SyncJob) -> Result<PropagationOutcome> {
        let started = Instant::now();

        let mut products = match &job.product_ids {
            Some(ids) => {
                let mut products = Vec::with_capacity(ids.len());
                for &id in ids {
                    if let Some(product) = self.repo.get_product(self.tenant_id, id).await? {
                        products.push(product);
                    } else {
                        warn!(product_id = %id, "sync job references unknown product");
                    }
                }
                products
            }
            None => self.repo.get_products(self.tenant_id).await?,
        };

        if job.operation == SyncOperation::IncrementalSync {
            if let Some(cutoff) = self.incremental_cutoff(job).await? {
                products.retain(|p| p.updated_at > cutoff);
            }
        }

        self.bus.publish(EngineEvent::SyncStarted {
            tenant_id: self.tenant_id,
            operation: job.operation,
            product_count: products.len(),
        });

        let summary_type = match job.operation {
            SyncOperation::FullSync => SyncEventType::FullSync,
            SyncOperation::IncrementalSync => SyncEventType::CrossChannelSync,
            SyncOperation::PushUpdate => SyncEventType::StockPropagation,
        };
        let mut summary = SyncEvent::new(
            self.tenant_id,
            summary_type,
            job.channel_id,
            None,
            SyncStatus::Pending,
        )
        .with_values(None, Some(json!({ "products": products.len() })));
        self.repo.create_sync_event(&summary).await?;
        self.repo
            .update_sync_event_status(self.tenant_id, summary.id, SyncStatus::Processing, None)
            .await?;
        summary.status = SyncStatus::Processing;

        // Bounded parallelism over products; per-product pushes fan out
        // internally.
        let results: Vec<(usize, usize)> = futures::stream::iter(products.clone())
            .map(|product| async move { self.push_product_counted(&product, job.channel_id).await })
            .buffer_unordered(self.full_sync_parallelism)
            .collect()
            .await;

        let succeeded: usize = results.iter().map(|(s, _)| s).sum();
        let failed: usize = results.iter().map(|(_, f)| f).sum();

        let final_status = if failed == 0 {
            SyncStatus::Completed
        } else {
            SyncStatus::Failed
        };
        self.repo
            .update_sync_event_status(
                self.tenant_id,
                summary.id,
                final_status,
                (failed > 0).then(|| format!("{failed} target pushes failed")).as_deref(),
            )
            .await?;

        let duration_ms = started.elapsed().as_millis() as u64;
        self.bus.publish(EngineEvent::SyncCompleted {
            tenant_id: self.tenant_id,
            product_id: None,
            targets_succeeded: succeeded,
            targets_failed: failed,
            duration_ms,
        });

        info!(
            operation = job.operation.as_str(),
            succeeded, failed, duration_ms, "sync job finished"
        );

        Ok(PropagationOutcome {
            product_id: None,
            targets_succeeded: succeeded,
            targets_failed: failed,
            ..Default::default()
        })
    }

    async fn incremental_cutoff(&self, job: &SyncJob) -> Result<Option<DateTime<Utc>>> {
        let Some(channel_id) = job.channel_id else {
            return Ok(None);
        };
        Ok(self
            .repo
            .get_channel(self.tenant_id, channel_id)
            .await?
            .and_then(|c| c.last_sync_at))
    }

    /// Push one product's expected value to all its targets (minus the
    /// excluded source, when there is one).
    async fn push_product(
        &self,
        product: &Product,
        exclude_channel: Option<Uuid>,
    ) -> Result<(usize, usize)> {
        let targets = self.enumerate_targets(product.id, exclude_channel).await?;
        Ok(self.push_to_targets(product, &targets, None).await)
    }

    async fn push_product_counted(
        &self,
        product: &Product,
        exclude_channel: Option<Uuid>,
    ) -> (usize, usize) {
        match self.push_product(product, exclude_channel).await {
            Ok(counts) => counts,
            Err(e) => {
                error!(product_id = %product.id, error = %e, "product sync failed");
                (0, 0)
            }
        }
    }

    async fn resolve_product(&self, change: &StockChange) -> Result<Option<Product>> {
        if let Some(product_id) = change.product_id {
            return self.repo.get_product(self.tenant_id, product_id).await;
        }

        match self
            .repo
            .get_mapping(self.tenant_id, change.source_channel_id, &change.external_id)
            .await?
        {
            Some(mapping) => self.repo.get_product(self.tenant_id, mapping.product_id).await,
            None => Ok(None),
        }
    }

    /// Active (channel, mapping) pairs for a product, excluding the source.
    /// A change from channel S never pushes back to S.
    async fn enumerate_targets(
        &self,
        product_id: Uuid,
        exclude_channel: Option<Uuid>,
    ) -> Result<Vec<(Channel, ProductChannelMapping)>> {
        let channels = self.repo.get_active_channels(self.tenant_id).await?;
        let mappings = self
            .repo
            .get_mappings_for_product(self.tenant_id, product_id)
            .await?;

        let by_id: HashMap<Uuid, Channel> =
            channels.into_iter().map(|c| (c.id, c)).collect();

        Ok(mappings
            .into_iter()
            .filter(|m| Some(m.channel_id) != exclude_channel)
            .filter_map(|m| by_id.get(&m.channel_id).cloned().map(|c| (c, m)))
            .collect())
    }

    /// Independent parallel pushes; one target's failure never aborts the
    /// rest.
    async fn push_to_targets(
        &self,
        product: &Product,
        targets: &[(Channel, ProductChannelMapping)],
        old_quantity: Option<i64>,
    ) -> (usize, usize) {
        let results = futures::future::join_all(
            targets
                .iter()
                .map(|(channel, mapping)| self.push_one(product, channel, mapping, old_quantity)),
        )
        .await;

        let succeeded = results.iter().filter(|ok| **ok).count();
        (succeeded, results.len() - succeeded)
    }

    async fn push_one(
        &self,
        product: &Product,
        channel: &Channel,
        mapping: &ProductChannelMapping,
        old_quantity: Option<i64>,
    ) -> bool {
        let online = channel.channel_type.is_online();
        let stock_to_sync = product.stock_for_channel(online);
        let old_push_value = old_quantity.map(|q| {
            if online {
                (q - product.buffer_stock).max(0)
            } else {
                q
            }
        });

        let event = SyncEvent::new(
            self.tenant_id,
            SyncEventType::PushUpdate,
            Some(channel.id),
            Some(product.id),
            SyncStatus::Pending,
        )
        .with_values(
            old_push_value.map(|q| json!({ "quantity": q })),
            Some(json!({ "quantity": stock_to_sync })),
        );

        if let Err(e) = self.repo.create_sync_event(&event).await {
            error!(error = %e, "failed to record push_update event");
            return false;
        }
        if let Err(e) = self
            .repo
            .update_sync_event_status(self.tenant_id, event.id, SyncStatus::Processing, None)
            .await
        {
            error!(error = %e, "failed to advance push_update event");
            return false;
        }

        if !self.registry.breaker().should_allow(channel.id).await {
            warn!(channel_id = %channel.id, "circuit open, skipping push");
            self.finish_push(
                &event,
                channel,
                product,
                Err(&ProviderError::Network("circuit open".into())),
            )
            .await;
            return false;
        }

        let result = match self.registry.provider_for(channel).await {
            Ok(provider) => {
                let timer = Instant::now();
                let call = provider.update_stock(&mapping.external_id, stock_to_sync);
                let outcome = match tokio::time::timeout(self.provider_timeout, call).await {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout),
                };
                metrics::PUSH_DURATION
                    .with_label_values(&[&self.tenant_id.to_string()])
                    .observe(timer.elapsed().as_secs_f64());
                outcome
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.finish_push(&event, channel, product, Ok(stock_to_sync))
                    .await;
                true
            }
            Err(e) => {
                self.finish_push(&event, channel, product, Err(&e)).await;
                false
            }
        }
    }

    async fn finish_push(
        &self,
        event: &SyncEvent,
        channel: &Channel,
        product: &Product,
        result: std::result::Result<i64, &ProviderError>,
    ) {
        let tenant = self.tenant_id.to_string();
        let channel_type = channel.channel_type.as_str();

        match result {
            Ok(quantity) => {
                if let Err(e) = self
                    .repo
                    .update_sync_event_status(self.tenant_id, event.id, SyncStatus::Completed, None)
                    .await
                {
                    error!(error = %e, "failed to complete push_update event");
                }
                if let Err(e) = self.repo.touch_channel_sync(self.tenant_id, channel.id).await {
                    error!(error = %e, "failed to stamp last_sync_at");
                }

                self.registry.breaker().record_success(channel.id).await;
                metrics::PUSHES_TOTAL
                    .with_label_values(&[&tenant, channel_type, "true"])
                    .inc();
                debug!(
                    channel_id = %channel.id,
                    product_id = %product.id,
                    quantity,
                    "stock pushed"
                );
            }
            Err(provider_error) => {
                let retryable = provider_error.is_retryable();
                let message = provider_error.to_string();

                if let Err(e) = self
                    .repo
                    .update_sync_event_status(
                        self.tenant_id,
                        event.id,
                        SyncStatus::Failed,
                        Some(&message),
                    )
                    .await
                {
                    error!(error = %e, "failed to fail push_update event");
                }

                if retryable || provider_error.is_disconnect() {
                    self.registry.breaker().record_failure(channel.id).await;
                }

                metrics::PUSHES_TOTAL
                    .with_label_values(&[&tenant, channel_type, "false"])
                    .inc();
                warn!(
                    channel_id = %channel.id,
                    product_id = %product.id,
                    error = message,
                    retryable,
                    "stock push failed"
                );

                self.bus.publish(EngineEvent::SyncFailed {
                    tenant_id: self.tenant_id,
                    channel_id: Some(channel.id),
                    product_id: Some(product.id),
                    error: message,
                    retryable,
                });

                if provider_error.is_disconnect() {
                    self.bus.publish(EngineEvent::ChannelDisconnected {
                        tenant_id: self.tenant_id,
                        channel_id: channel.id,
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryRepository;
    use stocksync_domain::{ChannelType, ChangeType};
    use stocksync_provider::mock::{MockFailure, MockProvider, MockProviderFactory};

    struct Fixture {
        sync: SyncAgent,
        repo: Arc<MemoryRepository>,
        bus: EventBus,
        tenant_id: Uuid,
        product_id: Uuid,
        pos: (Uuid, Arc<MockProvider>),
        online: (Uuid, Arc<MockProvider>),
        delivery: (Uuid, Arc<MockProvider>),
    }

    fn channel(tenant_id: Uuid, channel_type: ChannelType, name: &str) -> Channel {
        Channel {
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
            created_at: Utc::now(),
        }
    }

    /// Tenant with product WH-001 {stock 100, buffer 10} mapped on POS,
    /// online store, and delivery platform.
    fn fixture() -> Fixture {
        let tenant_id = Uuid::new_v4();
        let product_id = Uuid::new_v4();

        let repo = Arc::new(MemoryRepository::new());
        repo.insert_product(Product {
            id: product_id,
            tenant_id,
            sku: "WH-001".into(),
            name: "Wireless Headphones".into(),
            current_stock: 100,
            buffer_stock: 10,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });

        let factory = Arc::new(MockProviderFactory::new());
        let mut mocks = Vec::new();
        for (channel_type, name, external_id) in [
            (ChannelType::Pos, "POS", "pos-1"),
            (ChannelType::OnlineStore, "ONLINE", "web-1"),
            (ChannelType::DeliveryPlatform, "DELIVERY", "del-1"),
        ] {
            let ch = channel(tenant_id, channel_type, name);
            let mock = Arc::new(MockProvider::new(channel_type));
            factory.register(ch.id, mock.clone());
            repo.insert_mapping(ProductChannelMapping {
                id: Uuid::new_v4(),
                product_id,
                channel_id: ch.id,
                external_id: external_id.into(),
                external_sku: None,
                created_at: Utc::now(),
            });
            repo.insert_channel(ch.clone());
            mocks.push((ch.id, mock));
        }

        let registry = Arc::new(ProviderRegistry::new(
            factory,
            6000,
            5,
            Duration::from_secs(60),
        ));
        let bus = EventBus::new(64);
        let sync = SyncAgent::new(
            tenant_id,
            repo.clone() as Arc<dyn Repository>,
            registry,
            bus.clone(),
            Arc::new(ProductLocks::new()),
            Duration::from_secs(5),
            4,
        );

        let delivery = mocks.pop().unwrap();
        let online = mocks.pop().unwrap();
        let pos = mocks.pop().unwrap();

        Fixture {
            sync,
            repo,
            bus,
            tenant_id,
            product_id,
            pos,
            online,
            delivery,
        }
    }

    fn change_from(f: &Fixture, source: Uuid, new_quantity: i64) -> StockChange {
        StockChange {
            tenant_id: f.tenant_id,
            source_channel_id: source,
            source_channel_type: ChannelType::Pos,
            external_id: "pos-1".into(),
            product_id: Some(f.product_id),
            sku: Some("WH-001".into()),
            previous_quantity: Some(100),
            new_quantity,
            change_amount: new_quantity - 100,
            change_type: ChangeType::Sale,
            timestamp: Utc::now(),
            raw_payload: serde_json::Value::Null,
            metadata: serde_json::Value::Null,
        }
    }

    #[tokio::test]
    async fn test_pos_sale_propagates_with_buffer() {
        let f = fixture();

        let outcome = f
            .sync
            .apply_stock_change(&change_from(&f, f.pos.0, 85))
            .await
            .unwrap();

        assert_eq!(outcome.targets_succeeded, 2);
        assert_eq!(outcome.targets_failed, 0);

        // Canonical truth updated.
        let product = f
            .repo
            .get_product(f.tenant_id, f.product_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(product.current_stock, 85);

        // Source never pushed back to; online channels see buffered value.
        assert!(f.pos.1.update_log().await.is_empty());
        assert_eq!(f.online.1.update_log().await, vec![("web-1".into(), 75)]);
        assert_eq!(f.delivery.1.update_log().await, vec![("del-1".into(), 75)]);

        // Audit trail: one stock_update + two push_update rows, all terminal.
        let events = f.repo.sync_events();
        assert_eq!(events.len(), 3);
        assert_eq!(
            f.repo.sync_events_of_type(SyncEventType::PushUpdate).len(),
            2
        );
        assert!(events.iter().all(|e| e.status == SyncStatus::Completed));
    }

    #[tokio::test]
    async fn test_target_failure_is_independent() {
        let f = fixture();
        f.online.1.fail_updates_with(Some(MockFailure::Server)).await;

        let mut rx = f.bus.subscribe();
        let outcome = f
            .sync
            .apply_stock_change(&change_from(&f, f.pos.0, 85))
            .await
            .unwrap();

        assert_eq!(outcome.targets_succeeded, 1);
        assert_eq!(outcome.targets_failed, 1);

        // Delivery still got its push; canonical stock unharmed.
        assert_eq!(f.delivery.1.update_log().await, vec![("del-1".into(), 75)]);
        let product = f
            .repo
            .get_product(f.tenant_id, f.product_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(product.current_stock, 85);

        // A retryable sync:failed went out for the online channel.
        let mut saw_retryable_failure = false;
        while let Ok(event) = rx.try_recv() {
            if let EngineEvent::SyncFailed { retryable, channel_id, .. } = event {
                assert_eq!(channel_id, Some(f.online.0));
                assert!(retryable);
                saw_retryable_failure = true;
            }
        }
        assert!(saw_retryable_failure);
    }

    #[tokio::test]
    async fn test_auth_failure_flags_disconnect() {
        let f = fixture();
        f.online.1.fail_updates_with(Some(MockFailure::Auth)).await;

        let mut rx = f.bus.subscribe();
        f.sync
            .apply_stock_change(&change_from(&f, f.pos.0, 85))
            .await
            .unwrap();

        let mut saw_disconnect = false;
        let mut saw_non_retryable = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                EngineEvent::ChannelDisconnected { channel_id, .. } => {
                    assert_eq!(channel_id, f.online.0);
                    saw_disconnect = true;
                }
                EngineEvent::SyncFailed { retryable, .. } => saw_non_retryable |= !retryable,
                _ => {}
            }
        }
        assert!(saw_disconnect);
        assert!(saw_non_retryable);
    }

    #[tokio::test]
    async fn test_older_change_is_superseded() {
        let f = fixture();

        let newer = change_from(&f, f.pos.0, 85);
        let mut older = change_from(&f, f.pos.0, 90);
        older.timestamp = newer.timestamp - chrono::Duration::seconds(5);

        f.sync.apply_stock_change(&newer).await.unwrap();
        let outcome = f.sync.apply_stock_change(&older).await.unwrap();

        assert!(outcome.superseded);

        // The newer value stands.
        let product = f
            .repo
            .get_product(f.tenant_id, f.product_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(product.current_stock, 85);

        // The superseded change left a failed stock_update row.
        let superseded_rows: Vec<_> = f
            .repo
            .sync_events_of_type(SyncEventType::StockUpdate)
            .into_iter()
            .filter(|e| e.status == SyncStatus::Failed)
            .collect();
        assert_eq!(superseded_rows.len(), 1);
    }

    #[tokio::test]
    async fn test_negative_quantities_clamp_to_zero() {
        let f = fixture();

        f.sync
            .apply_stock_change(&change_from(&f, f.pos.0, -12))
            .await
            .unwrap();

        let product = f
            .repo
            .get_product(f.tenant_id, f.product_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(product.current_stock, 0);

        // Online channels get zero, never a negative.
        assert_eq!(f.online.1.update_log().await, vec![("web-1".into(), 0)]);
    }

    #[tokio::test]
    async fn test_full_sync_is_idempotent() {
        let f = fixture();

        let job = SyncJob {
            tenant_id: f.tenant_id,
            channel_id: None,
            channel_type: None,
            operation: SyncOperation::FullSync,
            product_ids: None,
        };

        f.sync.handle_sync_job(&job).await.unwrap();
        let after_first = (
            f.pos.1.stock_of("pos-1").await,
            f.online.1.stock_of("web-1").await,
            f.delivery.1.stock_of("del-1").await,
        );
        assert_eq!(after_first, (Some(100), Some(90), Some(90)));

        f.sync.handle_sync_job(&job).await.unwrap();
        let after_second = (
            f.pos.1.stock_of("pos-1").await,
            f.online.1.stock_of("web-1").await,
            f.delivery.1.stock_of("del-1").await,
        );

        assert_eq!(after_first, after_second);
    }

    #[tokio::test]
    async fn test_unresolvable_change_records_unmatched() {
        let f = fixture();

        let mut change = change_from(&f, f.pos.0, 85);
        change.product_id = None;
        change.external_id = "ghost".into();

        let outcome = f.sync.apply_stock_change(&change).await.unwrap();
        assert!(outcome.unmatched);

        let unmatched = f.repo.sync_events_of_type(SyncEventType::WebhookUnmatched);
        assert_eq!(unmatched.len(), 1);
        assert!(f.pos.1.update_log().await.is_empty());
        assert!(f.online.1.update_log().await.is_empty());
    }
}

//! Watcher: webhook ingestion and normalization
//!
//! Consumes raw [`WebhookJob`]s off the queue and turns them into canonical
//! [`StockChange`] events on the bus. Along the way it verifies signatures,
//! drops replays (SET-NX dedupe with TTL), and records unmatched external ids
//! as failed sync events. A webhook that produces nothing publishable is
//! still acknowledged; providers retry aggressively on anything else.

pub mod classify;
pub mod decoder;
pub mod poller;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bus::EventBus;
use crate::kv::KvStore;
use crate::metrics;
use crate::repository::Repository;
use stocksync_common::{Result, verify_webhook};
use stocksync_domain::{
    Channel, EngineEvent, StockChange, SyncEvent, SyncEventType, SyncStatus, WebhookJob,
};

use decoder::RawChange;

pub use poller::PosPoller;

pub struct Watcher {
    tenant_id: Uuid,
    repo: Arc<dyn Repository>,
    bus: EventBus,
    kv: Arc<dyn KvStore>,
    dedupe_ttl_secs: u64,
}

impl Watcher {
    pub fn new(
        tenant_id: Uuid,
        repo: Arc<dyn Repository>,
        bus: EventBus,
        kv: Arc<dyn KvStore>,
        dedupe_ttl_secs: u64,
    ) -> Self {
        Self {
            tenant_id,
            repo,
            bus,
            kv,
            dedupe_ttl_secs,
        }
    }

    /// Process one webhook job. Returns the stock changes published.
    ///
    /// Domain-level rejections (bad signature, replay, unmatched id) are not
    /// errors; they are recorded and swallowed so the queue does not retry
    /// what can never succeed. Only infrastructure failures bubble up.
    pub async fn process(&self, job: &WebhookJob) -> Result<Vec<StockChange>> {
        let tenant = self.tenant_id.to_string();

        let Some(channel) = self.repo.get_channel(self.tenant_id, job.channel_id).await? else {
            warn!(channel_id = %job.channel_id, "webhook for unknown channel");
            self.record_failed(None, format!("unknown channel {}", job.channel_id))
                .await?;
            metrics::WEBHOOKS_TOTAL
                .with_label_values(&[&tenant, "unknown_channel"])
                .inc();
            return Ok(Vec::new());
        };

        if !self.verify_signature(&channel, job).await? {
            metrics::WEBHOOKS_TOTAL
                .with_label_values(&[&tenant, "invalid_signature"])
                .inc();
            return Ok(Vec::new());
        }

        // Idempotency: first sighting of this event id wins; replays within
        // the TTL short-circuit with a bookkeeping row and publish nothing.
        let event_id = self.event_id(job);
        let dedupe_key = format!(
            "dedupe:{}:{}:{}",
            self.tenant_id, job.channel_id, event_id
        );
        let first_sighting = self
            .kv
            .set_nx_ex(&dedupe_key, "1", self.dedupe_ttl_secs)
            .await?;

        if !first_sighting {
            debug!(event_id, "duplicate webhook, skipping");
            let event = SyncEvent::new(
                self.tenant_id,
                SyncEventType::WebhookProcessed,
                Some(channel.id),
                None,
                SyncStatus::Completed,
            )
            .with_values(None, Some(json!({ "duplicate": true, "event_id": event_id })));
            self.repo.create_sync_event(&event).await?;

            metrics::WEBHOOKS_TOTAL
                .with_label_values(&[&tenant, "duplicate"])
                .inc();
            return Ok(Vec::new());
        }

        let raw_changes = match decoder::decode(channel.channel_type, &job.event_type, &job.payload)
        {
            Ok(changes) => changes,
            Err(e) => {
                warn!(event_type = job.event_type, error = %e, "undecodable webhook payload");
                self.record_failed(Some(channel.id), e.to_string()).await?;
                metrics::WEBHOOKS_TOTAL
                    .with_label_values(&[&tenant, "malformed"])
                    .inc();
                return Ok(Vec::new());
            }
        };

        if raw_changes.is_empty() {
            debug!(event_type = job.event_type, "ignoring uninteresting event type");
            return Ok(Vec::new());
        }

        // Deduction lines in one webhook compound: two lines for the same
        // product each subtract from the running value, not the stored one.
        let mut working_stock: HashMap<String, i64> = HashMap::new();
        let mut published = Vec::new();

        for raw in raw_changes {
            match self
                .resolve_and_publish(&channel, job, &raw, &mut working_stock)
                .await?
            {
                Some(change) => published.push(change),
                None => {
                    metrics::WEBHOOKS_TOTAL
                        .with_label_values(&[&tenant, "unmatched"])
                        .inc();
                }
            }
        }

        metrics::WEBHOOKS_TOTAL
            .with_label_values(&[&tenant, "processed"])
            .inc();
        Ok(published)
    }

    async fn resolve_and_publish(
        &self,
        channel: &Channel,
        job: &WebhookJob,
        raw: &RawChange,
        working_stock: &mut HashMap<String, i64>,
    ) -> Result<Option<StockChange>> {
        let external_id = raw.external_id().to_string();

        let Some(mapping) = self
            .repo
            .get_mapping(self.tenant_id, channel.id, &external_id)
            .await?
        else {
            self.record_unmatched(channel, &external_id).await?;
            return Ok(None);
        };

        let Some(product) = self
            .repo
            .get_product(self.tenant_id, mapping.product_id)
            .await?
        else {
            // Mapping pointing at a deleted product: same treatment.
            self.record_unmatched(channel, &external_id).await?;
            return Ok(None);
        };

        let base = *working_stock
            .entry(external_id.clone())
            .or_insert(product.current_stock);

        // wire_previous is what the channel itself reported; classification
        // runs on that, so an availability flip (no previous on the wire)
        // lands on `adjustment` instead of a phantom sale.
        let (wire_previous, new_quantity) = match raw {
            RawChange::Absolute {
                new_quantity,
                previous_quantity,
                ..
            } => (*previous_quantity, (*new_quantity).max(0)),
            RawChange::Deduction { quantity, .. } => {
                (Some(base), (base - quantity).max(0))
            }
        };
        working_stock.insert(external_id.clone(), new_quantity);

        let change_type = classify::classify(
            &job.event_type,
            decoder::reason(&job.payload),
            wire_previous,
            new_quantity,
        );

        // The engine's view fills the gap for the delta bookkeeping.
        let previous_quantity = wire_previous.or(Some(base));

        let change = StockChange {
            tenant_id: self.tenant_id,
            source_channel_id: channel.id,
            source_channel_type: channel.channel_type,
            external_id,
            product_id: Some(product.id),
            sku: Some(product.sku.clone()),
            previous_quantity,
            new_quantity,
            change_amount: StockChange::compute_change_amount(previous_quantity, new_quantity),
            change_type,
            timestamp: job.received_at,
            raw_payload: job.payload.clone(),
            metadata: json!({ "event_type": job.event_type }),
        };

        metrics::STOCK_CHANGES_TOTAL
            .with_label_values(&[&self.tenant_id.to_string(), change_type.as_str()])
            .inc();

        self.bus.publish(EngineEvent::StockChange {
            change: change.clone(),
        });
        Ok(Some(change))
    }

    /// Signature check per the channel's configuration. Channels without a
    /// secret accept unsigned payloads, loudly.
    async fn verify_signature(&self, channel: &Channel, job: &WebhookJob) -> Result<bool> {
        let Some(secret) = channel.webhook_secret.as_deref() else {
            warn!(
                channel_id = %channel.id,
                "channel has no webhook secret, accepting unsigned payload"
            );
            return Ok(true);
        };

        let body = match &job.raw_body {
            Some(raw) => raw.clone(),
            None => job.payload.to_string(),
        };

        let valid = job
            .signature
            .as_deref()
            .map(|sig| verify_webhook(&body, sig, secret))
            .unwrap_or(false);

        if !valid {
            warn!(channel_id = %channel.id, "webhook signature rejected");
            self.record_failed(Some(channel.id), "invalid signature".to_string())
                .await?;
        }
        Ok(valid)
    }

    fn event_id(&self, job: &WebhookJob) -> String {
        if let Some(id) = decoder::event_id(&job.payload) {
            return id;
        }

        // No provider id: derive one from when it arrived and what it said.
        let mut hasher = Sha256::new();
        hasher.update(job.payload.to_string().as_bytes());
        let digest = hex::encode(hasher.finalize());
        format!("{}:{}", job.received_at.timestamp_millis(), &digest[..16])
    }

    async fn record_unmatched(&self, channel: &Channel, external_id: &str) -> Result<()> {
        warn!(external_id, channel = %channel.name, "no product mapping found");

        let event = SyncEvent::new(
            self.tenant_id,
            SyncEventType::WebhookUnmatched,
            Some(channel.id),
            None,
            SyncStatus::Failed,
        )
        .with_error(format!(
            "No product mapping found for external id '{external_id}' on channel '{}'",
            channel.name
        ));
        self.repo.create_sync_event(&event).await
    }

    async fn record_failed(&self, channel_id: Option<Uuid>, message: String) -> Result<()> {
        let event = SyncEvent::new(
            self.tenant_id,
            SyncEventType::WebhookProcessed,
            channel_id,
            None,
            SyncStatus::Failed,
        )
        .with_error(message);
        self.repo.create_sync_event(&event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::repository::MemoryRepository;
    use chrono::Utc;
    use serde_json::json;
    use stocksync_domain::{ChannelType, ChangeType, Product, ProductChannelMapping};

    struct Fixture {
        repo: Arc<MemoryRepository>,
        watcher: Watcher,
        tenant_id: Uuid,
        channel_id: Uuid,
        product_id: Uuid,
    }

    fn fixture(webhook_secret: Option<&str>) -> Fixture {
        let tenant_id = Uuid::new_v4();
        let channel_id = Uuid::new_v4();
        let product_id = Uuid::new_v4();

        let repo = Arc::new(MemoryRepository::new());
        repo.insert_channel(Channel {
            id: channel_id,
            tenant_id,
            channel_type: ChannelType::Pos,
            name: "Till".into(),
            credentials: "{}".into(),
            is_active: true,
            external_instance_id: None,
            webhook_secret: webhook_secret.map(str::to_string),
            last_sync_at: None,
            deactivated_at: None,
            created_at: Utc::now(),
        });
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
        repo.insert_mapping(ProductChannelMapping {
            id: Uuid::new_v4(),
            product_id,
            channel_id,
            external_id: "12345".into(),
            external_sku: None,
            created_at: Utc::now(),
        });

        let bus = EventBus::new(64);
        let watcher = Watcher::new(
            tenant_id,
            repo.clone() as Arc<dyn Repository>,
            bus,
            Arc::new(MemoryKv::new()),
            3600,
        );

        Fixture {
            repo,
            watcher,
            tenant_id,
            channel_id,
            product_id,
        }
    }

    #[tokio::test]
    async fn test_stock_update_normalizes() {
        let f = fixture(None);
        let job = WebhookJob::new(
            f.tenant_id,
            f.channel_id,
            ChannelType::Pos,
            "stock.updated",
            json!({
                "EventId": "evt-1",
                "ProductId": "12345",
                "CurrentStockLevel": 85,
                "PreviousStockLevel": 100,
            }),
        );

        let changes = f.watcher.process(&job).await.unwrap();

        assert_eq!(changes.len(), 1);
        let change = &changes[0];
        assert_eq!(change.product_id, Some(f.product_id));
        assert_eq!(change.new_quantity, 85);
        assert_eq!(change.previous_quantity, Some(100));
        assert_eq!(change.change_amount, -15);
        assert_eq!(change.change_type, ChangeType::Sale); // sign fallback
        assert_eq!(change.sku.as_deref(), Some("WH-001"));
    }

    #[tokio::test]
    async fn test_stock_update_without_wire_previous_is_adjustment() {
        let f = fixture(None);
        let job = WebhookJob::new(
            f.tenant_id,
            f.channel_id,
            ChannelType::Pos,
            "stock.updated",
            json!({"EventId": "evt-1b", "ProductId": "12345", "CurrentStockLevel": 85}),
        );

        let changes = f.watcher.process(&job).await.unwrap();

        assert_eq!(changes.len(), 1);
        // The channel did not say where stock came from; the engine's own
        // view still provides the delta, but not a classification.
        assert_eq!(changes[0].change_type, ChangeType::Adjustment);
        assert_eq!(changes[0].previous_quantity, Some(100));
        assert_eq!(changes[0].change_amount, -15);
    }

    #[tokio::test]
    async fn test_transaction_lines_compound() {
        let f = fixture(None);
        let job = WebhookJob::new(
            f.tenant_id,
            f.channel_id,
            ChannelType::Pos,
            "transaction.created",
            json!({
                "EventId": "evt-2",
                "Items": [
                    {"ProductId": "12345", "Quantity": 30},
                    {"ProductId": "12345", "Quantity": 80},
                ]
            }),
        );

        let changes = f.watcher.process(&job).await.unwrap();

        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].new_quantity, 70); // 100 - 30
        assert_eq!(changes[1].new_quantity, 0); // 70 - 80, clamped
        assert_eq!(changes[1].previous_quantity, Some(70));
        assert!(changes.iter().all(|c| c.change_type == ChangeType::Sale));
    }

    #[tokio::test]
    async fn test_duplicate_event_id_short_circuits() {
        let f = fixture(None);
        let job = WebhookJob::new(
            f.tenant_id,
            f.channel_id,
            ChannelType::Pos,
            "stock.updated",
            json!({"EventId": "evt-3", "ProductId": "12345", "CurrentStockLevel": 85}),
        );

        let first = f.watcher.process(&job).await.unwrap();
        let second = f.watcher.process(&job).await.unwrap();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());

        let processed = f.repo.sync_events_of_type(SyncEventType::WebhookProcessed);
        assert_eq!(processed.len(), 1, "exactly one duplicate bookkeeping row");
        assert_eq!(processed[0].new_value.as_ref().unwrap()["duplicate"], true);
    }

    #[tokio::test]
    async fn test_unmatched_external_id() {
        let f = fixture(None);
        let job = WebhookJob::new(
            f.tenant_id,
            f.channel_id,
            ChannelType::Pos,
            "stock.updated",
            json!({"EventId": "evt-4", "ProductId": "unknown-xyz", "CurrentStockLevel": 10}),
        );

        let changes = f.watcher.process(&job).await.unwrap();
        assert!(changes.is_empty());

        let unmatched = f.repo.sync_events_of_type(SyncEventType::WebhookUnmatched);
        assert_eq!(unmatched.len(), 1);
        assert_eq!(unmatched[0].status, SyncStatus::Failed);
        assert!(unmatched[0]
            .error_message
            .as_ref()
            .unwrap()
            .contains("No product mapping found"));
    }

    #[tokio::test]
    async fn test_signature_required_when_secret_configured() {
        let f = fixture(Some("topsecret"));
        let payload = json!({"EventId": "evt-5", "ProductId": "12345", "CurrentStockLevel": 85});
        let body = payload.to_string();

        // Unsigned: rejected, recorded.
        let unsigned = WebhookJob::new(
            f.tenant_id,
            f.channel_id,
            ChannelType::Pos,
            "stock.updated",
            payload.clone(),
        )
        .with_raw_body(body.clone());
        assert!(f.watcher.process(&unsigned).await.unwrap().is_empty());

        let failed = f.repo.sync_events_of_type(SyncEventType::WebhookProcessed);
        assert_eq!(failed.len(), 1);
        assert_eq!(
            failed[0].error_message.as_deref(),
            Some("invalid signature")
        );

        // Correctly signed: accepted.
        let signature = stocksync_common::sign_webhook(&body, "topsecret");
        let signed = WebhookJob::new(
            f.tenant_id,
            f.channel_id,
            ChannelType::Pos,
            "stock.updated",
            payload,
        )
        .with_raw_body(body)
        .with_signature(signature);
        assert_eq!(f.watcher.process(&signed).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_payloads_without_event_id_dedupe_on_content() {
        let f = fixture(None);
        let job = WebhookJob::new(
            f.tenant_id,
            f.channel_id,
            ChannelType::Pos,
            "stock.updated",
            json!({"ProductId": "12345", "CurrentStockLevel": 60}),
        );

        assert_eq!(f.watcher.process(&job).await.unwrap().len(), 1);
        // Same payload and received_at: the synthetic id collides, as it should.
        assert!(f.watcher.process(&job).await.unwrap().is_empty());
    }
}

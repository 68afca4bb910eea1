//! POS transaction polling fallback
//!
//! Some POS installations have no reliable webhook delivery. For those
//! channels the Watcher also polls completed transactions on an interval,
//! keyed by a per-channel cursor in short-term KV, and feeds the same
//! normalized stream the webhook path produces. Transaction ids are deduped
//! against the webhook path so a flaky-but-working webhook setup does not
//! double-count.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bus::EventBus;
use crate::kv::KvStore;
use crate::metrics;
use crate::repository::Repository;
use stocksync_common::Result;
use stocksync_domain::{
    Channel, ChangeType, EngineEvent, StockChange, SyncEvent, SyncEventType, SyncStatus,
};
use stocksync_provider::ProviderRegistry;

pub struct PosPoller {
    tenant_id: Uuid,
    repo: Arc<dyn Repository>,
    bus: EventBus,
    registry: Arc<ProviderRegistry>,
    kv: Arc<dyn KvStore>,
    interval: Duration,
    dedupe_ttl_secs: u64,
}

impl PosPoller {
    pub fn new(
        tenant_id: Uuid,
        repo: Arc<dyn Repository>,
        bus: EventBus,
        registry: Arc<ProviderRegistry>,
        kv: Arc<dyn KvStore>,
        interval: Duration,
        dedupe_ttl_secs: u64,
    ) -> Self {
        Self {
            tenant_id,
            repo,
            bus,
            registry,
            kv,
            interval,
            dedupe_ttl_secs,
        }
    }

    /// Poll loop for one POS channel; runs until shutdown or until the
    /// channel goes away.
    pub async fn run(&self, channel_id: Uuid, shutdown: CancellationToken) {
        info!(%channel_id, interval_secs = self.interval.as_secs(), "POS poller started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let channel = match self.repo.get_channel(self.tenant_id, channel_id).await {
                Ok(Some(channel)) if channel.is_active => channel,
                Ok(_) => {
                    info!(%channel_id, "channel inactive or gone, POS poller stopping");
                    break;
                }
                Err(e) => {
                    warn!(%channel_id, error = %e, "POS poller failed to load channel");
                    continue;
                }
            };

            match self.poll_once(&channel).await {
                Ok(0) => {}
                Ok(published) => debug!(%channel_id, published, "POS poll produced changes"),
                Err(e) => warn!(%channel_id, error = %e, "POS poll failed"),
            }
        }

        info!(%channel_id, "POS poller stopped");
    }

    fn cursor_key(&self, channel_id: Uuid) -> String {
        format!("pos:last-poll:{channel_id}")
    }

    /// One polling pass: fetch completed transactions since the cursor,
    /// publish the resulting stock changes, advance the cursor on success.
    pub async fn poll_once(&self, channel: &Channel) -> Result<usize> {
        let cursor_key = self.cursor_key(channel.id);
        let default_window = || {
            Utc::now()
                - chrono::Duration::from_std(self.interval)
                    .unwrap_or_else(|_| chrono::Duration::seconds(30))
        };
        let since = match self.kv.get(&cursor_key).await? {
            Some(raw) => raw.parse::<DateTime<Utc>>().unwrap_or_else(|_| default_window()),
            None => default_window(),
        };

        let provider = self
            .registry
            .provider_for(channel)
            .await
            .map_err(|e| stocksync_common::Error::Internal(anyhow::anyhow!(e)))?;

        let transactions = provider
            .recent_transactions(since)
            .await
            .map_err(|e| stocksync_common::Error::Internal(anyhow::anyhow!(e)))?;

        let mut published = 0;
        let mut latest = since;

        for transaction in &transactions {
            latest = latest.max(transaction.completed_at);

            // Same id may already have arrived as a webhook.
            let dedupe_key = format!(
                "dedupe:{}:{}:txn:{}",
                self.tenant_id, channel.id, transaction.transaction_id
            );
            if !self
                .kv
                .set_nx_ex(&dedupe_key, "1", self.dedupe_ttl_secs)
                .await?
            {
                debug!(
                    transaction_id = transaction.transaction_id,
                    "transaction already seen, skipping"
                );
                continue;
            }

            for line in &transaction.lines {
                if self
                    .publish_sale(channel, transaction.completed_at, &line.external_product_id, line.quantity_sold)
                    .await?
                {
                    published += 1;
                }
            }
        }

        // Advance only after a successful pass so a failed fetch retries the
        // same window.
        self.kv.set(&cursor_key, &latest.to_rfc3339()).await?;

        Ok(published)
    }

    async fn publish_sale(
        &self,
        channel: &Channel,
        completed_at: DateTime<Utc>,
        external_id: &str,
        quantity_sold: i64,
    ) -> Result<bool> {
        let Some(mapping) = self
            .repo
            .get_mapping(self.tenant_id, channel.id, external_id)
            .await?
        else {
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
            self.repo.create_sync_event(&event).await?;
            return Ok(false);
        };

        let Some(product) = self
            .repo
            .get_product(self.tenant_id, mapping.product_id)
            .await?
        else {
            return Ok(false);
        };

        let previous = product.current_stock;
        let new_quantity = (previous - quantity_sold).max(0);

        let change = StockChange {
            tenant_id: self.tenant_id,
            source_channel_id: channel.id,
            source_channel_type: channel.channel_type,
            external_id: external_id.to_string(),
            product_id: Some(product.id),
            sku: Some(product.sku.clone()),
            previous_quantity: Some(previous),
            new_quantity,
            change_amount: new_quantity - previous,
            change_type: ChangeType::Sale,
            timestamp: completed_at,
            raw_payload: json!({ "source": "pos_poll" }),
            metadata: json!({ "quantity_sold": quantity_sold }),
        };

        metrics::STOCK_CHANGES_TOTAL
            .with_label_values(&[&self.tenant_id.to_string(), ChangeType::Sale.as_str()])
            .inc();
        self.bus.publish(EngineEvent::StockChange { change });
        Ok(true)
    }
}

//! Guardian: scheduled reconciliation
//!
//! Every interval, for every product: read live stock from each mapped
//! active channel, compare against the source of truth, and either repair
//! small drift in place or flag larger drift for an operator. The source of
//! truth is the POS channel when one exists, otherwise the oldest active
//! channel (stable across runs, unlike "whichever came back first").

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::alert::AlertEngine;
use crate::bus::EventBus;
use crate::metrics;
use crate::repository::Repository;
use stocksync_common::Result;
use stocksync_domain::{
    Channel, ChannelStockState, DriftDetection, DriftSeverity, DriftingChannel, EngineEvent,
    Product,
};
use stocksync_provider::ProviderRegistry;

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReconcileSummary {
    pub products_checked: usize,
    pub drifts_found: usize,
    pub channels_repaired: usize,
    pub flagged: usize,
    /// Fewer than two active channels: nothing to reconcile.
    pub skipped: bool,
}

pub struct Guardian {
    tenant_id: Uuid,
    repo: Arc<dyn Repository>,
    registry: Arc<ProviderRegistry>,
    bus: EventBus,
    alerts: Arc<AlertEngine>,
    auto_repair_threshold: i64,
    provider_timeout: Duration,
}

impl Guardian {
    pub fn new(
        tenant_id: Uuid,
        repo: Arc<dyn Repository>,
        registry: Arc<ProviderRegistry>,
        bus: EventBus,
        alerts: Arc<AlertEngine>,
        auto_repair_threshold: i64,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            tenant_id,
            repo,
            registry,
            bus,
            alerts,
            auto_repair_threshold,
            provider_timeout,
        }
    }

    /// Select the source of truth: the POS channel, else the oldest active
    /// channel. Channels arrive ordered oldest-first.
    fn select_source<'a>(channels: &'a [Channel]) -> Option<&'a Channel> {
        if let Some(pos) = channels.iter().find(|c| !c.channel_type.is_online()) {
            return Some(pos);
        }

        let oldest = channels.first();
        if let Some(channel) = oldest {
            warn!(
                channel_id = %channel.id,
                "no POS channel, falling back to oldest active channel as source of truth"
            );
        }
        oldest
    }

    /// Full reconciliation sweep over the tenant.
    pub async fn reconcile_tenant(&self) -> Result<ReconcileSummary> {
        let channels = self.repo.get_active_channels(self.tenant_id).await?;
        if channels.len() < 2 {
            debug!(
                tenant_id = %self.tenant_id,
                active_channels = channels.len(),
                "skipping reconciliation, nothing to reconcile"
            );
            return Ok(ReconcileSummary {
                skipped: true,
                ..Default::default()
            });
        }

        let Some(source) = Self::select_source(&channels) else {
            return Ok(ReconcileSummary {
                skipped: true,
                ..Default::default()
            });
        };
        let source = source.clone();

        let products = self.repo.get_products(self.tenant_id).await?;
        let mut summary = ReconcileSummary::default();

        for product in &products {
            summary.products_checked += 1;
            match self.reconcile_product(product, &channels, &source).await {
                Ok(Some((repaired, flagged))) => {
                    summary.drifts_found += 1;
                    summary.channels_repaired += repaired;
                    if flagged {
                        summary.flagged += 1;
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(product_id = %product.id, error = %e, "product reconciliation failed");
                }
            }
        }

        info!(
            tenant_id = %self.tenant_id,
            products = summary.products_checked,
            drifts = summary.drifts_found,
            repaired = summary.channels_repaired,
            flagged = summary.flagged,
            "reconciliation pass finished"
        );
        Ok(summary)
    }

    /// Targeted reconciliation of a single product.
    pub async fn reconcile_one(&self, product_id: Uuid) -> Result<ReconcileSummary> {
        let channels = self.repo.get_active_channels(self.tenant_id).await?;
        if channels.len() < 2 {
            return Ok(ReconcileSummary {
                skipped: true,
                ..Default::default()
            });
        }
        let Some(source) = Self::select_source(&channels) else {
            return Ok(ReconcileSummary {
                skipped: true,
                ..Default::default()
            });
        };
        let source = source.clone();

        let Some(product) = self.repo.get_product(self.tenant_id, product_id).await? else {
            return Ok(ReconcileSummary::default());
        };

        let mut summary = ReconcileSummary {
            products_checked: 1,
            ..Default::default()
        };
        if let Some((repaired, flagged)) =
            self.reconcile_product(&product, &channels, &source).await?
        {
            summary.drifts_found = 1;
            summary.channels_repaired = repaired;
            summary.flagged = flagged as usize;
        }
        Ok(summary)
    }

    /// Returns `None` when the product shows no drift, otherwise
    /// `(channels repaired, flagged)`.
    async fn reconcile_product(
        &self,
        product: &Product,
        channels: &[Channel],
        source: &Channel,
    ) -> Result<Option<(usize, bool)>> {
        let mappings = self
            .repo
            .get_mappings_for_product(self.tenant_id, product.id)
            .await?;

        // Live read from every mapped active channel.
        let mut states: Vec<ChannelStockState> = Vec::new();
        for channel in channels {
            let Some(mapping) = mappings.iter().find(|m| m.channel_id == channel.id) else {
                continue;
            };

            match self.read_live(channel, &mapping.external_id).await {
                Some(quantity) => states.push(ChannelStockState {
                    channel_id: channel.id,
                    channel_type: channel.channel_type,
                    external_id: mapping.external_id.clone(),
                    quantity,
                }),
                None => {
                    warn!(
                        channel_id = %channel.id,
                        sku = product.sku,
                        "live read failed, channel excluded from this pass"
                    );
                }
            }
        }

        let Some(truth) = states.iter().find(|s| s.channel_id == source.id) else {
            // Without the source there is no baseline to reconcile against.
            warn!(sku = product.sku, "source of truth unreadable, skipping product");
            return Ok(None);
        };
        let truth_quantity = truth.quantity;

        let drifting: Vec<DriftingChannel> = states
            .iter()
            .filter(|s| s.channel_id != source.id)
            .filter_map(|s| {
                let expected = if s.channel_type.is_online() {
                    (truth_quantity - product.buffer_stock).max(0)
                } else {
                    truth_quantity
                };
                let drift = (s.quantity - expected).abs();
                (drift > 0).then(|| DriftingChannel {
                    channel_id: s.channel_id,
                    channel_type: s.channel_type,
                    external_id: s.external_id.clone(),
                    expected,
                    actual: s.quantity,
                    drift,
                })
            })
            .collect();

        if drifting.is_empty() {
            return Ok(None);
        }

        let max_drift = drifting.iter().map(|d| d.drift).max().unwrap_or(0);
        let severity = DriftSeverity::classify(max_drift, self.auto_repair_threshold);

        let detection = DriftDetection {
            tenant_id: self.tenant_id,
            product_id: product.id,
            sku: product.sku.clone(),
            source_channel_id: source.id,
            truth_quantity,
            channels: drifting.clone(),
            max_drift,
            severity,
        };

        metrics::DRIFT_DETECTED_TOTAL
            .with_label_values(&[
                &self.tenant_id.to_string(),
                match severity {
                    DriftSeverity::Low => "low",
                    DriftSeverity::Medium => "medium",
                    DriftSeverity::High => "high",
                },
            ])
            .inc();
        self.bus.publish(EngineEvent::DriftDetected {
            detection: detection.clone(),
        });

        if severity == DriftSeverity::Low {
            let repaired = self.auto_repair(product, truth_quantity, &drifting).await?;
            let partial = repaired.len() < drifting.len();
            if partial {
                self.alerts
                    .raise(
                        stocksync_domain::AlertType::SyncError,
                        format!(
                            "Drift repair incomplete for {}: {}/{} channels repaired",
                            product.sku,
                            repaired.len(),
                            drifting.len()
                        ),
                        Some(product.id),
                        None,
                        json!({ "detection": detection }),
                    )
                    .await?;
            }
            Ok(Some((repaired.len(), partial)))
        } else {
            self.alerts
                .raise(
                    stocksync_domain::AlertType::SyncError,
                    format!(
                        "Stock drift on {}: max drift {} across {} channel(s)",
                        product.sku,
                        max_drift,
                        drifting.len()
                    ),
                    Some(product.id),
                    None,
                    json!({ "detection": detection }),
                )
                .await?;
            Ok(Some((0, true)))
        }
    }

    /// Set the canonical value back to the truth and rewrite every drifting
    /// channel. Partial failure still reports the channels that did repair.
    async fn auto_repair(
        &self,
        product: &Product,
        truth_quantity: i64,
        drifting: &[DriftingChannel],
    ) -> Result<Vec<Uuid>> {
        self.repo
            .update_product_stock(self.tenant_id, product.id, truth_quantity)
            .await?;

        let mut repaired = Vec::new();
        for drift in drifting {
            let Some(channel) = self.repo.get_channel(self.tenant_id, drift.channel_id).await?
            else {
                continue;
            };

            match self.write_live(&channel, &drift.external_id, drift.expected).await {
                true => {
                    repaired.push(drift.channel_id);
                    metrics::DRIFT_REPAIRED_TOTAL
                        .with_label_values(&[&self.tenant_id.to_string()])
                        .inc();
                }
                false => {
                    warn!(
                        channel_id = %drift.channel_id,
                        sku = product.sku,
                        "drift repair write failed"
                    );
                }
            }
        }

        info!(
            sku = product.sku,
            truth_quantity,
            repaired = repaired.len(),
            of = drifting.len(),
            "drift auto-repaired"
        );
        self.bus.publish(EngineEvent::DriftRepaired {
            tenant_id: self.tenant_id,
            product_id: product.id,
            truth_quantity,
            repaired_channels: repaired.clone(),
        });

        Ok(repaired)
    }

    /// Catch-up for one channel, used when it reconnects: push the expected
    /// value for every product mapped on it. Returns how many were pushed.
    pub async fn reconcile_channel(&self, channel_id: Uuid) -> Result<usize> {
        let Some(channel) = self.repo.get_channel(self.tenant_id, channel_id).await? else {
            return Ok(0);
        };
        if !channel.is_active {
            return Ok(0);
        }

        let mappings = self
            .repo
            .get_mappings_for_channel(self.tenant_id, channel_id)
            .await?;

        let mut pushed = 0;
        for mapping in &mappings {
            let Some(product) = self.repo.get_product(self.tenant_id, mapping.product_id).await?
            else {
                continue;
            };

            let expected = product.stock_for_channel(channel.channel_type.is_online());
            if self.write_live(&channel, &mapping.external_id, expected).await {
                pushed += 1;
            }
        }

        if pushed > 0 {
            self.repo.touch_channel_sync(self.tenant_id, channel_id).await?;
        }
        info!(%channel_id, pushed, "channel catch-up finished");
        Ok(pushed)
    }

    async fn read_live(&self, channel: &Channel, external_id: &str) -> Option<i64> {
        let provider = self.registry.provider_for(channel).await.ok()?;
        match tokio::time::timeout(self.provider_timeout, provider.get_product(external_id)).await
        {
            Ok(Ok(product)) => Some(product.quantity),
            _ => None,
        }
    }

    async fn write_live(&self, channel: &Channel, external_id: &str, quantity: i64) -> bool {
        let Ok(provider) = self.registry.provider_for(channel).await else {
            return false;
        };
        matches!(
            tokio::time::timeout(
                self.provider_timeout,
                provider.update_stock(external_id, quantity)
            )
            .await,
            Ok(Ok(()))
        )
    }
}

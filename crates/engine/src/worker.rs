//! Tenant worker assembly
//!
//! [`TenantEngine`] wires the agent quartet for one tenant around a shared
//! bus; [`TenantWorker`] adds the durable side (queue consumer pools, the
//! delayed-job promoter, schedules, POS pollers) and runs it all until
//! shutdown. Bus subscribers run as their own tasks (publishing from a
//! subscriber enqueues, it never recurses into delivery).

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::alert::AlertEngine;
use crate::bus::EventBus;
use crate::guardian::Guardian;
use crate::kv::KvStore;
use crate::locks::ProductLocks;
use crate::metrics;
use crate::queue::{JobEnvelope, JobQueue, QueueName, RetryDecision};
use crate::repository::Repository;
use crate::sync::SyncAgent;
use crate::watcher::{PosPoller, Watcher};
use stocksync_config::EngineConfig;
use stocksync_domain::{
    AlertCheckJob, ChannelType, EngineEvent, ReconcileJob, SyncJob, WebhookJob,
};
use stocksync_provider::ProviderRegistry;

/// Terminal sync events older than this are trimmed by the worker's
/// retention sweep.
const SYNC_EVENT_RETENTION_DAYS: i64 = 30;

/// The agent quartet for one tenant, sharing one bus.
pub struct TenantEngine {
    pub tenant_id: Uuid,
    pub bus: EventBus,
    pub watcher: Arc<Watcher>,
    pub sync: Arc<SyncAgent>,
    pub guardian: Arc<Guardian>,
    pub alerts: Arc<AlertEngine>,
    repo: Arc<dyn Repository>,
    registry: Arc<ProviderRegistry>,
    kv: Arc<dyn KvStore>,
    locks: Arc<ProductLocks>,
}

impl TenantEngine {
    pub fn new(
        tenant_id: Uuid,
        repo: Arc<dyn Repository>,
        registry: Arc<ProviderRegistry>,
        kv: Arc<dyn KvStore>,
        config: &EngineConfig,
    ) -> Self {
        let bus = EventBus::new(config.bus_capacity);
        let locks = Arc::new(ProductLocks::new());
        let provider_timeout = config.provider_timeout();

        let watcher = Arc::new(Watcher::new(
            tenant_id,
            Arc::clone(&repo),
            bus.clone(),
            Arc::clone(&kv),
            config.watcher.dedupe_ttl_secs,
        ));

        let sync = Arc::new(SyncAgent::new(
            tenant_id,
            Arc::clone(&repo),
            Arc::clone(&registry),
            bus.clone(),
            Arc::clone(&locks),
            provider_timeout,
            config.sync.full_sync_parallelism,
        ));

        let alerts = Arc::new(AlertEngine::new(
            tenant_id,
            Arc::clone(&repo),
            bus.clone(),
            Arc::clone(&registry),
            config.alert.low_stock_margin,
            provider_timeout,
        ));

        let guardian = Arc::new(Guardian::new(
            tenant_id,
            Arc::clone(&repo),
            Arc::clone(&registry),
            bus.clone(),
            Arc::clone(&alerts),
            config.guardian.drift_auto_repair_threshold,
            provider_timeout,
        ));

        Self {
            tenant_id,
            bus,
            watcher,
            sync,
            guardian,
            alerts,
            repo,
            registry,
            kv,
            locks,
        }
    }

    pub fn repo(&self) -> Arc<dyn Repository> {
        Arc::clone(&self.repo)
    }

    /// Spawn the bus pumps: Sync consumes `stock:change`, Alert consumes the
    /// events it reacts to. Each pump is its own task so subscribers never
    /// run on the publisher's stack.
    pub fn spawn_pumps(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        // Sync pump: stock:change -> propagation.
        {
            let mut rx = self.bus.subscribe();
            let sync = Arc::clone(&self.sync);
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        received = rx.recv() => match received {
                            Ok(EngineEvent::StockChange { change }) => {
                                if let Err(e) = sync.apply_stock_change(&change).await {
                                    error!(error = %e, "stock change propagation failed");
                                }
                            }
                            Ok(_) => {}
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                                warn!(missed, "sync pump lagged behind the bus");
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }));
        }

        // Alert pump: stock:updated, sync:failed, channel:disconnected,
        // alert:rules_invalidated.
        {
            let mut rx = self.bus.subscribe();
            let alerts = Arc::clone(&self.alerts);
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        received = rx.recv() => match received {
                            Ok(event) => {
                                if let Err(e) = alerts.handle_event(&event).await {
                                    error!(error = %e, kind = event.kind(), "alert handling failed");
                                }
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                                warn!(missed, "alert pump lagged behind the bus");
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        }
                    }
                }
            }));
        }

        handles
    }
}

/// One tenant's full runtime: engine + queues + schedules.
pub struct TenantWorker {
    engine: Arc<TenantEngine>,
    queue: JobQueue,
    config: EngineConfig,
    shutdown: CancellationToken,
}

impl TenantWorker {
    pub fn new(
        engine: Arc<TenantEngine>,
        queue: JobQueue,
        config: EngineConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            engine,
            queue,
            config,
            shutdown,
        }
    }

    pub fn engine(&self) -> Arc<TenantEngine> {
        Arc::clone(&self.engine)
    }

    /// Run everything until shutdown, then drain.
    pub async fn run(&self) {
        let tenant_id = self.engine.tenant_id;
        info!(%tenant_id, "tenant worker starting");

        let mut handles = self.engine.spawn_pumps(self.shutdown.clone());

        // Delayed-job promoter: moves due retries back onto ready lists.
        handles.push(self.spawn_promoter());

        // Consumer pools. Webhooks and syncs run in parallel; reconciliation
        // and alert checks are serial by contract.
        for worker_id in 0..self.config.queue.concurrency {
            handles.push(self.spawn_consumer(QueueName::Webhook, worker_id));
            handles.push(self.spawn_consumer(QueueName::Sync, worker_id));
        }
        handles.push(self.spawn_consumer(QueueName::Reconcile, 0));
        handles.push(self.spawn_consumer(QueueName::Alert, 0));

        // Schedules enqueue durable jobs rather than running inline, so a
        // worker restart never loses a due sweep.
        handles.push(self.spawn_schedule(
            QueueName::Reconcile,
            Duration::from_secs(self.config.guardian.reconcile_interval_secs),
        ));
        handles.push(self.spawn_schedule(
            QueueName::Alert,
            Duration::from_secs(self.config.alert.check_interval_secs),
        ));

        // POS polling fallback per active POS channel.
        match self.engine.repo.get_active_channels(tenant_id).await {
            Ok(channels) => {
                for channel in channels {
                    if channel.channel_type == ChannelType::Pos {
                        handles.push(self.spawn_pos_poller(channel.id));
                    }
                }
            }
            Err(e) => warn!(error = %e, "could not enumerate channels for POS polling"),
        }

        // Housekeeping: keep the lock table from growing unboundedly and trim
        // terminal sync events past their retention.
        {
            let locks = Arc::clone(&self.engine.locks);
            let repo = self.engine.repo();
            let shutdown = self.shutdown.clone();
            handles.push(tokio::spawn(async move {
                let mut lock_ticker = tokio::time::interval(Duration::from_secs(300));
                let mut retention_ticker = tokio::time::interval(Duration::from_secs(6 * 3600));
                retention_ticker.tick().await;

                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = lock_ticker.tick() => {
                            let purged = locks.purge_idle();
                            if purged > 0 {
                                debug!(purged, "idle product locks purged");
                            }
                        }
                        _ = retention_ticker.tick() => {
                            let cutoff = chrono::Utc::now() - chrono::Duration::days(SYNC_EVENT_RETENTION_DAYS);
                            match repo.prune_sync_events(tenant_id, cutoff).await {
                                Ok(0) => {}
                                Ok(pruned) => info!(pruned, "old sync events trimmed"),
                                Err(e) => warn!(error = %e, "sync event retention sweep failed"),
                            }
                        }
                    }
                }
            }));
        }

        info!(%tenant_id, tasks = handles.len(), "tenant worker ready");
        self.shutdown.cancelled().await;

        info!(%tenant_id, "tenant worker draining");
        for handle in handles {
            let _ = handle.await;
        }
        info!(%tenant_id, "tenant worker stopped");
    }

    fn spawn_promoter(&self) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        for name in QueueName::ALL {
                            if let Err(e) = queue.promote_due(name).await {
                                warn!(queue = name.as_str(), error = %e, "promoter pass failed");
                            }
                        }
                    }
                }
            }
        })
    }

    fn spawn_schedule(&self, queue_name: QueueName, every: Duration) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let shutdown = self.shutdown.clone();
        let tenant_id = self.engine.tenant_id;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The immediate first tick would sweep at boot; skip it.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let result = match queue_name {
                            QueueName::Reconcile => {
                                queue.enqueue(queue_name, &ReconcileJob {
                                    tenant_id,
                                    product_id: None,
                                    channel_id: None,
                                }).await
                            }
                            QueueName::Alert => {
                                queue.enqueue(queue_name, &AlertCheckJob {
                                    tenant_id,
                                    product_ids: None,
                                }).await
                            }
                            _ => continue,
                        };
                        if let Err(e) = result {
                            warn!(queue = queue_name.as_str(), error = %e, "schedule enqueue failed");
                        }
                    }
                }
            }
        })
    }

    fn spawn_pos_poller(&self, channel_id: Uuid) -> JoinHandle<()> {
        let poller = PosPoller::new(
            self.engine.tenant_id,
            self.engine.repo(),
            self.engine.bus.clone(),
            Arc::clone(&self.engine.registry),
            Arc::clone(&self.engine.kv),
            Duration::from_secs(self.config.watcher.pos_poll_interval_secs),
            self.config.watcher.dedupe_ttl_secs,
        );
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            poller.run(channel_id, shutdown).await;
        })
    }

    fn spawn_consumer(&self, queue_name: QueueName, worker_id: usize) -> JoinHandle<()> {
        let engine = Arc::clone(&self.engine);
        let queue = self.queue.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let tenant = engine.tenant_id.to_string();

            loop {
                if shutdown.is_cancelled() {
                    break;
                }

                let envelope = match queue.dequeue(queue_name, 5).await {
                    Ok(Some(envelope)) => envelope,
                    Ok(None) => continue,
                    Err(e) => {
                        error!(
                            queue = queue_name.as_str(),
                            worker_id,
                            error = %e,
                            "dequeue failed, backing off"
                        );
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                };

                match dispatch(&engine, queue_name, &envelope).await {
                    Ok(()) => {
                        if let Err(e) = queue.complete(&envelope).await {
                            warn!(error = %e, "failed to record completion");
                        }
                        metrics::QUEUE_JOBS_TOTAL
                            .with_label_values(&[&tenant, queue_name.as_str(), "completed"])
                            .inc();
                    }
                    Err(e) => {
                        let message = e.to_string();
                        match queue.retry_or_bury(envelope, &message).await {
                            Ok(RetryDecision::Scheduled(_)) => {
                                metrics::QUEUE_JOBS_TOTAL
                                    .with_label_values(&[&tenant, queue_name.as_str(), "retried"])
                                    .inc();
                            }
                            Ok(RetryDecision::Buried) => {
                                metrics::QUEUE_JOBS_TOTAL
                                    .with_label_values(&[&tenant, queue_name.as_str(), "buried"])
                                    .inc();
                                engine.bus.publish(EngineEvent::SyncFailed {
                                    tenant_id: engine.tenant_id,
                                    channel_id: None,
                                    product_id: None,
                                    error: message,
                                    retryable: false,
                                });
                            }
                            Err(qe) => {
                                error!(error = %qe, "failed to reschedule job");
                            }
                        }
                    }
                }
            }

            debug!(queue = queue_name.as_str(), worker_id, "consumer stopped");
        })
    }
}

async fn dispatch(
    engine: &TenantEngine,
    queue_name: QueueName,
    envelope: &JobEnvelope,
) -> anyhow::Result<()> {
    match queue_name {
        QueueName::Webhook => {
            let job: WebhookJob = serde_json::from_value(envelope.payload.clone())?;
            engine.watcher.process(&job).await?;
        }
        QueueName::Sync => {
            let job: SyncJob = serde_json::from_value(envelope.payload.clone())?;
            engine.sync.handle_sync_job(&job).await?;
        }
        QueueName::Reconcile => {
            let job: ReconcileJob = serde_json::from_value(envelope.payload.clone())?;
            if let Some(channel_id) = job.channel_id {
                engine.guardian.reconcile_channel(channel_id).await?;
            } else if let Some(product_id) = job.product_id {
                engine.guardian.reconcile_one(product_id).await?;
            } else {
                engine.guardian.reconcile_tenant().await?;
            }
        }
        QueueName::Alert => {
            let _job: AlertCheckJob = serde_json::from_value(envelope.payload.clone())?;
            engine.alerts.run_checks().await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;
    use crate::repository::MemoryRepository;
    use chrono::Utc;
    use serde_json::json;
    use stocksync_domain::{Channel, Product, ProductChannelMapping};
    use stocksync_provider::mock::{MockProvider, MockProviderFactory};

    fn engine_config() -> EngineConfig {
        // Defaults, no env required.
        unsafe {
            std::env::set_var("DATABASE_URL", "postgresql://localhost/stocksync_test");
        }
        EngineConfig::from_env().unwrap()
    }

    #[tokio::test]
    async fn test_pumps_carry_webhook_through_to_propagation() {
        let tenant_id = Uuid::new_v4();
        let pos_id = Uuid::new_v4();
        let online_id = Uuid::new_v4();
        let product_id = Uuid::new_v4();

        let repo = Arc::new(MemoryRepository::new());
        for (id, channel_type, name, offset) in [
            (pos_id, ChannelType::Pos, "POS", 0),
            (online_id, ChannelType::OnlineStore, "ONLINE", 60),
        ] {
            repo.insert_channel(Channel {
                id,
                tenant_id,
                channel_type,
                name: name.into(),
                credentials: "{}".into(),
                is_active: true,
                external_instance_id: None,
                webhook_secret: None,
                last_sync_at: None,
                deactivated_at: None,
                created_at: Utc::now() + chrono::Duration::seconds(offset),
            });
        }
        repo.insert_product(Product {
            id: product_id,
            tenant_id,
            sku: "WH-001".into(),
            name: "Headphones".into(),
            current_stock: 100,
            buffer_stock: 10,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        });
        for (channel_id, external_id) in [(pos_id, "pos-1"), (online_id, "web-1")] {
            repo.insert_mapping(ProductChannelMapping {
                id: Uuid::new_v4(),
                product_id,
                channel_id,
                external_id: external_id.into(),
                external_sku: None,
                created_at: Utc::now(),
            });
        }

        let factory = Arc::new(MockProviderFactory::new());
        let online_mock = Arc::new(MockProvider::new(ChannelType::OnlineStore));
        factory.register(online_id, online_mock.clone());
        let registry = Arc::new(ProviderRegistry::new(
            factory,
            6000,
            5,
            Duration::from_secs(60),
        ));

        let engine = TenantEngine::new(
            tenant_id,
            repo.clone() as Arc<dyn Repository>,
            registry,
            Arc::new(MemoryKv::new()),
            &engine_config(),
        );

        let shutdown = CancellationToken::new();
        let _pumps = engine.spawn_pumps(shutdown.clone());

        // Feed a webhook directly into the watcher; the sync pump must pick
        // the published change up and push to the online channel.
        let job = WebhookJob::new(
            tenant_id,
            pos_id,
            ChannelType::Pos,
            "stock.updated",
            json!({"EventId": "evt-1", "ProductId": "pos-1", "CurrentStockLevel": 85}),
        );
        engine.watcher.process(&job).await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        let mut pushed = false;
        while tokio::time::Instant::now() < deadline {
            if online_mock.update_log().await == vec![("web-1".to_string(), 75)] {
                pushed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(pushed, "online channel never received the buffered push");

        shutdown.cancel();
    }
}

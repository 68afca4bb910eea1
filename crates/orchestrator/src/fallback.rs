//! In-process fallback engines
//!
//! The degraded path: when tenant isolation is off, or a tenant's worker is
//! latched, that tenant's engine runs as tasks inside the orchestrator
//! process instead of a child process. Same engine, same queues; only the
//! crash containment is gone.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use stocksync_common::RedisClient;
use stocksync_config::EngineConfig;
use stocksync_engine::{JobQueue, KvStore, RedisKv, Repository, TenantEngine, TenantWorker};
use stocksync_provider::{ProviderFactory, ProviderRegistry};

pub struct SharedEngineFallback {
    engine_config: EngineConfig,
    repo: Arc<dyn Repository>,
    redis: RedisClient,
    factory: Arc<dyn ProviderFactory>,
    workers: Mutex<HashMap<Uuid, (CancellationToken, JoinHandle<()>)>>,
}

impl SharedEngineFallback {
    pub fn new(
        engine_config: EngineConfig,
        repo: Arc<dyn Repository>,
        redis: RedisClient,
        factory: Arc<dyn ProviderFactory>,
    ) -> Self {
        Self {
            engine_config,
            repo,
            redis,
            factory,
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Start an in-process engine for a tenant if one is not already running.
    /// Returns whether a new one was started.
    pub async fn ensure_running(&self, tenant_id: Uuid) -> bool {
        let mut workers = self.workers.lock().await;
        if workers.contains_key(&tenant_id) {
            return false;
        }

        info!(%tenant_id, "starting in-process fallback engine");

        let kv: Arc<dyn KvStore> = Arc::new(RedisKv::new(self.redis.clone()));
        let registry = Arc::new(ProviderRegistry::new(
            Arc::clone(&self.factory),
            self.engine_config.provider.rate_limit_per_minute,
            self.engine_config.provider.breaker_threshold,
            Duration::from_secs(self.engine_config.provider.breaker_cooldown_secs),
        ));

        let engine = Arc::new(TenantEngine::new(
            tenant_id,
            Arc::clone(&self.repo),
            registry,
            kv,
            &self.engine_config,
        ));
        let queue = JobQueue::new(
            self.redis.clone(),
            tenant_id,
            self.engine_config.queue.clone(),
        );

        let shutdown = CancellationToken::new();
        let worker = TenantWorker::new(engine, queue, self.engine_config.clone(), shutdown.clone());
        let handle = tokio::spawn(async move {
            worker.run().await;
        });

        workers.insert(tenant_id, (shutdown, handle));
        true
    }

    pub async fn stop(&self, tenant_id: Uuid) {
        let entry = {
            let mut workers = self.workers.lock().await;
            workers.remove(&tenant_id)
        };

        if let Some((shutdown, handle)) = entry {
            info!(%tenant_id, "stopping in-process fallback engine");
            shutdown.cancel();
            if handle.await.is_err() {
                warn!(%tenant_id, "fallback engine task panicked");
            }
        }
    }

    pub async fn stop_all(&self) {
        let entries: Vec<(Uuid, (CancellationToken, JoinHandle<()>))> = {
            let mut workers = self.workers.lock().await;
            workers.drain().collect()
        };

        for (tenant_id, (shutdown, handle)) in entries {
            shutdown.cancel();
            if handle.await.is_err() {
                warn!(%tenant_id, "fallback engine task panicked");
            }
        }
    }

    pub async fn running(&self) -> Vec<Uuid> {
        let workers = self.workers.lock().await;
        workers.keys().copied().collect()
    }
}

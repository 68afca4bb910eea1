/*!
 * StockSync Worker
 *
 * One tenant per process. The orchestrator spawns this binary with TENANT_ID
 * set, reads line-delimited JSON frames (ready / heartbeat / events) off
 * stdout, and writes shutdown frames to stdin. Logs go to stderr so stdout
 * stays a clean IPC stream.
 *
 * ## Environment
 *
 * - TENANT_ID: UUID of the tenant this worker serves (required)
 * - DATABASE_URL, REDIS_URL: infrastructure
 * - PROVIDER_MODE: "mock" runs the in-memory providers (staging/e2e); a
 *   deployable build links real channel adapters at boot
 * - HEALTH_CHECK_INTERVAL_SECS: heartbeat cadence (default 30)
 * - everything in `stocksync_config::EngineConfig`
 *
 * Exit code 0 means a clean drain; anything else triggers the orchestrator's
 * restart logic.
 */

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use stocksync_config::EngineConfig;
use stocksync_domain::{ParentMessage, WorkerMessage};
use stocksync_engine::repository::PgRepository;
use stocksync_engine::{JobQueue, KvStore, RedisKv, Repository, TenantEngine, TenantWorker};
use stocksync_provider::mock::MockProviderFactory;
use stocksync_provider::{ProviderFactory, ProviderRegistry};

fn provider_factory() -> Result<Arc<dyn ProviderFactory>> {
    match std::env::var("PROVIDER_MODE").as_deref() {
        Ok("mock") | Err(_) => {
            warn!("PROVIDER_MODE=mock: using in-memory providers, stock goes nowhere real");
            Ok(Arc::new(MockProviderFactory::new()))
        }
        Ok(other) => {
            bail!("unknown PROVIDER_MODE '{other}': this build links no live channel adapters")
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    stocksync_common::init_tracing_stderr();

    let tenant_id: Uuid = std::env::var("TENANT_ID")
        .context("TENANT_ID must be set")?
        .parse()
        .context("TENANT_ID must be a UUID")?;

    let config = EngineConfig::from_env().context("Failed to load configuration")?;
    let heartbeat_secs: u64 = std::env::var("HEALTH_CHECK_INTERVAL_SECS")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(30);

    info!(%tenant_id, "🚀 Starting tenant worker");
    info!(
        "   - Redis: {}",
        config.redis.url
    );
    info!(
        "   - Database: {}",
        config.database.url.split('@').next_back().unwrap_or("***")
    );
    info!("   - Heartbeat: {}s", heartbeat_secs);
    info!(
        "   - Reconcile every {}s, drift threshold {}",
        config.guardian.reconcile_interval_secs, config.guardian.drift_auto_repair_threshold
    );

    let redis = stocksync_common::RedisClient::new(&config.redis.url)
        .await
        .context("Failed to connect to Redis")?;
    let repo: Arc<dyn Repository> = Arc::new(
        PgRepository::connect(&config.database)
            .await
            .context("Failed to connect to the database")?,
    );
    info!("✅ Infrastructure connected");
    let kv: Arc<dyn KvStore> = Arc::new(RedisKv::new(redis.clone()));
    let registry = Arc::new(ProviderRegistry::new(
        provider_factory()?,
        config.provider.rate_limit_per_minute,
        config.provider.breaker_threshold,
        Duration::from_secs(config.provider.breaker_cooldown_secs),
    ));

    let engine = Arc::new(TenantEngine::new(
        tenant_id,
        repo,
        registry,
        kv,
        &config,
    ));
    let queue = JobQueue::new(redis, tenant_id, config.queue.clone());

    let shutdown = CancellationToken::new();
    let worker = TenantWorker::new(Arc::clone(&engine), queue, config, shutdown.clone());

    // Single writer task keeps stdout frames whole.
    let (ipc_tx, mut ipc_rx) = mpsc::unbounded_channel::<WorkerMessage>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(message) = ipc_rx.recv().await {
            let Ok(line) = serde_json::to_string(&message) else {
                continue;
            };
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            let _ = stdout.write_all(b"\n").await;
            let _ = stdout.flush().await;
        }
    });

    // Heartbeats.
    {
        let ipc_tx = ipc_tx.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(heartbeat_secs));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let _ = ipc_tx.send(WorkerMessage::Heartbeat {
                            tenant_id,
                            timestamp: Utc::now(),
                        });
                    }
                }
            }
        });
    }

    // Forward bus events to the parent for external observers.
    {
        let ipc_tx = ipc_tx.clone();
        let shutdown = shutdown.clone();
        let mut rx = engine.bus.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = rx.recv() => match received {
                        Ok(event) => {
                            let _ = ipc_tx.send(WorkerMessage::Event { tenant_id, event });
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "IPC forwarder lagged behind the bus");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });
    }

    // Parent commands arrive on stdin.
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match serde_json::from_str::<ParentMessage>(&line) {
                    Ok(ParentMessage::Shutdown) => {
                        info!("shutdown requested by orchestrator");
                        shutdown.cancel();
                        break;
                    }
                    Err(e) => warn!(error = %e, "unparseable parent message"),
                }
            }
        });
    }

    // Signals work too, for running outside the orchestrator.
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let ctrl_c = tokio::signal::ctrl_c();
            #[cfg(unix)]
            {
                let mut sigterm =
                    match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    {
                        Ok(sigterm) => sigterm,
                        Err(e) => {
                            error!(error = %e, "failed to install SIGTERM handler");
                            let _ = ctrl_c.await;
                            shutdown.cancel();
                            return;
                        }
                    };
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = ctrl_c.await;
            }
            shutdown.cancel();
        });
    }

    let _ = ipc_tx.send(WorkerMessage::Ready { tenant_id });
    info!(%tenant_id, "✅ Tenant worker READY");

    worker.run().await;

    let _ = ipc_tx.send(WorkerMessage::Stopping { tenant_id });
    drop(ipc_tx);
    let _ = writer.await;

    info!(%tenant_id, "👋 Tenant worker stopped");
    Ok(())
}

/*!
 * StockSync Orchestrator
 *
 * Parent process supervising one worker child per active tenant.
 *
 * ## Architecture
 *
 * ```text
 * Orchestrator (this process)
 *     │
 *     ├──> worker child (tenant A)  ── stdout frames: ready/heartbeat/events
 *     ├──> worker child (tenant B)
 *     ├──> ...
 *     │
 *     ├──> health server (:8080)     /health /ready /tenants /metrics
 *     └──> fallback engines          in-process, for latched tenants or
 *                                    TENANT_ISOLATION=false
 * ```
 *
 * ## Configuration
 *
 * Environment variables: TENANT_ISOLATION, TENANT_POLL_INTERVAL_SECS,
 * HEALTH_CHECK_INTERVAL_SECS, MAX_RESTARTS_PER_TENANT, RESTART_WINDOW_SECS,
 * SHUTDOWN_GRACE_SECS, WORKER_BINARY, ORCHESTRATOR_HEALTH_PORT, plus the
 * engine configuration shared with workers.
 */

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use stocksync_config::{EngineConfig, OrchestratorConfig};
use stocksync_engine::repository::PgRepository;
use stocksync_engine::Repository;
use stocksync_orchestrator::{SharedEngineFallback, SupervisorEvent, TenantSupervisor};
use stocksync_provider::ProviderFactory;
use stocksync_provider::mock::MockProviderFactory;
use stocksync_domain::TenantEvent;

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
    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        stocksync_common::init_tracing_json();
    } else {
        stocksync_common::init_tracing();
    }

    info!("🚀 Starting StockSync Orchestrator");

    let config = OrchestratorConfig::from_env().context("Failed to load configuration")?;
    let engine_config = EngineConfig::from_env().context("Failed to load engine configuration")?;

    info!("📋 Configuration loaded:");
    info!("   - Tenant isolation: {}", config.tenant_isolation);
    info!("   - Tenant poll: {}s", config.tenant_poll_interval_secs);
    info!("   - Heartbeat: {}s", config.health_check_interval_secs);
    info!(
        "   - Restart cap: {} per {}s window",
        config.max_restarts_per_tenant, config.restart_window_secs
    );
    info!("   - Worker binary: {}", config.worker_binary);

    let repo: Arc<dyn Repository> = Arc::new(
        PgRepository::connect(&engine_config.database)
            .await
            .context("Failed to connect to the database")?,
    );

    let redis = stocksync_common::RedisClient::new(&engine_config.redis.url)
        .await
        .context("Failed to connect to Redis")?;
    info!("✅ Infrastructure connected");

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let _ = signal::ctrl_c().await;
            info!("📡 Received Ctrl+C, shutting down");
            shutdown.cancel();
        });
    }

    let supervisor = TenantSupervisor::new(config.clone(), Arc::clone(&repo), shutdown.clone());
    let fallback = Arc::new(SharedEngineFallback::new(
        engine_config,
        Arc::clone(&repo),
        redis,
        provider_factory()?,
    ));

    // Health server.
    {
        let supervisor = Arc::clone(&supervisor);
        let port = config.health_port;
        tokio::spawn(async move {
            if let Err(e) = stocksync_orchestrator::health::serve(port, supervisor).await {
                error!(error = %e, "health server failed");
            }
        });
    }

    // Relay supervisor events to the log (external observers subscribe the
    // same way) and push latched tenants onto the fallback path.
    {
        let mut events = supervisor.subscribe();
        let fallback = Arc::clone(&fallback);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = events.recv() => match received {
                        Ok(SupervisorEvent::Tenant(event)) => {
                            match &event {
                                TenantEvent::MaxRestarts { tenant_id } => {
                                    warn!(%tenant_id, "tenant latched, serving via fallback engine");
                                    fallback.ensure_running(*tenant_id).await;
                                }
                                TenantEvent::Ready { tenant_id } => {
                                    // A worker coming (back) up reclaims the tenant.
                                    fallback.stop(*tenant_id).await;
                                }
                                _ => {}
                            }
                            if let Ok(line) = serde_json::to_string(&event) {
                                info!(event = %line, "tenant event");
                            }
                        }
                        Ok(SupervisorEvent::Engine(event)) => {
                            info!(tenant_id = %event.tenant_id(), kind = event.kind(), "engine event");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "event relay lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        });
    }

    if config.tenant_isolation {
        info!("🧩 Tenant isolation ON: one worker process per tenant");
        supervisor.run().await?;
    } else {
        info!("🧩 Tenant isolation OFF: running all tenants in-process");
        run_shared_mode(&config, Arc::clone(&repo), Arc::clone(&fallback), &shutdown).await?;
    }

    fallback.stop_all().await;
    info!("👋 Orchestrator stopped");
    Ok(())
}

/// Legacy shared-engine mode: every tenant on in-process tasks, with the same
/// tenant-set polling the supervisor does.
async fn run_shared_mode(
    config: &OrchestratorConfig,
    repo: Arc<dyn Repository>,
    fallback: Arc<SharedEngineFallback>,
    shutdown: &CancellationToken,
) -> Result<()> {
    for tenant_id in repo.get_all_tenant_ids().await? {
        fallback.ensure_running(tenant_id).await;
    }

    let mut poll = tokio::time::interval(Duration::from_secs(config.tenant_poll_interval_secs));
    poll.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = poll.tick() => {
                match repo.get_all_tenant_ids().await {
                    Ok(current) => {
                        let running = fallback.running().await;
                        for tenant_id in &current {
                            if !running.contains(tenant_id) {
                                fallback.ensure_running(*tenant_id).await;
                            }
                        }
                        for tenant_id in running {
                            if !current.contains(&tenant_id) {
                                fallback.stop(tenant_id).await;
                            }
                        }
                    }
                    Err(e) => warn!(error = %e, "tenant poll failed"),
                }
            }
        }
    }
    Ok(())
}

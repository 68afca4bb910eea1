//! Configuration management for StockSync
//!
//! All configuration comes from environment variables (a `.env` file is
//! loaded when present). Every knob has a default except the database URL;
//! a worker process and the orchestrator load the same engine config so a
//! tenant behaves identically in isolated and in-process modes.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::time::Duration;

/// PostgreSQL settings, pool tuning included.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
}

/// Redis settings (queues, dedupe KV, poll cursors).
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

/// Durable job queue policies (§ queue semantics: retries, backoff, retention).
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Default attempts per job.
    pub max_attempts: u32,
    /// Webhooks retry harder; providers only deliver once.
    pub webhook_max_attempts: u32,
    /// Base delay for exponential backoff.
    pub backoff_base_ms: u64,
    /// Backoff cap.
    pub backoff_max_ms: u64,
    /// Consumer tasks per named queue. Reconciliation is always serial.
    pub concurrency: usize,
    /// Completed jobs kept this long (and at most `completed_max` of them).
    pub completed_ttl_secs: u64,
    pub completed_max: usize,
    /// Dead-lettered jobs kept this long for inspection.
    pub failed_ttl_secs: u64,
}

/// Watcher settings.
#[derive(Debug, Clone, Deserialize)]
pub struct WatcherConfig {
    /// Webhook dedupe records live at least as long as job retention.
    pub dedupe_ttl_secs: u64,
    /// POS transaction polling cadence for channels without reliable webhooks.
    pub pos_poll_interval_secs: u64,
}

/// Sync settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Deadline per provider call.
    pub provider_timeout_secs: u64,
    /// Parallel products during a full sync.
    pub full_sync_parallelism: usize,
}

/// Guardian settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GuardianConfig {
    pub reconcile_interval_secs: u64,
    /// Drift strictly below this is auto-repaired; at or above it is flagged.
    pub drift_auto_repair_threshold: i64,
}

/// Alert settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    pub check_interval_secs: u64,
    /// Default low-stock threshold is buffer_stock + this margin.
    pub low_stock_margin: i64,
}

/// Provider-layer settings shared by all channels.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Requests per minute per channel.
    pub rate_limit_per_minute: u32,
    /// Consecutive failures before a channel's circuit opens.
    pub breaker_threshold: u32,
    /// How long an open circuit waits before a half-open probe.
    pub breaker_cooldown_secs: u64,
}

/// Everything one tenant's engine needs.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub queue: QueueConfig,
    pub watcher: WatcherConfig,
    pub sync: SyncConfig,
    pub guardian: GuardianConfig,
    pub alert: AlertConfig,
    pub provider: ProviderConfig,
    /// Bounded buffer per event-bus channel.
    pub bus_capacity: usize,
}

/// Parent-process supervision settings.
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Diff the tenant set this often.
    pub tenant_poll_interval_secs: u64,
    /// Expected heartbeat cadence; one miss is degraded, two is crashed.
    pub health_check_interval_secs: u64,
    /// Restarts allowed inside the rolling window before latching.
    pub max_restarts_per_tenant: u32,
    pub restart_window_secs: u64,
    /// Workers drain in-flight jobs up to this long on shutdown.
    pub shutdown_grace_secs: u64,
    /// When false, all tenants run on in-process engine tasks instead of
    /// child processes (the legacy shared-engine path).
    pub tenant_isolation: bool,
    /// Worker executable to spawn per tenant.
    pub worker_binary: String,
    pub health_port: u16,
}

impl EngineConfig {
    /// Load engine configuration from the environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(EngineConfig {
            database: DatabaseConfig {
                url: required("DATABASE_URL")?,
                max_connections: parsed("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: parsed("DATABASE_MIN_CONNECTIONS", 2)?,
                acquire_timeout_secs: parsed("DATABASE_ACQUIRE_TIMEOUT_SECS", 30)?,
                idle_timeout_secs: parsed("DATABASE_IDLE_TIMEOUT_SECS", 600)?,
                max_lifetime_secs: parsed("DATABASE_MAX_LIFETIME_SECS", 1_800)?,
            },
            redis: RedisConfig {
                url: env_or("REDIS_URL", "redis://localhost:6379"),
            },
            queue: QueueConfig {
                max_attempts: parsed("QUEUE_MAX_ATTEMPTS", 3)?,
                webhook_max_attempts: parsed("QUEUE_WEBHOOK_MAX_ATTEMPTS", 5)?,
                backoff_base_ms: parsed("QUEUE_BACKOFF_BASE_MS", 1_000)?,
                backoff_max_ms: parsed("QUEUE_BACKOFF_MAX_MS", 60_000)?,
                concurrency: parsed("QUEUE_CONCURRENCY", 4)?,
                completed_ttl_secs: parsed("QUEUE_COMPLETED_TTL_SECS", 86_400)?,
                completed_max: parsed("QUEUE_COMPLETED_MAX", 100)?,
                failed_ttl_secs: parsed("QUEUE_FAILED_TTL_SECS", 604_800)?,
            },
            watcher: WatcherConfig {
                dedupe_ttl_secs: parsed("WEBHOOK_DEDUPE_TTL_SECS", 604_800)?,
                pos_poll_interval_secs: parsed("POS_POLL_INTERVAL_SECS", 30)?,
            },
            sync: SyncConfig {
                provider_timeout_secs: parsed("PROVIDER_TIMEOUT_SECS", 30)?,
                full_sync_parallelism: parsed("FULL_SYNC_PARALLELISM", 4)?,
            },
            guardian: GuardianConfig {
                reconcile_interval_secs: parsed("RECONCILE_INTERVAL_SECS", 900)?,
                drift_auto_repair_threshold: parsed("DRIFT_AUTO_REPAIR_THRESHOLD", 5)?,
            },
            alert: AlertConfig {
                check_interval_secs: parsed("ALERT_CHECK_INTERVAL_SECS", 300)?,
                low_stock_margin: parsed("LOW_STOCK_MARGIN", 5)?,
            },
            provider: ProviderConfig {
                rate_limit_per_minute: parsed("PROVIDER_RATE_LIMIT_PER_MINUTE", 60)?,
                breaker_threshold: parsed("PROVIDER_BREAKER_THRESHOLD", 5)?,
                breaker_cooldown_secs: parsed("PROVIDER_BREAKER_COOLDOWN_SECS", 60)?,
            },
            bus_capacity: parsed("EVENT_BUS_CAPACITY", 256)?,
        })
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.sync.provider_timeout_secs)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.guardian.reconcile_interval_secs)
    }
}

impl OrchestratorConfig {
    /// Load orchestrator configuration from the environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(OrchestratorConfig {
            tenant_poll_interval_secs: parsed("TENANT_POLL_INTERVAL_SECS", 60)?,
            health_check_interval_secs: parsed("HEALTH_CHECK_INTERVAL_SECS", 30)?,
            max_restarts_per_tenant: parsed("MAX_RESTARTS_PER_TENANT", 10)?,
            restart_window_secs: parsed("RESTART_WINDOW_SECS", 600)?,
            shutdown_grace_secs: parsed("SHUTDOWN_GRACE_SECS", 30)?,
            tenant_isolation: parsed("TENANT_ISOLATION", true)?,
            worker_binary: env_or("WORKER_BINARY", "stocksync-worker"),
            health_port: parsed("ORCHESTRATOR_HEALTH_PORT", 8080)?,
        })
    }

    pub fn restart_window(&self) -> Duration {
        Duration::from_secs(self.restart_window_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }
}

fn required(key: &str) -> Result<String> {
    env::var(key).with_context(|| format!("{key} must be set"))
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parsed<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {key}={raw}: {e}")),
        Err(_) => Ok(default),
    }
}

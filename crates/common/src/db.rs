//! Database connection pool management
//!
//! PostgreSQL pooling via sqlx. All tuning comes from the caller's
//! configuration; nothing here is hard-coded. Each worker process owns its
//! own pool; pools are never shared across tenant processes.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

use crate::error::{Error, Result};

/// Pool tuning, supplied from configuration.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

/// Create a PostgreSQL connection pool and verify it is usable.
///
/// "Usable" means more than reachable: the schema check fails fast when the
/// database has not been migrated, so a worker dies at boot instead of
/// dead-lettering every job it picks up.
pub async fn create_pool(database_url: &str, settings: &PoolSettings) -> Result<PgPool> {
    info!(
        max_connections = settings.max_connections,
        min_connections = settings.min_connections,
        "Creating database pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .min_connections(settings.min_connections)
        .acquire_timeout(settings.acquire_timeout)
        .idle_timeout(settings.idle_timeout)
        .max_lifetime(settings.max_lifetime)
        .connect(database_url)
        .await?;

    info!("Database pool created successfully");

    health_check(&pool).await?;

    Ok(pool)
}

/// Check that the database is reachable and carries the StockSync schema.
pub async fn health_check(pool: &PgPool) -> Result<()> {
    // to_regclass is NULL when the relation does not exist; one round trip
    // covers both connectivity and schema presence.
    let row: (Option<String>,) =
        sqlx::query_as("SELECT to_regclass('public.tenants')::text")
            .fetch_one(pool)
            .await?;

    match row.0 {
        Some(_) => Ok(()),
        None => Err(Error::Config(
            "database schema not initialized (no tenants table); apply migrations/".to_string(),
        )),
    }
}

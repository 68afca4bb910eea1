//! PostgreSQL repository
//!
//! Hand-written queries over the schema in `migrations/`. Enums travel as
//! TEXT; JSON blobs as JSONB. Every statement filters on tenant_id.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use stocksync_common::{Error, PoolSettings, Result};
use stocksync_config::DatabaseConfig;
use stocksync_domain::{
    Alert, AlertRule, AlertType, Channel, Product, ProductChannelMapping, SyncEvent, SyncStatus,
    Tenant,
};

use super::Repository;

pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build the pool from configuration and wrap it. The schema check in
    /// `create_pool` runs here, so a worker with an unmigrated database
    /// fails at boot.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let settings = PoolSettings {
            max_connections: config.max_connections,
            min_connections: config.min_connections,
            acquire_timeout: Duration::from_secs(config.acquire_timeout_secs),
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
            max_lifetime: Duration::from_secs(config.max_lifetime_secs),
        };

        let pool = stocksync_common::create_pool(&config.url, &settings).await?;
        Ok(Self::new(pool))
    }
}

fn parse_enum<T>(raw: &str, what: &str) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    raw.parse::<T>()
        .map_err(|e| Error::Validation(format!("corrupt {what} column: {e}")))
}

fn tenant_from_row(row: &PgRow) -> Result<Tenant> {
    Ok(Tenant {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        slug: row.try_get("slug")?,
        source: parse_enum(row.try_get::<&str, _>("source")?, "tenants.source")?,
        created_at: row.try_get("created_at")?,
    })
}

fn channel_from_row(row: &PgRow) -> Result<Channel> {
    Ok(Channel {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        channel_type: parse_enum(
            row.try_get::<&str, _>("channel_type")?,
            "channels.channel_type",
        )?,
        name: row.try_get("name")?,
        credentials: row.try_get("credentials")?,
        is_active: row.try_get("is_active")?,
        external_instance_id: row.try_get("external_instance_id")?,
        webhook_secret: row.try_get("webhook_secret")?,
        last_sync_at: row.try_get("last_sync_at")?,
        deactivated_at: row.try_get("deactivated_at")?,
        created_at: row.try_get("created_at")?,
    })
}

fn product_from_row(row: &PgRow) -> Result<Product> {
    Ok(Product {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        sku: row.try_get("sku")?,
        name: row.try_get("name")?,
        current_stock: row.try_get("current_stock")?,
        buffer_stock: row.try_get("buffer_stock")?,
        metadata: row.try_get("metadata")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn mapping_from_row(row: &PgRow) -> Result<ProductChannelMapping> {
    Ok(ProductChannelMapping {
        id: row.try_get("id")?,
        product_id: row.try_get("product_id")?,
        channel_id: row.try_get("channel_id")?,
        external_id: row.try_get("external_id")?,
        external_sku: row.try_get("external_sku")?,
        created_at: row.try_get("created_at")?,
    })
}

fn rule_from_row(row: &PgRow) -> Result<AlertRule> {
    Ok(AlertRule {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        threshold: row.try_get("threshold")?,
        product_ids: row.try_get("product_ids")?,
        channel_ids: row.try_get("channel_ids")?,
        enabled: row.try_get("enabled")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl Repository for PgRepository {
    async fn get_all_tenant_ids(&self) -> Result<Vec<Uuid>> {
        let rows = sqlx::query("SELECT id FROM tenants ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get("id").map_err(Error::from))
            .collect()
    }

    async fn get_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>> {
        let row = sqlx::query("SELECT * FROM tenants WHERE id = $1")
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(tenant_from_row).transpose()
    }

    async fn get_channel(&self, tenant_id: Uuid, channel_id: Uuid) -> Result<Option<Channel>> {
        let row = sqlx::query("SELECT * FROM channels WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(channel_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(channel_from_row).transpose()
    }

    async fn get_active_channels(&self, tenant_id: Uuid) -> Result<Vec<Channel>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM channels
            WHERE tenant_id = $1 AND is_active = TRUE
            ORDER BY created_at ASC
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(channel_from_row).collect()
    }

    async fn find_channel_by_instance(
        &self,
        tenant_id: Uuid,
        external_instance_id: &str,
    ) -> Result<Option<Channel>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM channels
            WHERE tenant_id = $1 AND external_instance_id = $2 AND is_active = TRUE
            "#,
        )
        .bind(tenant_id)
        .bind(external_instance_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(channel_from_row).transpose()
    }

    async fn touch_channel_sync(&self, tenant_id: Uuid, channel_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE channels SET last_sync_at = NOW() WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(channel_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_product(&self, tenant_id: Uuid, product_id: Uuid) -> Result<Option<Product>> {
        let row = sqlx::query("SELECT * FROM products WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(product_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(product_from_row).transpose()
    }

    async fn get_products(&self, tenant_id: Uuid) -> Result<Vec<Product>> {
        let rows = sqlx::query("SELECT * FROM products WHERE tenant_id = $1 ORDER BY sku")
            .bind(tenant_id)
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(product_from_row).collect()
    }

    async fn update_product_stock(
        &self,
        tenant_id: Uuid,
        product_id: Uuid,
        new_stock: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE products
            SET current_stock = GREATEST($3, 0), updated_at = NOW()
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(product_id)
        .bind(new_stock)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn apply_stock_update(
        &self,
        tenant_id: Uuid,
        product_id: Uuid,
        new_stock: i64,
        event: &SyncEvent,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE products
            SET current_stock = GREATEST($3, 0), updated_at = NOW()
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(product_id)
        .bind(new_stock)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO sync_events
                (id, tenant_id, event_type, channel_id, product_id,
                 old_value, new_value, status, error_message, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(event.id)
        .bind(event.tenant_id)
        .bind(event.event_type.as_str())
        .bind(event.channel_id)
        .bind(event.product_id)
        .bind(&event.old_value)
        .bind(&event.new_value)
        .bind(event.status.as_str())
        .bind(&event.error_message)
        .bind(event.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_mapping(
        &self,
        tenant_id: Uuid,
        channel_id: Uuid,
        external_id: &str,
    ) -> Result<Option<ProductChannelMapping>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM product_channel_mappings
            WHERE tenant_id = $1 AND channel_id = $2 AND external_id = $3
            "#,
        )
        .bind(tenant_id)
        .bind(channel_id)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(mapping_from_row).transpose()
    }

    async fn get_mappings_for_product(
        &self,
        tenant_id: Uuid,
        product_id: Uuid,
    ) -> Result<Vec<ProductChannelMapping>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM product_channel_mappings
            WHERE tenant_id = $1 AND product_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(mapping_from_row).collect()
    }

    async fn get_mappings_for_channel(
        &self,
        tenant_id: Uuid,
        channel_id: Uuid,
    ) -> Result<Vec<ProductChannelMapping>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM product_channel_mappings
            WHERE tenant_id = $1 AND channel_id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(channel_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(mapping_from_row).collect()
    }

    async fn create_sync_event(&self, event: &SyncEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_events
                (id, tenant_id, event_type, channel_id, product_id,
                 old_value, new_value, status, error_message, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(event.id)
        .bind(event.tenant_id)
        .bind(event.event_type.as_str())
        .bind(event.channel_id)
        .bind(event.product_id)
        .bind(&event.old_value)
        .bind(&event.new_value)
        .bind(event.status.as_str())
        .bind(&event.error_message)
        .bind(event.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_sync_event_status(
        &self,
        tenant_id: Uuid,
        event_id: Uuid,
        status: SyncStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        // The WHERE clause enforces the monotonic lifecycle in one statement:
        // rows in a state the transition does not apply to are untouched.
        let result = sqlx::query(
            r#"
            UPDATE sync_events
            SET status = $3, error_message = COALESCE($4, error_message)
            WHERE tenant_id = $1 AND id = $2
              AND (
                  (status = 'pending' AND $3 = 'processing')
                  OR (status = 'processing' AND $3 IN ('completed', 'failed'))
              )
            "#,
        )
        .bind(tenant_id)
        .bind(event_id)
        .bind(status.as_str())
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::Validation(format!(
                "invalid status transition for sync event {event_id} -> {}",
                status.as_str()
            )));
        }
        Ok(())
    }

    async fn prune_sync_events(&self, tenant_id: Uuid, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM sync_events
            WHERE tenant_id = $1 AND created_at < $2
              AND status IN ('completed', 'failed')
            "#,
        )
        .bind(tenant_id)
        .bind(older_than)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn create_alert(&self, alert: &Alert) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alerts
                (id, tenant_id, alert_type, message, metadata,
                 product_id, channel_id, is_read, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(alert.id)
        .bind(alert.tenant_id)
        .bind(alert.alert_type.as_str())
        .bind(&alert.message)
        .bind(&alert.metadata)
        .bind(alert.product_id)
        .bind(alert.channel_id)
        .bind(alert.is_read)
        .bind(alert.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn alert_exists(
        &self,
        tenant_id: Uuid,
        alert_type: AlertType,
        product_id: Option<Uuid>,
        channel_id: Option<Uuid>,
    ) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM alerts
                WHERE tenant_id = $1 AND alert_type = $2 AND is_read = FALSE
                  AND product_id IS NOT DISTINCT FROM $3
                  AND channel_id IS NOT DISTINCT FROM $4
            ) AS found
            "#,
        )
        .bind(tenant_id)
        .bind(alert_type.as_str())
        .bind(product_id)
        .bind(channel_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("found")?)
    }

    async fn resolve_alerts(
        &self,
        tenant_id: Uuid,
        alert_type: AlertType,
        product_id: Option<Uuid>,
        channel_id: Option<Uuid>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE alerts SET is_read = TRUE
            WHERE tenant_id = $1 AND alert_type = $2 AND is_read = FALSE
              AND product_id IS NOT DISTINCT FROM $3
              AND channel_id IS NOT DISTINCT FROM $4
            "#,
        )
        .bind(tenant_id)
        .bind(alert_type.as_str())
        .bind(product_id)
        .bind(channel_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn get_alert_rules(&self, tenant_id: Uuid) -> Result<Vec<AlertRule>> {
        let rows = sqlx::query(
            "SELECT * FROM alert_rules WHERE tenant_id = $1 ORDER BY created_at",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(rule_from_row).collect()
    }
}

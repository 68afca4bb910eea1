use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Canonical item for a tenant. `current_stock` is the engine-held truth and
/// may lag the point-of-sale by up to one reconciliation cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Unique within the tenant.
    pub sku: String,
    pub name: String,
    pub current_stock: i64,
    /// Reserve withheld from online channels, never synced outward.
    pub buffer_stock: i64,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Quantity an online channel is allowed to see.
    pub fn available_for_online(&self) -> i64 {
        (self.current_stock - self.buffer_stock).max(0)
    }

    /// Stock to push to a channel of the given kind.
    pub fn stock_for_channel(&self, online: bool) -> i64 {
        if online {
            self.available_for_online()
        } else {
            self.current_stock
        }
    }
}

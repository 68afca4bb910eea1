use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::channel::ChannelType;

/// Why a quantity moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Sale,
    Order,
    Restock,
    Return,
    Adjustment,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Sale => "sale",
            ChangeType::Order => "order",
            ChangeType::Restock => "restock",
            ChangeType::Return => "return",
            ChangeType::Adjustment => "adjustment",
        }
    }
}

/// Canonical normalized stock event, in-flight only.
///
/// Produced by the Watcher from channel-specific webhook payloads (or POS
/// polling), consumed by Sync. Never persisted directly; the audit trail is
/// the sync_events table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockChange {
    pub tenant_id: Uuid,
    pub source_channel_id: Uuid,
    pub source_channel_type: ChannelType,
    pub external_id: String,
    /// Resolved lazily from the (channel, external_id) mapping when known.
    pub product_id: Option<Uuid>,
    pub sku: Option<String>,
    pub previous_quantity: Option<i64>,
    pub new_quantity: i64,
    pub change_amount: i64,
    pub change_type: ChangeType,
    pub timestamp: DateTime<Utc>,
    pub raw_payload: serde_json::Value,
    pub metadata: serde_json::Value,
}

impl StockChange {
    /// Signed delta, zero when the previous quantity is unknown.
    pub fn compute_change_amount(previous: Option<i64>, new_quantity: i64) -> i64 {
        match previous {
            Some(prev) => new_quantity - prev,
            None => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_amount() {
        assert_eq!(StockChange::compute_change_amount(Some(100), 85), -15);
        assert_eq!(StockChange::compute_change_amount(Some(10), 40), 30);
        assert_eq!(StockChange::compute_change_amount(None, 40), 0);
    }
}

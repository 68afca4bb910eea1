use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Binds an internal product to its identifier on one channel.
///
/// Unique on (product_id, channel_id) and on (channel_id, external_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductChannelMapping {
    pub id: Uuid,
    pub product_id: Uuid,
    pub channel_id: Uuid,
    pub external_id: String,
    pub external_sku: Option<String>,
    pub created_at: DateTime<Utc>,
}

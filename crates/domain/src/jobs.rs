use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::channel::ChannelType;

/// Raw webhook body handed to the Watcher.
///
/// The HTTP boundary stores the body verbatim and always acks 200 on enqueue;
/// rejection happens downstream where it can be recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookJob {
    pub tenant_id: Uuid,
    pub channel_id: Uuid,
    pub channel_type: ChannelType,
    /// Provider event name, e.g. "stock.updated", "order.created".
    pub event_type: String,
    pub payload: serde_json::Value,
    /// The body exactly as received, for signature verification. Signatures
    /// are computed over bytes, not over re-serialized JSON.
    pub raw_body: Option<String>,
    pub received_at: DateTime<Utc>,
    /// Signature header as received, when the provider signs.
    pub signature: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOperation {
    FullSync,
    IncrementalSync,
    PushUpdate,
}

impl SyncOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOperation::FullSync => "full_sync",
            SyncOperation::IncrementalSync => "incremental_sync",
            SyncOperation::PushUpdate => "push_update",
        }
    }
}

/// Manual or scheduled sync work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    pub tenant_id: Uuid,
    /// Source channel, excluded from fan-out. `None` for tenant-wide syncs
    /// that have no single origin.
    pub channel_id: Option<Uuid>,
    pub channel_type: Option<ChannelType>,
    pub operation: SyncOperation,
    /// Restrict to these products; `None` means all mapped products.
    pub product_ids: Option<Vec<Uuid>>,
}

/// Guardian reconciliation work. Both fields `None` sweeps the whole tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileJob {
    pub tenant_id: Uuid,
    pub product_id: Option<Uuid>,
    /// Set when a single channel reconnects and needs to catch up.
    pub channel_id: Option<Uuid>,
}

/// Scheduled alert evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertCheckJob {
    pub tenant_id: Uuid,
    pub product_ids: Option<Vec<Uuid>>,
}

impl WebhookJob {
    pub fn new(
        tenant_id: Uuid,
        channel_id: Uuid,
        channel_type: ChannelType,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            tenant_id,
            channel_id,
            channel_type,
            event_type: event_type.into(),
            payload,
            raw_body: None,
            received_at: Utc::now(),
            signature: None,
        }
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn with_raw_body(mut self, raw_body: impl Into<String>) -> Self {
        self.raw_body = Some(raw_body.into());
        self
    }
}

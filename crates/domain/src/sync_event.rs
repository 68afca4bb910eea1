use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEventType {
    StockUpdate,
    PushUpdate,
    WebhookProcessed,
    WebhookUnmatched,
    CrossChannelSync,
    FullSync,
    StockPropagation,
}

impl SyncEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncEventType::StockUpdate => "stock_update",
            SyncEventType::PushUpdate => "push_update",
            SyncEventType::WebhookProcessed => "webhook_processed",
            SyncEventType::WebhookUnmatched => "webhook_unmatched",
            SyncEventType::CrossChannelSync => "cross_channel_sync",
            SyncEventType::FullSync => "full_sync",
            SyncEventType::StockPropagation => "stock_propagation",
        }
    }
}

impl std::str::FromStr for SyncEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stock_update" => Ok(SyncEventType::StockUpdate),
            "push_update" => Ok(SyncEventType::PushUpdate),
            "webhook_processed" => Ok(SyncEventType::WebhookProcessed),
            "webhook_unmatched" => Ok(SyncEventType::WebhookUnmatched),
            "cross_channel_sync" => Ok(SyncEventType::CrossChannelSync),
            "full_sync" => Ok(SyncEventType::FullSync),
            "stock_propagation" => Ok(SyncEventType::StockPropagation),
            other => Err(format!("unknown sync event type: {other}")),
        }
    }
}

/// Status of one sync attempt. Progresses monotonically:
/// pending -> processing -> (completed | failed).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Processing => "processing",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
        }
    }

    /// Whether moving to `next` respects the monotonic lifecycle.
    pub fn can_transition_to(&self, next: SyncStatus) -> bool {
        matches!(
            (self, next),
            (SyncStatus::Pending, SyncStatus::Processing)
                | (SyncStatus::Processing, SyncStatus::Completed)
                | (SyncStatus::Processing, SyncStatus::Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncStatus::Completed | SyncStatus::Failed)
    }
}

impl std::str::FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "processing" => Ok(SyncStatus::Processing),
            "completed" => Ok(SyncStatus::Completed),
            "failed" => Ok(SyncStatus::Failed),
            other => Err(format!("unknown sync status: {other}")),
        }
    }
}

/// Append-only audit record of one sync attempt. Failed rows remain for
/// inspection; retention trims terminal rows after a bounded age.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEvent {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub event_type: SyncEventType,
    pub channel_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub status: SyncStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SyncEvent {
    /// Build a new event row in the given initial status.
    pub fn new(
        tenant_id: Uuid,
        event_type: SyncEventType,
        channel_id: Option<Uuid>,
        product_id: Option<Uuid>,
        status: SyncStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id,
            event_type,
            channel_id,
            product_id,
            old_value: None,
            new_value: None,
            status,
            error_message: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_values(
        mut self,
        old_value: Option<serde_json::Value>,
        new_value: Option<serde_json::Value>,
    ) -> Self {
        self.old_value = old_value;
        self.new_value = new_value;
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::alert::AlertType;
use crate::drift::DriftDetection;
use crate::jobs::SyncOperation;
use crate::stock_change::StockChange;

/// Events carried by the per-tenant in-process bus, and forwarded from worker
/// to orchestrator over IPC for external observers.
///
/// Delivery is best-effort, at-least-once if a subscriber raises; subscribers
/// must be idempotent. FIFO holds per publisher; no cross-type ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum EngineEvent {
    /// A normalized stock change left the Watcher.
    #[serde(rename = "stock:change")]
    StockChange { change: StockChange },

    /// Canonical stock for a product was persisted.
    #[serde(rename = "stock:updated")]
    StockUpdated {
        tenant_id: Uuid,
        product_id: Uuid,
        sku: String,
        previous_quantity: i64,
        new_quantity: i64,
    },

    #[serde(rename = "sync:started")]
    SyncStarted {
        tenant_id: Uuid,
        operation: SyncOperation,
        product_count: usize,
    },

    #[serde(rename = "sync:completed")]
    SyncCompleted {
        tenant_id: Uuid,
        product_id: Option<Uuid>,
        targets_succeeded: usize,
        targets_failed: usize,
        duration_ms: u64,
    },

    #[serde(rename = "sync:failed")]
    SyncFailed {
        tenant_id: Uuid,
        channel_id: Option<Uuid>,
        product_id: Option<Uuid>,
        error: String,
        retryable: bool,
    },

    #[serde(rename = "drift:detected")]
    DriftDetected { detection: DriftDetection },

    #[serde(rename = "drift:repaired")]
    DriftRepaired {
        tenant_id: Uuid,
        product_id: Uuid,
        truth_quantity: i64,
        repaired_channels: Vec<Uuid>,
    },

    #[serde(rename = "alert:triggered")]
    AlertTriggered {
        tenant_id: Uuid,
        alert_type: AlertType,
        message: String,
        product_id: Option<Uuid>,
        channel_id: Option<Uuid>,
        metadata: serde_json::Value,
    },

    #[serde(rename = "channel:connected")]
    ChannelConnected { tenant_id: Uuid, channel_id: Uuid },

    #[serde(rename = "channel:disconnected")]
    ChannelDisconnected { tenant_id: Uuid, channel_id: Uuid },

    /// Alert rules changed; process-local caches must re-read.
    #[serde(rename = "alert:rules_invalidated")]
    AlertRulesInvalidated { tenant_id: Uuid },
}

impl EngineEvent {
    /// The bus topic name, as published and logged.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::StockChange { .. } => "stock:change",
            EngineEvent::StockUpdated { .. } => "stock:updated",
            EngineEvent::SyncStarted { .. } => "sync:started",
            EngineEvent::SyncCompleted { .. } => "sync:completed",
            EngineEvent::SyncFailed { .. } => "sync:failed",
            EngineEvent::DriftDetected { .. } => "drift:detected",
            EngineEvent::DriftRepaired { .. } => "drift:repaired",
            EngineEvent::AlertTriggered { .. } => "alert:triggered",
            EngineEvent::ChannelConnected { .. } => "channel:connected",
            EngineEvent::ChannelDisconnected { .. } => "channel:disconnected",
            EngineEvent::AlertRulesInvalidated { .. } => "alert:rules_invalidated",
        }
    }

    /// Tenant the event belongs to. Every event is single-tenant.
    pub fn tenant_id(&self) -> Uuid {
        match self {
            EngineEvent::StockChange { change } => change.tenant_id,
            EngineEvent::StockUpdated { tenant_id, .. }
            | EngineEvent::SyncStarted { tenant_id, .. }
            | EngineEvent::SyncCompleted { tenant_id, .. }
            | EngineEvent::SyncFailed { tenant_id, .. }
            | EngineEvent::DriftRepaired { tenant_id, .. }
            | EngineEvent::AlertTriggered { tenant_id, .. }
            | EngineEvent::ChannelConnected { tenant_id, .. }
            | EngineEvent::ChannelDisconnected { tenant_id, .. }
            | EngineEvent::AlertRulesInvalidated { tenant_id } => *tenant_id,
            EngineEvent::DriftDetected { detection } => detection.tenant_id,
        }
    }
}

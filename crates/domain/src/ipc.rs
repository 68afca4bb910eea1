use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::EngineEvent;

/// Frames a worker child writes to stdout, one JSON object per line.
///
/// The orchestrator treats a missed heartbeat as `degraded` and two misses as
/// `crashed`; everything else is pass-through for external observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Agents are wired up and the queue consumers are blocked on work.
    Ready { tenant_id: Uuid },

    Heartbeat {
        tenant_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    Event {
        tenant_id: Uuid,
        event: EngineEvent,
    },

    /// Drain finished; process exits 0 right after.
    Stopping { tenant_id: Uuid },
}

/// Frames the orchestrator writes to a worker's stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParentMessage {
    /// Drain in-flight jobs within the grace period, then exit 0.
    Shutdown,
}

/// Tenant lifecycle events the orchestrator emits to external observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum TenantEvent {
    #[serde(rename = "tenant:ready")]
    Ready { tenant_id: Uuid },

    #[serde(rename = "tenant:crashed")]
    Crashed { tenant_id: Uuid, code: Option<i32> },

    #[serde(rename = "tenant:restarting")]
    Restarting { tenant_id: Uuid, attempt: u32 },

    /// Restart cap exceeded; the tenant is latched until operator action.
    #[serde(rename = "tenant:max_restarts")]
    MaxRestarts { tenant_id: Uuid },
}

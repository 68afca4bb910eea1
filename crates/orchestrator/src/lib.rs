//! # StockSync Orchestrator
//!
//! The parent process. One supervised worker child per active tenant, each
//! with its own provider connections, queues, bus, and pollers, so a crash or
//! flood in tenant A's worker cannot touch tenant B. Children that exit
//! nonzero are restarted with capped exponential backoff; exceeding the cap
//! latches the tenant and raises an operator alert. Tenants without a live
//! worker fall back to an in-process engine, degraded but operational.

pub mod backoff;
pub mod fallback;
pub mod health;
pub mod metrics;
pub mod supervisor;

use stocksync_domain::{EngineEvent, TenantEvent};

pub use backoff::{RestartDecision, RestartPolicy};
pub use fallback::SharedEngineFallback;
pub use supervisor::{TenantSupervisor, WorkerState};

/// Everything the orchestrator relays to external observers: lifecycle of
/// tenant workers plus pass-through engine events.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(untagged)]
pub enum SupervisorEvent {
    Tenant(TenantEvent),
    Engine(EngineEvent),
}

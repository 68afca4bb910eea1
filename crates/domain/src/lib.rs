//! # StockSync Domain Types
//!
//! Entities, in-flight events, and queue job payloads shared by the engine
//! and the orchestrator. Storage schema is the repository's concern; these
//! types carry the semantics.

pub mod alert;
pub mod channel;
pub mod drift;
pub mod events;
pub mod ipc;
pub mod jobs;
pub mod mapping;
pub mod product;
pub mod stock_change;
pub mod sync_event;
pub mod tenant;

pub use alert::{Alert, AlertRule, AlertType};
pub use channel::{Channel, ChannelType};
pub use drift::{ChannelStockState, DriftDetection, DriftSeverity, DriftingChannel};
pub use events::EngineEvent;
pub use ipc::{ParentMessage, TenantEvent, WorkerMessage};
pub use jobs::{AlertCheckJob, ReconcileJob, SyncJob, SyncOperation, WebhookJob};
pub use mapping::ProductChannelMapping;
pub use product::Product;
pub use stock_change::{ChangeType, StockChange};
pub use sync_event::{SyncEvent, SyncEventType, SyncStatus};
pub use tenant::{Tenant, TenantSource};

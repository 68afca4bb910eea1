//! # StockSync Engine
//!
//! The per-tenant sync engine: four cooperating agents (Watcher, Sync,
//! Guardian, Alert) wired together by an in-process event bus and a durable
//! Redis-backed job queue.
//!
//! ```text
//! webhook job ──> Watcher ──stock:change──> Sync ──> Provider.update_stock (fan-out)
//!                    │                        │
//!                    │                        └──stock:updated──> Alert (low stock)
//!                    └── dedupe / signature / unmatched bookkeeping
//!
//! Guardian ── every interval ──> live reads ──> auto-repair or flag
//! ```
//!
//! One engine instance serves exactly one tenant. Process isolation between
//! tenants is the orchestrator's job; the engine never touches another
//! tenant's rows.

pub mod alert;
pub mod bus;
pub mod guardian;
pub mod kv;
pub mod locks;
pub mod metrics;
pub mod queue;
pub mod repository;
pub mod sync;
pub mod watcher;
pub mod worker;

pub use alert::AlertEngine;
pub use bus::EventBus;
pub use guardian::Guardian;
pub use kv::{KvStore, MemoryKv, RedisKv};
pub use locks::ProductLocks;
pub use queue::{JobEnvelope, JobQueue, QueueName, RetryDecision};
pub use repository::{MemoryRepository, PgRepository, Repository};
pub use sync::SyncAgent;
pub use watcher::Watcher;
pub use worker::{TenantEngine, TenantWorker};

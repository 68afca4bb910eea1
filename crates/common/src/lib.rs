//! # StockSync Common Library
//!
//! Shared infrastructure code used by every StockSync service.
//!
//! This crate provides:
//! - PostgreSQL connection pooling (via sqlx)
//! - Redis client with queue and KV helpers
//! - The workspace error type
//! - HMAC signature helpers for inbound channel webhooks
//! - Structured logging setup

pub mod db;
pub mod error;
pub mod logging;
pub mod redis_client;
pub mod signature;

pub use db::{PoolSettings, create_pool};
pub use error::{Error, Result};
pub use logging::{init_tracing, init_tracing_json, init_tracing_stderr};
pub use redis_client::RedisClient;
pub use signature::{sign_webhook, verify_webhook};

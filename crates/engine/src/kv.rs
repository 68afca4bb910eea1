//! Short-term KV store
//!
//! Backs the two small pieces of engine state that live outside the
//! relational schema: webhook dedupe records (`dedupe:<tenant>:<channel>:<id>`)
//! and POS poll cursors (`pos:last-poll:<channel>`). Redis in production, an
//! in-memory map in tests.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use stocksync_common::{RedisClient, Result};

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Set only if absent, with a TTL. Returns `true` when this call created
    /// the key. This is the first-writer-wins primitive behind webhook dedupe.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Redis-backed store. Clones the multiplexed connection per call.
pub struct RedisKv {
    client: RedisClient,
}

impl RedisKv {
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut client = self.client.clone();
        client.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut client = self.client.clone();
        client.set(key, value).await
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let mut client = self.client.clone();
        client.set_nx_ex(key, value, ttl_secs).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut client = self.client.clone();
        client.delete(key).await
    }
}

/// In-memory store with real TTL semantics, for tests and the in-process
/// fallback engine.
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    fn is_expired(expires: &Option<Instant>) -> bool {
        expires.map(|at| Instant::now() >= at).unwrap_or(false)
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().expect("kv lock");
        match entries.get(key) {
            Some((_, expires)) if Self::is_expired(expires) => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().expect("kv lock");
        entries.insert(key.to_string(), (value.to_string(), None));
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool> {
        let mut entries = self.entries.lock().expect("kv lock");

        let live = match entries.get(key) {
            Some((_, expires)) => !Self::is_expired(expires),
            None => false,
        };
        if live {
            return Ok(false);
        }

        let expires = Instant::now() + Duration::from_secs(ttl_secs);
        entries.insert(key.to_string(), (value.to_string(), Some(expires)));
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().expect("kv lock");
        entries.remove(key);
        Ok(())
    }
}

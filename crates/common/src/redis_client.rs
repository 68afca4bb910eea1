//! Redis client with queue and KV helpers
//!
//! Wraps a `ConnectionManager` (automatic reconnects) and exposes the small
//! set of operations the engine needs: plain KV with TTL, SET-NX for webhook
//! dedupe, lists for ready queues, and a sorted set for delayed retries.

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::Serialize;
use tracing::info;

use crate::error::Result;

/// Redis client wrapper with helper methods.
///
/// Cloning is cheap: the underlying `ConnectionManager` multiplexes a single
/// connection, so every consumer task can hold its own clone.
#[derive(Clone)]
pub struct RedisClient {
    manager: ConnectionManager,
}

impl RedisClient {
    /// Create a new Redis client.
    pub async fn new(redis_url: &str) -> Result<Self> {
        info!("Connecting to Redis at {}", redis_url);

        let client = Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;

        info!("Redis connection established");
        Ok(Self { manager })
    }

    /// Ping Redis to check health.
    pub async fn ping(&mut self) -> Result<String> {
        let result: String = redis::cmd("PING").query_async(&mut self.manager).await?;
        Ok(result)
    }

    /// Get a value by key.
    pub async fn get(&mut self, key: &str) -> Result<Option<String>> {
        let result: Option<String> = self.manager.get(key).await?;
        Ok(result)
    }

    /// Set a key-value pair (no expiry).
    pub async fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.manager.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    /// Set a key-value pair with a TTL in seconds.
    pub async fn set_ex(&mut self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        self.manager
            .set_ex::<_, _, ()>(key, value, ttl_seconds)
            .await?;
        Ok(())
    }

    /// Set a key only if it does not exist, with a TTL.
    ///
    /// Returns `true` when the key was newly set (first sighting) and `false`
    /// when it already existed. This is the webhook dedupe primitive: the
    /// first writer wins, replays within the TTL see `false`.
    pub async fn set_nx_ex(&mut self, key: &str, value: &str, ttl_seconds: u64) -> Result<bool> {
        // SET key value NX EX ttl -> "OK" or nil
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut self.manager)
            .await?;

        Ok(result.is_some())
    }

    /// Delete a key.
    pub async fn delete(&mut self, key: &str) -> Result<()> {
        self.manager.del::<_, ()>(key).await?;
        Ok(())
    }

    /// Push a JSON-serialized value to the left of a list.
    pub async fn lpush<T: Serialize>(&mut self, list: &str, data: &T) -> Result<()> {
        let json = serde_json::to_string(data)?;
        self.manager.lpush::<_, _, ()>(list, json).await?;
        Ok(())
    }

    /// Blocking pop from one or more lists, first key has priority.
    ///
    /// `BRPOP key1 key2 key3 timeout` checks keys in order, so passing the
    /// priority-1 queue first gives webhook jobs precedence over scheduled
    /// reconciliation.
    pub async fn brpop_multi(
        &mut self,
        lists: &[String],
        timeout_secs: usize,
    ) -> Result<Option<(String, String)>> {
        let mut cmd = redis::cmd("BRPOP");
        for list in lists {
            cmd.arg(list);
        }
        cmd.arg(timeout_secs);

        let result: Option<(String, String)> = cmd.query_async(&mut self.manager).await?;
        Ok(result)
    }

    /// List length.
    pub async fn llen(&mut self, list: &str) -> Result<usize> {
        let length: usize = self.manager.llen(list).await?;
        Ok(length)
    }

    /// Trim a list to its newest `max_len` entries and refresh its TTL.
    ///
    /// Retention helper for completed/dead-letter lists: callers LPUSH, so
    /// index 0..max_len keeps the newest entries.
    pub async fn ltrim_expire(&mut self, list: &str, max_len: usize, ttl_seconds: u64) -> Result<()> {
        self.manager
            .ltrim::<_, ()>(list, 0, max_len as isize - 1)
            .await?;
        self.manager.expire::<_, ()>(list, ttl_seconds as i64).await?;
        Ok(())
    }

    /// Add a member to a sorted set with the given score.
    ///
    /// Used for delayed retry scheduling: score = unix millis when the job
    /// becomes ready.
    pub async fn zadd(&mut self, set: &str, member: &str, score: i64) -> Result<()> {
        self.manager.zadd::<_, _, _, ()>(set, member, score).await?;
        Ok(())
    }

    /// Pop all members whose score is <= `max_score`.
    ///
    /// ZRANGEBYSCORE then ZREM per member; a member lost to a concurrent
    /// remover is simply skipped, so two promoters never double-deliver.
    pub async fn zpop_due(&mut self, set: &str, max_score: i64) -> Result<Vec<String>> {
        let due: Vec<String> = self
            .manager
            .zrangebyscore(set, i64::MIN, max_score)
            .await?;

        let mut popped = Vec::with_capacity(due.len());
        for member in due {
            let removed: i32 = self.manager.zrem(set, &member).await?;
            if removed == 1 {
                popped.push(member);
            }
        }

        Ok(popped)
    }
}

//! Durable per-tenant job queues
//!
//! Four named queues per tenant (`webhook`, `sync`, `reconcile`, `alert`),
//! each built from three Redis structures:
//!
//! ```text
//! q:{tenant}:{queue}:p1 ─┐
//! q:{tenant}:{queue}:p2 ─┼─ ready lists, BRPOP'd in priority order
//! q:{tenant}:{queue}:p3 ─┘
//! q:{tenant}:{queue}:delayed   zset, score = unix millis when ready (retries)
//! q:{tenant}:{queue}:dead      dead-letter list, kept 7 days for inspection
//! q:{tenant}:{queue}:done      completion log, trimmed to 100 entries / 24 h
//! ```
//!
//! A job that raises is rescheduled with exponential backoff until its
//! attempts are exhausted, then dead-lettered. Priorities: webhooks first,
//! manual triggers second, scheduled reconciliation last.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use stocksync_common::{RedisClient, Result};
use stocksync_config::QueueConfig;

/// The four named queues every tenant owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    Webhook,
    Sync,
    Reconcile,
    Alert,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Webhook => "webhook",
            QueueName::Sync => "sync",
            QueueName::Reconcile => "reconcile",
            QueueName::Alert => "alert",
        }
    }

    /// Webhook = 1 (highest), manual triggers = 2, scheduled work = 3.
    pub fn default_priority(&self) -> u8 {
        match self {
            QueueName::Webhook => 1,
            QueueName::Sync | QueueName::Alert => 2,
            QueueName::Reconcile => 3,
        }
    }

    pub const ALL: [QueueName; 4] = [
        QueueName::Webhook,
        QueueName::Sync,
        QueueName::Reconcile,
        QueueName::Alert,
    ];
}

/// One unit of queued work, serialized verbatim into Redis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub queue: QueueName,
    pub priority: u8,
    /// Attempts already made.
    pub attempt: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl JobEnvelope {
    /// Whether another attempt is allowed after a failure.
    pub fn should_retry(&self) -> bool {
        self.attempt + 1 < self.max_attempts
    }
}

/// Outcome of a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Rescheduled; ready again after the delay.
    Scheduled(Duration),
    /// Attempts exhausted; moved to the dead-letter list.
    Buried,
}

/// Exponential backoff with jitter: min(base * 2^attempt, max) ± 20%.
///
/// The jitter keeps a burst of same-tick failures from thundering back in
/// lockstep.
pub fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exponential = base_ms.saturating_mul(2u64.saturating_pow(attempt));
    let capped = exponential.min(max_ms);

    let mut rng = rand::thread_rng();
    let jitter_factor = rng.gen_range(0.8..1.2);
    let with_jitter = (capped as f64 * jitter_factor) as u64;

    Duration::from_millis(with_jitter)
}

/// Handle to one tenant's queues.
#[derive(Clone)]
pub struct JobQueue {
    redis: RedisClient,
    tenant_id: Uuid,
    config: QueueConfig,
}

impl JobQueue {
    pub fn new(redis: RedisClient, tenant_id: Uuid, config: QueueConfig) -> Self {
        Self {
            redis,
            tenant_id,
            config,
        }
    }

    fn ready_key(&self, queue: QueueName, priority: u8) -> String {
        format!("q:{}:{}:p{}", self.tenant_id, queue.as_str(), priority)
    }

    fn delayed_key(&self, queue: QueueName) -> String {
        format!("q:{}:{}:delayed", self.tenant_id, queue.as_str())
    }

    fn dead_key(&self, queue: QueueName) -> String {
        format!("q:{}:{}:dead", self.tenant_id, queue.as_str())
    }

    fn done_key(&self, queue: QueueName) -> String {
        format!("q:{}:{}:done", self.tenant_id, queue.as_str())
    }

    fn max_attempts_for(&self, queue: QueueName) -> u32 {
        match queue {
            QueueName::Webhook => self.config.webhook_max_attempts,
            _ => self.config.max_attempts,
        }
    }

    /// Enqueue a payload at the queue's default priority.
    pub async fn enqueue<T: Serialize>(&self, queue: QueueName, payload: &T) -> Result<Uuid> {
        self.enqueue_with_priority(queue, queue.default_priority(), payload)
            .await
    }

    pub async fn enqueue_with_priority<T: Serialize>(
        &self,
        queue: QueueName,
        priority: u8,
        payload: &T,
    ) -> Result<Uuid> {
        let envelope = JobEnvelope {
            id: Uuid::new_v4(),
            tenant_id: self.tenant_id,
            queue,
            priority: priority.clamp(1, 3),
            attempt: 0,
            max_attempts: self.max_attempts_for(queue),
            created_at: Utc::now(),
            payload: serde_json::to_value(payload)
                .map_err(stocksync_common::Error::Json)?,
        };

        self.push_ready(&envelope).await?;
        debug!(
            tenant_id = %self.tenant_id,
            queue = queue.as_str(),
            job_id = %envelope.id,
            "job enqueued"
        );
        Ok(envelope.id)
    }

    async fn push_ready(&self, envelope: &JobEnvelope) -> Result<()> {
        let mut redis = self.redis.clone();
        redis
            .lpush(&self.ready_key(envelope.queue, envelope.priority), envelope)
            .await
    }

    /// Blocking pop of the next ready job, highest priority first.
    pub async fn dequeue(
        &self,
        queue: QueueName,
        timeout_secs: usize,
    ) -> Result<Option<JobEnvelope>> {
        let keys: Vec<String> = (1..=3).map(|p| self.ready_key(queue, p)).collect();

        let mut redis = self.redis.clone();
        let popped = redis.brpop_multi(&keys, timeout_secs).await?;

        match popped {
            Some((_key, json)) => {
                let envelope: JobEnvelope =
                    serde_json::from_str(&json).map_err(stocksync_common::Error::Json)?;
                Ok(Some(envelope))
            }
            None => Ok(None),
        }
    }

    /// Record a failed attempt: reschedule with backoff, or dead-letter when
    /// attempts are exhausted.
    pub async fn retry_or_bury(
        &self,
        mut envelope: JobEnvelope,
        error: &str,
    ) -> Result<RetryDecision> {
        let will_retry = envelope.should_retry();
        envelope.attempt += 1;

        if will_retry {
            let delay = backoff_delay(
                envelope.attempt - 1,
                self.config.backoff_base_ms,
                self.config.backoff_max_ms,
            );
            let ready_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;

            let json = serde_json::to_string(&envelope).map_err(stocksync_common::Error::Json)?;
            let mut redis = self.redis.clone();
            redis
                .zadd(&self.delayed_key(envelope.queue), &json, ready_at)
                .await?;

            warn!(
                tenant_id = %self.tenant_id,
                queue = envelope.queue.as_str(),
                job_id = %envelope.id,
                attempt = envelope.attempt,
                max = envelope.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error,
                "job failed, retry scheduled"
            );
            Ok(RetryDecision::Scheduled(delay))
        } else {
            let record = serde_json::json!({
                "envelope": envelope,
                "error": error,
                "failed_at": Utc::now(),
            });

            let mut redis = self.redis.clone();
            let dead_key = self.dead_key(envelope.queue);
            redis.lpush(&dead_key, &record).await?;
            redis
                .ltrim_expire(&dead_key, 1000, self.config.failed_ttl_secs)
                .await?;

            warn!(
                tenant_id = %self.tenant_id,
                queue = envelope.queue.as_str(),
                job_id = %envelope.id,
                attempts = envelope.attempt,
                error,
                "job dead-lettered"
            );
            Ok(RetryDecision::Buried)
        }
    }

    /// Move due delayed jobs back onto their ready lists. Returns how many
    /// were promoted. Runs on a short interval per worker.
    pub async fn promote_due(&self, queue: QueueName) -> Result<usize> {
        let now = Utc::now().timestamp_millis();

        let mut redis = self.redis.clone();
        let due = redis.zpop_due(&self.delayed_key(queue), now).await?;

        let mut promoted = 0;
        for json in due {
            match serde_json::from_str::<JobEnvelope>(&json) {
                Ok(envelope) => {
                    self.push_ready(&envelope).await?;
                    promoted += 1;
                }
                Err(e) => {
                    // Unparseable delayed entries are dropped, not retried forever.
                    warn!(
                        tenant_id = %self.tenant_id,
                        queue = queue.as_str(),
                        error = %e,
                        "discarding malformed delayed job"
                    );
                }
            }
        }

        Ok(promoted)
    }

    /// Record a completed job and trim the completion log to policy.
    pub async fn complete(&self, envelope: &JobEnvelope) -> Result<()> {
        let record = serde_json::json!({
            "id": envelope.id,
            "queue": envelope.queue.as_str(),
            "attempt": envelope.attempt,
            "completed_at": Utc::now(),
        });

        let mut redis = self.redis.clone();
        let done_key = self.done_key(envelope.queue);
        redis.lpush(&done_key, &record).await?;
        redis
            .ltrim_expire(
                &done_key,
                self.config.completed_max,
                self.config.completed_ttl_secs,
            )
            .await?;
        Ok(())
    }

    /// Ready depth across all priorities, for monitoring.
    pub async fn depth(&self, queue: QueueName) -> Result<usize> {
        let mut redis = self.redis.clone();
        let mut total = 0;
        for priority in 1..=3 {
            total += redis.llen(&self.ready_key(queue, priority)).await?;
        }
        Ok(total)
    }
}

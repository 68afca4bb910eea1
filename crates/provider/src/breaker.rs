//! Circuit breaker for channel health tracking
//!
//! Prevents hammering a dead channel with provider calls from every
//! propagation. Keyed by channel id; consecutive failures open the circuit,
//! a cooldown later a single half-open probe is let through.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation.
    Closed,
    /// Too many failures; calls are rejected until the cooldown elapses.
    Open,
    /// Cooldown elapsed; the next call probes the channel.
    HalfOpen,
}

#[derive(Debug, Clone)]
struct ChannelHealth {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl ChannelHealth {
    fn new() -> Self {
        Self {
            state: BreakerState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }
}

/// Circuit breaker over all channels of one tenant's engine.
pub struct ChannelBreaker {
    channels: Mutex<HashMap<Uuid, ChannelHealth>>,
    threshold: u32,
    cooldown: Duration,
}

impl ChannelBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            threshold,
            cooldown,
        }
    }

    /// Whether a provider call to this channel should be attempted.
    pub async fn should_allow(&self, channel_id: Uuid) -> bool {
        let mut channels = self.channels.lock().await;
        let health = channels.entry(channel_id).or_insert_with(ChannelHealth::new);

        match health.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let elapsed = health
                    .opened_at
                    .map(|t| t.elapsed() >= self.cooldown)
                    .unwrap_or(true);

                if elapsed {
                    debug!(%channel_id, "circuit breaker half-open, probing channel");
                    health.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub async fn record_success(&self, channel_id: Uuid) {
        let mut channels = self.channels.lock().await;
        let health = channels.entry(channel_id).or_insert_with(ChannelHealth::new);

        health.consecutive_failures = 0;
        if health.state != BreakerState::Closed {
            debug!(%channel_id, "circuit breaker closing after success");
            health.state = BreakerState::Closed;
            health.opened_at = None;
        }
    }

    pub async fn record_failure(&self, channel_id: Uuid) {
        let mut channels = self.channels.lock().await;
        let health = channels.entry(channel_id).or_insert_with(ChannelHealth::new);

        health.consecutive_failures += 1;

        if health.consecutive_failures >= self.threshold
            || health.state == BreakerState::HalfOpen
        {
            if health.state != BreakerState::Open {
                warn!(
                    %channel_id,
                    failures = health.consecutive_failures,
                    "circuit breaker opening"
                );
            }
            health.state = BreakerState::Open;
            health.opened_at = Some(Instant::now());
        }
    }

    pub async fn state(&self, channel_id: Uuid) -> BreakerState {
        let channels = self.channels.lock().await;
        channels
            .get(&channel_id)
            .map(|h| h.state)
            .unwrap_or(BreakerState::Closed)
    }

    /// Forget a channel's history, e.g. after reconnection.
    pub async fn reset(&self, channel_id: Uuid) {
        let mut channels = self.channels.lock().await;
        channels.remove(&channel_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_initial_state_is_closed() {
        let breaker = ChannelBreaker::new(3, Duration::from_secs(60));
        let channel = Uuid::new_v4();

        assert_eq!(breaker.state(channel).await, BreakerState::Closed);
        assert!(breaker.should_allow(channel).await);
    }

    #[tokio::test]
    async fn test_opens_after_threshold_failures() {
        let breaker = ChannelBreaker::new(3, Duration::from_secs(60));
        let channel = Uuid::new_v4();

        breaker.record_failure(channel).await;
        breaker.record_failure(channel).await;
        assert!(breaker.should_allow(channel).await, "below threshold");

        breaker.record_failure(channel).await;
        assert_eq!(breaker.state(channel).await, BreakerState::Open);
        assert!(!breaker.should_allow(channel).await);
    }

    #[tokio::test]
    async fn test_half_open_probe_after_cooldown() {
        let breaker = ChannelBreaker::new(1, Duration::from_millis(0));
        let channel = Uuid::new_v4();

        breaker.record_failure(channel).await;
        assert_eq!(breaker.state(channel).await, BreakerState::Open);

        // Zero cooldown: next check transitions to half-open and allows one probe.
        assert!(breaker.should_allow(channel).await);
        assert_eq!(breaker.state(channel).await, BreakerState::HalfOpen);

        // A failed probe re-opens immediately.
        breaker.record_failure(channel).await;
        assert_eq!(breaker.state(channel).await, BreakerState::Open);
    }

    #[tokio::test]
    async fn test_success_closes_circuit() {
        let breaker = ChannelBreaker::new(1, Duration::from_millis(0));
        let channel = Uuid::new_v4();

        breaker.record_failure(channel).await;
        assert!(breaker.should_allow(channel).await); // half-open
        breaker.record_success(channel).await;

        assert_eq!(breaker.state(channel).await, BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_failures_are_per_channel() {
        let breaker = ChannelBreaker::new(1, Duration::from_secs(60));
        let dead = Uuid::new_v4();
        let healthy = Uuid::new_v4();

        breaker.record_failure(dead).await;

        assert!(!breaker.should_allow(dead).await);
        assert!(breaker.should_allow(healthy).await);
    }
}

//! Restart policy
//!
//! Exponential backoff over a rolling window. The history is the list of
//! restart instants inside the window; once it reaches the cap the tenant
//! latches in `max_restarts` until an operator intervenes.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RestartPolicy {
    pub max_restarts: u32,
    pub window: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    Restart { attempt: u32, delay: Duration },
    /// Cap exceeded inside the window; stop trying.
    Latch,
}

impl RestartPolicy {
    pub fn new(max_restarts: u32, window: Duration) -> Self {
        Self {
            max_restarts,
            window,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }

    /// Decide what to do after a crash at `now`, recording the restart in
    /// `history` when one is granted.
    pub fn decide(&self, history: &mut VecDeque<Instant>, now: Instant) -> RestartDecision {
        while history
            .front()
            .map(|&t| now.duration_since(t) > self.window)
            .unwrap_or(false)
        {
            history.pop_front();
        }

        if history.len() as u32 >= self.max_restarts {
            return RestartDecision::Latch;
        }

        let attempt = history.len() as u32 + 1;
        history.push_back(now);

        let exponential = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        let delay = exponential.min(self.max_delay);

        RestartDecision::Restart { attempt, delay }
    }
}

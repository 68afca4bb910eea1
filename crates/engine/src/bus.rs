//! Per-tenant in-process event bus
//!
//! A bounded `tokio::sync::broadcast` channel of [`EngineEvent`]. Delivery is
//! best-effort within the process: publishing never blocks, and a subscriber
//! that falls more than the buffer behind loses the oldest events (it sees a
//! lag notice and keeps going, so it must tolerate gaps and duplicates).
//!
//! Ordering is FIFO from the publisher's perspective; no ordering across
//! event types is promised. The bus never crosses a process boundary; the
//! orchestrator's IPC forwarding handles that.

use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::metrics;
use stocksync_domain::EngineEvent;

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Returns the number of subscribers that will see it. Zero subscribers
    /// is not an error, agents come up in arbitrary order during boot.
    pub fn publish(&self, event: EngineEvent) -> usize {
        let kind = event.kind();
        let tenant_id = event.tenant_id();

        metrics::BUS_EVENTS_TOTAL
            .with_label_values(&[&tenant_id.to_string(), kind])
            .inc();

        match self.tx.send(event) {
            Ok(receivers) => {
                trace!(%tenant_id, kind, receivers, "event published");
                receivers
            }
            Err(_) => {
                debug!(%tenant_id, kind, "event published with no subscribers");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

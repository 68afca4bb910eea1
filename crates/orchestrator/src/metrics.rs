/*!
 * Prometheus metrics for the orchestrator
 */

use lazy_static::lazy_static;
use prometheus::{
    Encoder, IntCounterVec, TextEncoder, opts, register_int_counter_vec,
};

lazy_static! {
    /// Worker processes spawned (first start and restarts)
    pub static ref WORKERS_SPAWNED_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("stocksync_workers_spawned_total", "Worker processes spawned"),
        &["tenant"]
    )
    .expect("metric can be created");

    /// Worker crashes (nonzero exits)
    pub static ref WORKER_CRASHES_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("stocksync_worker_crashes_total", "Worker crashes by tenant"),
        &["tenant"]
    )
    .expect("metric can be created");

    /// Tenant lifecycle events emitted
    pub static ref TENANT_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("stocksync_tenant_events_total", "Tenant lifecycle events by kind"),
        &["event"]
    )
    .expect("metric can be created");
}

/// Render all registered metrics in Prometheus text format.
pub fn render_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

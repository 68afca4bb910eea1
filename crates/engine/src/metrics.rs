/*!
 * Prometheus metrics for the sync engine
 *
 * One global registry per process; a worker serves one tenant, so the tenant
 * label is constant there but keeps in-process fallback engines separable.
 */

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramVec, IntCounterVec, TextEncoder, opts, register_histogram_vec,
    register_int_counter_vec,
};

lazy_static! {
    /// Webhook jobs processed, by outcome (processed/duplicate/unmatched/invalid_signature)
    pub static ref WEBHOOKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("stocksync_webhooks_total", "Webhook jobs processed by outcome"),
        &["tenant", "outcome"]
    )
    .expect("metric can be created");

    /// Normalized stock changes published to the bus
    pub static ref STOCK_CHANGES_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("stocksync_stock_changes_total", "Normalized stock changes by type"),
        &["tenant", "change_type"]
    )
    .expect("metric can be created");

    /// Stock pushes to target channels
    pub static ref PUSHES_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("stocksync_pushes_total", "Stock pushes to channels by outcome"),
        &["tenant", "channel_type", "success"]
    )
    .expect("metric can be created");

    /// Provider push duration
    pub static ref PUSH_DURATION: HistogramVec = register_histogram_vec!(
        "stocksync_push_duration_seconds",
        "Provider update_stock duration in seconds",
        &["tenant"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    )
    .expect("metric can be created");

    /// Drift detections by severity
    pub static ref DRIFT_DETECTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("stocksync_drift_detected_total", "Drift detections by severity"),
        &["tenant", "severity"]
    )
    .expect("metric can be created");

    /// Channels repaired by the guardian
    pub static ref DRIFT_REPAIRED_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("stocksync_drift_repaired_total", "Channels auto-repaired"),
        &["tenant"]
    )
    .expect("metric can be created");

    /// Alerts created, by type
    pub static ref ALERTS_CREATED_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("stocksync_alerts_created_total", "Alerts created by type"),
        &["tenant", "type"]
    )
    .expect("metric can be created");

    /// Queue jobs finished, by queue and outcome (completed/retried/buried)
    pub static ref QUEUE_JOBS_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("stocksync_queue_jobs_total", "Queue jobs by outcome"),
        &["tenant", "queue", "outcome"]
    )
    .expect("metric can be created");

    /// Events published on the in-process bus
    pub static ref BUS_EVENTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("stocksync_bus_events_total", "Bus events published by kind"),
        &["tenant", "kind"]
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

//! Logging and tracing setup
//!
//! Structured logging via `tracing`. Every binary calls one of the two
//! initializers at startup; the log level comes from `RUST_LOG`.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing with a compact human-readable format.
///
/// Reads the filter from `RUST_LOG`, defaulting to `info`. Examples:
///
/// ```text
/// RUST_LOG=debug                    everything at debug and above
/// RUST_LOG=stocksync_engine=trace   trace for the engine only
/// ```
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .compact(),
        )
        .init();
}

/// Initialize tracing with JSON output.
///
/// Used in production where logs are shipped to an aggregation system
/// (Loki, ELK). One JSON object per line, current span included.
pub fn init_tracing_json() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_target(true)
                .with_level(true)
                .with_current_span(true),
        )
        .init();
}

/// Initialize tracing on stderr.
///
/// Worker children speak line-delimited JSON to the orchestrator over
/// stdout, so their logs must stay off it.
pub fn init_tracing_stderr() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_level(true)
                .compact(),
        )
        .init();
}

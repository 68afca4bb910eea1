//! Operational HTTP surface
//!
//! Kubernetes-style probes plus a tenant state listing. This is not the REST
//! façade: no tenant data leaves here, only liveness and worker states.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde_json::{Value, json};
use tracing::info;

use crate::metrics;
use crate::supervisor::TenantSupervisor;

#[derive(Clone)]
struct HealthState {
    supervisor: Arc<TenantSupervisor>,
}

pub async fn serve(port: u16, supervisor: Arc<TenantSupervisor>) -> Result<()> {
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/tenants", get(tenant_states))
        .route("/metrics", get(metrics_handler))
        .with_state(HealthState { supervisor });

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind health server to {addr}"))?;

    info!("🏥 Health server listening on http://{}", addr);
    info!("   - GET /health   - Liveness probe");
    info!("   - GET /ready    - Readiness probe");
    info!("   - GET /tenants  - Worker states");
    info!("   - GET /metrics  - Prometheus metrics");

    axum::serve(listener, app)
        .await
        .context("Health server failed")?;
    Ok(())
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "stocksync-orchestrator",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn readiness_check(State(state): State<HealthState>) -> (StatusCode, Json<Value>) {
    let states = state.supervisor.states().await;
    let live = states.values().filter(|s| **s == "ready" || **s == "degraded").count();

    (
        StatusCode::OK,
        Json(json!({
            "ready": true,
            "workers_total": states.len(),
            "workers_live": live,
        })),
    )
}

async fn tenant_states(State(state): State<HealthState>) -> Json<Value> {
    let states: HashMap<String, &str> = state
        .supervisor
        .states()
        .await
        .into_iter()
        .map(|(id, s)| (id.to_string(), s))
        .collect();

    Json(json!({ "tenants": states }))
}

async fn metrics_handler() -> Result<String, (StatusCode, String)> {
    metrics::render_metrics().map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

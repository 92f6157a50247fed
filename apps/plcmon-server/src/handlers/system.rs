//! 系统 handlers
//!
//! - GET /health
//! - GET /api/status
//! - GET /api/metrics
//! - POST /api/config/reload
//! - POST /api/endpoints/{key}/reset

use crate::AppState;
use crate::utils::response::{ok, runtime_error};
use api_contract::{HealthResponse, ReloadResponse};
use axum::{
    extract::{Path, State},
    response::Response,
};
use tracing::info;

pub async fn health(State(state): State<AppState>) -> Response {
    ok(HealthResponse {
        ok: true,
        degraded: state.context.health.is_degraded(),
    })
}

pub async fn get_status(State(state): State<AppState>) -> Response {
    ok(state.context.status().await)
}

pub async fn get_metrics(State(state): State<AppState>) -> Response {
    ok(state.context.metrics.snapshot())
}

pub async fn reload_config(State(state): State<AppState>) -> Response {
    match state.context.reload().await {
        Ok(snapshot) => {
            let response = ReloadResponse {
                endpoints: snapshot.plc_endpoints.len(),
                tags: snapshot.tags.len(),
                alarm_rules: snapshot.alarm_rules.len(),
                plan_generation: state.context.scheduler.generation(),
            };
            info!(
                target: "plcmon.api",
                tags = response.tags,
                generation = response.plan_generation,
                "config_reload_requested"
            );
            ok(response)
        }
        Err(err) => runtime_error(err),
    }
}

pub async fn reset_endpoint(
    State(state): State<AppState>,
    Path(endpoint_key): Path<String>,
) -> Response {
    match state.context.reset_endpoint(&endpoint_key).await {
        Ok(status) => ok(status),
        Err(err) => runtime_error(err),
    }
}

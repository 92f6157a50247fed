//! 报警 handlers
//!
//! - GET /api/alarms
//! - GET /api/alarms/active
//! - POST /api/alarms/{id}/ack
//! - POST /api/alarms/{id}/resolve

use crate::AppState;
use crate::utils::response::{alarm_error, bad_request_error, ok};
use api_contract::{AcknowledgeRequest, AlarmQueryParams};
use axum::{
    Json,
    extract::{Path, Query, State},
    response::Response,
};
use plcmon_storage::AlarmFilter;

pub async fn list_alarms(
    State(state): State<AppState>,
    Query(params): Query<AlarmQueryParams>,
) -> Response {
    if let (Some(start), Some(end)) = (params.start, params.end) {
        if start > end {
            return bad_request_error("start must be <= end");
        }
    }
    let limit = params.limit.unwrap_or(1000);
    if limit <= 0 || limit > 10_000 {
        return bad_request_error("limit out of range");
    }
    let filter = AlarmFilter {
        from_ms: params.start,
        to_ms: params.end,
        point_id: params.point_id,
        severity: params.severity,
        active_only: params.active_only,
        limit: limit as usize,
    };
    match state.context.alarms.history(&filter).await {
        Ok(events) => ok(events),
        Err(err) => alarm_error(err),
    }
}

pub async fn list_active_alarms(State(state): State<AppState>) -> Response {
    match state.context.alarms.active().await {
        Ok(events) => ok(events),
        Err(err) => alarm_error(err),
    }
}

pub async fn acknowledge_alarm(
    State(state): State<AppState>,
    Path(alarm_id): Path<String>,
    body: Option<Json<AcknowledgeRequest>>,
) -> Response {
    let by = body.and_then(|Json(req)| req.by);
    match state.context.alarms.acknowledge(&alarm_id, by.as_deref()).await {
        Ok(event) => ok(event),
        Err(err) => alarm_error(err),
    }
}

pub async fn resolve_alarm(
    State(state): State<AppState>,
    Path(alarm_id): Path<String>,
) -> Response {
    match state.context.alarms.resolve(&alarm_id).await {
        Ok(event) => ok(event),
        Err(err) => alarm_error(err),
    }
}

//! 实时值与写入 handlers
//!
//! - GET /api/values
//! - POST /api/write

use crate::AppState;
use crate::utils::response::{ok, write_error};
use api_contract::{WriteRequest, WriteValue};
use axum::{Json, extract::State, response::Response};
use domain::{TagValue, ValueRecord};

/// 各点位最近一次值（断线期间保持最后已知值）。
pub async fn list_values(State(state): State<AppState>) -> Response {
    let values: Vec<ValueRecord> = state.context.scheduler.snapshot();
    ok(values)
}

pub async fn write_value(
    State(state): State<AppState>,
    Json(req): Json<WriteRequest>,
) -> Response {
    let value = match req.value {
        WriteValue::Bool(value) => TagValue::Bool(value),
        WriteValue::Number(value) => TagValue::Number(value),
    };
    match state.context.write_value(req.point_id.trim(), value).await {
        Ok(record) => ok(record),
        Err(err) => write_error(err),
    }
}

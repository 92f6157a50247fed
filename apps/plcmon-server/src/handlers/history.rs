//! 历史查询 handlers
//!
//! - GET /api/history
//! - GET /api/history/export

use crate::AppState;
use crate::utils::response::{ok, recorder_error};
use api_contract::HistoryQueryParams;
use axum::{
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use plcmon_recorder::{Aggregation, ExportFormat, HistoryQuery};

pub async fn query_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryQueryParams>,
) -> Response {
    let query = match history_query(&params) {
        Ok(query) => query,
        Err(response) => return response,
    };
    match state.context.recorder.query(&query).await {
        Ok(records) => ok(records),
        Err(err) => recorder_error(err),
    }
}

pub async fn export_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryQueryParams>,
) -> Response {
    let query = match history_query(&params) {
        Ok(query) => query,
        Err(response) => return response,
    };
    let format = match params.format.as_deref() {
        None => ExportFormat::Csv,
        Some(value) => match value.parse::<ExportFormat>() {
            Ok(format) => format,
            Err(err) => return recorder_error(err),
        },
    };
    match state.context.recorder.export(&query, format).await {
        Ok(body) => {
            let (content_type, file_name) = match format {
                ExportFormat::Csv => ("text/csv; charset=utf-8", "history.csv"),
                ExportFormat::Json => ("application/json", "history.json"),
            };
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, content_type.to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{file_name}\""),
                    ),
                ],
                body,
            )
                .into_response()
        }
        Err(err) => recorder_error(err),
    }
}

fn history_query(params: &HistoryQueryParams) -> Result<HistoryQuery, Response> {
    let aggregation = match params.aggregation.as_deref() {
        None | Some("") => Aggregation::Raw,
        Some(value) => value.parse::<Aggregation>().map_err(recorder_error)?,
    };
    Ok(HistoryQuery {
        point_ids: params.point_id_list(),
        start_ms: params.start,
        end_ms: params.end,
        aggregation,
        interval_ms: params.interval_ms,
        min_quality: params.min_quality,
    })
}

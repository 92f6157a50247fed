//! HTTP 响应辅助函数
//!
//! 所有错误返回统一的 ApiResponse 格式，状态码与错误码对应：
//! - 400 INVALID.REQUEST：写入校验失败、查询参数错误、配置被拒绝
//! - 404 RESOURCE.NOT_FOUND：未知点位 / 报警 / 端点
//! - 502 UPSTREAM.UNAVAILABLE：PLC 传输错误
//! - 500 INTERNAL.ERROR：存储错误

use api_contract::ApiResponse;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use plcmon_alarm::AlarmError;
use plcmon_polling::{ValidationError, WriteError};
use plcmon_protocol::TransportError;
use plcmon_recorder::RecorderError;
use plcmon_runtime::RuntimeError;
use plcmon_storage::StorageError;
use serde::Serialize;

/// 成功响应
pub fn ok<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::success(data))).into_response()
}

/// 错误请求响应
pub fn bad_request_error(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse::<()>::error("INVALID.REQUEST", message.into())),
    )
        .into_response()
}

/// 资源未找到错误响应
pub fn not_found_error(message: impl Into<String>) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::<()>::error("RESOURCE.NOT_FOUND", message.into())),
    )
        .into_response()
}

/// 传输错误响应
pub fn transport_error(err: TransportError) -> Response {
    (
        StatusCode::BAD_GATEWAY,
        Json(ApiResponse::<()>::error(
            "UPSTREAM.UNAVAILABLE",
            err.to_string(),
        )),
    )
        .into_response()
}

/// 存储错误响应
pub fn storage_error(err: StorageError) -> Response {
    let message = err.to_string();
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::<()>::error("INTERNAL.ERROR", message)),
    )
        .into_response()
}

pub fn write_error(err: WriteError) -> Response {
    match err {
        WriteError::Validation(ValidationError::UnknownPoint(point_id)) => {
            not_found_error(format!("unknown point: {point_id}"))
        }
        WriteError::Validation(err) => bad_request_error(err.to_string()),
        WriteError::Transport(err) => transport_error(err),
    }
}

pub fn recorder_error(err: RecorderError) -> Response {
    match err {
        RecorderError::InvalidQuery(message) => bad_request_error(message),
        RecorderError::Storage(err) => storage_error(err),
        RecorderError::Flush { source, .. } => storage_error(source),
        RecorderError::Serialize(err) => storage_error(StorageError::from(err)),
    }
}

pub fn alarm_error(err: AlarmError) -> Response {
    match err {
        AlarmError::NotFound(id) => not_found_error(format!("alarm not found: {id}")),
        AlarmError::Storage(err) => storage_error(err),
    }
}

pub fn runtime_error(err: RuntimeError) -> Response {
    match err {
        RuntimeError::Configuration(err) => bad_request_error(err.to_string()),
        RuntimeError::UnknownEndpoint(key) => not_found_error(format!("unknown endpoint: {key}")),
        RuntimeError::Transport(err) => transport_error(err),
        RuntimeError::Storage(err) => storage_error(err),
    }
}

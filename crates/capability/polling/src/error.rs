//! 写入命令错误类型。

use plcmon_protocol::TransportError;

/// 写入命令校验失败（不会触达设备）。
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("unknown point: {0}")]
    UnknownPoint(String),
    #[error("point {0} is read-only")]
    ReadOnly(String),
    #[error("point {point_id} expects a {expected} value")]
    WrongType {
        point_id: String,
        expected: &'static str,
    },
    #[error("value {value} for point {point_id} outside [{min}, {max}]")]
    OutOfRange {
        point_id: String,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("point {point_id}: {reason}")]
    Encoding { point_id: String, reason: String },
}

/// 写入命令失败原因。
#[derive(Debug, Clone, thiserror::Error)]
pub enum WriteError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

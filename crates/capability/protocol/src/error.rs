//! 协议错误类型定义

/// 协议通信错误
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    /// 连接错误
    #[error("connection error: {0}")]
    Connection(String),

    /// Modbus 错误
    #[error("modbus error: {0}")]
    Modbus(String),

    /// 数据解析错误
    #[error("data parse error: {0}")]
    DataParse(String),

    /// 超时错误
    #[error("timeout: {0}")]
    Timeout(String),

    /// 端点未连接
    #[error("not connected")]
    NotConnected,

    /// 端点未注册
    #[error("endpoint not registered")]
    NotRegistered,

    /// 不支持的操作（如写只读类别）
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// 传输错误：携带端点键与原因，无部分成功。
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("transport error on {endpoint_key}: {cause}")]
pub struct TransportError {
    pub endpoint_key: String,
    pub cause: ProtocolError,
}

impl TransportError {
    pub fn new(endpoint_key: impl Into<String>, cause: ProtocolError) -> Self {
        Self {
            endpoint_key: endpoint_key.into(),
            cause,
        }
    }
}

//! 端点连接状态。

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// 端点连接状态快照（仅由连接管理器修改）。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub endpoint_key: String,
    pub state: ConnectionState,
    pub last_error: Option<String>,
    pub last_error_time_ms: Option<i64>,
    pub reconnect_attempts: u32,
    /// 超过最大重连次数，需手动 reset。
    pub permanently_failed: bool,
    pub simulated: bool,
}

impl ConnectionStatus {
    pub fn new(endpoint_key: impl Into<String>, simulated: bool) -> Self {
        Self {
            endpoint_key: endpoint_key.into(),
            state: if simulated {
                ConnectionState::Connected
            } else {
                ConnectionState::Disconnected
            },
            last_error: None,
            last_error_time_ms: None,
            reconnect_attempts: 0,
            permanently_failed: false,
            simulated,
        }
    }
}

/// 连接状态变化事件。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectionEvent {
    StateChanged { status: ConnectionStatus },
    PermanentlyFailed { endpoint_key: String, attempts: u32 },
}

impl ConnectionEvent {
    pub fn endpoint_key(&self) -> &str {
        match self {
            Self::StateChanged { status } => &status.endpoint_key,
            Self::PermanentlyFailed { endpoint_key, .. } => endpoint_key,
        }
    }
}

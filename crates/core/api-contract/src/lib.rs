//! 稳定的 DTO 与 API 响应契约。

use serde::{Deserialize, Serialize};

/// 标准 API 响应封装。
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

/// 失败响应的错误体。
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

/// 写入值：布尔或数值（工程量）。
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum WriteValue {
    Bool(bool),
    Number(f64),
}

/// 写入命令请求体。
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteRequest {
    #[serde(alias = "point_id", alias = "tagId")]
    pub point_id: String,
    pub value: WriteValue,
}

/// 历史查询参数。`pointIds` 为逗号分隔列表，时间为 epoch 毫秒。
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQueryParams {
    #[serde(default, alias = "pointId")]
    pub point_ids: Option<String>,
    #[serde(alias = "from")]
    pub start: i64,
    #[serde(alias = "to")]
    pub end: i64,
    pub aggregation: Option<String>,
    #[serde(alias = "interval")]
    pub interval_ms: Option<i64>,
    pub min_quality: Option<u8>,
    /// 仅导出接口使用：csv | json
    pub format: Option<String>,
}

impl HistoryQueryParams {
    /// 拆分点位列表，去掉空项。
    pub fn point_id_list(&self) -> Vec<String> {
        self.point_ids
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// 报警历史查询参数。
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmQueryParams {
    #[serde(alias = "from")]
    pub start: Option<i64>,
    #[serde(alias = "to")]
    pub end: Option<i64>,
    pub point_id: Option<String>,
    pub severity: Option<u8>,
    #[serde(default)]
    pub active_only: bool,
    pub limit: Option<i64>,
}

/// 报警确认请求体（可为空）。
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgeRequest {
    #[serde(default, alias = "acknowledgedBy")]
    pub by: Option<String>,
}

/// 配置重新加载结果。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReloadResponse {
    pub endpoints: usize,
    pub tags: usize,
    pub alarm_rules: usize,
    pub plan_generation: u64,
}

/// 健康检查响应。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub ok: bool,
    pub degraded: bool,
}

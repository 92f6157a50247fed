//! 路由定义
//!
//! 集中管理所有 API 路由，将路径映射到对应的 handlers：
//! - 健康检查：/health
//! - 系统：/api/status, /api/metrics, /api/config/reload, /api/endpoints/{key}/reset
//! - 实时值与写入：/api/values, /api/write
//! - 历史：/api/history, /api/history/export
//! - 报警：/api/alarms/*

use crate::AppState;
use crate::handlers::*;
use crate::middleware::request_context;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

/// 创建 /api 下的路由
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .route("/status", get(get_status))
        .route("/metrics", get(get_metrics))
        .route("/config/reload", post(reload_config))
        .route("/endpoints/:endpoint_key/reset", post(reset_endpoint))
        .route("/values", get(list_values))
        .route("/write", post(write_value))
        .route("/history", get(query_history))
        .route("/history/export", get(export_history))
        .route("/alarms", get(list_alarms))
        .route("/alarms/active", get(list_active_alarms))
        .route("/alarms/:alarm_id/ack", post(acknowledge_alarm))
        .route("/alarms/:alarm_id/resolve", post(resolve_alarm))
}

/// 完整应用：路由 + 追踪中间件
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api", create_api_router())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        // 注入 request_id/trace_id
        .layer(middleware::from_fn(request_context))
}

//! PLC 监控服务：采集、报警、记录与 HTTP 接口。

mod handlers;
mod middleware;
mod routes;
mod utils;

use plcmon_config::{AppConfig, JsonFileSnapshotSource};
use plcmon_protocol::ModbusTcpFactory;
use plcmon_runtime::{MonitorContext, Stores};
use plcmon_telemetry::init_tracing;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub context: Arc<MonitorContext>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 从环境变量加载运行配置
    let config = AppConfig::from_env()?;
    // 初始化结构化日志
    init_tracing();

    // 未配置数据库时使用内存存储
    let stores = Stores::from_config(&config).await?;
    let source = Arc::new(JsonFileSnapshotSource::new(config.snapshot_path.clone()));
    let http_addr = config.http_addr.clone();
    let context = MonitorContext::new(config, stores, source, Arc::new(ModbusTcpFactory));
    // 首份配置无效时直接退出
    context.start().await?;

    let app = routes::build_app(AppState {
        context: context.clone(),
    });
    let listener = tokio::net::TcpListener::bind(&http_addr).await?;
    info!(target: "plcmon.api", addr = %http_addr, "http_listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    context.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(target: "plcmon.api", error = %err, "signal_listener_failed");
    }
    info!(target: "plcmon.api", "shutdown_signal_received");
}

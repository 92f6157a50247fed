//! # 运行时装配
//!
//! 按配置构建全部组件并串起事件流：
//!
//! ```text
//! SnapshotCache ──apply──▶ ConnectionManager / PollingScheduler / AlarmEngine
//!
//! PollingScheduler ──Bus<ValueRecord>──┬──▶ AlarmEngine ──Bus<AlarmEvent>──▶ MQTT
//!                                      ├──▶ DataRecorder
//!                                      └──▶ MQTT
//! ConnectionManager ──Bus<ConnectionEvent>──▶ MQTT
//! ```
//!
//! 停机顺序：停止信号 → 轮询任务 → 消费者与后台任务 → 最终落库 → 断开连接。

mod context;
mod error;
mod tasks;

pub use context::{MonitorContext, Stores, SystemStatus};
pub use error::RuntimeError;

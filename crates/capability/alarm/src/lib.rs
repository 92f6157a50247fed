//! # 报警能力模块
//!
//! 对每条采集值评估该点位的启用规则，生成、持久化并广播报警事件。
//!
//! 触发方式按规则配置：
//! - `level`（默认）：条件成立期间每次评估都触发
//! - `edge`：仅在从不成立到成立时触发一次，条件不成立后重新布防
//!
//! 持久化失败不影响广播；失败事件进入有界重试队列。

mod engine;
mod error;

pub use engine::{AlarmEngine, DEFAULT_MAX_PENDING};
pub use error::AlarmError;

//! # 采集调度能力模块
//!
//! - [`planner`]：把点位切分为连续地址分组（纯函数）
//! - [`PollingScheduler`]：每个分组按刷新周期独立轮询，只发布变化值
//! - 写入命令：校验、编码、经连接管理器写入设备
//!
//! ```text
//! ConfigSnapshot ──plan──▶ Vec<TagGroup> ──spawn──▶ 分组任务 × N
//!                                                    │ read_range
//!                                                    ▼
//!                                   LastValueTable ──变化──▶ Bus<ValueRecord>
//! ```

mod error;
pub mod planner;
mod scheduler;
mod values;

pub use error::{ValidationError, WriteError};
pub use planner::{plan, plan_entries};
pub use scheduler::PollingScheduler;
pub use values::LastValueTable;

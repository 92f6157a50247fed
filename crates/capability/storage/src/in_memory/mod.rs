//! 内存存储实现模块
//!
//! 未配置 `PLCMON_DATABASE_URL` 时使用，也用于测试。

pub mod alarm;
pub mod measurement;

pub use alarm::*;
pub use measurement::*;

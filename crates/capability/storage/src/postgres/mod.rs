//! PostgreSQL 存储实现模块

pub mod alarm;
pub mod measurement;

pub use alarm::*;
pub use measurement::*;

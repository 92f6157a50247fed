//! # 存储能力模块
//!
//! 采集值、报警事件的持久化，以及按日分桶的文件归档。
//!
//! ## 模块说明
//!
//! - [`traits`]：存储接口（`MeasurementStore`、`AlarmStore`、`ArchiveStore`）
//! - [`models`]：查询条件与归档文件描述
//! - [`connection`]：PostgreSQL 连接池与建表
//! - [`in_memory`]：内存实现，未配置数据库时使用
//! - [`postgres`]：PostgreSQL 实现（sqlx，参数化查询）
//! - [`archive`]：本地目录归档（JSON Lines，可选 gzip）
//!
//! ```rust,ignore
//! use plcmon_storage::{PgMeasurementStore, MeasurementStore, RecordQuery};
//!
//! let store = PgMeasurementStore::connect("postgresql://plcmon@localhost:5432/plcmon").await?;
//! let records = store
//!     .query_value_records(&RecordQuery::new(vec!["temp-1".into()], from_ms, to_ms))
//!     .await?;
//! ```

pub mod archive;
pub mod connection;
pub mod error;
pub mod in_memory;
pub mod models;
pub mod postgres;
pub mod traits;

pub use archive::FsArchiveStore;
pub use connection::{connect_pool, ensure_schema};
pub use error::StorageError;
pub use in_memory::*;
pub use models::*;
pub use postgres::*;
pub use traits::*;

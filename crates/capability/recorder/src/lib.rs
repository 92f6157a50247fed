//! # 数据记录能力模块
//!
//! - 每个点位一个缓冲区，数量或时长达到阈值即整批落库；失败保留重试
//! - 历史查询合并在线数据与归档文件，支持 raw / avg / min / max
//! - 超过在线保留期的数据按日归档（可 gzip），过期归档文件定期删除
//!
//! 持久化连续失败由 `HealthMonitor` 记录并对外报告降级。

mod error;
mod query;
mod recorder;
mod sweep;

pub use error::RecorderError;
pub use query::{
    Aggregation, DEFAULT_INTERVAL_MS, ExportFormat, HistoryQuery, HistoryRecord, aggregate,
};
pub use recorder::{ArchiveReport, DataRecorder, RecorderConfig};
pub use sweep::{ArchivePolicy, run_archive_sweep, run_flush_sweep, run_maintenance};

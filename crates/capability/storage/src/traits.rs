//! 存储接口定义
//!
//! 所有实现都必须允许并发调用。

use crate::error::StorageError;
use crate::models::{AlarmFilter, ArchiveFile, RecordQuery};
use domain::{AlarmEvent, ValueRecord};

/// 采集值存储（在线保留期内的数据）。
#[async_trait::async_trait]
pub trait MeasurementStore: Send + Sync {
    /// 批量追加，整批成功或整批失败。
    async fn append_value_records(&self, records: &[ValueRecord]) -> Result<usize, StorageError>;

    /// 按时间升序返回匹配记录。
    async fn query_value_records(&self, query: &RecordQuery)
    -> Result<Vec<ValueRecord>, StorageError>;

    /// 时间早于 `cutoff_ms` 的全部记录（归档用）。
    async fn list_value_records_before(
        &self,
        cutoff_ms: i64,
    ) -> Result<Vec<ValueRecord>, StorageError>;

    async fn delete_value_records_before(&self, cutoff_ms: i64) -> Result<usize, StorageError>;
}

/// 报警事件存储。
#[async_trait::async_trait]
pub trait AlarmStore: Send + Sync {
    async fn append_alarm_event(&self, event: &AlarmEvent) -> Result<(), StorageError>;

    /// 确认报警；已确认的事件保持原样。未找到返回 `None`。
    async fn acknowledge_alarm(
        &self,
        id: &str,
        by: Option<&str>,
        at_ms: i64,
    ) -> Result<Option<AlarmEvent>, StorageError>;

    /// 恢复报警；已恢复的事件保持原样。未找到返回 `None`。
    async fn resolve_alarm(&self, id: &str, at_ms: i64)
    -> Result<Option<AlarmEvent>, StorageError>;

    /// 按触发时间倒序。
    async fn list_alarm_events(&self, filter: &AlarmFilter)
    -> Result<Vec<AlarmEvent>, StorageError>;
}

/// 归档存储：按日分桶的记录文件。
#[async_trait::async_trait]
pub trait ArchiveStore: Send + Sync {
    /// 写入归档，与同桶已有文件合并去重；返回写过的文件。
    async fn write_records(
        &self,
        records: Vec<ValueRecord>,
        compress: bool,
    ) -> Result<Vec<ArchiveFile>, StorageError>;

    async fn read_records(&self, query: &RecordQuery) -> Result<Vec<ValueRecord>, StorageError>;

    async fn list_files(&self) -> Result<Vec<ArchiveFile>, StorageError>;

    /// 删除日桶在 `cutoff_ms` 之前结束的文件，返回删除数量。
    async fn remove_before(&self, cutoff_ms: i64) -> Result<usize, StorageError>;
}

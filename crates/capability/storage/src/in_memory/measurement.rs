//! 采集值内存实现
//!
//! 未配置数据库时使用，也用于测试。

use crate::error::StorageError;
use crate::models::RecordQuery;
use crate::traits::MeasurementStore;
use domain::ValueRecord;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
pub struct InMemoryMeasurementStore {
    values: RwLock<Vec<ValueRecord>>,
    fail_writes: AtomicBool,
}

impl InMemoryMeasurementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前记录数量（用于测试）
    pub fn len(&self) -> usize {
        self.values.read().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 让后续写入失败，模拟数据库不可用。
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl MeasurementStore for InMemoryMeasurementStore {
    async fn append_value_records(&self, records: &[ValueRecord]) -> Result<usize, StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::new("measurement store unavailable"));
        }
        let mut values = self
            .values
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        values.extend(records.iter().cloned());
        Ok(records.len())
    }

    async fn query_value_records(
        &self,
        query: &RecordQuery,
    ) -> Result<Vec<ValueRecord>, StorageError> {
        let values = self
            .values
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut selected: Vec<ValueRecord> = values
            .iter()
            .filter(|record| query.matches(&record.point_id, record.ts_ms, record.quality))
            .cloned()
            .collect();
        selected.sort_by_key(|record| record.ts_ms);
        Ok(selected)
    }

    async fn list_value_records_before(
        &self,
        cutoff_ms: i64,
    ) -> Result<Vec<ValueRecord>, StorageError> {
        let values = self
            .values
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut selected: Vec<ValueRecord> = values
            .iter()
            .filter(|record| record.ts_ms < cutoff_ms)
            .cloned()
            .collect();
        selected.sort_by_key(|record| record.ts_ms);
        Ok(selected)
    }

    async fn delete_value_records_before(&self, cutoff_ms: i64) -> Result<usize, StorageError> {
        let mut values = self
            .values
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let before = values.len();
        values.retain(|record| record.ts_ms >= cutoff_ms);
        Ok(before - values.len())
    }
}

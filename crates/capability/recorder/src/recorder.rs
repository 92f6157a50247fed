//! 按点位缓冲采集值，批量落库；归档与清理。

use crate::error::RecorderError;
use crate::query::{ExportFormat, HistoryQuery, HistoryRecord, aggregate, render_export};
use domain::{TagValue, ValueRecord, now_epoch_ms};
use plcmon_storage::{ArchiveStore, MeasurementStore, RecordQuery, without_replicas};
use plcmon_telemetry::{HealthMonitor, TelemetryMetrics};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub max_buffer_size: usize,
    pub max_buffer_age: Duration,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: 1000,
            max_buffer_age: Duration::from_secs(3600),
        }
    }
}

struct RecordBuffer {
    values: Vec<ValueRecord>,
    last_flush: Instant,
}

impl RecordBuffer {
    fn new() -> Self {
        Self {
            values: Vec::new(),
            last_flush: Instant::now(),
        }
    }
}

/// 一次归档的结果。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveReport {
    pub records: usize,
    pub files: usize,
}

struct RecorderInner {
    config: RecorderConfig,
    measurements: Arc<dyn MeasurementStore>,
    archive: Arc<dyn ArchiveStore>,
    metrics: Arc<TelemetryMetrics>,
    health: Arc<HealthMonitor>,
    buffers: RwLock<HashMap<String, Arc<Mutex<RecordBuffer>>>>,
    // 归档与清理互斥
    maintenance: Mutex<()>,
}

#[derive(Clone)]
pub struct DataRecorder {
    inner: Arc<RecorderInner>,
}

impl DataRecorder {
    pub fn new(
        config: RecorderConfig,
        measurements: Arc<dyn MeasurementStore>,
        archive: Arc<dyn ArchiveStore>,
        metrics: Arc<TelemetryMetrics>,
        health: Arc<HealthMonitor>,
    ) -> Self {
        let mut config = config;
        config.max_buffer_size = config.max_buffer_size.max(1);
        Self {
            inner: Arc::new(RecorderInner {
                config,
                measurements,
                archive,
                metrics,
                health,
                buffers: RwLock::new(HashMap::new()),
                maintenance: Mutex::new(()),
            }),
        }
    }

    /// 以当前时间记录一个值。
    pub async fn record(
        &self,
        point_id: &str,
        value: TagValue,
        quality: u8,
    ) -> Result<(), RecorderError> {
        self.record_value(ValueRecord::new(point_id, value, quality, now_epoch_ms()))
            .await
    }

    /// 记录采集值（保留采集时间戳）。达到数量或时长阈值时立即落库。
    pub async fn record_value(&self, record: ValueRecord) -> Result<(), RecorderError> {
        let point_id = record.point_id.clone();
        let buffer = self.buffer_for(&point_id)?;
        let due = {
            let mut state = buffer.lock().await;
            state.values.push(record);
            state.values.len() >= self.inner.config.max_buffer_size
                || state.last_flush.elapsed() >= self.inner.config.max_buffer_age
        };
        if due {
            self.flush_buffer(&point_id, &buffer).await?;
        }
        Ok(())
    }

    fn buffer_for(&self, point_id: &str) -> Result<Arc<Mutex<RecordBuffer>>, RecorderError> {
        if let Some(buffer) = self
            .inner
            .buffers
            .read()
            .ok()
            .and_then(|buffers| buffers.get(point_id).cloned())
        {
            return Ok(buffer);
        }
        let mut buffers = self
            .inner
            .buffers
            .write()
            .map_err(|_| plcmon_storage::StorageError::new("lock failed"))?;
        Ok(buffers
            .entry(point_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(RecordBuffer::new())))
            .clone())
    }

    /// 整点落库：全部成功或全部保留。
    async fn flush_buffer(
        &self,
        point_id: &str,
        buffer: &Mutex<RecordBuffer>,
    ) -> Result<usize, RecorderError> {
        let mut batch = Vec::new();
        {
            let mut state = buffer.lock().await;
            if state.values.is_empty() {
                state.last_flush = Instant::now();
                return Ok(0);
            }
            std::mem::swap(&mut state.values, &mut batch);
        }

        match self.inner.measurements.append_value_records(&batch).await {
            Ok(written) => {
                buffer.lock().await.last_flush = Instant::now();
                self.inner.metrics.record_flush(written as u64);
                self.inner.health.record_persistence_success();
                debug!(target: "plcmon.recorder", point_id = %point_id, records = written, "buffer_flushed");
                Ok(written)
            }
            Err(err) => {
                // 放回队首，保持时间顺序
                let mut state = buffer.lock().await;
                batch.append(&mut state.values);
                state.values = batch;
                self.inner.metrics.record_flush_failure();
                self.inner.health.record_persistence_failure();
                warn!(
                    target: "plcmon.recorder",
                    point_id = %point_id,
                    retained = state.values.len(),
                    error = %err,
                    "buffer_flush_failed"
                );
                Err(RecorderError::Flush {
                    point_id: point_id.to_string(),
                    source: err,
                })
            }
        }
    }

    /// 无条件落库全部缓冲；逐点进行，任一点失败不影响其他点。
    pub async fn flush_all(&self) -> Result<usize, RecorderError> {
        let buffers: Vec<(String, Arc<Mutex<RecordBuffer>>)> = self
            .inner
            .buffers
            .read()
            .map(|buffers| {
                buffers
                    .iter()
                    .map(|(id, buffer)| (id.clone(), buffer.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let mut flushed = 0;
        let mut first_error = None;
        for (point_id, buffer) in buffers {
            match self.flush_buffer(&point_id, &buffer).await {
                Ok(written) => flushed += written,
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(flushed),
        }
    }

    /// 某点位当前缓冲条数。
    pub async fn buffered_len(&self, point_id: &str) -> usize {
        let buffer = self
            .inner
            .buffers
            .read()
            .ok()
            .and_then(|buffers| buffers.get(point_id).cloned());
        match buffer {
            Some(buffer) => buffer.lock().await.values.len(),
            None => 0,
        }
    }

    /// 去掉已不在配置中的点位缓冲（有未落库数据的保留）。
    pub async fn retain_points(&self, point_ids: &HashSet<String>) {
        let candidates: Vec<(String, Arc<Mutex<RecordBuffer>>)> = self
            .inner
            .buffers
            .read()
            .map(|buffers| {
                buffers
                    .iter()
                    .filter(|(id, _)| !point_ids.contains(*id))
                    .map(|(id, buffer)| (id.clone(), buffer.clone()))
                    .collect()
            })
            .unwrap_or_default();
        let mut removable = Vec::new();
        for (point_id, buffer) in candidates {
            if buffer.lock().await.values.is_empty() {
                removable.push(point_id);
            }
        }
        if let Ok(mut buffers) = self.inner.buffers.write() {
            for point_id in removable {
                buffers.remove(&point_id);
            }
        }
    }

    /// 历史查询：在线数据与归档合并，按时间排序；按需分桶聚合。
    pub async fn query(&self, query: &HistoryQuery) -> Result<Vec<HistoryRecord>, RecorderError> {
        query.validate()?;
        let records = self.load_records(query).await?;
        Ok(aggregate(records, query.aggregation, query.interval_ms()))
    }

    async fn load_records(&self, query: &HistoryQuery) -> Result<Vec<ValueRecord>, RecorderError> {
        let filter = RecordQuery {
            point_ids: query.point_ids.clone(),
            from_ms: Some(query.start_ms),
            to_ms: Some(query.end_ms),
            min_quality: query.min_quality,
        };
        let mut records = self.inner.archive.read_records(&filter).await?;
        let online = self.inner.measurements.query_value_records(&filter).await?;
        // 归档中途失败可能两边都有同一条记录
        let fresh = without_replicas(&records, online);
        records.extend(fresh);
        records.sort_by(|a, b| a.ts_ms.cmp(&b.ts_ms).then_with(|| a.point_id.cmp(&b.point_id)));
        Ok(records)
    }

    /// 导出原始记录（聚合参数被忽略）。
    pub async fn export(
        &self,
        query: &HistoryQuery,
        format: ExportFormat,
    ) -> Result<String, RecorderError> {
        query.validate()?;
        let records = self.load_records(query).await?;
        render_export(&records, format)
    }

    /// 把早于 `cutoff_ms` 的在线记录移入归档。重复执行无副作用。
    pub async fn archive_before(
        &self,
        cutoff_ms: i64,
        compress: bool,
    ) -> Result<ArchiveReport, RecorderError> {
        let _guard = self.inner.maintenance.lock().await;
        let records = self
            .inner
            .measurements
            .list_value_records_before(cutoff_ms)
            .await?;
        if records.is_empty() {
            return Ok(ArchiveReport::default());
        }
        let count = records.len();
        let files = self.inner.archive.write_records(records, compress).await?;
        // 先写归档再删除：中途失败时数据两边都在，查询会去重
        self.inner
            .measurements
            .delete_value_records_before(cutoff_ms)
            .await?;
        self.inner.metrics.record_archive_run(count as u64);
        info!(
            target: "plcmon.recorder",
            records = count,
            files = files.len(),
            cutoff_ms,
            compress,
            "records_archived"
        );
        Ok(ArchiveReport {
            records: count,
            files: files.len(),
        })
    }

    /// 删除日桶在 `cutoff_ms` 之前结束的归档文件。重复执行无副作用。
    pub async fn cleanup_before(&self, cutoff_ms: i64) -> Result<usize, RecorderError> {
        let _guard = self.inner.maintenance.lock().await;
        let removed = self.inner.archive.remove_before(cutoff_ms).await?;
        self.inner.metrics.record_archive_files_removed(removed as u64);
        Ok(removed)
    }
}

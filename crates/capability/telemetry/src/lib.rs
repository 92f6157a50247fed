//! 追踪初始化、请求 ID 生成、运行指标与健康状态。
//!
//! 指标与健康状态由运行时上下文持有（`Arc<TelemetryMetrics>`），不使用全局单例。

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 请求级追踪标识。
#[derive(Debug, Clone)]
pub struct RequestIds {
    pub request_id: String,
    pub trace_id: String,
}

/// 指标快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub polls: u64,
    pub poll_failures: u64,
    pub skipped_ticks: u64,
    pub values_published: u64,
    pub subscriber_drops: u64,
    pub alarms_fired: u64,
    pub alarm_persist_failures: u64,
    pub flushes: u64,
    pub flush_failures: u64,
    pub records_flushed: u64,
    pub archive_runs: u64,
    pub records_archived: u64,
    pub archive_files_removed: u64,
    pub writes_ok: u64,
    pub writes_failed: u64,
}

/// 运行指标（原子计数器）。
#[derive(Debug, Default)]
pub struct TelemetryMetrics {
    polls: AtomicU64,
    poll_failures: AtomicU64,
    skipped_ticks: AtomicU64,
    values_published: AtomicU64,
    subscriber_drops: AtomicU64,
    alarms_fired: AtomicU64,
    alarm_persist_failures: AtomicU64,
    flushes: AtomicU64,
    flush_failures: AtomicU64,
    records_flushed: AtomicU64,
    archive_runs: AtomicU64,
    records_archived: AtomicU64,
    archive_files_removed: AtomicU64,
    writes_ok: AtomicU64,
    writes_failed: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            polls: self.polls.load(Ordering::Relaxed),
            poll_failures: self.poll_failures.load(Ordering::Relaxed),
            skipped_ticks: self.skipped_ticks.load(Ordering::Relaxed),
            values_published: self.values_published.load(Ordering::Relaxed),
            subscriber_drops: self.subscriber_drops.load(Ordering::Relaxed),
            alarms_fired: self.alarms_fired.load(Ordering::Relaxed),
            alarm_persist_failures: self.alarm_persist_failures.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            records_flushed: self.records_flushed.load(Ordering::Relaxed),
            archive_runs: self.archive_runs.load(Ordering::Relaxed),
            records_archived: self.records_archived.load(Ordering::Relaxed),
            archive_files_removed: self.archive_files_removed.load(Ordering::Relaxed),
            writes_ok: self.writes_ok.load(Ordering::Relaxed),
            writes_failed: self.writes_failed.load(Ordering::Relaxed),
        }
    }

    /// 记录一次分组轮询。
    pub fn record_poll(&self) {
        self.polls.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录轮询失败（传输错误）。
    pub fn record_poll_failure(&self) {
        self.poll_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录因端点未就绪而跳过的轮询。
    pub fn record_skipped_tick(&self) {
        self.skipped_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_values_published(&self, count: u64) {
        self.values_published.fetch_add(count, Ordering::Relaxed);
    }

    /// 记录订阅队列已满导致的丢弃。
    pub fn record_subscriber_drop(&self) {
        self.subscriber_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alarm_fired(&self) {
        self.alarms_fired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alarm_persist_failure(&self) {
        self.alarm_persist_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// 记录一次成功刷写及其记录数。
    pub fn record_flush(&self, records: u64) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.records_flushed.fetch_add(records, Ordering::Relaxed);
    }

    pub fn record_flush_failure(&self) {
        self.flush_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_archive_run(&self, records: u64) {
        self.archive_runs.fetch_add(1, Ordering::Relaxed);
        self.records_archived.fetch_add(records, Ordering::Relaxed);
    }

    pub fn record_archive_files_removed(&self, files: u64) {
        self.archive_files_removed.fetch_add(files, Ordering::Relaxed);
    }

    pub fn record_write(&self, ok: bool) {
        if ok {
            self.writes_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.writes_failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// 健康状态快照。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub degraded: bool,
    pub consecutive_persistence_failures: u64,
}

/// 持久化健康监视：连续失败超过阈值即降级，任一成功即恢复。
#[derive(Debug)]
pub struct HealthMonitor {
    threshold: u64,
    consecutive_failures: AtomicU64,
}

impl HealthMonitor {
    pub fn new(threshold: u64) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive_failures: AtomicU64::new(0),
        }
    }

    pub fn record_persistence_success(&self) {
        let previous = self.consecutive_failures.swap(0, Ordering::Relaxed);
        if previous >= self.threshold {
            tracing::info!(target: "plcmon.health", previous_failures = previous, "persistence_recovered");
        }
    }

    pub fn record_persistence_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures == self.threshold {
            tracing::error!(target: "plcmon.health", failures, "persistence_degraded");
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.consecutive_failures.load(Ordering::Relaxed) >= self.threshold
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            degraded: self.is_degraded(),
            consecutive_persistence_failures: self.consecutive_failures.load(Ordering::Relaxed),
        }
    }
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成新的 request_id 与 trace_id。
pub fn new_request_ids() -> RequestIds {
    RequestIds {
        request_id: uuid::Uuid::new_v4().to_string(),
        trace_id: uuid::Uuid::new_v4().to_string(),
    }
}

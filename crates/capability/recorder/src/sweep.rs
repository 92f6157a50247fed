//! 后台维护任务：定时落库、归档与清理。
//!
//! 每个任务监听停止信号；停止时不再开始新一轮，正在进行的一轮自然结束。

use crate::recorder::DataRecorder;
use domain::now_epoch_ms;
use plcmon_storage::DAY_MS;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// 归档与清理参数。
#[derive(Debug, Clone)]
pub struct ArchivePolicy {
    pub interval: Duration,
    /// 在线保留天数，更早的记录移入归档。
    pub retention_days: u32,
    pub compress: bool,
    /// 归档文件保留天数。
    pub archive_retention_days: u32,
}

impl Default for ArchivePolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(86_400),
            retention_days: 30,
            compress: true,
            archive_retention_days: 365,
        }
    }
}

/// 每 `interval` 无条件落库全部缓冲。
pub async fn run_flush_sweep(
    recorder: DataRecorder,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // 第一次 tick 立即返回，跳过
    ticker.tick().await;
    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            _ = ticker.tick() => {
                if let Err(err) = recorder.flush_all().await {
                    warn!(target: "plcmon.recorder", error = %err, "flush_sweep_incomplete");
                }
            }
        }
    }
    debug!(target: "plcmon.recorder", "flush_sweep_stopped");
}

/// 按策略周期执行归档与清理（启动后先执行一次）。
pub async fn run_archive_sweep(
    recorder: DataRecorder,
    policy: ArchivePolicy,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(policy.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            _ = ticker.tick() => run_maintenance(&recorder, &policy).await,
        }
    }
    debug!(target: "plcmon.recorder", "archive_sweep_stopped");
}

pub async fn run_maintenance(recorder: &DataRecorder, policy: &ArchivePolicy) {
    let now = now_epoch_ms();
    let archive_cutoff = now - i64::from(policy.retention_days) * DAY_MS;
    if let Err(err) = recorder.archive_before(archive_cutoff, policy.compress).await {
        warn!(target: "plcmon.recorder", error = %err, "archive_run_failed");
    }
    let cleanup_cutoff = now - i64::from(policy.archive_retention_days) * DAY_MS;
    if let Err(err) = recorder.cleanup_before(cleanup_cutoff).await {
        warn!(target: "plcmon.recorder", error = %err, "cleanup_run_failed");
    }
}

//! 后台任务：值流消费者、报警重试与配置监视。

use crate::context::MonitorContext;
use domain::ValueRecord;
use plcmon_alarm::AlarmEngine;
use plcmon_recorder::DataRecorder;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// 报警评估消费者。
pub(crate) async fn run_alarm_consumer(
    alarms: Arc<AlarmEngine>,
    mut values: mpsc::Receiver<ValueRecord>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            record = values.recv() => match record {
                Some(record) => {
                    alarms.evaluate(&record).await;
                }
                None => break,
            },
        }
    }
    debug!(target: "plcmon.runtime", "alarm_consumer_stopped");
}

/// 记录器消费者。停止时先把队列里已有的值写进缓冲。
pub(crate) async fn run_recorder_consumer(
    recorder: DataRecorder,
    mut values: mpsc::Receiver<ValueRecord>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            record = values.recv() => match record {
                Some(record) => {
                    // 落库失败时数据保留在缓冲中，这里无需处理
                    let _ = recorder.record_value(record).await;
                }
                None => break,
            },
        }
    }
    let mut drained = 0usize;
    while let Ok(record) = values.try_recv() {
        let _ = recorder.record_value(record).await;
        drained += 1;
    }
    debug!(target: "plcmon.runtime", drained, "recorder_consumer_stopped");
}

/// 周期重试持久化失败的报警事件。
pub(crate) async fn run_alarm_retry(
    alarms: Arc<AlarmEngine>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;
    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            _ = ticker.tick() => {
                let remaining = alarms.retry_pending().await;
                if remaining > 0 {
                    debug!(target: "plcmon.runtime", remaining, "alarm_retry_pending");
                }
            }
        }
    }
}

/// 每个 TTL 周期检查一次配置快照，内容变化时重新应用。
pub(crate) async fn run_snapshot_watcher(
    context: Arc<MonitorContext>,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;
    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            _ = ticker.tick() => match context.snapshots.get_or_refresh().await {
                Ok(snapshot) => {
                    if context.apply_if_changed(snapshot).await {
                        info!(target: "plcmon.runtime", "config_snapshot_reloaded");
                    }
                }
                Err(err) => {
                    warn!(target: "plcmon.runtime", error = %err, "config_snapshot_unavailable");
                }
            },
        }
    }
    debug!(target: "plcmon.runtime", "snapshot_watcher_stopped");
}

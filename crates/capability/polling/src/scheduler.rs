//! 采集调度：每个分组一个独立的周期任务。
//!
//! 同一分组内的轮询严格串行（上一轮未完成不会开始下一轮，错过的周期直接跳过）；
//! 分组之间互不等待。重新配置时旧任务不再开始新轮询，
//! 正在进行的一轮完成后因代次不符被丢弃。

use crate::error::{ValidationError, WriteError};
use crate::planner;
use crate::values::LastValueTable;
use domain::{
    ConfigSnapshot, QUALITY_GOOD, TagCategory, TagConfig, TagGroup, TagValue, ValueRecord,
    now_epoch_ms,
};
use plcmon_bus::Bus;
use plcmon_protocol::{
    ConnectionManager, ProtocolError, RawValues, RawWrite, decode_words, encode_words,
};
use plcmon_telemetry::TelemetryMetrics;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct PlannedTag {
    endpoint_key: String,
    config: TagConfig,
}

#[derive(Debug, Default)]
struct ActivePlan {
    generation: u64,
    groups: Vec<TagGroup>,
    group_keys: HashSet<String>,
}

struct GroupTask {
    key: String,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

struct SchedulerInner {
    connections: ConnectionManager,
    values: Arc<Bus<ValueRecord>>,
    metrics: Arc<TelemetryMetrics>,
    last_values: LastValueTable,
    plan: RwLock<ActivePlan>,
    tags: RwLock<HashMap<String, PlannedTag>>,
}

/// 轮询调度器。
pub struct PollingScheduler {
    inner: Arc<SchedulerInner>,
    tasks: Mutex<Vec<GroupTask>>,
}

impl PollingScheduler {
    pub fn new(
        connections: ConnectionManager,
        values: Arc<Bus<ValueRecord>>,
        metrics: Arc<TelemetryMetrics>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                connections,
                values,
                metrics,
                last_values: LastValueTable::new(),
                plan: RwLock::new(ActivePlan::default()),
                tags: RwLock::new(HashMap::new()),
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// 按新快照重新规划并重启全部分组任务，返回新分组。
    pub async fn apply(&self, snapshot: &ConfigSnapshot) -> Vec<TagGroup> {
        let groups = planner::plan(snapshot);
        let tags: HashMap<String, PlannedTag> = snapshot
            .tags
            .iter()
            .filter_map(|tag| {
                snapshot.endpoint_for(tag).map(|endpoint| {
                    (
                        tag.id.clone(),
                        PlannedTag {
                            endpoint_key: endpoint.key(),
                            config: tag.clone(),
                        },
                    )
                })
            })
            .collect();

        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            // 不等待：进行中的一轮自行结束，结果按代次丢弃
            let _ = task.stop.send(true);
            debug!(target: "plcmon.polling", group = %task.key, "group_task_retired");
        }

        let generation = {
            let mut plan = match self.inner.plan.write() {
                Ok(plan) => plan,
                Err(poisoned) => poisoned.into_inner(),
            };
            plan.generation += 1;
            plan.group_keys = groups.iter().map(TagGroup::key).collect();
            plan.groups = groups.clone();
            plan.generation
        };
        let point_ids: HashSet<String> = tags.keys().cloned().collect();
        self.inner.last_values.retain(&point_ids);
        match self.inner.tags.write() {
            Ok(mut current) => *current = tags.clone(),
            Err(poisoned) => *poisoned.into_inner() = tags.clone(),
        }

        for group in &groups {
            let members: Vec<TagConfig> = group
                .member_tag_ids
                .iter()
                .filter_map(|id| tags.get(id).map(|planned| planned.config.clone()))
                .collect();
            let (stop, stop_rx) = watch::channel(false);
            let key = group.key();
            let handle = tokio::spawn(run_group(
                self.inner.clone(),
                group.clone(),
                members,
                generation,
                stop_rx,
            ));
            tasks.push(GroupTask { key, stop, handle });
        }

        info!(
            target: "plcmon.polling",
            generation,
            groups = groups.len(),
            tags = point_ids.len(),
            "polling_plan_applied"
        );
        groups
    }

    /// 当前分组。
    pub fn groups(&self) -> Vec<TagGroup> {
        self.inner
            .plan
            .read()
            .map(|plan| plan.groups.clone())
            .unwrap_or_default()
    }

    pub fn generation(&self) -> u64 {
        self.inner.plan.read().map(|plan| plan.generation).unwrap_or(0)
    }

    pub fn last_value(&self, point_id: &str) -> Option<ValueRecord> {
        self.inner.last_values.get(point_id)
    }

    /// 全部最新值的拷贝。
    pub fn snapshot(&self) -> Vec<ValueRecord> {
        self.inner.last_values.snapshot()
    }

    /// 写入命令：校验 → 编码 → 写设备 → 成功后按轮询结果发布。
    pub async fn write_value(
        &self,
        point_id: &str,
        value: TagValue,
    ) -> Result<ValueRecord, WriteError> {
        let result = self.inner.write_value(point_id, value).await;
        self.inner.metrics.record_write(result.is_ok());
        match &result {
            Ok(record) => info!(
                target: "plcmon.polling",
                point_id = %point_id,
                value = %record.value,
                "write_applied"
            ),
            Err(err) => warn!(
                target: "plcmon.polling",
                point_id = %point_id,
                error = %err,
                "write_rejected"
            ),
        }
        result
    }

    /// 停止全部分组任务：不再开始新轮询，进行中的一轮在超时内完成，否则中止。
    pub async fn shutdown(&self, timeout: Duration) {
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in &tasks {
            let _ = task.stop.send(true);
        }
        let deadline = Instant::now() + timeout;
        for mut task in tasks {
            if tokio::time::timeout_at(deadline, &mut task.handle).await.is_err() {
                task.handle.abort();
                warn!(target: "plcmon.polling", group = %task.key, "group_task_aborted");
            }
        }
    }
}

async fn run_group(
    inner: Arc<SchedulerInner>,
    group: TagGroup,
    members: Vec<TagConfig>,
    generation: u64,
    mut stop: watch::Receiver<bool>,
) {
    let key = group.key();
    let mut ticker = tokio::time::interval(Duration::from_millis(group.refresh_rate_ms.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last_epoch = None;
    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            _ = ticker.tick() => {
                inner.poll_group(&group, &key, &members, generation, &mut last_epoch).await;
            }
        }
    }
    debug!(target: "plcmon.polling", group = %key, "group_task_stopped");
}

impl SchedulerInner {
    async fn poll_group(
        &self,
        group: &TagGroup,
        key: &str,
        members: &[TagConfig],
        generation: u64,
        last_epoch: &mut Option<u64>,
    ) {
        if !self.connections.is_ready(&group.endpoint_key) {
            self.metrics.record_skipped_tick();
            return;
        }
        self.metrics.record_poll();
        let epoch = self.connections.session_epoch(&group.endpoint_key);
        let raw = match self
            .connections
            .read_range(
                &group.endpoint_key,
                group.category,
                group.start_address,
                group.length,
            )
            .await
        {
            Ok(raw) => raw,
            Err(err) => {
                // 保留最新值；连接错误处理由连接管理器负责
                self.metrics.record_poll_failure();
                warn!(target: "plcmon.polling", group = %key, error = %err, "poll_tick_failed");
                return;
            }
        };

        let Ok(plan) = self.plan.read() else {
            return;
        };
        if plan.generation != generation || !plan.group_keys.contains(key) {
            debug!(target: "plcmon.polling", group = %key, generation, "stale_tick_discarded");
            return;
        }
        // 重连后全部重新发布
        let force = last_epoch.is_some() && *last_epoch != epoch;
        *last_epoch = epoch;

        let ts_ms = now_epoch_ms();
        let mut published = 0;
        for tag in members {
            let value = match decode_member(group, tag, &raw) {
                Ok(value) => value,
                Err(err) => {
                    warn!(target: "plcmon.polling", point_id = %tag.id, error = %err, "tag_decode_failed");
                    continue;
                }
            };
            let record = ValueRecord::new(&tag.id, value, QUALITY_GOOD, ts_ms);
            if self.last_values.observe(&record, force) {
                self.values.publish(record);
                published += 1;
            }
        }
        drop(plan);
        if published > 0 {
            self.metrics.record_values_published(published);
        }
    }

    async fn write_value(&self, point_id: &str, value: TagValue) -> Result<ValueRecord, WriteError> {
        let planned = self
            .tags
            .read()
            .ok()
            .and_then(|tags| tags.get(point_id).cloned())
            .ok_or_else(|| ValidationError::UnknownPoint(point_id.to_string()))?;
        let tag = &planned.config;
        let (raw, published) = encode_write(tag, value)?;

        self.connections
            .write_point(&planned.endpoint_key, tag.category, tag.address, raw)
            .await?;

        let record = ValueRecord::new(point_id, published, QUALITY_GOOD, now_epoch_ms());
        if self.last_values.observe(&record, false) {
            self.values.publish(record.clone());
            self.metrics.record_values_published(1);
        }
        Ok(record)
    }
}

/// 从分组读取结果中取出单个点位的工程值。
fn decode_member(group: &TagGroup, tag: &TagConfig, raw: &RawValues) -> Result<TagValue, ProtocolError> {
    let offset = tag
        .address
        .checked_sub(group.start_address)
        .ok_or_else(|| ProtocolError::DataParse("tag outside group".to_string()))?
        as usize;
    match raw {
        RawValues::Bits(bits) if tag.category.is_digital() => bits
            .get(offset)
            .copied()
            .map(TagValue::Bool)
            .ok_or_else(|| ProtocolError::DataParse("bit outside read range".to_string())),
        RawValues::Words(words) if !tag.category.is_digital() => {
            let end = offset + tag.data_type.word_count() as usize;
            let slice = words
                .get(offset..end)
                .ok_or_else(|| ProtocolError::DataParse("words outside read range".to_string()))?;
            let raw_value = decode_words(slice, tag.data_type)?;
            Ok(TagValue::Number(raw_value * tag.scale))
        }
        _ => Err(ProtocolError::DataParse(format!(
            "unexpected payload for {}",
            tag.category
        ))),
    }
}

/// 校验写入值并编码；返回原始写入值与回读后将得到的工程值。
fn encode_write(tag: &TagConfig, value: TagValue) -> Result<(RawWrite, TagValue), ValidationError> {
    if tag.category.is_read_only() {
        return Err(ValidationError::ReadOnly(tag.id.clone()));
    }
    match (tag.category, value) {
        (TagCategory::DigitalOutput, TagValue::Bool(bit)) => {
            Ok((RawWrite::Bit(bit), TagValue::Bool(bit)))
        }
        (TagCategory::DigitalOutput, TagValue::Number(_)) => Err(ValidationError::WrongType {
            point_id: tag.id.clone(),
            expected: "boolean",
        }),
        (_, TagValue::Bool(_)) => Err(ValidationError::WrongType {
            point_id: tag.id.clone(),
            expected: "numeric",
        }),
        (_, TagValue::Number(number)) => {
            let min = tag.min.unwrap_or(f64::NEG_INFINITY);
            let max = tag.max.unwrap_or(f64::INFINITY);
            if !number.is_finite() || number < min || number > max {
                return Err(ValidationError::OutOfRange {
                    point_id: tag.id.clone(),
                    value: number,
                    min,
                    max,
                });
            }
            let encoding = |err: ProtocolError| ValidationError::Encoding {
                point_id: tag.id.clone(),
                reason: err.to_string(),
            };
            let words = encode_words(number / tag.scale, tag.data_type).map_err(encoding)?;
            let read_back = decode_words(&words, tag.data_type).map_err(encoding)? * tag.scale;
            Ok((RawWrite::Words(words), TagValue::Number(read_back)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::TagDataType;

    fn register(id: &str, address: u16, data_type: TagDataType, scale: f64) -> TagConfig {
        TagConfig {
            id: id.to_string(),
            name: id.to_string(),
            plc_id: None,
            category: TagCategory::Register,
            address,
            length: data_type.word_count(),
            refresh_rate_ms: 100,
            scale,
            unit: None,
            min: Some(-50.0),
            max: Some(150.0),
            data_type,
        }
    }

    fn group(start: u16, length: u16) -> TagGroup {
        TagGroup {
            endpoint_key: "plc:502".to_string(),
            category: TagCategory::Register,
            start_address: start,
            length,
            refresh_rate_ms: 100,
            member_tag_ids: Vec::new(),
        }
    }

    #[test]
    fn decodes_member_at_offset_with_scale() {
        let tag = register("t", 12, TagDataType::Int16, 0.1);
        let raw = RawValues::Words(vec![0, 0, (-215i16) as u16]);
        let value = decode_member(&group(10, 3), &tag, &raw).expect("decode");
        let TagValue::Number(number) = value else {
            panic!("numeric expected");
        };
        assert!((number + 21.5).abs() < 1e-9);
    }

    #[test]
    fn write_encoding_validates_range_and_type() {
        let tag = register("t", 0, TagDataType::Int16, 0.1);
        let (raw, read_back) = encode_write(&tag, TagValue::Number(12.34)).expect("encode");
        assert_eq!(raw, RawWrite::Words(vec![123]));
        let TagValue::Number(read_back) = read_back else {
            panic!("numeric expected");
        };
        assert!((read_back - 12.3).abs() < 1e-9);

        assert!(matches!(
            encode_write(&tag, TagValue::Number(151.0)),
            Err(ValidationError::OutOfRange { .. })
        ));
        assert!(matches!(
            encode_write(&tag, TagValue::Bool(true)),
            Err(ValidationError::WrongType { .. })
        ));

        let mut input = tag.clone();
        input.category = TagCategory::AnalogInput;
        assert!(matches!(
            encode_write(&input, TagValue::Number(1.0)),
            Err(ValidationError::ReadOnly(_))
        ));
    }
}

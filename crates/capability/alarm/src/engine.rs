use crate::error::AlarmError;
use domain::{AlarmEvent, AlarmRule, AlarmTrigger, ValueRecord, now_epoch_ms};
use plcmon_bus::Bus;
use plcmon_storage::{AlarmFilter, AlarmStore};
use plcmon_telemetry::{HealthMonitor, TelemetryMetrics};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// 待重试事件上限，超过后丢弃最旧的。
pub const DEFAULT_MAX_PENDING: usize = 1000;

#[derive(Default)]
struct RuleSet {
    by_point: HashMap<String, Vec<AlarmRule>>,
    /// edge 规则当前是否处于触发状态
    triggered: HashMap<String, bool>,
}

pub struct AlarmEngine {
    store: Arc<dyn AlarmStore>,
    events: Arc<Bus<AlarmEvent>>,
    metrics: Arc<TelemetryMetrics>,
    health: Arc<HealthMonitor>,
    rules: RwLock<RuleSet>,
    pending: tokio::sync::Mutex<VecDeque<AlarmEvent>>,
    max_pending: usize,
}

impl AlarmEngine {
    pub fn new(
        store: Arc<dyn AlarmStore>,
        events: Arc<Bus<AlarmEvent>>,
        metrics: Arc<TelemetryMetrics>,
        health: Arc<HealthMonitor>,
    ) -> Self {
        Self {
            store,
            events,
            metrics,
            health,
            rules: RwLock::new(RuleSet::default()),
            pending: tokio::sync::Mutex::new(VecDeque::new()),
            max_pending: DEFAULT_MAX_PENDING,
        }
    }

    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending.max(1);
        self
    }

    /// 整体替换规则。定义未变的 edge 规则保留触发状态。
    pub fn set_rules(&self, rules: Vec<AlarmRule>) {
        let mut set = match self.rules.write() {
            Ok(set) => set,
            Err(poisoned) => poisoned.into_inner(),
        };
        let previous: HashMap<&str, &AlarmRule> = set
            .by_point
            .values()
            .flatten()
            .map(|rule| (rule.id.as_str(), rule))
            .collect();
        let mut triggered = HashMap::new();
        for rule in &rules {
            if previous.get(rule.id.as_str()) == Some(&rule) {
                if let Some(state) = set.triggered.get(&rule.id) {
                    triggered.insert(rule.id.clone(), *state);
                }
            }
        }
        let mut by_point: HashMap<String, Vec<AlarmRule>> = HashMap::new();
        let count = rules.len();
        for rule in rules {
            by_point.entry(rule.point_id.clone()).or_default().push(rule);
        }
        set.by_point = by_point;
        set.triggered = triggered;
        info!(target: "plcmon.alarm", rules = count, "alarm_rules_applied");
    }

    pub fn rules(&self) -> Vec<AlarmRule> {
        let Ok(set) = self.rules.read() else {
            return Vec::new();
        };
        let mut rules: Vec<AlarmRule> = set.by_point.values().flatten().cloned().collect();
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        rules
    }

    /// 评估一条采集值，返回本次触发的事件（已广播）。
    pub async fn evaluate(&self, record: &ValueRecord) -> Vec<AlarmEvent> {
        self.retry_pending().await;

        let fired = self.fire(record);
        for event in &fired {
            self.metrics.record_alarm_fired();
            info!(
                target: "plcmon.alarm",
                alarm_id = %event.id,
                rule_id = %event.rule_id,
                point_id = %event.point_id,
                value = %event.value,
                severity = event.severity,
                "alarm_fired"
            );
            match self.store.append_alarm_event(event).await {
                Ok(()) => self.health.record_persistence_success(),
                Err(err) => {
                    self.metrics.record_alarm_persist_failure();
                    self.health.record_persistence_failure();
                    warn!(target: "plcmon.alarm", alarm_id = %event.id, error = %err, "alarm_persist_failed");
                    self.enqueue_pending(event.clone()).await;
                }
            }
            self.events.publish(event.clone());
        }
        fired
    }

    fn fire(&self, record: &ValueRecord) -> Vec<AlarmEvent> {
        // 写锁：触发状态的读改写必须串行
        let mut set = match self.rules.write() {
            Ok(set) => set,
            Err(poisoned) => poisoned.into_inner(),
        };
        let RuleSet {
            by_point,
            triggered,
        } = &mut *set;
        let Some(rules) = by_point.get(&record.point_id) else {
            return Vec::new();
        };

        let mut fired = Vec::new();
        for rule in rules.iter().filter(|rule| rule.enabled) {
            let holds = rule.matches(&record.value);
            let was_triggered = triggered.insert(rule.id.clone(), holds).unwrap_or(false);
            let fire = match rule.trigger {
                AlarmTrigger::Level => holds,
                AlarmTrigger::Edge => holds && !was_triggered,
            };
            if fire {
                fired.push(new_event(rule, record));
            }
        }
        fired
    }

    async fn enqueue_pending(&self, event: AlarmEvent) {
        let mut pending = self.pending.lock().await;
        if pending.len() >= self.max_pending {
            if let Some(dropped) = pending.pop_front() {
                warn!(target: "plcmon.alarm", alarm_id = %dropped.id, "alarm_pending_dropped");
            }
        }
        pending.push_back(event);
    }

    /// 重试持久化失败的事件；返回仍待重试的数量。
    pub async fn retry_pending(&self) -> usize {
        let mut pending = self.pending.lock().await;
        while let Some(event) = pending.front() {
            match self.store.append_alarm_event(event).await {
                Ok(()) => {
                    self.health.record_persistence_success();
                    debug!(target: "plcmon.alarm", alarm_id = %event.id, "alarm_persist_retried");
                    pending.pop_front();
                }
                Err(err) => {
                    self.health.record_persistence_failure();
                    debug!(target: "plcmon.alarm", error = %err, remaining = pending.len(), "alarm_retry_deferred");
                    break;
                }
            }
        }
        pending.len()
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn acknowledge(&self, id: &str, by: Option<&str>) -> Result<AlarmEvent, AlarmError> {
        self.retry_pending().await;
        let event = self
            .store
            .acknowledge_alarm(id, by, now_epoch_ms())
            .await?
            .ok_or_else(|| AlarmError::NotFound(id.to_string()))?;
        info!(target: "plcmon.alarm", alarm_id = %id, by = ?by, "alarm_acknowledged");
        Ok(event)
    }

    pub async fn resolve(&self, id: &str) -> Result<AlarmEvent, AlarmError> {
        self.retry_pending().await;
        let event = self
            .store
            .resolve_alarm(id, now_epoch_ms())
            .await?
            .ok_or_else(|| AlarmError::NotFound(id.to_string()))?;
        info!(target: "plcmon.alarm", alarm_id = %id, "alarm_resolved");
        Ok(event)
    }

    /// 未确认且未恢复的报警。
    pub async fn active(&self) -> Result<Vec<AlarmEvent>, AlarmError> {
        let filter = AlarmFilter {
            active_only: true,
            ..AlarmFilter::default()
        };
        Ok(self.store.list_alarm_events(&filter).await?)
    }

    pub async fn history(&self, filter: &AlarmFilter) -> Result<Vec<AlarmEvent>, AlarmError> {
        Ok(self.store.list_alarm_events(filter).await?)
    }
}

fn new_event(rule: &AlarmRule, record: &ValueRecord) -> AlarmEvent {
    let message = if rule.message.is_empty() {
        format!(
            "{} {} {} (value {})",
            rule.point_id,
            rule.condition.as_str(),
            rule.threshold,
            record.value
        )
    } else {
        rule.message.clone()
    };
    AlarmEvent {
        id: uuid::Uuid::new_v4().to_string(),
        rule_id: rule.id.clone(),
        point_id: record.point_id.clone(),
        value: record.value,
        severity: rule.severity,
        message,
        triggered_at_ms: record.ts_ms,
        acknowledged_at_ms: None,
        acknowledged_by: None,
        resolved_at_ms: None,
    }
}

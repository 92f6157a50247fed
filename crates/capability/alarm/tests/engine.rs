use domain::{AlarmCondition, AlarmEvent, AlarmRule, AlarmTrigger, TagValue, ValueRecord};
use plcmon_alarm::{AlarmEngine, AlarmError};
use plcmon_bus::Bus;
use plcmon_storage::{AlarmFilter, InMemoryAlarmStore};
use plcmon_telemetry::{HealthMonitor, TelemetryMetrics};
use std::sync::Arc;
use tokio::sync::mpsc;

fn rule(id: &str, trigger: AlarmTrigger) -> AlarmRule {
    AlarmRule {
        id: id.to_string(),
        point_id: "temp".to_string(),
        condition: AlarmCondition::Gt,
        threshold: 80.0,
        severity: 2,
        message: String::new(),
        enabled: true,
        trigger,
    }
}

struct Harness {
    engine: AlarmEngine,
    store: Arc<InMemoryAlarmStore>,
    metrics: Arc<TelemetryMetrics>,
    health: Arc<HealthMonitor>,
    events: mpsc::Receiver<AlarmEvent>,
}

fn harness() -> Harness {
    let metrics = Arc::new(TelemetryMetrics::new());
    let health = Arc::new(HealthMonitor::new(2));
    let store = Arc::new(InMemoryAlarmStore::new());
    let bus = Arc::new(Bus::new("alarms", 64, metrics.clone()));
    let events = bus.subscribe("test");
    let engine = AlarmEngine::new(store.clone(), bus, metrics.clone(), health.clone());
    Harness {
        engine,
        store,
        metrics,
        health,
        events,
    }
}

async fn fire_indices(engine: &AlarmEngine, rule_id: &str, values: &[f64]) -> Vec<usize> {
    let mut indices = Vec::new();
    for (i, value) in values.iter().enumerate() {
        let record = ValueRecord::new("temp", TagValue::Number(*value), 100, i as i64);
        let events = engine.evaluate(&record).await;
        if events.iter().any(|e| e.rule_id == rule_id) {
            indices.push(i);
        }
    }
    indices
}

#[tokio::test]
async fn level_and_edge_triggers() {
    let h = harness();
    h.engine.set_rules(vec![
        rule("level", AlarmTrigger::Level),
        rule("edge", AlarmTrigger::Edge),
    ]);
    let values = [70.0, 85.0, 90.0, 85.0];

    let level = fire_indices(&h.engine, "level", &values).await;
    assert_eq!(level, vec![1, 2, 3]);

    let h = harness();
    h.engine.set_rules(vec![rule("edge", AlarmTrigger::Edge)]);
    let edge = fire_indices(&h.engine, "edge", &values).await;
    assert_eq!(edge, vec![1]);

    // 条件解除后重新布防
    let rearmed = fire_indices(&h.engine, "edge", &[70.0, 95.0]).await;
    assert_eq!(rearmed, vec![1]);
}

#[tokio::test]
async fn fired_events_are_persisted_and_published() {
    let mut h = harness();
    let mut r = rule("r1", AlarmTrigger::Level);
    r.message = "overheat".to_string();
    h.engine.set_rules(vec![r]);

    let events = h
        .engine
        .evaluate(&ValueRecord::new("temp", TagValue::Number(81.0), 100, 5))
        .await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].message, "overheat");
    assert_eq!(events[0].severity, 2);
    assert_eq!(events[0].triggered_at_ms, 5);

    let published = h.events.try_recv().expect("published");
    assert_eq!(published.id, events[0].id);
    assert_eq!(h.store.len(), 1);
    assert_eq!(h.metrics.snapshot().alarms_fired, 1);

    // 其他点位与禁用规则不触发
    assert!(
        h.engine
            .evaluate(&ValueRecord::new("other", TagValue::Number(99.0), 100, 6))
            .await
            .is_empty()
    );
    let mut disabled = rule("r1", AlarmTrigger::Level);
    disabled.enabled = false;
    h.engine.set_rules(vec![disabled]);
    assert!(
        h.engine
            .evaluate(&ValueRecord::new("temp", TagValue::Number(99.0), 100, 7))
            .await
            .is_empty()
    );
}

#[tokio::test]
async fn failed_persist_is_still_emitted_and_retried() {
    let mut h = harness();
    h.engine.set_rules(vec![rule("r1", AlarmTrigger::Level)]);
    h.store.set_fail_writes(true);

    for ts in 0..2 {
        let events = h
            .engine
            .evaluate(&ValueRecord::new("temp", TagValue::Number(90.0), 100, ts))
            .await;
        assert_eq!(events.len(), 1);
    }
    assert!(h.events.try_recv().is_ok());
    assert!(h.events.try_recv().is_ok());
    assert_eq!(h.engine.pending_len().await, 2);
    assert!(h.store.is_empty());
    assert!(h.health.is_degraded());
    assert_eq!(h.metrics.snapshot().alarm_persist_failures, 2);

    h.store.set_fail_writes(false);
    assert_eq!(h.engine.retry_pending().await, 0);
    assert_eq!(h.store.len(), 2);
    assert!(!h.health.is_degraded());
}

#[tokio::test]
async fn acknowledge_resolve_and_queries() {
    let h = harness();
    h.engine.set_rules(vec![rule("r1", AlarmTrigger::Level)]);
    let first = h
        .engine
        .evaluate(&ValueRecord::new("temp", TagValue::Number(90.0), 100, 1000))
        .await
        .remove(0);
    h.engine
        .evaluate(&ValueRecord::new("temp", TagValue::Number(91.0), 100, 2000))
        .await;

    assert_eq!(h.engine.active().await.expect("active").len(), 2);

    let acked = h
        .engine
        .acknowledge(&first.id, Some("operator"))
        .await
        .expect("ack");
    assert_eq!(acked.acknowledged_by.as_deref(), Some("operator"));
    assert_eq!(h.engine.active().await.expect("active").len(), 1);

    let resolved = h.engine.resolve(&first.id).await.expect("resolve");
    assert!(resolved.is_resolved());

    let err = h.engine.acknowledge("missing", None).await.expect_err("missing");
    assert!(matches!(err, AlarmError::NotFound(_)));

    let history = h
        .engine
        .history(&AlarmFilter {
            from_ms: Some(1500),
            ..AlarmFilter::default()
        })
        .await
        .expect("history");
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].triggered_at_ms, 2000);
}

use plcmon_telemetry::{HealthMonitor, TelemetryMetrics, new_request_ids};

#[test]
fn request_ids_non_empty() {
    let ids = new_request_ids();
    assert!(!ids.request_id.is_empty());
    assert!(!ids.trace_id.is_empty());
    assert_ne!(ids.request_id, ids.trace_id);
}

#[test]
fn metrics_are_per_instance() {
    let first = TelemetryMetrics::new();
    let second = TelemetryMetrics::new();
    first.record_poll();
    first.record_flush(12);
    first.record_write(false);

    let snapshot = first.snapshot();
    assert_eq!(snapshot.polls, 1);
    assert_eq!(snapshot.flushes, 1);
    assert_eq!(snapshot.records_flushed, 12);
    assert_eq!(snapshot.writes_failed, 1);
    assert_eq!(second.snapshot().polls, 0);
}

#[test]
fn health_degrades_after_threshold_and_recovers() {
    let health = HealthMonitor::new(3);
    health.record_persistence_failure();
    health.record_persistence_failure();
    assert!(!health.is_degraded());
    health.record_persistence_failure();
    assert!(health.is_degraded());
    assert_eq!(health.snapshot().consecutive_persistence_failures, 3);

    health.record_persistence_success();
    assert!(!health.is_degraded());
}

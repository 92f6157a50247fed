use domain::{TagValue, ValueRecord};
use plcmon_storage::{InMemoryMeasurementStore, MeasurementStore, RecordQuery};

fn record(point_id: &str, ts_ms: i64, value: f64, quality: u8) -> ValueRecord {
    ValueRecord::new(point_id, TagValue::Number(value), quality, ts_ms)
}

#[tokio::test]
async fn query_filters_by_points_range_and_quality() {
    let store = InMemoryMeasurementStore::new();
    store
        .append_value_records(&[
            record("p1", 3000, 3.0, 100),
            record("p1", 1000, 1.0, 100),
            record("p2", 2000, 2.0, 100),
            record("p1", 2000, 2.0, 40),
            record("p1", 5000, 5.0, 100),
        ])
        .await
        .expect("append");

    let items = store
        .query_value_records(&RecordQuery::new(vec!["p1".to_string()], 1000, 3000))
        .await
        .expect("query");
    let ts: Vec<i64> = items.iter().map(|r| r.ts_ms).collect();
    assert_eq!(ts, vec![1000, 2000, 3000]);

    let mut query = RecordQuery::new(vec!["p1".to_string()], 1000, 3000);
    query.min_quality = Some(50);
    let items = store.query_value_records(&query).await.expect("query");
    assert_eq!(items.len(), 2);

    let all = store
        .query_value_records(&RecordQuery::new(Vec::new(), 0, 10_000))
        .await
        .expect("query");
    assert_eq!(all.len(), 5);
}

#[tokio::test]
async fn failed_append_stores_nothing() {
    let store = InMemoryMeasurementStore::new();
    store.set_fail_writes(true);
    store
        .append_value_records(&[record("p1", 1, 1.0, 100)])
        .await
        .expect_err("unavailable");
    assert!(store.is_empty());

    store.set_fail_writes(false);
    let written = store
        .append_value_records(&[record("p1", 1, 1.0, 100)])
        .await
        .expect("append");
    assert_eq!(written, 1);
}

#[tokio::test]
async fn list_and_delete_before_cutoff() {
    let store = InMemoryMeasurementStore::new();
    store
        .append_value_records(&[
            record("p1", 100, 1.0, 100),
            record("p1", 200, 2.0, 100),
            record("p1", 300, 3.0, 100),
        ])
        .await
        .expect("append");

    let old = store.list_value_records_before(300).await.expect("list");
    assert_eq!(old.len(), 2);
    assert_eq!(store.delete_value_records_before(300).await.expect("delete"), 2);
    assert_eq!(store.delete_value_records_before(300).await.expect("delete"), 0);
    assert_eq!(store.len(), 1);
}

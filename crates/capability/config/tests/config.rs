use async_trait::async_trait;
use domain::{ConfigSnapshot, ConfigurationError};
use plcmon_config::{AppConfig, JsonFileSnapshotSource, SnapshotCache, SnapshotSource};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[test]
fn load_config_from_env() {
    // Rust 2024 中 set_var 需要显式标注 unsafe（测试进程内可控）。
    unsafe {
        std::env::set_var("PLCMON_SNAPSHOT_PATH", "/etc/plcmon/snapshot.json");
        std::env::set_var("PLCMON_HTTP_ADDR", "127.0.0.1:8081");
        std::env::set_var("PLCMON_RECONNECT_MAX_ATTEMPTS", "7");
        std::env::set_var("PLCMON_SIMULATION", "on");
    }

    let config = AppConfig::from_env().expect("config");
    assert_eq!(config.http_addr, "127.0.0.1:8081");
    assert_eq!(config.snapshot_path.to_string_lossy(), "/etc/plcmon/snapshot.json");
    assert_eq!(config.reconnect_max_attempts, 7);
    assert_eq!(config.reconnect_base_ms, 5000);
    assert_eq!(config.recorder_max_buffer_size, 1000);
    assert_eq!(config.recorder_max_buffer_age_ms, 3_600_000);
    assert_eq!(config.retention_days, 30);
    assert!(config.archive_compress);
    assert!(config.simulation);
}

const VALID: &str = r#"{
    "plcEndpoints": [{ "id": "plc-1", "host": "127.0.0.1", "port": 1502 }],
    "tags": [{ "id": "t1", "category": "REG", "address": 0, "refreshRateMs": 100 }],
    "alarmRules": []
}"#;

#[tokio::test]
async fn file_source_reads_snapshot() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("snapshot.json");
    std::fs::write(&path, VALID).expect("write");

    let snapshot = JsonFileSnapshotSource::new(&path).load().await.expect("load");
    assert_eq!(snapshot.tags.len(), 1);
    assert_eq!(snapshot.plc_endpoints[0].key(), "127.0.0.1:1502");
}

#[tokio::test]
async fn file_source_reports_missing_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = JsonFileSnapshotSource::new(dir.path().join("absent.json"))
        .load()
        .await
        .expect_err("missing");
    assert!(matches!(err, ConfigurationError::Source(_)));
}

struct CountingSource {
    loads: AtomicUsize,
    snapshots: std::sync::Mutex<Vec<Result<ConfigSnapshot, ConfigurationError>>>,
}

#[async_trait]
impl SnapshotSource for CountingSource {
    async fn load(&self) -> Result<ConfigSnapshot, ConfigurationError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let mut snapshots = self.snapshots.lock().expect("lock");
        if snapshots.len() > 1 {
            snapshots.remove(0)
        } else {
            snapshots[0].clone()
        }
    }
}

fn valid_snapshot() -> ConfigSnapshot {
    serde_json::from_str(VALID).expect("parse")
}

#[tokio::test(start_paused = true)]
async fn cache_reloads_only_after_ttl_or_invalidate() {
    let source = Arc::new(CountingSource {
        loads: AtomicUsize::new(0),
        snapshots: std::sync::Mutex::new(vec![Ok(valid_snapshot())]),
    });
    let cache = SnapshotCache::new(source.clone(), Duration::from_secs(60));

    cache.get_or_refresh().await.expect("first");
    cache.get_or_refresh().await.expect("cached");
    assert_eq!(source.loads.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(61)).await;
    cache.get_or_refresh().await.expect("expired");
    assert_eq!(source.loads.load(Ordering::SeqCst), 2);

    cache.invalidate().await;
    cache.get_or_refresh().await.expect("invalidated");
    assert_eq!(source.loads.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn invalid_snapshot_keeps_last_good() {
    let mut invalid = valid_snapshot();
    invalid.tags[0].refresh_rate_ms = 0;
    let source = Arc::new(CountingSource {
        loads: AtomicUsize::new(0),
        snapshots: std::sync::Mutex::new(vec![Ok(valid_snapshot()), Ok(invalid)]),
    });
    let cache = SnapshotCache::new(source, Duration::from_secs(60));

    let first = cache.get_or_refresh().await.expect("first");
    let err = cache.refresh().await.expect_err("rejected");
    assert!(matches!(err, ConfigurationError::InvalidTag { .. }));

    let current = cache.current().await.expect("last good");
    assert_eq!(current.tags[0].refresh_rate_ms, first.tags[0].refresh_rate_ms);

    cache.invalidate().await;
    let kept = cache.get_or_refresh().await.expect("last good returned");
    assert_eq!(kept.tags[0].refresh_rate_ms, 100);
}

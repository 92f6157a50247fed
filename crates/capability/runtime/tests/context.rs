use async_trait::async_trait;
use domain::{
    AlarmCondition, AlarmRule, AlarmTrigger, ConfigSnapshot, ConfigurationError, PlcEndpoint,
    TagCategory, TagConfig, TagDataType, TagValue,
};
use plcmon_config::{AppConfig, SnapshotSource};
use plcmon_protocol::ModbusTcpFactory;
use plcmon_runtime::{MonitorContext, RuntimeError, Stores};
use plcmon_storage::{FsArchiveStore, InMemoryAlarmStore, InMemoryMeasurementStore};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 可在测试中替换内容的快照来源。
struct StaticSource {
    snapshot: Mutex<Result<ConfigSnapshot, ConfigurationError>>,
}

impl StaticSource {
    fn new(snapshot: ConfigSnapshot) -> Arc<Self> {
        Arc::new(Self {
            snapshot: Mutex::new(Ok(snapshot)),
        })
    }

    fn set(&self, snapshot: Result<ConfigSnapshot, ConfigurationError>) {
        *self.snapshot.lock().expect("lock") = snapshot;
    }
}

#[async_trait]
impl SnapshotSource for StaticSource {
    async fn load(&self) -> Result<ConfigSnapshot, ConfigurationError> {
        self.snapshot.lock().expect("lock").clone()
    }
}

fn tag(id: &str, address: u16) -> TagConfig {
    TagConfig {
        id: id.to_string(),
        name: id.to_string(),
        plc_id: None,
        category: TagCategory::AnalogOutput,
        address,
        length: 1,
        refresh_rate_ms: 100,
        scale: 1.0,
        unit: None,
        min: Some(0.0),
        max: Some(100.0),
        data_type: TagDataType::Int16,
    }
}

fn snapshot(tags: Vec<TagConfig>, alarm_rules: Vec<AlarmRule>) -> ConfigSnapshot {
    ConfigSnapshot {
        plc_endpoints: vec![PlcEndpoint {
            id: "plc-1".to_string(),
            host: "127.0.0.1".to_string(),
            port: 5020,
            unit_id: 1,
            simulation: false,
        }],
        tags,
        alarm_rules,
    }
}

fn always_rule(point_id: &str) -> AlarmRule {
    AlarmRule {
        id: "rule-1".to_string(),
        point_id: point_id.to_string(),
        condition: AlarmCondition::Ge,
        threshold: -1.0,
        severity: 2,
        message: String::new(),
        enabled: true,
        trigger: AlarmTrigger::Edge,
    }
}

struct Fixture {
    context: Arc<MonitorContext>,
    measurements: Arc<InMemoryMeasurementStore>,
    alarms: Arc<InMemoryAlarmStore>,
    _archive_dir: tempfile::TempDir,
}

fn fixture(source: Arc<StaticSource>) -> Fixture {
    let archive_dir = tempfile::tempdir().expect("tempdir");
    let mut config = AppConfig::with_defaults("unused.json");
    config.simulation = true;
    config.simulation_seed = Some(7);
    config.archive_dir = archive_dir.path().to_path_buf();
    config.recorder_flush_interval_ms = 1000;

    let measurements = Arc::new(InMemoryMeasurementStore::new());
    let alarms = Arc::new(InMemoryAlarmStore::new());
    let stores = Stores {
        measurements: measurements.clone(),
        alarms: alarms.clone(),
        archive: Arc::new(FsArchiveStore::new(archive_dir.path())),
    };
    let context = MonitorContext::new(config, stores, source, Arc::new(ModbusTcpFactory));
    Fixture {
        context,
        measurements,
        alarms,
        _archive_dir: archive_dir,
    }
}

#[tokio::test(start_paused = true)]
async fn simulated_endpoint_feeds_recorder_and_alarms() {
    let source = StaticSource::new(snapshot(vec![tag("temp", 0)], vec![always_rule("temp")]));
    let fixture = fixture(source);

    fixture.context.start().await.expect("start");
    tokio::time::sleep(Duration::from_millis(550)).await;

    let status = fixture.context.status().await;
    assert_eq!(status.connections.len(), 1);
    assert!(status.connections[0].simulated);
    assert_eq!(status.groups, 1);
    assert_eq!(status.tags, 1);
    assert!(status.metrics.polls > 0);
    assert!(fixture.context.scheduler.last_value("temp").is_some());

    fixture.context.shutdown().await;

    // 最终落库把缓冲写进存储；edge 规则只触发一次
    assert!(!fixture.measurements.is_empty());
    assert_eq!(fixture.alarms.len(), 1);
    let active = fixture.context.alarms.active().await.expect("active");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].point_id, "temp");
}

#[tokio::test(start_paused = true)]
async fn reload_applies_changes_and_keeps_last_good() {
    let source = StaticSource::new(snapshot(vec![tag("a", 0)], Vec::new()));
    let fixture = fixture(source.clone());
    fixture.context.start().await.expect("start");
    assert_eq!(fixture.context.scheduler.generation(), 1);

    // 内容未变不重新规划
    fixture.context.reload().await.expect("same snapshot");
    assert_eq!(fixture.context.scheduler.generation(), 1);

    source.set(Ok(snapshot(vec![tag("a", 0), tag("b", 1)], Vec::new())));
    fixture.context.reload().await.expect("reload");
    assert_eq!(fixture.context.scheduler.generation(), 2);
    assert_eq!(fixture.context.status().await.tags, 2);

    source.set(Err(ConfigurationError::Source("unreachable".to_string())));
    let err = fixture.context.reload().await.expect_err("rejected");
    assert!(matches!(err, RuntimeError::Configuration(_)));
    assert_eq!(fixture.context.scheduler.generation(), 2);
    assert_eq!(fixture.context.status().await.tags, 2);

    fixture.context.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn start_fails_without_valid_snapshot() {
    let mut invalid = snapshot(vec![tag("a", 0)], Vec::new());
    invalid.tags.push(tag("a", 4));
    let fixture = fixture(StaticSource::new(invalid));

    let err = fixture.context.start().await.expect_err("invalid");
    assert!(matches!(err, RuntimeError::Configuration(_)));
}

#[tokio::test(start_paused = true)]
async fn write_and_reset_go_through_context() {
    let fixture = fixture(StaticSource::new(snapshot(vec![tag("setpoint", 2)], Vec::new())));
    fixture.context.start().await.expect("start");

    let record = fixture
        .context
        .write_value("setpoint", TagValue::Number(40.0))
        .await
        .expect("write");
    assert!((record.value.as_f64() - 40.0).abs() < 1e-9);

    let status = fixture
        .context
        .reset_endpoint("127.0.0.1:5020")
        .await
        .expect("reset");
    assert!(!status.permanently_failed);

    let err = fixture
        .context
        .reset_endpoint("10.9.9.9:502")
        .await
        .expect_err("unknown");
    assert!(matches!(err, RuntimeError::UnknownEndpoint(_)));

    fixture.context.shutdown().await;
}

//! 监控上下文：一次构建，所有组件与共享状态都挂在这里，按 `Arc` 传递。

use crate::error::RuntimeError;
use crate::tasks;
use domain::{
    AlarmEvent, ConfigSnapshot, ConnectionEvent, ConnectionState, ConnectionStatus, PlcEndpoint,
    TagValue, ValueRecord,
};
use plcmon_alarm::AlarmEngine;
use plcmon_bus::Bus;
use plcmon_config::{AppConfig, SnapshotCache, SnapshotSource};
use plcmon_notify::{EventPublisher, MqttEventPublisher, MqttPublisherConfig};
use plcmon_polling::{PollingScheduler, WriteError};
use plcmon_protocol::{
    ConnectionManager, ConnectionManagerConfig, SimTagProfile, SimulationMode, TransportFactory,
};
use plcmon_recorder::{ArchivePolicy, DataRecorder, RecorderConfig};
use plcmon_storage::{
    AlarmStore, ArchiveStore, FsArchiveStore, InMemoryAlarmStore, InMemoryMeasurementStore,
    MeasurementStore, PgAlarmStore, PgMeasurementStore, connect_pool, ensure_schema,
};
use plcmon_telemetry::{HealthMonitor, HealthSnapshot, MetricsSnapshot, TelemetryMetrics};
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};

/// 持久化后端。
#[derive(Clone)]
pub struct Stores {
    pub measurements: Arc<dyn MeasurementStore>,
    pub alarms: Arc<dyn AlarmStore>,
    pub archive: Arc<dyn ArchiveStore>,
}

impl Stores {
    pub fn in_memory(archive_dir: impl AsRef<Path>) -> Self {
        Self {
            measurements: Arc::new(InMemoryMeasurementStore::new()),
            alarms: Arc::new(InMemoryAlarmStore::new()),
            archive: Arc::new(FsArchiveStore::new(archive_dir.as_ref())),
        }
    }

    /// 配置了数据库则使用 Postgres，否则使用内存存储。
    pub async fn from_config(config: &AppConfig) -> Result<Self, RuntimeError> {
        let Some(database_url) = config.database_url.as_deref() else {
            warn!(target: "plcmon.runtime", "database_url_missing_using_memory");
            return Ok(Self::in_memory(&config.archive_dir));
        };
        let pool = connect_pool(database_url).await?;
        ensure_schema(&pool).await?;
        Ok(Self {
            measurements: Arc::new(PgMeasurementStore::new(pool.clone())),
            alarms: Arc::new(PgAlarmStore::new(pool)),
            archive: Arc::new(FsArchiveStore::new(&config.archive_dir)),
        })
    }
}

/// 系统状态（供 HTTP 状态接口使用）。
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub connections: Vec<ConnectionStatus>,
    pub groups: usize,
    pub tags: usize,
    pub plan_generation: u64,
    pub pending_alarms: usize,
    pub health: HealthSnapshot,
    pub metrics: MetricsSnapshot,
}

pub struct MonitorContext {
    pub config: AppConfig,
    pub metrics: Arc<TelemetryMetrics>,
    pub health: Arc<HealthMonitor>,
    pub snapshots: SnapshotCache,
    pub connections: ConnectionManager,
    pub scheduler: PollingScheduler,
    pub alarms: Arc<AlarmEngine>,
    pub recorder: DataRecorder,
    pub value_bus: Arc<Bus<ValueRecord>>,
    pub alarm_bus: Arc<Bus<AlarmEvent>>,
    pub connection_bus: Arc<Bus<ConnectionEvent>>,
    applied: Mutex<Option<Arc<ConfigSnapshot>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    stop: watch::Sender<bool>,
    started: AtomicBool,
}

impl MonitorContext {
    pub fn new(
        config: AppConfig,
        stores: Stores,
        source: Arc<dyn SnapshotSource>,
        factory: Arc<dyn TransportFactory>,
    ) -> Arc<Self> {
        let metrics = Arc::new(TelemetryMetrics::new());
        let health = Arc::new(HealthMonitor::new(config.degraded_after_failures));
        let capacity = config.subscriber_capacity;
        let value_bus = Arc::new(Bus::new("values", capacity, metrics.clone()));
        let alarm_bus = Arc::new(Bus::new("alarms", capacity, metrics.clone()));
        let connection_bus = Arc::new(Bus::new("connections", capacity, metrics.clone()));

        let simulation_mode = match config.simulation_seed {
            Some(seed) => SimulationMode::Seeded(seed),
            None => SimulationMode::Random,
        };
        let connections = ConnectionManager::new(
            ConnectionManagerConfig {
                reconnect_base: Duration::from_millis(config.reconnect_base_ms),
                max_reconnect_attempts: config.reconnect_max_attempts,
                io_timeout: Duration::from_millis(config.io_timeout_ms),
                force_simulation: config.simulation,
                simulation_mode,
            },
            factory,
            connection_bus.clone(),
        );
        let scheduler = PollingScheduler::new(connections.clone(), value_bus.clone(), metrics.clone());
        let alarms = Arc::new(AlarmEngine::new(
            stores.alarms,
            alarm_bus.clone(),
            metrics.clone(),
            health.clone(),
        ));
        let recorder = DataRecorder::new(
            RecorderConfig {
                max_buffer_size: config.recorder_max_buffer_size,
                max_buffer_age: Duration::from_millis(config.recorder_max_buffer_age_ms),
            },
            stores.measurements,
            stores.archive,
            metrics.clone(),
            health.clone(),
        );
        let snapshots = SnapshotCache::new(
            source,
            Duration::from_secs(config.snapshot_ttl_seconds.max(1)),
        );
        let (stop, _) = watch::channel(false);

        Arc::new(Self {
            config,
            metrics,
            health,
            snapshots,
            connections,
            scheduler,
            alarms,
            recorder,
            value_bus,
            alarm_bus,
            connection_bus,
            applied: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            stop,
            started: AtomicBool::new(false),
        })
    }

    /// 加载首份配置并启动全部后台任务。首份配置无效时返回错误（启动应失败）。
    pub async fn start(self: &Arc<Self>) -> Result<Arc<ConfigSnapshot>, RuntimeError> {
        let snapshot = self.snapshots.get_or_refresh().await?;
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(snapshot);
        }

        // 先订阅再开始轮询，避免丢失首批值
        let alarm_values = self.value_bus.subscribe("alarm-engine");
        let recorder_values = self.value_bus.subscribe("data-recorder");
        self.spawn(tasks::run_alarm_consumer(
            self.alarms.clone(),
            alarm_values,
            self.stop.subscribe(),
        ))
        .await;
        self.spawn(tasks::run_recorder_consumer(
            self.recorder.clone(),
            recorder_values,
            self.stop.subscribe(),
        ))
        .await;
        if self.config.mqtt_enabled {
            self.start_mqtt().await;
        }

        self.apply_if_changed(snapshot.clone()).await;

        let flush_interval = Duration::from_millis(self.config.recorder_flush_interval_ms.max(1));
        self.spawn(plcmon_recorder::run_flush_sweep(
            self.recorder.clone(),
            flush_interval,
            self.stop.subscribe(),
        ))
        .await;
        self.spawn(plcmon_recorder::run_archive_sweep(
            self.recorder.clone(),
            self.archive_policy(),
            self.stop.subscribe(),
        ))
        .await;
        self.spawn(tasks::run_alarm_retry(
            self.alarms.clone(),
            flush_interval,
            self.stop.subscribe(),
        ))
        .await;
        self.spawn(tasks::run_snapshot_watcher(
            self.clone(),
            Duration::from_secs(self.config.snapshot_ttl_seconds.max(1)),
            self.stop.subscribe(),
        ))
        .await;

        info!(
            target: "plcmon.runtime",
            endpoints = snapshot.plc_endpoints.len(),
            tags = snapshot.tags.len(),
            simulation = self.config.simulation,
            "monitor_started"
        );
        Ok(snapshot)
    }

    pub fn archive_policy(&self) -> ArchivePolicy {
        ArchivePolicy {
            interval: Duration::from_secs(self.config.archive_interval_seconds.max(1)),
            retention_days: self.config.retention_days.min(u32::MAX as u64) as u32,
            compress: self.config.archive_compress,
            archive_retention_days: self.config.archive_retention_days.min(u32::MAX as u64)
                as u32,
        }
    }

    async fn start_mqtt(&self) {
        let (publisher, eventloop) = MqttEventPublisher::connect(MqttPublisherConfig {
            host: self.config.mqtt_host.clone(),
            port: self.config.mqtt_port,
            username: self.config.mqtt_username.clone(),
            password: self.config.mqtt_password.clone(),
            qos: self.config.mqtt_qos,
        });
        self.tasks.lock().await.push(eventloop);
        let publisher: Arc<dyn EventPublisher> = Arc::new(publisher);
        let prefix = self.config.mqtt_topic_prefix.clone();
        self.spawn(plcmon_notify::forward(
            publisher.clone(),
            prefix.clone(),
            self.value_bus.subscribe("mqtt-values"),
            self.stop.subscribe(),
        ))
        .await;
        self.spawn(plcmon_notify::forward(
            publisher.clone(),
            prefix.clone(),
            self.alarm_bus.subscribe("mqtt-alarms"),
            self.stop.subscribe(),
        ))
        .await;
        self.spawn(plcmon_notify::forward(
            publisher,
            prefix,
            self.connection_bus.subscribe("mqtt-connections"),
            self.stop.subscribe(),
        ))
        .await;
    }

    async fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.lock().await.push(tokio::spawn(task));
    }

    /// 主动重新加载配置。新快照无效时保留当前配置并返回错误。
    pub async fn reload(&self) -> Result<Arc<ConfigSnapshot>, RuntimeError> {
        let snapshot = self.snapshots.refresh().await?;
        self.apply_if_changed(snapshot.clone()).await;
        Ok(snapshot)
    }

    /// 快照内容变化时应用；返回是否应用。
    pub(crate) async fn apply_if_changed(&self, snapshot: Arc<ConfigSnapshot>) -> bool {
        let mut applied = self.applied.lock().await;
        if applied.as_ref().is_some_and(|current| **current == *snapshot) {
            return false;
        }
        self.apply(&snapshot).await;
        *applied = Some(snapshot);
        true
    }

    async fn apply(&self, snapshot: &ConfigSnapshot) {
        let wanted: HashSet<String> = snapshot.plc_endpoints.iter().map(PlcEndpoint::key).collect();

        for endpoint in &snapshot.plc_endpoints {
            let profiles: Vec<SimTagProfile> = snapshot
                .tags
                .iter()
                .filter(|tag| {
                    snapshot
                        .endpoint_for(tag)
                        .is_some_and(|owner| owner.id == endpoint.id)
                })
                .map(SimTagProfile::from_tag)
                .collect();
            let key = match self.connections.register(endpoint, profiles) {
                Ok(key) => key,
                Err(err) => {
                    warn!(target: "plcmon.runtime", endpoint = %endpoint.key(), error = %err, "endpoint_register_failed");
                    continue;
                }
            };
            let needs_connect = self.connections.status(&key).is_some_and(|status| {
                status.state == ConnectionState::Disconnected && !status.permanently_failed
            });
            if needs_connect {
                // 连接失败由连接管理器负责重连
                let connections = self.connections.clone();
                tokio::spawn(async move {
                    let _ = connections.connect(&key).await;
                });
            }
        }

        self.scheduler.apply(snapshot).await;
        self.alarms.set_rules(snapshot.alarm_rules.clone());
        let point_ids: HashSet<String> = snapshot.tags.iter().map(|tag| tag.id.clone()).collect();
        self.recorder.retain_points(&point_ids).await;

        for key in self.connections.endpoint_keys() {
            if !wanted.contains(&key) {
                self.connections.dispose(&key).await;
            }
        }
    }

    pub async fn write_value(
        &self,
        point_id: &str,
        value: TagValue,
    ) -> Result<ValueRecord, WriteError> {
        self.scheduler.write_value(point_id, value).await
    }

    /// 手动重置端点（永久失败后恢复重连的唯一途径）。
    pub async fn reset_endpoint(&self, endpoint_key: &str) -> Result<ConnectionStatus, RuntimeError> {
        if self.connections.status(endpoint_key).is_none() {
            return Err(RuntimeError::UnknownEndpoint(endpoint_key.to_string()));
        }
        if let Err(err) = self.connections.reset(endpoint_key).await {
            // reset 已重新安排重连，这里只回报本次连接结果
            warn!(target: "plcmon.runtime", endpoint = %endpoint_key, error = %err, "endpoint_reset_connect_failed");
        }
        self.connections
            .status(endpoint_key)
            .ok_or_else(|| RuntimeError::UnknownEndpoint(endpoint_key.to_string()))
    }

    pub async fn status(&self) -> SystemStatus {
        let tags = self
            .applied
            .lock()
            .await
            .as_ref()
            .map(|snapshot| snapshot.tags.len())
            .unwrap_or(0);
        SystemStatus {
            connections: self.connections.statuses(),
            groups: self.scheduler.groups().len(),
            tags,
            plan_generation: self.scheduler.generation(),
            pending_alarms: self.alarms.pending_len().await,
            health: self.health.snapshot(),
            metrics: self.metrics.snapshot(),
        }
    }

    /// 优雅停机：停止轮询与后台任务，最后一次落库，释放连接。
    pub async fn shutdown(&self) {
        info!(target: "plcmon.runtime", "shutdown_started");
        let _ = self.stop.send(true);
        let timeout = Duration::from_millis(self.config.shutdown_timeout_ms);
        self.scheduler.shutdown(timeout).await;

        let handles = std::mem::take(&mut *self.tasks.lock().await);
        let deadline = Instant::now() + timeout;
        for mut handle in handles {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                handle.abort();
            }
        }

        if let Err(err) = self.recorder.flush_all().await {
            warn!(target: "plcmon.runtime", error = %err, "final_flush_failed");
        }
        let pending = self.alarms.retry_pending().await;
        if pending > 0 {
            warn!(target: "plcmon.runtime", pending, "alarms_not_persisted");
        }
        self.connections.shutdown().await;
        info!(target: "plcmon.runtime", "shutdown_completed");
    }
}

//! 端点连接管理：状态机、重连退避、仿真旁路。
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──ok──▶ Connected
//!                               │                  │ 操作失败
//!                               └──────fail──────▶ Error ──backoff──▶ Connecting
//!                                                  │ 超过最大次数
//!                                                  ▼
//!                                         permanently_failed（需 reset）
//! ```
//!
//! 状态只由本模块修改；读方拿到的是拷贝。

use crate::error::{ProtocolError, TransportError};
use crate::modbus_tcp::{ModbusTcpConfig, ModbusTcpTransport};
use crate::simulation::{SimTagProfile, SimulatedTransport, SimulationMode};
use crate::types::{PlcTransport, RawValues, RawWrite};
use domain::{
    ConnectionEvent, ConnectionState, ConnectionStatus, PlcEndpoint, TagCategory, now_epoch_ms,
};
use plcmon_bus::Bus;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// 第 `attempts + 1` 次重连前的等待时间：`base × (attempts + 1)`。
pub fn backoff_delay(base: Duration, attempts: u32) -> Duration {
    base.saturating_mul(attempts.saturating_add(1))
}

/// 真实传输工厂（仿真端点不经过工厂）。
pub trait TransportFactory: Send + Sync {
    fn create(&self, endpoint: &PlcEndpoint) -> Arc<dyn PlcTransport>;
}

/// 默认工厂：Modbus TCP。
#[derive(Debug, Default)]
pub struct ModbusTcpFactory;

impl TransportFactory for ModbusTcpFactory {
    fn create(&self, endpoint: &PlcEndpoint) -> Arc<dyn PlcTransport> {
        Arc::new(ModbusTcpTransport::new(ModbusTcpConfig::from(endpoint)))
    }
}

/// 连接管理参数。
#[derive(Debug, Clone)]
pub struct ConnectionManagerConfig {
    pub reconnect_base: Duration,
    pub max_reconnect_attempts: u32,
    pub io_timeout: Duration,
    /// 全局仿真开关（覆盖端点配置）。
    pub force_simulation: bool,
    pub simulation_mode: SimulationMode,
}

impl Default for ConnectionManagerConfig {
    fn default() -> Self {
        Self {
            reconnect_base: Duration::from_millis(5000),
            max_reconnect_attempts: 5,
            io_timeout: Duration::from_millis(3000),
            force_simulation: false,
            simulation_mode: SimulationMode::Random,
        }
    }
}

struct EndpointEntry {
    endpoint: PlcEndpoint,
    transport: Arc<dyn PlcTransport>,
    simulator: Option<Arc<SimulatedTransport>>,
    status: ConnectionStatus,
    /// 每次进入 Connected 加一。
    session_epoch: u64,
    /// 注册代次：dispose 后重新注册的端点不会被旧的重连任务误操作。
    generation: u64,
    reconnect_task: Option<JoinHandle<()>>,
}

struct Inner {
    config: ConnectionManagerConfig,
    factory: Arc<dyn TransportFactory>,
    events: Arc<Bus<ConnectionEvent>>,
    endpoints: RwLock<HashMap<String, EndpointEntry>>,
    next_generation: AtomicU64,
    shutting_down: AtomicBool,
}

/// 每个 PLC 端点一个逻辑连接。
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(
        config: ConnectionManagerConfig,
        factory: Arc<dyn TransportFactory>,
        events: Arc<Bus<ConnectionEvent>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                factory,
                events,
                endpoints: RwLock::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// 注册端点（不发起连接）。已注册且配置相同时仅更新仿真量程。
    pub fn register(
        &self,
        endpoint: &PlcEndpoint,
        profiles: Vec<SimTagProfile>,
    ) -> Result<String, TransportError> {
        let key = endpoint.key();
        let simulated = self.inner.config.force_simulation || endpoint.simulation;
        let mut event = None;
        {
            let mut endpoints = self.inner.write_endpoints(&key)?;
            if let Some(existing) = endpoints.get(&key) {
                if existing.endpoint == *endpoint && existing.status.simulated == simulated {
                    if let Some(simulator) = &existing.simulator {
                        simulator
                            .set_profiles(profiles)
                            .map_err(|cause| TransportError::new(&key, cause))?;
                    }
                    return Ok(key);
                }
            }
            let (transport, simulator) = if simulated {
                let simulator = Arc::new(SimulatedTransport::new(self.inner.config.simulation_mode));
                simulator
                    .set_profiles(profiles)
                    .map_err(|cause| TransportError::new(&key, cause))?;
                let transport: Arc<dyn PlcTransport> = simulator.clone();
                (transport, Some(simulator))
            } else {
                (self.inner.factory.create(endpoint), None)
            };
            let status = ConnectionStatus::new(&key, simulated);
            if simulated {
                event = Some(ConnectionEvent::StateChanged {
                    status: status.clone(),
                });
            }
            let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
            let previous = endpoints.insert(
                key.clone(),
                EndpointEntry {
                    endpoint: endpoint.clone(),
                    transport,
                    simulator,
                    status,
                    session_epoch: u64::from(simulated),
                    generation,
                    reconnect_task: None,
                },
            );
            if let Some(mut previous) = previous {
                if let Some(task) = previous.reconnect_task.take() {
                    task.abort();
                }
            }
        }
        info!(target: "plcmon.connection", endpoint = %key, simulated, "endpoint_registered");
        if let Some(event) = event {
            self.inner.events.publish(event);
        }
        Ok(key)
    }

    /// 建立连接；失败进入 Error 并安排重连。
    pub async fn connect(&self, endpoint_key: &str) -> Result<(), TransportError> {
        self.inner.connect(endpoint_key).await
    }

    /// 主动断开（取消待执行的重连）。
    pub async fn disconnect(&self, endpoint_key: &str) -> Result<(), TransportError> {
        let transport = {
            let mut endpoints = self.inner.write_endpoints(endpoint_key)?;
            let entry = endpoints
                .get_mut(endpoint_key)
                .ok_or_else(|| TransportError::new(endpoint_key, ProtocolError::NotRegistered))?;
            if let Some(task) = entry.reconnect_task.take() {
                task.abort();
            }
            entry.transport.clone()
        };
        let result = transport.disconnect().await;
        self.inner.transition(endpoint_key, |status| {
            if !status.simulated {
                status.state = ConnectionState::Disconnected;
            }
        });
        result.map_err(|cause| TransportError::new(endpoint_key, cause))
    }

    /// 区间读取；失败时触发该端点的错误处理。
    pub async fn read_range(
        &self,
        endpoint_key: &str,
        category: TagCategory,
        start: u16,
        length: u16,
    ) -> Result<RawValues, TransportError> {
        let transport = self.inner.ready_transport(endpoint_key)?;
        let result = self
            .inner
            .with_timeout(transport.read_range(category, start, length))
            .await;
        self.inner.settle(endpoint_key, result)
    }

    /// 单点写入；失败时触发该端点的错误处理。
    pub async fn write_point(
        &self,
        endpoint_key: &str,
        category: TagCategory,
        address: u16,
        value: RawWrite,
    ) -> Result<(), TransportError> {
        let transport = self.inner.ready_transport(endpoint_key)?;
        let result = self
            .inner
            .with_timeout(transport.write_point(category, address, value))
            .await;
        match result {
            // 写只读类别是调用方错误，不影响连接状态
            Err(ProtocolError::Unsupported(reason)) => Err(TransportError::new(
                endpoint_key,
                ProtocolError::Unsupported(reason),
            )),
            other => self.inner.settle(endpoint_key, other),
        }
    }

    /// 清空计数并立即重连（永久失败后唯一的恢复方式）。
    pub async fn reset(&self, endpoint_key: &str) -> Result<(), TransportError> {
        let transport = {
            let mut endpoints = self.inner.write_endpoints(endpoint_key)?;
            let entry = endpoints
                .get_mut(endpoint_key)
                .ok_or_else(|| TransportError::new(endpoint_key, ProtocolError::NotRegistered))?;
            if let Some(task) = entry.reconnect_task.take() {
                task.abort();
            }
            entry.status.reconnect_attempts = 0;
            entry.status.permanently_failed = false;
            entry.status.last_error = None;
            entry.status.last_error_time_ms = None;
            if !entry.status.simulated {
                entry.status.state = ConnectionState::Disconnected;
            }
            entry.transport.clone()
        };
        info!(target: "plcmon.connection", endpoint = %endpoint_key, "endpoint_reset");
        if let Err(err) = transport.disconnect().await {
            warn!(target: "plcmon.connection", endpoint = %endpoint_key, error = %err, "disconnect_failed");
        }
        self.inner.connect(endpoint_key).await
    }

    /// 断开并移除端点状态。
    pub async fn dispose(&self, endpoint_key: &str) {
        let removed = match self.inner.endpoints.write() {
            Ok(mut endpoints) => endpoints.remove(endpoint_key),
            Err(_) => None,
        };
        if let Some(mut entry) = removed {
            if let Some(task) = entry.reconnect_task.take() {
                task.abort();
            }
            if let Err(err) = entry.transport.disconnect().await {
                warn!(target: "plcmon.connection", endpoint = %endpoint_key, error = %err, "disconnect_failed");
            }
            info!(target: "plcmon.connection", endpoint = %endpoint_key, "endpoint_disposed");
        }
    }

    /// 仿真端点或已连接端点可以轮询。
    pub fn is_ready(&self, endpoint_key: &str) -> bool {
        self.status(endpoint_key).is_some_and(|status| {
            status.simulated || status.state == ConnectionState::Connected
        })
    }

    pub fn status(&self, endpoint_key: &str) -> Option<ConnectionStatus> {
        let endpoints = self.inner.endpoints.read().ok()?;
        endpoints.get(endpoint_key).map(|entry| entry.status.clone())
    }

    pub fn statuses(&self) -> Vec<ConnectionStatus> {
        let Ok(endpoints) = self.inner.endpoints.read() else {
            return Vec::new();
        };
        let mut statuses: Vec<_> = endpoints.values().map(|entry| entry.status.clone()).collect();
        statuses.sort_by(|a, b| a.endpoint_key.cmp(&b.endpoint_key));
        statuses
    }

    /// 会话代次：端点每次进入 Connected 加一。
    pub fn session_epoch(&self, endpoint_key: &str) -> Option<u64> {
        let endpoints = self.inner.endpoints.read().ok()?;
        endpoints.get(endpoint_key).map(|entry| entry.session_epoch)
    }

    pub fn endpoint_keys(&self) -> Vec<String> {
        match self.inner.endpoints.read() {
            Ok(endpoints) => endpoints.keys().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    /// 停止重连并断开全部端点（不再重试）。
    pub async fn shutdown(&self) {
        self.inner.shutting_down.store(true, Ordering::SeqCst);
        let transports: Vec<(String, Arc<dyn PlcTransport>)> = match self.inner.endpoints.write() {
            Ok(mut endpoints) => endpoints
                .iter_mut()
                .map(|(key, entry)| {
                    if let Some(task) = entry.reconnect_task.take() {
                        task.abort();
                    }
                    (key.clone(), entry.transport.clone())
                })
                .collect(),
            Err(_) => Vec::new(),
        };
        for (key, transport) in transports {
            if let Err(err) = transport.disconnect().await {
                warn!(target: "plcmon.connection", endpoint = %key, error = %err, "disconnect_failed");
            }
        }
    }
}

impl Inner {
    fn write_endpoints(
        &self,
        endpoint_key: &str,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, EndpointEntry>>, TransportError>
    {
        self.endpoints.write().map_err(|_| {
            TransportError::new(
                endpoint_key,
                ProtocolError::Connection("connection table lock failed".to_string()),
            )
        })
    }

    async fn with_timeout<T>(
        &self,
        operation: impl Future<Output = Result<T, ProtocolError>>,
    ) -> Result<T, ProtocolError> {
        match tokio::time::timeout(self.config.io_timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(ProtocolError::Timeout(format!(
                "no response within {} ms",
                self.config.io_timeout.as_millis()
            ))),
        }
    }

    fn ready_transport(&self, endpoint_key: &str) -> Result<Arc<dyn PlcTransport>, TransportError> {
        let endpoints = self.endpoints.read().map_err(|_| {
            TransportError::new(
                endpoint_key,
                ProtocolError::Connection("connection table lock failed".to_string()),
            )
        })?;
        let entry = endpoints
            .get(endpoint_key)
            .ok_or_else(|| TransportError::new(endpoint_key, ProtocolError::NotRegistered))?;
        if entry.status.simulated || entry.status.state == ConnectionState::Connected {
            Ok(entry.transport.clone())
        } else {
            Err(TransportError::new(endpoint_key, ProtocolError::NotConnected))
        }
    }

    fn settle<T>(
        self: &Arc<Self>,
        endpoint_key: &str,
        result: Result<T, ProtocolError>,
    ) -> Result<T, TransportError> {
        result.map_err(|cause| {
            self.report_failure(endpoint_key, &cause);
            TransportError::new(endpoint_key, cause)
        })
    }

    /// 修改状态并发布事件（仅在状态确实变化时）。
    fn transition(&self, endpoint_key: &str, change: impl FnOnce(&mut ConnectionStatus)) {
        let event = {
            let Ok(mut endpoints) = self.endpoints.write() else {
                return;
            };
            let Some(entry) = endpoints.get_mut(endpoint_key) else {
                return;
            };
            let before = entry.status.clone();
            change(&mut entry.status);
            if entry.status.state == ConnectionState::Connected
                && before.state != ConnectionState::Connected
            {
                entry.session_epoch += 1;
            }
            (entry.status != before).then(|| ConnectionEvent::StateChanged {
                status: entry.status.clone(),
            })
        };
        if let Some(event) = event {
            self.events.publish(event);
        }
    }

    fn connect<'a>(
        self: &'a Arc<Self>,
        endpoint_key: &'a str,
    ) -> std::pin::Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>> {
        Box::pin(async move {
            let transport = {
                let endpoints = self.endpoints.read().map_err(|_| {
                    TransportError::new(
                        endpoint_key,
                        ProtocolError::Connection("connection table lock failed".to_string()),
                    )
                })?;
                let entry = endpoints.get(endpoint_key).ok_or_else(|| {
                    TransportError::new(endpoint_key, ProtocolError::NotRegistered)
                })?;
                if entry.status.simulated {
                    return Ok(());
                }
                entry.transport.clone()
            };

            self.transition(endpoint_key, |status| {
                status.state = ConnectionState::Connecting;
            });
            match self.with_timeout(transport.connect()).await {
                Ok(()) => {
                    self.transition(endpoint_key, |status| {
                        status.state = ConnectionState::Connected;
                        status.reconnect_attempts = 0;
                        status.permanently_failed = false;
                    });
                    info!(target: "plcmon.connection", endpoint = %endpoint_key, "endpoint_connected");
                    Ok(())
                }
                Err(cause) => {
                    self.report_failure(endpoint_key, &cause);
                    Err(TransportError::new(endpoint_key, cause))
                }
            }
        })
    }

    /// 连接中 / 已连接 → Error，并安排重连；重复调用无副作用。
    fn report_failure(self: &Arc<Self>, endpoint_key: &str, cause: &ProtocolError) {
        let mut failed = false;
        self.transition(endpoint_key, |status| {
            if status.simulated {
                return;
            }
            if matches!(
                status.state,
                ConnectionState::Connected | ConnectionState::Connecting
            ) {
                status.state = ConnectionState::Error;
                status.last_error = Some(cause.to_string());
                status.last_error_time_ms = Some(now_epoch_ms());
                failed = true;
            }
        });
        if failed {
            warn!(target: "plcmon.connection", endpoint = %endpoint_key, error = %cause, "endpoint_failed");
            self.schedule_reconnect(endpoint_key);
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, endpoint_key: &str) {
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        let mut events = Vec::new();
        {
            let Ok(mut endpoints) = self.endpoints.write() else {
                return;
            };
            let Some(entry) = endpoints.get_mut(endpoint_key) else {
                return;
            };
            if entry.status.simulated
                || entry.status.permanently_failed
                || entry.reconnect_task.is_some()
            {
                return;
            }
            let attempts = entry.status.reconnect_attempts;
            if attempts >= self.config.max_reconnect_attempts {
                entry.status.permanently_failed = true;
                events.push(ConnectionEvent::StateChanged {
                    status: entry.status.clone(),
                });
                events.push(ConnectionEvent::PermanentlyFailed {
                    endpoint_key: endpoint_key.to_string(),
                    attempts,
                });
            } else {
                let delay = backoff_delay(self.config.reconnect_base, attempts);
                let generation = entry.generation;
                let inner = Arc::clone(self);
                let key = endpoint_key.to_string();
                info!(
                    target: "plcmon.connection",
                    endpoint = %endpoint_key,
                    attempt = attempts + 1,
                    delay_ms = delay.as_millis() as u64,
                    "reconnect_scheduled"
                );
                entry.reconnect_task = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    inner.run_reconnect(&key, generation).await;
                }));
            }
        }
        for event in events {
            if let ConnectionEvent::PermanentlyFailed { attempts, .. } = &event {
                warn!(
                    target: "plcmon.connection",
                    endpoint = %endpoint_key,
                    attempts = *attempts,
                    "endpoint_permanently_failed"
                );
            }
            self.events.publish(event);
        }
    }

    async fn run_reconnect(self: &Arc<Self>, endpoint_key: &str, generation: u64) {
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        {
            let Ok(mut endpoints) = self.endpoints.write() else {
                return;
            };
            let Some(entry) = endpoints.get_mut(endpoint_key) else {
                return;
            };
            if entry.generation != generation {
                return;
            }
            // 任务正在执行，句柄可以释放
            entry.reconnect_task = None;
            entry.status.reconnect_attempts += 1;
        }
        let _ = self.connect(endpoint_key).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_linear_in_attempts() {
        let base = Duration::from_millis(5000);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(5000));
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(10_000));
        assert_eq!(backoff_delay(base, 4), Duration::from_millis(25_000));
        assert_eq!(backoff_delay(base, u32::MAX), base.saturating_mul(u32::MAX));
    }
}

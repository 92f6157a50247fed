use async_trait::async_trait;
use domain::{ConnectionEvent, ConnectionState, PlcEndpoint, TagCategory};
use plcmon_bus::Bus;
use plcmon_protocol::{
    ConnectionManager, ConnectionManagerConfig, PlcTransport, ProtocolError, RawValues, RawWrite,
    SimulationMode, TransportFactory,
};
use plcmon_telemetry::TelemetryMetrics;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

const BASE: Duration = Duration::from_millis(1000);

#[derive(Default)]
struct FlakyTransport {
    fail_connect: AtomicBool,
    fail_read: AtomicBool,
    fail_disconnect: AtomicBool,
    connects: Mutex<Vec<Instant>>,
}

impl FlakyTransport {
    fn connect_count(&self) -> usize {
        self.connects.lock().expect("lock").len()
    }
}

#[async_trait]
impl PlcTransport for FlakyTransport {
    async fn connect(&self) -> Result<(), ProtocolError> {
        self.connects.lock().expect("lock").push(Instant::now());
        if self.fail_connect.load(Ordering::SeqCst) {
            Err(ProtocolError::Connection("refused".to_string()))
        } else {
            Ok(())
        }
    }

    async fn disconnect(&self) -> Result<(), ProtocolError> {
        if self.fail_disconnect.load(Ordering::SeqCst) {
            Err(ProtocolError::Connection("socket already closed".to_string()))
        } else {
            Ok(())
        }
    }

    async fn read_range(
        &self,
        _category: TagCategory,
        _start: u16,
        length: u16,
    ) -> Result<RawValues, ProtocolError> {
        if self.fail_read.load(Ordering::SeqCst) {
            Err(ProtocolError::Modbus("broken pipe".to_string()))
        } else {
            Ok(RawValues::Words(vec![0; length as usize]))
        }
    }

    async fn write_point(
        &self,
        _category: TagCategory,
        _address: u16,
        _value: RawWrite,
    ) -> Result<(), ProtocolError> {
        Ok(())
    }
}

struct SharedFactory(Arc<FlakyTransport>);

impl TransportFactory for SharedFactory {
    fn create(&self, _endpoint: &PlcEndpoint) -> Arc<dyn PlcTransport> {
        self.0.clone()
    }
}

fn endpoint(simulation: bool) -> PlcEndpoint {
    PlcEndpoint {
        id: "plc-1".to_string(),
        host: "10.0.0.5".to_string(),
        port: 502,
        unit_id: 1,
        simulation,
    }
}

fn manager(
    transport: Arc<FlakyTransport>,
    max_attempts: u32,
) -> (ConnectionManager, Arc<Bus<ConnectionEvent>>) {
    let events = Arc::new(Bus::new("connections", 64, Arc::new(TelemetryMetrics::new())));
    let manager = ConnectionManager::new(
        ConnectionManagerConfig {
            reconnect_base: BASE,
            max_reconnect_attempts: max_attempts,
            io_timeout: Duration::from_millis(500),
            force_simulation: false,
            simulation_mode: SimulationMode::Static,
        },
        Arc::new(SharedFactory(transport)),
        events.clone(),
    );
    (manager, events)
}

#[tokio::test(start_paused = true)]
async fn reconnect_backoff_grows_then_stops_until_reset() {
    let transport = Arc::new(FlakyTransport::default());
    transport.fail_connect.store(true, Ordering::SeqCst);
    let (manager, events) = manager(transport.clone(), 3);
    let mut rx = events.subscribe("test");

    let key = manager.register(&endpoint(false), Vec::new()).expect("register");
    manager.connect(&key).await.expect_err("refused");
    assert_eq!(manager.status(&key).expect("status").state, ConnectionState::Error);

    // 一次初始连接 + 三次重连，之后不再重试
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(transport.connect_count(), 4);

    let connects = transport.connects.lock().expect("lock").clone();
    for (n, pair) in connects.windows(2).enumerate() {
        let gap = pair[1] - pair[0];
        assert!(gap >= BASE * (n as u32 + 1), "retry {} after {:?}", n + 1, gap);
    }

    let status = manager.status(&key).expect("status");
    assert!(status.permanently_failed);
    assert_eq!(status.reconnect_attempts, 3);
    assert!(!manager.is_ready(&key));

    let mut saw_permanent = false;
    while let Ok(event) = rx.try_recv() {
        if let ConnectionEvent::PermanentlyFailed { attempts, .. } = event {
            assert_eq!(attempts, 3);
            saw_permanent = true;
        }
    }
    assert!(saw_permanent);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(transport.connect_count(), 4);

    transport.fail_connect.store(false, Ordering::SeqCst);
    manager.reset(&key).await.expect("reset");
    assert_eq!(transport.connect_count(), 5);
    let status = manager.status(&key).expect("status");
    assert_eq!(status.state, ConnectionState::Connected);
    assert_eq!(status.reconnect_attempts, 0);
    assert!(!status.permanently_failed);
}

#[tokio::test(start_paused = true)]
async fn read_failure_moves_to_error_and_reconnects() {
    let transport = Arc::new(FlakyTransport::default());
    let (manager, _events) = manager(transport.clone(), 5);
    let key = manager.register(&endpoint(false), Vec::new()).expect("register");

    manager.connect(&key).await.expect("connect");
    assert_eq!(manager.session_epoch(&key), Some(1));
    manager
        .read_range(&key, TagCategory::Register, 0, 4)
        .await
        .expect("read");

    transport.fail_read.store(true, Ordering::SeqCst);
    let err = manager
        .read_range(&key, TagCategory::Register, 0, 4)
        .await
        .expect_err("read fails");
    assert_eq!(err.endpoint_key, key);
    let status = manager.status(&key).expect("status");
    assert_eq!(status.state, ConnectionState::Error);
    assert!(status.last_error.is_some());

    // 未连接时直接拒绝，不再触达传输
    let err = manager
        .read_range(&key, TagCategory::Register, 0, 4)
        .await
        .expect_err("not connected");
    assert_eq!(err.cause, ProtocolError::NotConnected);

    transport.fail_read.store(false, Ordering::SeqCst);
    tokio::time::sleep(BASE + Duration::from_millis(10)).await;
    assert!(manager.is_ready(&key));
    assert_eq!(manager.session_epoch(&key), Some(2));
}

#[tokio::test]
async fn simulated_endpoint_bypasses_state_machine() {
    let transport = Arc::new(FlakyTransport::default());
    let (manager, _events) = manager(transport.clone(), 5);
    let key = manager.register(&endpoint(true), Vec::new()).expect("register");

    assert!(manager.is_ready(&key));
    manager.connect(&key).await.expect("noop");
    assert_eq!(transport.connect_count(), 0);

    manager
        .write_point(&key, TagCategory::Register, 3, RawWrite::Words(vec![42]))
        .await
        .expect("write");
    let values = manager
        .read_range(&key, TagCategory::Register, 3, 1)
        .await
        .expect("read");
    assert_eq!(values, RawValues::Words(vec![42]));
}

#[tokio::test]
async fn dispose_removes_status() {
    let transport = Arc::new(FlakyTransport::default());
    let (manager, _events) = manager(transport, 5);
    let key = manager.register(&endpoint(false), Vec::new()).expect("register");
    manager.connect(&key).await.expect("connect");
    assert_eq!(manager.statuses().len(), 1);

    manager.dispose(&key).await;
    assert!(manager.status(&key).is_none());
    let err = manager
        .read_range(&key, TagCategory::Register, 0, 1)
        .await
        .expect_err("gone");
    assert_eq!(err.cause, ProtocolError::NotRegistered);
}

#[tokio::test]
async fn failed_disconnect_does_not_block_reset_or_dispose() {
    let transport = Arc::new(FlakyTransport::default());
    transport.fail_disconnect.store(true, Ordering::SeqCst);
    let (manager, _events) = manager(transport.clone(), 5);
    let key = manager.register(&endpoint(false), Vec::new()).expect("register");
    manager.connect(&key).await.expect("connect");

    manager.reset(&key).await.expect("reset");
    assert_eq!(transport.connect_count(), 2);
    assert_eq!(manager.status(&key).expect("status").state, ConnectionState::Connected);

    manager.dispose(&key).await;
    assert!(manager.status(&key).is_none());
}

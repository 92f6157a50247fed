//! # 推送能力模块
//!
//! 订阅内部事件流，序列化为 JSON 发布到 MQTT：
//!
//! | 事件 | Topic |
//! |------|-------|
//! | 值变化 | `{prefix}/values/{pointId}` |
//! | 报警 | `{prefix}/alarms/{pointId}` |
//! | 连接状态 | `{prefix}/connections/{endpointKey}` |
//!
//! 发布失败只记录日志，不影响采集链路。

use async_trait::async_trait;
use domain::{AlarmEvent, ConnectionEvent, ValueRecord};
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("publish error: {0}")]
    Publish(String),
    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

/// 事件流类别（决定 topic 中段）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Values,
    Alarms,
    Connections,
}

impl StreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Values => "values",
            Self::Alarms => "alarms",
            Self::Connections => "connections",
        }
    }
}

/// 可推送的事件。
pub trait Notification: Serialize + Send + 'static {
    const KIND: StreamKind;

    fn topic_key(&self) -> &str;
}

impl Notification for ValueRecord {
    const KIND: StreamKind = StreamKind::Values;

    fn topic_key(&self) -> &str {
        &self.point_id
    }
}

impl Notification for AlarmEvent {
    const KIND: StreamKind = StreamKind::Alarms;

    fn topic_key(&self) -> &str {
        &self.point_id
    }
}

impl Notification for ConnectionEvent {
    const KIND: StreamKind = StreamKind::Connections;

    fn topic_key(&self) -> &str {
        self.endpoint_key()
    }
}

/// `{prefix}/{kind}/{key}`；key 中的 MQTT 通配符与分隔符替换为 `_`。
pub fn topic_for(prefix: &str, kind: StreamKind, key: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let key: String = key
        .chars()
        .map(|c| if matches!(c, '/' | '+' | '#') { '_' } else { c })
        .collect();
    format!("{}/{}/{}", prefix, kind.as_str(), key)
}

/// 发布器抽象。
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), NotifyError>;
}

/// 空发布器（未启用 MQTT 时使用）。
#[derive(Debug, Default)]
pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(&self, _topic: &str, _payload: Vec<u8>) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// MQTT 发布配置。
#[derive(Debug, Clone)]
pub struct MqttPublisherConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub qos: u8,
}

/// MQTT 发布器。
#[derive(Clone)]
pub struct MqttEventPublisher {
    client: AsyncClient,
    qos: QoS,
}

impl MqttEventPublisher {
    /// 创建客户端并在后台驱动事件循环。
    pub fn connect(config: MqttPublisherConfig) -> (Self, tokio::task::JoinHandle<()>) {
        let client_id = format!("plcmon-notify-{}", uuid::Uuid::new_v4());
        let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) = (config.username, config.password) {
            options.set_credentials(username, password);
        }
        let (client, mut eventloop) = AsyncClient::new(options, 10);
        let handle = tokio::spawn(async move {
            loop {
                if let Err(err) = eventloop.poll().await {
                    warn!(target: "plcmon.notify", error = %err, "mqtt_eventloop_error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        });
        info!(target: "plcmon.notify", host = %config.host, port = config.port, "mqtt_publisher_started");
        (
            Self {
                client,
                qos: qos_from_u8(config.qos),
            },
            handle,
        )
    }
}

#[async_trait]
impl EventPublisher for MqttEventPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), NotifyError> {
        self.client
            .publish(topic, self.qos, false, payload)
            .await
            .map_err(|err| NotifyError::Publish(err.to_string()))
    }
}

fn qos_from_u8(value: u8) -> QoS {
    match value {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

/// 把一个事件流转发到发布器，直到停止信号或上游关闭。
pub async fn forward<T: Notification>(
    publisher: Arc<dyn EventPublisher>,
    prefix: String,
    mut events: mpsc::Receiver<T>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            biased;
            _ = stop.changed() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        let topic = topic_for(&prefix, T::KIND, event.topic_key());
        let payload = match serde_json::to_vec(&event) {
            Ok(payload) => payload,
            Err(err) => {
                warn!(target: "plcmon.notify", topic = %topic, error = %err, "notify_payload_failed");
                continue;
            }
        };
        if let Err(err) = publisher.publish(&topic, payload).await {
            warn!(target: "plcmon.notify", topic = %topic, error = %err, "notify_publish_failed");
        }
    }
    debug!(target: "plcmon.notify", kind = T::KIND.as_str(), "notify_forward_stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_escape_wildcards() {
        assert_eq!(
            topic_for("plcmon/", StreamKind::Values, "temp-1"),
            "plcmon/values/temp-1"
        );
        assert_eq!(
            topic_for("site", StreamKind::Connections, "10.0.0.5:502"),
            "site/connections/10.0.0.5:502"
        );
        assert_eq!(
            topic_for("site", StreamKind::Alarms, "a/b+#"),
            "site/alarms/a_b__"
        );
    }

    #[test]
    fn qos_defaults_to_at_least_once() {
        assert_eq!(qos_from_u8(0), QoS::AtMostOnce);
        assert_eq!(qos_from_u8(2), QoS::ExactlyOnce);
        assert_eq!(qos_from_u8(9), QoS::AtLeastOnce);
    }
}

//! 事件分发：每个订阅者一个有界队列。
//!
//! 发布方永不等待：队列已满时丢弃该事件并记录告警与计数，
//! 订阅者已关闭时将其移除。采集任务因此不会被下游拖慢。

use plcmon_telemetry::TelemetryMetrics;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

/// 默认订阅队列容量。
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 1024;

struct Subscriber<T> {
    name: String,
    tx: mpsc::Sender<T>,
}

/// 有界扇出事件总线。
pub struct Bus<T> {
    topic: &'static str,
    capacity: usize,
    subscribers: Mutex<Vec<Subscriber<T>>>,
    metrics: Arc<TelemetryMetrics>,
}

impl<T: Clone + Send + 'static> Bus<T> {
    pub fn new(topic: &'static str, capacity: usize, metrics: Arc<TelemetryMetrics>) -> Self {
        Self {
            topic,
            capacity: capacity.max(1),
            subscribers: Mutex::new(Vec::new()),
            metrics,
        }
    }

    /// 注册订阅者，返回其独占的接收端。
    pub fn subscribe(&self, name: impl Into<String>) -> mpsc::Receiver<T> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let name = name.into();
        match self.subscribers.lock() {
            Ok(mut subscribers) => subscribers.push(Subscriber { name, tx }),
            Err(poisoned) => poisoned.into_inner().push(Subscriber { name, tx }),
        }
        rx
    }

    /// 向所有订阅者投递事件，返回成功入队的数量。
    pub fn publish(&self, event: T) -> usize {
        let mut subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut delivered = 0;
        subscribers.retain(|subscriber| match subscriber.tx.try_send(event.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                self.metrics.record_subscriber_drop();
                warn!(
                    target: "plcmon.bus",
                    topic = self.topic,
                    subscriber = %subscriber.name,
                    capacity = self.capacity,
                    "subscriber_queue_full"
                );
                true
            }
            Err(TrySendError::Closed(_)) => {
                warn!(
                    target: "plcmon.bus",
                    topic = self.topic,
                    subscriber = %subscriber.name,
                    "subscriber_closed"
                );
                false
            }
        });
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        match self.subscribers.lock() {
            Ok(subscribers) => subscribers.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus(capacity: usize) -> (Bus<u32>, Arc<TelemetryMetrics>) {
        let metrics = Arc::new(TelemetryMetrics::new());
        (Bus::new("test", capacity, metrics.clone()), metrics)
    }

    #[tokio::test]
    async fn every_subscriber_sees_every_event() {
        let (bus, _) = bus(8);
        let mut alarm = bus.subscribe("alarm");
        let mut recorder = bus.subscribe("recorder");

        assert_eq!(bus.publish(1), 2);
        assert_eq!(bus.publish(2), 2);

        assert_eq!(alarm.recv().await, Some(1));
        assert_eq!(alarm.recv().await, Some(2));
        assert_eq!(recorder.recv().await, Some(1));
        assert_eq!(recorder.recv().await, Some(2));
    }

    #[tokio::test]
    async fn full_queue_drops_without_blocking_others() {
        let (bus, metrics) = bus(1);
        let mut slow = bus.subscribe("slow");
        let mut fast = bus.subscribe("fast");

        assert_eq!(bus.publish(1), 2);
        assert_eq!(fast.recv().await, Some(1));
        // slow 未消费，队列已满
        assert_eq!(bus.publish(2), 1);
        assert_eq!(fast.recv().await, Some(2));
        assert_eq!(slow.recv().await, Some(1));
        assert_eq!(metrics.snapshot().subscriber_drops, 1);
    }

    #[tokio::test]
    async fn closed_subscriber_is_removed() {
        let (bus, _) = bus(4);
        let rx = bus.subscribe("gone");
        let _keep = bus.subscribe("kept");
        drop(rx);
        bus.publish(7);
        assert_eq!(bus.subscriber_count(), 1);
    }
}

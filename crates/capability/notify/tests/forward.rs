use async_trait::async_trait;
use domain::{TagValue, ValueRecord};
use plcmon_notify::{EventPublisher, NotifyError, forward};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};

#[derive(Default)]
struct RecordingPublisher {
    published: Mutex<Vec<(String, serde_json::Value)>>,
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), NotifyError> {
        let value = serde_json::from_slice(&payload)?;
        self.published
            .lock()
            .expect("lock")
            .push((topic.to_string(), value));
        Ok(())
    }
}

#[tokio::test]
async fn forwards_values_until_upstream_closes() {
    let publisher = Arc::new(RecordingPublisher::default());
    let (tx, rx) = mpsc::channel(8);
    let (_stop, stop_rx) = watch::channel(false);
    let task = tokio::spawn(forward(publisher.clone(), "plcmon".to_string(), rx, stop_rx));

    tx.send(ValueRecord::new("temp-1", TagValue::Number(21.5), 100, 1000))
        .await
        .expect("send");
    drop(tx);
    task.await.expect("forward task");

    let published = publisher.published.lock().expect("lock").clone();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "plcmon/values/temp-1");
    assert_eq!(published[0].1["pointId"], "temp-1");
    assert_eq!(published[0].1["value"], 21.5);
}

#[tokio::test]
async fn stop_signal_ends_forwarding() {
    let publisher = Arc::new(RecordingPublisher::default());
    let (_tx, rx) = mpsc::channel::<ValueRecord>(8);
    let (stop, stop_rx) = watch::channel(false);
    let task = tokio::spawn(forward(publisher, "plcmon".to_string(), rx, stop_rx));
    stop.send(true).expect("stop");
    task.await.expect("forward task");
}

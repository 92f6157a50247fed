//! 报警事件内存实现

use crate::error::StorageError;
use crate::models::AlarmFilter;
use crate::traits::AlarmStore;
use domain::AlarmEvent;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Default)]
pub struct InMemoryAlarmStore {
    events: RwLock<Vec<AlarmEvent>>,
    fail_writes: AtomicBool,
}

impl InMemoryAlarmStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.read().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 让后续写入失败，模拟数据库不可用。
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn update(
        &self,
        id: &str,
        apply: impl FnOnce(&mut AlarmEvent),
    ) -> Result<Option<AlarmEvent>, StorageError> {
        let mut events = self
            .events
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(events.iter_mut().find(|event| event.id == id).map(|event| {
            apply(event);
            event.clone()
        }))
    }
}

#[async_trait::async_trait]
impl AlarmStore for InMemoryAlarmStore {
    async fn append_alarm_event(&self, event: &AlarmEvent) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::new("alarm store unavailable"));
        }
        let mut events = self
            .events
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        if events.iter().any(|existing| existing.id == event.id) {
            return Ok(());
        }
        events.push(event.clone());
        Ok(())
    }

    async fn acknowledge_alarm(
        &self,
        id: &str,
        by: Option<&str>,
        at_ms: i64,
    ) -> Result<Option<AlarmEvent>, StorageError> {
        self.update(id, |event| {
            if event.acknowledged_at_ms.is_none() {
                event.acknowledged_at_ms = Some(at_ms);
                event.acknowledged_by = by.map(str::to_string);
            }
        })
    }

    async fn resolve_alarm(
        &self,
        id: &str,
        at_ms: i64,
    ) -> Result<Option<AlarmEvent>, StorageError> {
        self.update(id, |event| {
            if event.resolved_at_ms.is_none() {
                event.resolved_at_ms = Some(at_ms);
            }
        })
    }

    async fn list_alarm_events(
        &self,
        filter: &AlarmFilter,
    ) -> Result<Vec<AlarmEvent>, StorageError> {
        let events = self
            .events
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut selected: Vec<AlarmEvent> = events
            .iter()
            .filter(|event| {
                filter.from_ms.is_none_or(|from| event.triggered_at_ms >= from)
                    && filter.to_ms.is_none_or(|to| event.triggered_at_ms <= to)
                    && filter
                        .point_id
                        .as_deref()
                        .is_none_or(|point_id| event.point_id == point_id)
                    && filter.severity.is_none_or(|severity| event.severity == severity)
                    && (!filter.active_only || !(event.is_acknowledged() || event.is_resolved()))
            })
            .cloned()
            .collect();
        selected.sort_by(|a, b| b.triggered_at_ms.cmp(&a.triggered_at_ms));
        if filter.limit > 0 {
            selected.truncate(filter.limit);
        }
        Ok(selected)
    }
}

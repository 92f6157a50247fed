//! 最新值表：由各分组自己的轮询写入，读取一律返回拷贝。

use domain::ValueRecord;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

#[derive(Debug, Default)]
pub struct LastValueTable {
    values: RwLock<HashMap<String, ValueRecord>>,
}

impl LastValueTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 记录新值；值变化、首次出现或 `force` 时返回 true（需要发布）。
    pub fn observe(&self, record: &ValueRecord, force: bool) -> bool {
        let Ok(mut values) = self.values.write() else {
            return true;
        };
        let changed = match values.get(&record.point_id) {
            Some(previous) => previous.value != record.value || previous.quality != record.quality,
            None => true,
        };
        values.insert(record.point_id.clone(), record.clone());
        changed || force
    }

    pub fn get(&self, point_id: &str) -> Option<ValueRecord> {
        self.values.read().ok()?.get(point_id).cloned()
    }

    /// 全部最新值（按点位 ID 排序）。
    pub fn snapshot(&self) -> Vec<ValueRecord> {
        let Ok(values) = self.values.read() else {
            return Vec::new();
        };
        let mut records: Vec<_> = values.values().cloned().collect();
        records.sort_by(|a, b| a.point_id.cmp(&b.point_id));
        records
    }

    /// 只保留仍在配置中的点位。
    pub fn retain(&self, point_ids: &HashSet<String>) {
        if let Ok(mut values) = self.values.write() {
            values.retain(|point_id, _| point_ids.contains(point_id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::TagValue;

    #[test]
    fn change_only_observation() {
        let table = LastValueTable::new();
        let published: Vec<bool> = [10.0, 10.0, 12.0]
            .iter()
            .enumerate()
            .map(|(i, v)| {
                table.observe(&ValueRecord::new("p", TagValue::Number(*v), 100, i as i64), false)
            })
            .collect();
        assert_eq!(published, vec![true, false, true]);
        assert_eq!(table.get("p").map(|r| r.ts_ms), Some(2));
    }

    #[test]
    fn force_republishes_unchanged_value() {
        let table = LastValueTable::new();
        let record = ValueRecord::new("p", TagValue::Bool(true), 100, 1);
        assert!(table.observe(&record, false));
        assert!(!table.observe(&record, false));
        assert!(table.observe(&record, true));
    }
}

//! 存储查询条件与归档文件描述。

use domain::ValueRecord;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// 一天的毫秒数（归档按 UTC 日分桶）。
pub const DAY_MS: i64 = 86_400_000;

/// 采集值查询条件；时间区间两端包含。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordQuery {
    /// 为空表示全部点位。
    pub point_ids: Vec<String>,
    pub from_ms: Option<i64>,
    pub to_ms: Option<i64>,
    pub min_quality: Option<u8>,
}

impl RecordQuery {
    pub fn new(point_ids: Vec<String>, from_ms: i64, to_ms: i64) -> Self {
        Self {
            point_ids,
            from_ms: Some(from_ms),
            to_ms: Some(to_ms),
            min_quality: None,
        }
    }

    /// 内存过滤用的匹配判断。
    pub fn matches(&self, point_id: &str, ts_ms: i64, quality: u8) -> bool {
        if !self.point_ids.is_empty() && !self.point_ids.iter().any(|id| id == point_id) {
            return false;
        }
        if self.from_ms.is_some_and(|from| ts_ms < from) {
            return false;
        }
        if self.to_ms.is_some_and(|to| ts_ms > to) {
            return false;
        }
        self.min_quality.is_none_or(|min| quality >= min)
    }
}

/// 报警事件查询条件。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlarmFilter {
    pub from_ms: Option<i64>,
    pub to_ms: Option<i64>,
    pub point_id: Option<String>,
    pub severity: Option<u8>,
    /// 只返回未确认且未恢复的事件。
    pub active_only: bool,
    /// 0 表示不限制。
    pub limit: usize,
}

/// 归档文件。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveFile {
    pub bucket_start_ms: i64,
    pub path: PathBuf,
    pub compressed: bool,
    pub records: usize,
}

impl ArchiveFile {
    pub fn bucket_end_ms(&self) -> i64 {
        self.bucket_start_ms + DAY_MS
    }
}

/// 时间戳所在日桶的起点。
pub fn day_bucket(ts_ms: i64) -> i64 {
    ts_ms.div_euclid(DAY_MS) * DAY_MS
}

/// 去掉 `secondary` 中已在 `primary` 出现过的副本（按整条记录计数匹配）。
///
/// 只跨来源去重：同一来源里同一毫秒的多条记录全部保留。
pub fn without_replicas(primary: &[ValueRecord], secondary: Vec<ValueRecord>) -> Vec<ValueRecord> {
    let mut pending: HashMap<_, usize> = HashMap::new();
    for record in primary {
        *pending.entry(record.identity()).or_default() += 1;
    }
    secondary
        .into_iter()
        .filter(|record| match pending.get_mut(&record.identity()) {
            Some(count) if *count > 0 => {
                *count -= 1;
                false
            }
            _ => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::TagValue;

    fn record(value: f64, ts_ms: i64) -> ValueRecord {
        ValueRecord::new("p", TagValue::Number(value), 100, ts_ms)
    }

    #[test]
    fn replicas_are_matched_one_for_one() {
        let primary = vec![record(1.0, 10), record(1.0, 10)];
        let secondary = vec![record(1.0, 10), record(1.0, 10), record(1.0, 10), record(2.0, 10)];
        let kept = without_replicas(&primary, secondary);
        assert_eq!(kept, vec![record(1.0, 10), record(2.0, 10)]);
    }
}

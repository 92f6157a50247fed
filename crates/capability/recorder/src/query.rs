//! 历史查询：原始记录或按时间桶聚合；CSV / JSON 导出。

use crate::error::RecorderError;
use chrono::{DateTime, SecondsFormat};
use domain::{TagValue, ValueRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// 默认聚合桶宽（毫秒）。
pub const DEFAULT_INTERVAL_MS: i64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    Raw,
    Avg,
    Min,
    Max,
}

impl FromStr for Aggregation {
    type Err = RecorderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "raw" => Ok(Self::Raw),
            "avg" => Ok(Self::Avg),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            other => Err(RecorderError::InvalidQuery(format!(
                "unknown aggregation: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl FromStr for ExportFormat {
    type Err = RecorderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            other => Err(RecorderError::InvalidQuery(format!(
                "unknown export format: {other}"
            ))),
        }
    }
}

/// 历史查询参数；时间区间两端包含。
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryQuery {
    /// 为空表示全部点位。
    pub point_ids: Vec<String>,
    pub start_ms: i64,
    pub end_ms: i64,
    pub aggregation: Aggregation,
    pub interval_ms: Option<i64>,
    pub min_quality: Option<u8>,
}

impl HistoryQuery {
    pub fn raw(point_ids: Vec<String>, start_ms: i64, end_ms: i64) -> Self {
        Self {
            point_ids,
            start_ms,
            end_ms,
            aggregation: Aggregation::Raw,
            interval_ms: None,
            min_quality: None,
        }
    }

    pub fn interval_ms(&self) -> i64 {
        self.interval_ms.unwrap_or(DEFAULT_INTERVAL_MS)
    }

    pub(crate) fn validate(&self) -> Result<(), RecorderError> {
        if self.start_ms > self.end_ms {
            return Err(RecorderError::InvalidQuery(
                "start must not be after end".to_string(),
            ));
        }
        if self.interval_ms() <= 0 {
            return Err(RecorderError::InvalidQuery(
                "interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// 查询结果行。聚合结果的 `quality` 为空，`ts_ms` 为桶起点。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub point_id: String,
    pub value: TagValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,
    pub ts_ms: i64,
}

impl From<ValueRecord> for HistoryRecord {
    fn from(record: ValueRecord) -> Self {
        Self {
            point_id: record.point_id,
            value: record.value,
            quality: Some(record.quality),
            ts_ms: record.ts_ms,
        }
    }
}

/// 对已按时间排序的记录做聚合；布尔值按 1/0 参与计算。
pub fn aggregate(
    records: Vec<ValueRecord>,
    aggregation: Aggregation,
    interval_ms: i64,
) -> Vec<HistoryRecord> {
    if aggregation == Aggregation::Raw {
        return records.into_iter().map(HistoryRecord::from).collect();
    }
    if interval_ms <= 0 {
        return Vec::new();
    }

    let mut buckets: BTreeMap<(i64, String), Vec<f64>> = BTreeMap::new();
    for record in &records {
        let bucket_start = record.ts_ms.div_euclid(interval_ms) * interval_ms;
        buckets
            .entry((bucket_start, record.point_id.clone()))
            .or_default()
            .push(record.value.as_f64());
    }

    buckets
        .into_iter()
        .filter_map(|((bucket_start, point_id), values)| {
            let value = match aggregation {
                Aggregation::Avg => {
                    if values.is_empty() {
                        None
                    } else {
                        Some(values.iter().sum::<f64>() / values.len() as f64)
                    }
                }
                Aggregation::Min => values.iter().copied().reduce(f64::min),
                Aggregation::Max => values.iter().copied().reduce(f64::max),
                Aggregation::Raw => None,
            }?;
            Some(HistoryRecord {
                point_id,
                value: TagValue::Number(value),
                quality: None,
                ts_ms: bucket_start,
            })
        })
        .collect()
}

pub(crate) fn render_export(
    records: &[ValueRecord],
    format: ExportFormat,
) -> Result<String, RecorderError> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(records)?),
        ExportFormat::Csv => {
            let mut csv = String::from("point_id,value,quality,timestamp\n");
            for record in records {
                let timestamp = DateTime::from_timestamp_millis(record.ts_ms)
                    .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Millis, true))
                    .unwrap_or_else(|| record.ts_ms.to_string());
                csv.push_str(&format!(
                    "{},{},{},{}\n",
                    csv_field(&record.point_id),
                    record.value,
                    record.quality,
                    timestamp
                ));
            }
            Ok(csv)
        }
    }
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

//! 采集值模型。

use serde::{Deserialize, Serialize};

/// 数据质量：完全可信。
pub const QUALITY_GOOD: u8 = 100;

/// 点位值（布尔或数值）。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Bool(bool),
    Number(f64),
}

impl TagValue {
    /// 数值视图：布尔按 1/0 参与比较与聚合。
    pub fn as_f64(&self) -> f64 {
        match self {
            Self::Bool(true) => 1.0,
            Self::Bool(false) => 0.0,
            Self::Number(value) => *value,
        }
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Self::Bool(_))
    }
}

impl std::fmt::Display for TagValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Number(value) => write!(f, "{value}"),
        }
    }
}

impl From<bool> for TagValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for TagValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

/// 一次采集得到的点位值（不可变）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueRecord {
    pub point_id: String,
    pub value: TagValue,
    /// 0–100
    pub quality: u8,
    #[serde(alias = "timestamp")]
    pub ts_ms: i64,
}

impl ValueRecord {
    pub fn new(point_id: impl Into<String>, value: TagValue, quality: u8, ts_ms: i64) -> Self {
        Self {
            point_id: point_id.into(),
            value,
            quality: quality.min(QUALITY_GOOD),
            ts_ms,
        }
    }
}

/// 整条记录的身份，数值按位比较；同一身份可出现多次（同一毫秒内重复采样）。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordIdentity {
    point_id: String,
    ts_ms: i64,
    quality: u8,
    value: (bool, u64),
}

impl ValueRecord {
    pub fn identity(&self) -> RecordIdentity {
        let value = match self.value {
            TagValue::Bool(flag) => (true, u64::from(flag)),
            TagValue::Number(number) => (false, number.to_bits()),
        };
        RecordIdentity {
            point_id: self.point_id.clone(),
            ts_ms: self.ts_ms,
            quality: self.quality,
            value,
        }
    }
}

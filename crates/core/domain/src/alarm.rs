//! 报警规则与报警事件。

use crate::value::TagValue;
use serde::{Deserialize, Serialize};

/// 比较条件。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmCondition {
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = "==", alias = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}

impl AlarmCondition {
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Gt => value > threshold,
            Self::Ge => value >= threshold,
            Self::Lt => value < threshold,
            Self::Le => value <= threshold,
            Self::Eq => value == threshold,
            Self::Ne => value != threshold,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
        }
    }
}

/// 触发方式。
///
/// - `Level`：条件成立期间每次评估都触发
/// - `Edge`：仅在由不成立变为成立时触发一次，条件解除后重新布防
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmTrigger {
    #[default]
    Level,
    Edge,
}

/// 报警规则。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmRule {
    pub id: String,
    pub point_id: String,
    pub condition: AlarmCondition,
    pub threshold: f64,
    /// 1（低）– 3（高）
    #[serde(alias = "priority", default = "default_severity")]
    pub severity: u8,
    #[serde(default)]
    pub message: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub trigger: AlarmTrigger,
}

fn default_severity() -> u8 {
    1
}

fn default_enabled() -> bool {
    true
}

impl AlarmRule {
    pub fn matches(&self, value: &TagValue) -> bool {
        self.condition.holds(value.as_f64(), self.threshold)
    }
}

/// 报警事件（持久化记录）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmEvent {
    pub id: String,
    pub rule_id: String,
    pub point_id: String,
    pub value: TagValue,
    pub severity: u8,
    pub message: String,
    pub triggered_at_ms: i64,
    pub acknowledged_at_ms: Option<i64>,
    pub acknowledged_by: Option<String>,
    pub resolved_at_ms: Option<i64>,
}

impl AlarmEvent {
    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged_at_ms.is_some()
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at_ms.is_some()
    }
}

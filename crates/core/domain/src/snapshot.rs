//! 配置快照及其校验。

use crate::alarm::AlarmRule;
use crate::tag::{PlcEndpoint, TagConfig};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// 配置快照非法（新快照被拒绝，保留上一份有效快照）。
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("duplicate {kind} id: {id}")]
    DuplicateId { kind: &'static str, id: String },
    #[error("tag {tag_id}: {reason}")]
    InvalidTag { tag_id: String, reason: String },
    #[error("tag {tag_id}: unknown plc endpoint {plc_id}")]
    UnknownEndpoint { tag_id: String, plc_id: String },
    #[error("tags {first} and {second} overlap with different refresh rates")]
    OverlappingRefresh { first: String, second: String },
    #[error("overlapping tags {first}..{last} span {span} addresses, limit {limit}")]
    OverlapSpanTooLarge {
        first: String,
        last: String,
        span: u32,
        limit: u16,
    },
    #[error("alarm rule {rule_id}: {reason}")]
    InvalidRule { rule_id: String, reason: String },
    #[error("config source error: {0}")]
    Source(String),
}

/// 配置快照：端点、点位、报警规则。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSnapshot {
    #[serde(default)]
    pub plc_endpoints: Vec<PlcEndpoint>,
    #[serde(default)]
    pub tags: Vec<TagConfig>,
    #[serde(default)]
    pub alarm_rules: Vec<AlarmRule>,
}

impl ConfigSnapshot {
    /// 点位所属端点；只有一个端点时 `plcId` 可省略。
    pub fn endpoint_for(&self, tag: &TagConfig) -> Option<&PlcEndpoint> {
        match &tag.plc_id {
            Some(plc_id) => self.plc_endpoints.iter().find(|ep| &ep.id == plc_id),
            None if self.plc_endpoints.len() == 1 => self.plc_endpoints.first(),
            None => None,
        }
    }

    pub fn tag(&self, tag_id: &str) -> Option<&TagConfig> {
        self.tags.iter().find(|tag| tag.id == tag_id)
    }

    /// 校验快照，任何一项不满足都整体拒绝。
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let mut endpoint_ids = HashSet::new();
        let mut endpoint_keys = HashSet::new();
        for endpoint in &self.plc_endpoints {
            if !endpoint_ids.insert(endpoint.id.as_str()) {
                return Err(ConfigurationError::DuplicateId {
                    kind: "plc endpoint",
                    id: endpoint.id.clone(),
                });
            }
            if !endpoint_keys.insert(endpoint.key()) {
                return Err(ConfigurationError::DuplicateId {
                    kind: "plc endpoint address",
                    id: endpoint.key(),
                });
            }
        }

        let mut tag_ids = HashSet::new();
        let mut by_space: HashMap<(String, crate::TagCategory), Vec<&TagConfig>> = HashMap::new();
        for tag in &self.tags {
            if tag.id.trim().is_empty() {
                return Err(invalid_tag(tag, "empty id"));
            }
            if !tag_ids.insert(tag.id.as_str()) {
                return Err(ConfigurationError::DuplicateId {
                    kind: "tag",
                    id: tag.id.clone(),
                });
            }
            validate_tag(tag)?;
            let endpoint = self.endpoint_for(tag).ok_or_else(|| {
                ConfigurationError::UnknownEndpoint {
                    tag_id: tag.id.clone(),
                    plc_id: tag.plc_id.clone().unwrap_or_else(|| "<unset>".to_string()),
                }
            })?;
            by_space
                .entry((endpoint.key(), tag.category))
                .or_default()
                .push(tag);
        }

        for tags in by_space.values_mut() {
            tags.sort_by_key(|tag| tag.address);
            for (index, tag) in tags.iter().enumerate() {
                for other in tags.iter().skip(index + 1) {
                    if other.address as u32 >= tag.end_address() {
                        break;
                    }
                    if other.refresh_rate_ms != tag.refresh_rate_ms {
                        return Err(ConfigurationError::OverlappingRefresh {
                            first: tag.id.clone(),
                            second: other.id.clone(),
                        });
                    }
                }
            }
        }

        // 互相重叠的点位必须能在一次请求内读完
        for tags in by_space.values() {
            check_overlap_spans(tags)?;
        }

        let mut rule_ids = HashSet::new();
        for rule in &self.alarm_rules {
            if !rule_ids.insert(rule.id.as_str()) {
                return Err(ConfigurationError::DuplicateId {
                    kind: "alarm rule",
                    id: rule.id.clone(),
                });
            }
            if !tag_ids.contains(rule.point_id.as_str()) {
                return Err(invalid_rule(rule, format!("unknown point {}", rule.point_id)));
            }
            if !rule.threshold.is_finite() {
                return Err(invalid_rule(rule, "threshold must be finite"));
            }
            if !(1..=3).contains(&rule.severity) {
                return Err(invalid_rule(rule, "severity must be 1-3"));
            }
        }
        Ok(())
    }
}

fn validate_tag(tag: &TagConfig) -> Result<(), ConfigurationError> {
    if tag.refresh_rate_ms == 0 {
        return Err(invalid_tag(tag, "refreshRateMs must be > 0"));
    }
    if tag.length == 0 {
        return Err(invalid_tag(tag, "length must be >= 1"));
    }
    if tag.category.is_digital() {
        if tag.length != 1 {
            return Err(invalid_tag(tag, "digital tags must have length 1"));
        }
    } else if tag.length < tag.data_type.word_count() {
        return Err(invalid_tag(
            tag,
            format!("length {} too short for {:?}", tag.length, tag.data_type),
        ));
    }
    if tag.length > tag.category.max_span() {
        return Err(invalid_tag(tag, "length exceeds protocol request limit"));
    }
    if tag.end_address() > u16::MAX as u32 + 1 {
        return Err(invalid_tag(tag, "address range exceeds 65535"));
    }
    if !tag.scale.is_finite() || tag.scale == 0.0 {
        return Err(invalid_tag(tag, "scale must be finite and non-zero"));
    }
    if let (Some(min), Some(max)) = (tag.min, tag.max) {
        if min > max {
            return Err(invalid_tag(tag, "min greater than max"));
        }
    }
    Ok(())
}

/// `tags` 已按地址排序。
fn check_overlap_spans(tags: &[&TagConfig]) -> Result<(), ConfigurationError> {
    let Some(first) = tags.first() else {
        return Ok(());
    };
    let mut run_first = *first;
    let mut run_end = first.end_address();
    for &tag in &tags[1..] {
        if (tag.address as u32) < run_end {
            run_end = run_end.max(tag.end_address());
            let span = run_end - run_first.address as u32;
            let limit = tag.category.max_span();
            if span > limit as u32 {
                return Err(ConfigurationError::OverlapSpanTooLarge {
                    first: run_first.id.clone(),
                    last: tag.id.clone(),
                    span,
                    limit,
                });
            }
        } else {
            run_first = tag;
            run_end = tag.end_address();
        }
    }
    Ok(())
}

fn invalid_tag(tag: &TagConfig, reason: impl Into<String>) -> ConfigurationError {
    ConfigurationError::InvalidTag {
        tag_id: tag.id.clone(),
        reason: reason.into(),
    }
}

fn invalid_rule(rule: &AlarmRule, reason: impl Into<String>) -> ConfigurationError {
    ConfigurationError::InvalidRule {
        rule_id: rule.id.clone(),
        reason: reason.into(),
    }
}

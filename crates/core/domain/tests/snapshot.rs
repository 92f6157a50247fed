use domain::{
    AlarmCondition, AlarmTrigger, ConfigSnapshot, ConfigurationError, TagCategory, TagDataType,
    TagValue,
};

fn sample_json() -> &'static str {
    r#"{
        "plcEndpoints": [{ "id": "plc-1", "host": "10.0.0.5" }],
        "tags": [
            { "id": "estop", "category": "DI", "address": 0, "refreshRateMs": 100 },
            { "id": "temp", "type": "REG", "address": 10, "length": 2, "refreshRate": 500,
              "scale": 0.1, "unit": "C", "min": 0, "max": 200, "dataType": "float32" }
        ],
        "alarmRules": [
            { "id": "r1", "pointId": "temp", "condition": ">", "threshold": 80, "priority": 3 },
            { "id": "r2", "pointId": "estop", "condition": "=", "threshold": 1, "trigger": "edge" }
        ]
    }"#
}

#[test]
fn snapshot_parses_source_vocabulary() {
    let snapshot: ConfigSnapshot = serde_json::from_str(sample_json()).expect("parse");
    snapshot.validate().expect("valid");

    assert_eq!(snapshot.plc_endpoints[0].port, 502);
    assert_eq!(snapshot.plc_endpoints[0].key(), "10.0.0.5:502");
    let temp = snapshot.tag("temp").expect("temp");
    assert_eq!(temp.category, TagCategory::Register);
    assert_eq!(temp.data_type, TagDataType::Float32);
    assert_eq!(temp.refresh_rate_ms, 500);
    let estop = snapshot.tag("estop").expect("estop");
    assert_eq!(estop.length, 1);
    assert_eq!(estop.scale, 1.0);
    assert_eq!(snapshot.endpoint_for(estop).map(|ep| ep.id.as_str()), Some("plc-1"));

    assert_eq!(snapshot.alarm_rules[0].severity, 3);
    assert_eq!(snapshot.alarm_rules[0].trigger, AlarmTrigger::Level);
    assert_eq!(snapshot.alarm_rules[1].condition, AlarmCondition::Eq);
    assert_eq!(snapshot.alarm_rules[1].trigger, AlarmTrigger::Edge);
    assert!(snapshot.alarm_rules[1].matches(&TagValue::Bool(true)));
}

#[test]
fn rejects_overlap_with_different_refresh() {
    let mut snapshot: ConfigSnapshot = serde_json::from_str(sample_json()).expect("parse");
    let mut overlapping = snapshot.tag("temp").expect("temp").clone();
    overlapping.id = "temp-fast".to_string();
    overlapping.address = 11;
    overlapping.refresh_rate_ms = 100;
    snapshot.tags.push(overlapping);

    let err = snapshot.validate().expect_err("overlap");
    assert!(matches!(err, ConfigurationError::OverlappingRefresh { .. }));
}

#[test]
fn rejects_unknown_point_and_endpoint() {
    let mut snapshot: ConfigSnapshot = serde_json::from_str(sample_json()).expect("parse");
    snapshot.alarm_rules[0].point_id = "missing".to_string();
    assert!(matches!(
        snapshot.validate(),
        Err(ConfigurationError::InvalidRule { .. })
    ));

    let mut snapshot: ConfigSnapshot = serde_json::from_str(sample_json()).expect("parse");
    snapshot.tags[0].plc_id = Some("plc-9".to_string());
    assert!(matches!(
        snapshot.validate(),
        Err(ConfigurationError::UnknownEndpoint { .. })
    ));
}

#[test]
fn rejects_short_register_tag() {
    let mut snapshot: ConfigSnapshot = serde_json::from_str(sample_json()).expect("parse");
    snapshot.tags[1].length = 1;
    let err = snapshot.validate().expect_err("too short");
    assert_eq!(
        err.to_string(),
        "tag temp: length 1 too short for Float32"
    );
}

#[test]
fn overlap_chain_wider_than_one_request_is_rejected() {
    let mut snapshot: ConfigSnapshot = serde_json::from_str(sample_json()).expect("parse");
    let template = snapshot.tag("temp").expect("temp").clone();
    snapshot.tags.retain(|tag| tag.id != "temp");
    snapshot.alarm_rules.retain(|rule| rule.point_id != "temp");
    // 每个 float32 与下一个重叠一个字，串成 [0, 127) 的不可拆分区间
    for i in 0..63u16 {
        let mut tag = template.clone();
        tag.id = format!("chain-{i}");
        tag.address = i * 2;
        tag.length = 3;
        snapshot.tags.push(tag);
    }
    let err = snapshot.validate().expect_err("too wide");
    assert!(matches!(
        err,
        ConfigurationError::OverlapSpanTooLarge { limit: 125, .. }
    ));

    // 相接但不重叠的点位可以拆组，不受限制
    for tag in snapshot.tags.iter_mut().filter(|t| t.id.starts_with("chain-")) {
        tag.length = 2;
    }
    snapshot.validate().expect("contiguous is fine");
}

use api_contract::{
    BankPointDto, CommandResponseDto, HealthDto, StatusDto, StatusSummaryDto,
};
use serde_json::{json, Value};

#[test]
fn command_response_keeps_wire_field_names() {
    let response = CommandResponseDto {
        success: true,
        command: "off".to_string(),
        outlet: 3,
        error: None,
        ts_ms: 1_700_000_000_000,
    };
    let value = serde_json::to_value(response).expect("serialize");
    assert_eq!(value.get("success"), Some(&Value::Bool(true)));
    assert_eq!(value["command"], "off");
    assert_eq!(value["outlet"], 3);
    assert!(value["error"].is_null());
}

#[test]
fn status_parses_spec_shape() {
    let payload = json!({
        "device": {
            "name": "PDU44001",
            "id": "pdu44001",
            "label": "Rack 1",
            "outlet_count": 10,
            "phase_count": 1,
            "transport": "snmp",
            "health": "healthy"
        },
        "inputs": {
            "1": {"number": 1, "voltage": 120.4, "load_state": "normal"}
        },
        "outlets": {
            "3": {"number": 3, "name": "Router", "state": "off"}
        },
        "summary": {
            "total_power": 36.0,
            "input_voltage": 120.4,
            "active_outlets": 9,
            "total_outlets": 10
        },
        "ts_ms": 1_700_000_000_000i64
    });
    let status: StatusDto = serde_json::from_value(payload).expect("parse");
    assert_eq!(status.outlets["3"].state, "off");
    assert_eq!(status.inputs["1"].voltage, Some(120.4));
    assert!(status.ats.is_none());
    assert!(status.data_age_seconds.is_none());
}

#[test]
fn summary_roundtrips_without_optional_fields() {
    let summary = StatusSummaryDto {
        total_power: 0.0,
        input_voltage: None,
        input_frequency: None,
        active_outlets: 0,
        total_outlets: 10,
    };
    let value = serde_json::to_value(&summary).expect("serialize");
    assert!(value.get("input_voltage").is_none());
    assert!(value.get("input_frequency").is_none());
}

#[test]
fn health_issues_are_a_string_array() {
    let payload = json!({
        "status": "degraded",
        "issues": ["[rack1-pdu] Data is 45s stale", "MQTT disconnected"],
        "devices": {},
        "mqtt_connected": false
    });
    let health: HealthDto = serde_json::from_value(payload).expect("parse");
    assert_eq!(health.issues.len(), 2);
    assert!(health.issues[0].starts_with("[rack1-pdu]"));
}

#[test]
fn history_points_omit_missing_metrics() {
    let point = BankPointDto {
        bucket: 1_700_000_000,
        bank: 1,
        voltage: Some(120.1),
        current: None,
        power: None,
        apparent: None,
        pf: None,
    };
    let value = serde_json::to_value(point).expect("serialize");
    assert_eq!(value["voltage"], 120.1);
    assert!(value.get("current").is_none());
}

//! 快照到 MQTT 主题空间的投影。
//!
//! 每个指标一个保留主题，新订阅者立刻拿到当前值。可选字段缺失时
//! 对应主题不发布，绝不发空占位。字符串枚举按线上字面量发布，
//! 不会静默变成数字。

use api_contract::{
    IdentityDto, MqttStatusDto, StatusAtsDto, StatusBankDto, StatusDeviceDto, StatusDto,
    StatusOutletDto, StatusSourceDto, StatusSummaryDto,
};
use domain::model::{DeviceIdentity, Snapshot, SourceData};
use pdu_mqtt::{topics, MqttStatus, Publisher};
use pdu_transport::AtsConfig;
use serde_json::json;

fn float(value: f64) -> Vec<u8> {
    format!("{value}").into_bytes()
}

async fn publish_retained(publisher: &dyn Publisher, topic: String, payload: Vec<u8>) {
    let _ = publisher.publish(&topic, payload, true, 0).await;
}

/// 发布一次轮询的全部指标主题与汇总状态。
pub async fn publish_snapshot(
    publisher: &dyn Publisher,
    device_id: &str,
    label: &str,
    snapshot: &Snapshot,
    health_state: &str,
    transport: &str,
    mqtt_status: Option<&MqttStatus>,
    ats_config: Option<&AtsConfig>,
) {
    // 汇总状态 JSON
    let status = build_status_dto(
        device_id,
        label,
        snapshot,
        health_state,
        transport,
        mqtt_status,
        0.0,
    );
    if let Ok(payload) = serde_json::to_vec(&status) {
        publish_retained(publisher, topics::status(device_id), payload).await;
    }

    // 输入
    if let Some(voltage) = snapshot.input_voltage {
        publish_retained(publisher, topics::input_voltage(device_id), float(voltage)).await;
    }
    if let Some(frequency) = snapshot.input_frequency {
        publish_retained(publisher, topics::input_frequency(device_id), float(frequency)).await;
    }

    // 插座
    for outlet in snapshot.outlets.values() {
        publish_retained(
            publisher,
            topics::outlet_state(device_id, outlet.number),
            outlet.state.as_str().as_bytes().to_vec(),
        )
        .await;
        publish_retained(
            publisher,
            topics::outlet_name(device_id, outlet.number),
            outlet.name.clone().into_bytes(),
        )
        .await;
        if let Some(current) = outlet.current {
            publish_retained(
                publisher,
                topics::outlet_metric(device_id, outlet.number, "current"),
                float(current),
            )
            .await;
        }
        if let Some(power) = outlet.power {
            publish_retained(
                publisher,
                topics::outlet_metric(device_id, outlet.number, "power"),
                float(power),
            )
            .await;
        }
        if let Some(energy) = outlet.energy {
            publish_retained(
                publisher,
                topics::outlet_metric(device_id, outlet.number, "energy"),
                float(energy),
            )
            .await;
        }
    }

    // 负载组
    for bank in snapshot.banks.values() {
        let n = bank.number;
        if let Some(current) = bank.current {
            publish_retained(publisher, topics::bank_metric(device_id, n, "current"), float(current))
                .await;
        }
        if let Some(voltage) = bank.voltage {
            publish_retained(publisher, topics::bank_metric(device_id, n, "voltage"), float(voltage))
                .await;
        }
        if let Some(power) = bank.power {
            publish_retained(publisher, topics::bank_metric(device_id, n, "power"), float(power))
                .await;
        }
        if let Some(apparent) = bank.apparent_power {
            publish_retained(
                publisher,
                topics::bank_metric(device_id, n, "apparent_power"),
                float(apparent),
            )
            .await;
        }
        if let Some(pf) = bank.power_factor {
            publish_retained(
                publisher,
                topics::bank_metric(device_id, n, "power_factor"),
                float(pf),
            )
            .await;
        }
        if let Some(energy) = bank.energy {
            publish_retained(publisher, topics::bank_metric(device_id, n, "energy"), float(energy))
                .await;
        }
        if let Some(last_update) = &bank.last_update {
            publish_retained(
                publisher,
                topics::bank_metric(device_id, n, "last_update"),
                last_update.clone().into_bytes(),
            )
            .await;
        }
        publish_retained(
            publisher,
            topics::bank_metric(device_id, n, "load_state"),
            bank.load_state.as_str().as_bytes().to_vec(),
        )
        .await;
    }

    // ATS
    if let Some(preferred) = snapshot.ats_preferred_source {
        publish_retained(
            publisher,
            topics::ats_metric(device_id, "preferred_source"),
            preferred.as_str().as_bytes().to_vec(),
        )
        .await;
    }
    if let Some(current) = snapshot.ats_current_source {
        publish_retained(
            publisher,
            topics::ats_metric(device_id, "current_source"),
            current.as_str().as_bytes().to_vec(),
        )
        .await;
        let auto = if snapshot.ats_auto_transfer { "on" } else { "off" };
        publish_retained(
            publisher,
            topics::ats_metric(device_id, "auto_transfer"),
            auto.as_bytes().to_vec(),
        )
        .await;
    }
    if let Some(redundancy_ok) = snapshot.redundancy_ok {
        let payload = if redundancy_ok { "ok" } else { "lost" };
        publish_retained(
            publisher,
            topics::ats_metric(device_id, "redundancy"),
            payload.as_bytes().to_vec(),
        )
        .await;
    }
    if let Some(config) = ats_config {
        if !config.voltage_sensitivity.is_empty() {
            publish_retained(
                publisher,
                topics::ats_metric(device_id, "voltage_sensitivity"),
                config.voltage_sensitivity.clone().into_bytes(),
            )
            .await;
        }
        if let Some(value) = config.transfer_voltage {
            publish_retained(
                publisher,
                topics::ats_metric(device_id, "transfer_voltage"),
                float(value),
            )
            .await;
        }
        if let Some(value) = config.voltage_upper_limit {
            publish_retained(
                publisher,
                topics::ats_metric(device_id, "voltage_upper_limit"),
                float(value),
            )
            .await;
        }
        if let Some(value) = config.voltage_lower_limit {
            publish_retained(
                publisher,
                topics::ats_metric(device_id, "voltage_lower_limit"),
                float(value),
            )
            .await;
        }
    }

    // 每输入源
    publish_source(publisher, device_id, "a", snapshot.source_a.as_ref()).await;
    publish_source(publisher, device_id, "b", snapshot.source_b.as_ref()).await;

    // 设备级合计
    if let Some(load) = snapshot.total_load {
        publish_retained(publisher, topics::total_metric(device_id, "load"), float(load)).await;
    }
    let total_power = snapshot.total_power.unwrap_or_else(|| snapshot.total_bank_power());
    publish_retained(
        publisher,
        topics::total_metric(device_id, "power"),
        float(total_power),
    )
    .await;
    if let Some(energy) = snapshot.total_energy {
        publish_retained(publisher, topics::total_metric(device_id, "energy"), float(energy))
            .await;
    }

    // 冷启动
    if let Some(delay) = snapshot.coldstart_delay {
        publish_retained(
            publisher,
            topics::coldstart(device_id, "delay"),
            delay.to_string().into_bytes(),
        )
        .await;
    }
    if let Some(state) = snapshot.coldstart_state {
        publish_retained(
            publisher,
            topics::coldstart(device_id, "state"),
            state.as_str().as_bytes().to_vec(),
        )
        .await;
    }

    // 环境传感器
    if let Some(environment) = &snapshot.environment {
        if let Some(temperature) = environment.temperature {
            publish_retained(
                publisher,
                topics::environment_metric(device_id, "temperature"),
                float(temperature),
            )
            .await;
        }
        if let Some(humidity) = environment.humidity {
            publish_retained(
                publisher,
                topics::environment_metric(device_id, "humidity"),
                float(humidity),
            )
            .await;
        }
        for (contact, closed) in &environment.contacts {
            let payload = if *closed { "closed" } else { "open" };
            publish_retained(
                publisher,
                topics::environment_contact(device_id, *contact),
                payload.as_bytes().to_vec(),
            )
            .await;
        }
    }
}

async fn publish_source(
    publisher: &dyn Publisher,
    device_id: &str,
    source: &str,
    data: Option<&SourceData>,
) {
    let Some(data) = data else { return };
    if let Some(voltage) = data.voltage {
        publish_retained(
            publisher,
            topics::source_metric(device_id, source, "voltage"),
            float(voltage),
        )
        .await;
    }
    if let Some(frequency) = data.frequency {
        publish_retained(
            publisher,
            topics::source_metric(device_id, source, "frequency"),
            float(frequency),
        )
        .await;
    }
    publish_retained(
        publisher,
        topics::source_metric(device_id, source, "voltage_status"),
        data.voltage_status.as_str().as_bytes().to_vec(),
    )
    .await;
}

fn source_dto(data: Option<&SourceData>) -> StatusSourceDto {
    match data {
        Some(data) => StatusSourceDto {
            voltage: data.voltage,
            frequency: data.frequency,
            voltage_status: data.voltage_status.as_str().to_string(),
        },
        None => StatusSourceDto {
            voltage: None,
            frequency: None,
            voltage_status: "unknown".to_string(),
        },
    }
}

/// 组装 `/api/status` 与状态主题共用的汇总 DTO。
pub fn build_status_dto(
    device_id: &str,
    label: &str,
    snapshot: &Snapshot,
    health_state: &str,
    transport: &str,
    mqtt_status: Option<&MqttStatus>,
    data_age_seconds: f64,
) -> StatusDto {
    let ats = match (snapshot.ats_preferred_source, snapshot.ats_current_source) {
        (None, None) if snapshot.source_a.is_none() => None,
        (preferred, current) => Some(StatusAtsDto {
            preferred_source: preferred.map(|s| s.as_str().to_string()),
            current_source: current.map(|s| s.as_str().to_string()),
            auto_transfer: snapshot.ats_auto_transfer,
            transferred: matches!((preferred, current), (Some(p), Some(c)) if p != c),
            redundancy_ok: snapshot.redundancy_ok,
            source_a: source_dto(snapshot.source_a.as_ref()),
            source_b: source_dto(snapshot.source_b.as_ref()),
        }),
    };

    let inputs = snapshot
        .banks
        .iter()
        .map(|(idx, bank)| {
            (
                idx.to_string(),
                StatusBankDto {
                    number: bank.number,
                    voltage: bank.voltage,
                    current: bank.current,
                    power: bank.power,
                    apparent_power: bank.apparent_power,
                    power_factor: bank.power_factor,
                    load_state: bank.load_state.as_str().to_string(),
                },
            )
        })
        .collect();

    let outlets = snapshot
        .outlets
        .iter()
        .map(|(n, outlet)| {
            (
                n.to_string(),
                StatusOutletDto {
                    number: outlet.number,
                    name: outlet.name.clone(),
                    state: outlet.state.as_str().to_string(),
                    current: outlet.current,
                    power: outlet.power,
                    energy: outlet.energy,
                },
            )
        })
        .collect();

    StatusDto {
        device: StatusDeviceDto {
            name: snapshot.device_name.clone(),
            id: device_id.to_string(),
            label: label.to_string(),
            outlet_count: snapshot.outlet_count,
            phase_count: snapshot.phase_count,
            transport: transport.to_string(),
            health: health_state.to_string(),
        },
        ats,
        inputs,
        outlets,
        summary: StatusSummaryDto {
            total_power: snapshot
                .total_power
                .unwrap_or_else(|| snapshot.total_bank_power()),
            input_voltage: snapshot.input_voltage,
            input_frequency: snapshot.input_frequency,
            active_outlets: snapshot.active_outlets(),
            total_outlets: snapshot.outlet_count,
        },
        identity: snapshot.identity.as_ref().map(identity_dto),
        mqtt: mqtt_status.map(|status| MqttStatusDto {
            connected: status.connected,
            reconnect_count: status.reconnect_count,
            queued: status.queued,
            dropped: status.dropped,
            broker: status.broker.clone(),
            port: status.port,
        }),
        data_age_seconds: Some(data_age_seconds),
        ts_ms: snapshot.ts_ms,
    }
}

/// 身份 DTO。
pub fn identity_dto(identity: &DeviceIdentity) -> IdentityDto {
    IdentityDto {
        name: identity.name.clone(),
        model: identity.model.clone(),
        serial: identity.serial.clone(),
        firmware: identity.firmware.clone(),
        mac_address: identity.mac_address.clone(),
        location: identity.location.clone(),
        outlet_count: identity.outlet_count,
        phase_count: identity.phase_count,
        max_input_current: identity.max_input_current,
    }
}

/// 设备信息主题（约 30 s 一次，保留）。
pub async fn publish_device_info(
    publisher: &dyn Publisher,
    device_id: &str,
    label: &str,
    transport: &str,
    identity: Option<&DeviceIdentity>,
    poll_interval_ms: u64,
) {
    let payload = json!({
        "device_id": device_id,
        "label": label,
        "transport": transport,
        "poll_interval_ms": poll_interval_ms,
        "identity": identity.map(identity_dto),
    });
    if let Ok(payload) = serde_json::to_vec(&payload) {
        publish_retained(publisher, topics::device_info(device_id), payload).await;
    }
}

/// Home Assistant 发现载荷（启动时发布一次，保留）。
pub async fn publish_discovery(
    publisher: &dyn Publisher,
    device_id: &str,
    identity: Option<&DeviceIdentity>,
    outlet_count: u16,
) {
    let unique_base = identity
        .filter(|i| !i.serial.is_empty())
        .map(|i| i.serial.clone())
        .unwrap_or_else(|| device_id.to_string());
    let device_block = json!({
        "identifiers": [unique_base],
        "name": identity.map(|i| i.name.clone()).filter(|n| !n.is_empty())
            .unwrap_or_else(|| device_id.to_string()),
        "manufacturer": "CyberPower",
        "model": identity.map(|i| i.model.clone()).unwrap_or_default(),
    });
    let prefix = topics::prefix(device_id);

    for outlet in 1..=outlet_count {
        let payload = json!({
            "unique_id": format!("{unique_base}_outlet_{outlet}"),
            "name": format!("Outlet {outlet}"),
            "command_topic": format!("{prefix}/outlet/{outlet}/command"),
            "state_topic": format!("{prefix}/outlet/{outlet}/state"),
            "payload_on": "on",
            "payload_off": "off",
            "device": device_block,
        });
        if let Ok(payload) = serde_json::to_vec(&payload) {
            publish_retained(
                publisher,
                format!("homeassistant/switch/{unique_base}_outlet_{outlet}/config"),
                payload,
            )
            .await;
        }
    }

    for (metric, topic, unit, class) in [
        ("input_voltage", "input/voltage", "V", "voltage"),
        ("input_frequency", "input/frequency", "Hz", "frequency"),
        ("total_power", "total/power", "W", "power"),
    ] {
        let payload = json!({
            "unique_id": format!("{unique_base}_{metric}"),
            "name": metric.replace('_', " "),
            "state_topic": format!("{prefix}/{topic}"),
            "unit_of_measurement": unit,
            "device_class": class,
            "device": device_block,
        });
        if let Ok(payload) = serde_json::to_vec(&payload) {
            publish_retained(
                publisher,
                format!("homeassistant/sensor/{unique_base}_{metric}/config"),
                payload,
            )
            .await;
        }
    }

    let payload = json!({
        "unique_id": format!("{unique_base}_bridge"),
        "name": "Bridge online",
        "state_topic": format!("{prefix}/bridge/status"),
        "payload_on": "online",
        "payload_off": "offline",
        "device_class": "connectivity",
        "device": device_block,
    });
    if let Ok(payload) = serde_json::to_vec(&payload) {
        publish_retained(
            publisher,
            format!("homeassistant/binary_sensor/{unique_base}_bridge/config"),
            payload,
        )
        .await;
    }
}

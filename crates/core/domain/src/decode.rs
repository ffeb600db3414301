//! 原始 OID 值表到快照的纯解码函数。
//!
//! 线上缩放规则：
//! - 电压、电流、频率、电能为 0.1 单位（除以 10）
//! - 功率因数为 0.01 单位（除以 100）
//! - 有功/视在功率为整数，原样透传
//!
//! 计量下限：空载插座的原始电流 ≤ 2（0.2 A）、原始功率 ≤ 1（1 W）
//! 归零，避免空闲插座出现幻读噪声。缺失的 OID 使对应可选字段保持
//! `None`，绝不写入零占位。

use std::collections::BTreeMap;

use crate::model::{
    AtsSource, BankData, BankLoadState, EnvironmentData, OutletData, OutletState, Snapshot,
    SourceData, SourceVoltageStatus,
};
use crate::oids;

/// SNMP 响应中的原始值。
#[derive(Debug, Clone, PartialEq)]
pub enum RawValue {
    Integer(i64),
    Unsigned(u64),
    Text(String),
    TimeTicks(u32),
    Oid(Vec<u32>),
    Null,
}

impl RawValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RawValue::Integer(v) => Some(*v),
            RawValue::Unsigned(v) => i64::try_from(*v).ok(),
            RawValue::TimeTicks(v) => Some(*v as i64),
            RawValue::Text(s) => s.trim().parse::<i64>().ok(),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            RawValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// 解码所需的表规模（启动发现结果）。
#[derive(Debug, Clone, Copy)]
pub struct SnapshotLayout {
    pub outlet_count: u16,
    pub num_banks: u16,
}

/// 0.1 单位缩放。
pub fn scale_tenths(raw: i64) -> f64 {
    raw as f64 / 10.0
}

/// 0.01 单位缩放。
pub fn scale_hundredths(raw: i64) -> f64 {
    raw as f64 / 100.0
}

/// 插座电流计量下限：原始值 ≤ 2 归零。
pub fn floor_outlet_current(raw: i64) -> f64 {
    if raw <= 2 {
        0.0
    } else {
        scale_tenths(raw)
    }
}

/// 插座功率计量下限：原始值 ≤ 1 归零。
pub fn floor_outlet_power(raw: i64) -> f64 {
    if raw <= 1 {
        0.0
    } else {
        raw as f64
    }
}

fn get_i64(values: &BTreeMap<String, RawValue>, oid: &str) -> Option<i64> {
    values.get(oid).and_then(RawValue::as_i64)
}

fn get_text(values: &BTreeMap<String, RawValue>, oid: &str) -> String {
    values
        .get(oid)
        .and_then(RawValue::as_text)
        .unwrap_or_default()
        .to_string()
}

/// 将一次轮询收到的 OID 值表解码为快照。
///
/// 对原始值表是全函数：任何字段缺失都不会失败，只会留下 `None`。
pub fn decode_snapshot(
    values: &BTreeMap<String, RawValue>,
    layout: SnapshotLayout,
    ts_ms: i64,
) -> Snapshot {
    let mut snapshot = Snapshot::empty(ts_ms);

    snapshot.device_name = get_text(values, oids::OID_DEVICE_NAME);
    snapshot.outlet_count = get_i64(values, oids::OID_OUTLET_COUNT)
        .and_then(|v| u16::try_from(v).ok())
        .unwrap_or(layout.outlet_count);
    snapshot.phase_count = get_i64(values, oids::OID_PHASE_COUNT)
        .and_then(|v| u16::try_from(v).ok())
        .unwrap_or(1);

    snapshot.input_voltage = get_i64(values, oids::OID_INPUT_VOLTAGE).map(scale_tenths);
    snapshot.input_frequency = get_i64(values, oids::OID_INPUT_FREQUENCY).map(scale_tenths);

    for n in 1..=layout.outlet_count {
        let mut outlet = OutletData::new(n);
        outlet.name = get_text(values, &oids::oid_outlet_name(n));
        if let Some(raw) = get_i64(values, &oids::oid_outlet_state(n)) {
            outlet.state = OutletState::from_raw(raw);
        }
        outlet.current = get_i64(values, &oids::oid_outlet_current(n)).map(floor_outlet_current);
        outlet.power = get_i64(values, &oids::oid_outlet_power(n)).map(floor_outlet_power);
        outlet.energy = get_i64(values, &oids::oid_outlet_energy(n)).map(scale_tenths);
        outlet.bank_assignment = get_i64(values, &oids::oid_outlet_bank_assignment(n))
            .and_then(|v| u16::try_from(v).ok());
        outlet.max_load = get_i64(values, &oids::oid_outlet_max_load(n)).map(scale_tenths);
        snapshot.outlets.insert(n, outlet);
    }

    for idx in 1..=layout.num_banks {
        let mut bank = BankData::new(idx);
        bank.current = get_i64(values, &oids::oid_bank_current(idx)).map(scale_tenths);
        bank.voltage = get_i64(values, &oids::oid_bank_voltage(idx)).map(scale_tenths);
        bank.power = get_i64(values, &oids::oid_bank_active_power(idx)).map(|v| v as f64);
        bank.apparent_power =
            get_i64(values, &oids::oid_bank_apparent_power(idx)).map(|v| v as f64);
        bank.power_factor = get_i64(values, &oids::oid_bank_power_factor(idx)).map(scale_hundredths);
        bank.energy = get_i64(values, &oids::oid_bank_energy(idx)).map(scale_tenths);
        if let Some(raw) = get_i64(values, &oids::oid_bank_load_state(idx)) {
            bank.load_state = BankLoadState::from_raw(raw);
        }
        let stamp = get_text(values, &oids::oid_bank_timestamp(idx));
        if !stamp.is_empty() {
            bank.last_update = Some(stamp);
        }
        snapshot.banks.insert(idx, bank);
    }

    snapshot.ats_preferred_source =
        get_i64(values, oids::OID_ATS_PREFERRED_SOURCE).and_then(AtsSource::from_raw);
    snapshot.ats_current_source =
        get_i64(values, oids::OID_ATS_CURRENT_SOURCE).and_then(AtsSource::from_raw);
    snapshot.ats_auto_transfer = match get_i64(values, oids::OID_ATS_AUTO_TRANSFER) {
        Some(raw) => raw == 1,
        None => true,
    };

    snapshot.source_a = decode_source(
        values,
        oids::OID_SOURCE_A_VOLTAGE,
        oids::OID_SOURCE_A_FREQUENCY,
        oids::OID_SOURCE_A_STATUS,
    );
    snapshot.source_b = decode_source(
        values,
        oids::OID_SOURCE_B_VOLTAGE,
        oids::OID_SOURCE_B_FREQUENCY,
        oids::OID_SOURCE_B_STATUS,
    );
    snapshot.redundancy_ok = get_i64(values, oids::OID_SOURCE_REDUNDANCY).map(|raw| raw == 2);

    snapshot.environment = decode_environment(values);

    snapshot.uptime_ticks = match values.get(oids::OID_SYS_UPTIME) {
        Some(RawValue::TimeTicks(ticks)) => Some(*ticks),
        Some(other) => other.as_i64().and_then(|v| u32::try_from(v).ok()),
        None => None,
    };

    snapshot
}

fn decode_source(
    values: &BTreeMap<String, RawValue>,
    voltage_oid: &str,
    frequency_oid: &str,
    status_oid: &str,
) -> Option<SourceData> {
    let voltage = get_i64(values, voltage_oid);
    let frequency = get_i64(values, frequency_oid);
    let status = get_i64(values, status_oid);
    if voltage.is_none() && frequency.is_none() && status.is_none() {
        return None;
    }
    Some(SourceData {
        voltage: voltage.map(scale_tenths),
        frequency: frequency.map(scale_tenths),
        voltage_status: status
            .map(SourceVoltageStatus::from_raw)
            .unwrap_or(SourceVoltageStatus::Unknown),
    })
}

fn decode_environment(values: &BTreeMap<String, RawValue>) -> Option<EnvironmentData> {
    let raw_temp = get_i64(values, oids::OID_ENVIRO_TEMPERATURE)?;
    let unit = match get_i64(values, oids::OID_ENVIRO_TEMP_UNIT) {
        Some(2) => "F",
        _ => "C",
    };
    let mut contacts = BTreeMap::new();
    for n in 1..=4u8 {
        if let Some(raw) = get_i64(values, &oids::oid_enviro_contact(n)) {
            contacts.insert(n, raw == 2);
        }
    }
    Some(EnvironmentData {
        temperature: Some(scale_tenths(raw_temp)),
        temperature_unit: unit.to_string(),
        humidity: get_i64(values, oids::OID_ENVIRO_HUMIDITY).map(|v| v as f64),
        contacts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> SnapshotLayout {
        SnapshotLayout {
            outlet_count: 2,
            num_banks: 2,
        }
    }

    #[test]
    fn scaling_divides_tenths_and_hundredths() {
        let mut values = BTreeMap::new();
        values.insert(
            oids::OID_INPUT_VOLTAGE.to_string(),
            RawValue::Integer(1204),
        );
        values.insert(
            oids::OID_INPUT_FREQUENCY.to_string(),
            RawValue::Integer(600),
        );
        values.insert(oids::oid_bank_power_factor(1), RawValue::Integer(98));
        values.insert(oids::oid_bank_active_power(1), RawValue::Integer(36));

        let snapshot = decode_snapshot(&values, layout(), 1);
        assert_eq!(snapshot.input_voltage, Some(120.4));
        assert_eq!(snapshot.input_frequency, Some(60.0));
        let bank = &snapshot.banks[&1];
        assert_eq!(bank.power_factor, Some(0.98));
        assert_eq!(bank.power, Some(36.0));
    }

    #[test]
    fn metering_floor_zeroes_idle_outlets() {
        let mut values = BTreeMap::new();
        values.insert(oids::oid_outlet_current(1), RawValue::Integer(2));
        values.insert(oids::oid_outlet_power(1), RawValue::Integer(1));
        values.insert(oids::oid_outlet_current(2), RawValue::Integer(3));
        values.insert(oids::oid_outlet_power(2), RawValue::Integer(12));

        let snapshot = decode_snapshot(&values, layout(), 1);
        assert_eq!(snapshot.outlets[&1].current, Some(0.0));
        assert_eq!(snapshot.outlets[&1].power, Some(0.0));
        assert_eq!(snapshot.outlets[&2].current, Some(0.3));
        assert_eq!(snapshot.outlets[&2].power, Some(12.0));
    }

    #[test]
    fn missing_oids_stay_none() {
        let values = BTreeMap::new();
        let snapshot = decode_snapshot(&values, layout(), 1);
        assert_eq!(snapshot.input_voltage, None);
        assert_eq!(snapshot.outlets[&1].current, None);
        assert_eq!(snapshot.outlets[&1].state, OutletState::Unknown);
        assert!(snapshot.source_a.is_none());
        assert!(snapshot.environment.is_none());
        assert!(snapshot.redundancy_ok.is_none());
    }

    #[test]
    fn ats_fields_decode() {
        let mut values = BTreeMap::new();
        values.insert(
            oids::OID_ATS_PREFERRED_SOURCE.to_string(),
            RawValue::Integer(1),
        );
        values.insert(
            oids::OID_ATS_CURRENT_SOURCE.to_string(),
            RawValue::Integer(2),
        );
        values.insert(
            oids::OID_ATS_AUTO_TRANSFER.to_string(),
            RawValue::Integer(2),
        );
        values.insert(
            oids::OID_SOURCE_REDUNDANCY.to_string(),
            RawValue::Integer(1),
        );
        values.insert(
            oids::OID_SOURCE_B_VOLTAGE.to_string(),
            RawValue::Integer(0),
        );
        values.insert(
            oids::OID_SOURCE_B_STATUS.to_string(),
            RawValue::Integer(3),
        );

        let snapshot = decode_snapshot(&values, layout(), 1);
        assert_eq!(snapshot.ats_preferred_source, Some(AtsSource::A));
        assert_eq!(snapshot.ats_current_source, Some(AtsSource::B));
        assert!(!snapshot.ats_auto_transfer);
        assert_eq!(snapshot.redundancy_ok, Some(false));
        let source_b = snapshot.source_b.expect("source b");
        assert_eq!(source_b.voltage, Some(0.0));
        assert_eq!(
            source_b.voltage_status,
            SourceVoltageStatus::UnderVoltage
        );
    }

    #[test]
    fn uptime_ticks_from_timeticks() {
        let mut values = BTreeMap::new();
        values.insert(
            oids::OID_SYS_UPTIME.to_string(),
            RawValue::TimeTicks(123_456),
        );
        let snapshot = decode_snapshot(&values, layout(), 1);
        assert_eq!(snapshot.uptime_ticks, Some(123_456));
    }
}

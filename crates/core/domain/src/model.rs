//! PDU 快照数据模型。
//!
//! 快照（[`Snapshot`]）是一次轮询周期的不可变解码结果，在轮询器、
//! MQTT 发布层、历史存储与自动化引擎之间按值传递。缺失的计量字段
//! 一律用 `Option::None` 表示，消费方不得把缺失当作零。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 插座开关状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutletState {
    On,
    Off,
    Unknown,
}

impl OutletState {
    /// MQTT/HTTP 线上字符串。
    pub fn as_str(&self) -> &'static str {
        match self {
            OutletState::On => "on",
            OutletState::Off => "off",
            OutletState::Unknown => "unknown",
        }
    }

    /// 从 SNMP 整数值解码（1=on，2=off）。
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            1 => OutletState::On,
            2 => OutletState::Off,
            _ => OutletState::Unknown,
        }
    }

    pub fn from_wire(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" => OutletState::On,
            "off" => OutletState::Off,
            _ => OutletState::Unknown,
        }
    }
}

/// 负载组（bank）负载状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BankLoadState {
    Normal,
    Low,
    NearOverload,
    Overload,
    Unknown,
}

impl BankLoadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BankLoadState::Normal => "normal",
            BankLoadState::Low => "low",
            BankLoadState::NearOverload => "nearOverload",
            BankLoadState::Overload => "overload",
            BankLoadState::Unknown => "unknown",
        }
    }

    /// 从 SNMP 整数值解码（1=normal，2=low，3=nearOverload，4=overload）。
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            1 => BankLoadState::Normal,
            2 => BankLoadState::Low,
            3 => BankLoadState::NearOverload,
            4 => BankLoadState::Overload,
            _ => BankLoadState::Unknown,
        }
    }
}

/// 输入源电压状态（ePDU2 源状态表）。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceVoltageStatus {
    Normal,
    OverVoltage,
    UnderVoltage,
    #[default]
    Unknown,
}

impl SourceVoltageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceVoltageStatus::Normal => "normal",
            SourceVoltageStatus::OverVoltage => "overVoltage",
            SourceVoltageStatus::UnderVoltage => "underVoltage",
            SourceVoltageStatus::Unknown => "unknown",
        }
    }

    /// 从 SNMP 整数值解码（1=normal，2=over，3=under）。
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            1 => SourceVoltageStatus::Normal,
            2 => SourceVoltageStatus::OverVoltage,
            3 => SourceVoltageStatus::UnderVoltage,
            _ => SourceVoltageStatus::Unknown,
        }
    }
}

/// ATS 输入源（1=A，2=B）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AtsSource {
    A,
    B,
}

impl AtsSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AtsSource::A => "A",
            AtsSource::B => "B",
        }
    }

    pub fn from_raw(raw: i64) -> Option<Self> {
        match raw {
            1 => Some(AtsSource::A),
            2 => Some(AtsSource::B),
            _ => None,
        }
    }

    pub fn from_input(input: u8) -> Option<Self> {
        Self::from_raw(input as i64)
    }

    /// SNMP SET 用整数值。
    pub fn raw(&self) -> i64 {
        match self {
            AtsSource::A => 1,
            AtsSource::B => 2,
        }
    }
}

/// 插座命令。
///
/// SNMP 只支持 on/off/reboot；延时类命令（delayon/delayoff/cancel）
/// 需要串口控制台。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutletAction {
    On,
    Off,
    Reboot,
    DelayOn,
    DelayOff,
    Cancel,
}

impl OutletAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutletAction::On => "on",
            OutletAction::Off => "off",
            OutletAction::Reboot => "reboot",
            OutletAction::DelayOn => "delayon",
            OutletAction::DelayOff => "delayoff",
            OutletAction::Cancel => "cancel",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "on" => Some(OutletAction::On),
            "off" => Some(OutletAction::Off),
            "reboot" => Some(OutletAction::Reboot),
            "delayon" => Some(OutletAction::DelayOn),
            "delayoff" => Some(OutletAction::DelayOff),
            "cancel" => Some(OutletAction::Cancel),
            _ => None,
        }
    }

    /// 触发动作的恢复动作（on ↔ off）。其余命令没有逆操作。
    pub fn inverse(&self) -> Option<Self> {
        match self {
            OutletAction::On => Some(OutletAction::Off),
            OutletAction::Off => Some(OutletAction::On),
            _ => None,
        }
    }
}

/// 冷启动恢复策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColdstartState {
    AllOn,
    PrevState,
}

impl ColdstartState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColdstartState::AllOn => "allon",
            ColdstartState::PrevState => "prevstate",
        }
    }
}

/// 单个插座的解码数据。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutletData {
    pub number: u16,
    pub name: String,
    pub state: OutletState,
    /// 电流（A），仅计量型号提供。
    pub current: Option<f64>,
    /// 有功功率（W），仅计量型号提供。
    pub power: Option<f64>,
    /// 累计电能（kWh），仅计量型号提供。
    pub energy: Option<f64>,
    pub bank_assignment: Option<u16>,
    pub max_load: Option<f64>,
}

impl OutletData {
    pub fn new(number: u16) -> Self {
        Self {
            number,
            name: String::new(),
            state: OutletState::Unknown,
            current: None,
            power: None,
            energy: None,
            bank_assignment: None,
            max_load: None,
        }
    }
}

/// 单个负载组的解码数据。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankData {
    pub number: u16,
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub power: Option<f64>,
    pub apparent_power: Option<f64>,
    pub power_factor: Option<f64>,
    /// 累计电能（kWh），并非所有固件都上报。
    pub energy: Option<f64>,
    pub load_state: BankLoadState,
    pub last_update: Option<String>,
}

impl BankData {
    pub fn new(number: u16) -> Self {
        Self {
            number,
            voltage: None,
            current: None,
            power: None,
            apparent_power: None,
            power_factor: None,
            energy: None,
            load_state: BankLoadState::Unknown,
            last_update: None,
        }
    }
}

/// 单路输入源数据（ePDU2 源状态表）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceData {
    pub voltage: Option<f64>,
    pub frequency: Option<f64>,
    pub voltage_status: SourceVoltageStatus,
}

impl Default for SourceData {
    fn default() -> Self {
        Self {
            voltage: None,
            frequency: None,
            voltage_status: SourceVoltageStatus::Unknown,
        }
    }
}

/// 环境传感器数据（可选外接探头）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentData {
    pub temperature: Option<f64>,
    /// "C" 或 "F"。
    pub temperature_unit: String,
    pub humidity: Option<f64>,
    /// 干接点状态，true = closed。
    pub contacts: BTreeMap<u8, bool>,
}

/// 设备身份信息（启动时发现一次）。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub name: String,
    pub model: String,
    pub serial: String,
    pub firmware: String,
    pub mac_address: String,
    pub hardware_rev: Option<u32>,
    pub location: String,
    pub outlet_count: u16,
    pub phase_count: u16,
    pub max_input_current: Option<f64>,
}

/// 一次轮询周期的不可变解码结果。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// 快照时间戳（毫秒）。同一设备连续成功轮询严格递增。
    pub ts_ms: i64,
    pub device_name: String,
    pub outlet_count: u16,
    pub phase_count: u16,
    pub input_voltage: Option<f64>,
    pub input_frequency: Option<f64>,
    pub outlets: BTreeMap<u16, OutletData>,
    pub banks: BTreeMap<u16, BankData>,
    pub ats_preferred_source: Option<AtsSource>,
    pub ats_current_source: Option<AtsSource>,
    pub ats_auto_transfer: bool,
    pub source_a: Option<SourceData>,
    pub source_b: Option<SourceData>,
    pub redundancy_ok: Option<bool>,
    pub environment: Option<EnvironmentData>,
    /// 设备总负载（A），串口 `devsta show` 提供。
    pub total_load: Option<f64>,
    pub total_power: Option<f64>,
    pub total_energy: Option<f64>,
    pub coldstart_delay: Option<u32>,
    pub coldstart_state: Option<ColdstartState>,
    /// MIB-II sysUpTime（厘秒）。回绕或减小意味着设备重启。
    pub uptime_ticks: Option<u32>,
    pub identity: Option<DeviceIdentity>,
}

impl Snapshot {
    pub fn empty(ts_ms: i64) -> Self {
        Self {
            ts_ms,
            device_name: String::new(),
            outlet_count: 0,
            phase_count: 0,
            input_voltage: None,
            input_frequency: None,
            outlets: BTreeMap::new(),
            banks: BTreeMap::new(),
            ats_preferred_source: None,
            ats_current_source: None,
            ats_auto_transfer: true,
            source_a: None,
            source_b: None,
            redundancy_ok: None,
            environment: None,
            total_load: None,
            total_power: None,
            total_energy: None,
            coldstart_delay: None,
            coldstart_state: None,
            uptime_ticks: None,
            identity: None,
        }
    }

    /// 全部负载组有功功率之和（W）。无计量时返回 0。
    pub fn total_bank_power(&self) -> f64 {
        self.banks.values().filter_map(|b| b.power).sum()
    }

    /// 当前处于 on 状态的插座数。
    pub fn active_outlets(&self) -> usize {
        self.outlets
            .values()
            .filter(|o| o.state == OutletState::On)
            .count()
    }

    /// 按规则输入取源电压：1=A，2=B；非 ATS 机型回退到 bank 1 电压。
    pub fn source_voltage(&self, input: u8) -> Option<f64> {
        let source = match input {
            1 => self.source_a.as_ref(),
            2 => self.source_b.as_ref(),
            _ => None,
        };
        match source.and_then(|s| s.voltage) {
            Some(v) => Some(v),
            None => self.banks.get(&1).and_then(|b| b.voltage),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outlet_action_parse_roundtrip() {
        for action in [
            OutletAction::On,
            OutletAction::Off,
            OutletAction::Reboot,
            OutletAction::DelayOn,
            OutletAction::DelayOff,
            OutletAction::Cancel,
        ] {
            assert_eq!(OutletAction::parse(action.as_str()), Some(action));
        }
        assert_eq!(OutletAction::parse("ON "), Some(OutletAction::On));
        assert_eq!(OutletAction::parse("toggle"), None);
    }

    #[test]
    fn load_state_wire_strings() {
        assert_eq!(BankLoadState::from_raw(3).as_str(), "nearOverload");
        assert_eq!(BankLoadState::from_raw(4).as_str(), "overload");
        assert_eq!(BankLoadState::from_raw(9).as_str(), "unknown");
    }

    #[test]
    fn source_voltage_prefers_ats_source() {
        let mut snapshot = Snapshot::empty(1);
        let mut bank = BankData::new(1);
        bank.voltage = Some(120.0);
        snapshot.banks.insert(1, bank);
        snapshot.source_b = Some(SourceData {
            voltage: Some(95.0),
            frequency: Some(60.0),
            voltage_status: SourceVoltageStatus::UnderVoltage,
        });

        assert_eq!(snapshot.source_voltage(2), Some(95.0));
        // Input A has no source data: falls back to bank 1.
        assert_eq!(snapshot.source_voltage(1), Some(120.0));
    }

    #[test]
    fn snapshot_json_roundtrip() {
        let mut snapshot = Snapshot::empty(1_700_000_000_000);
        snapshot.device_name = "PDU44001".to_string();
        snapshot.outlet_count = 10;
        snapshot.input_voltage = Some(120.4);
        let mut outlet = OutletData::new(3);
        outlet.state = OutletState::Off;
        outlet.name = "Router".to_string();
        snapshot.outlets.insert(3, outlet);

        let json = serde_json::to_string(&snapshot).expect("serialize");
        let back: Snapshot = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, snapshot);
    }
}

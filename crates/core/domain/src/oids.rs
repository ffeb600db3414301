//! CyberPower ePDU MIB 的 OID 常量与构造函数。
//!
//! 基础子树 `1.3.6.1.4.1.3808.1.1.3`（ePDU），每输入源状态表位于
//! `1.3.6.1.4.1.3808.1.1.6.9.4.1`（ePDU2SourceStatusEntry），另读取
//! 标准 MIB-II system 组（sysUpTime/sysName/sysLocation）。
//!
//! 数值 OID 的缩放规则见 [`crate::decode`]。

use crate::model::OutletAction;

/// CyberPower ePDU MIB 基础子树。
pub const BASE_OID: &str = "1.3.6.1.4.1.3808.1.1.3";

/// ePDU2 源状态表（每输入电压/频率/状态）。
pub const EPDU2_SOURCE_ENTRY: &str = "1.3.6.1.4.1.3808.1.1.6.9.4.1";

/// 环境传感器子树（ENVIROSENSOR 探头）。
pub const ENVIRO_BASE: &str = "1.3.6.1.4.1.3808.1.1.4";

// 设备标识
pub const OID_DEVICE_NAME: &str = "1.3.6.1.4.1.3808.1.1.3.1.1.0";
pub const OID_IDENT_FIRMWARE: &str = "1.3.6.1.4.1.3808.1.1.3.1.3.0";
pub const OID_IDENT_MODEL: &str = "1.3.6.1.4.1.3808.1.1.3.1.5.0";
pub const OID_IDENT_SERIAL: &str = "1.3.6.1.4.1.3808.1.1.3.1.6.0";
pub const OID_OUTLET_COUNT: &str = "1.3.6.1.4.1.3808.1.1.3.1.8.0";
pub const OID_PHASE_COUNT: &str = "1.3.6.1.4.1.3808.1.1.3.1.9.0";

// 输入（母线/输出侧，ATS 机型上不是每源数值）
pub const OID_INPUT_VOLTAGE: &str = "1.3.6.1.4.1.3808.1.1.3.5.7.0";
pub const OID_INPUT_FREQUENCY: &str = "1.3.6.1.4.1.3808.1.1.3.5.8.0";
pub const OID_INPUT_MAX_CURRENT: &str = "1.3.6.1.4.1.3808.1.1.3.2.1.4.0";

// 负载组表规模
pub const OID_NUM_BANK_TABLE_ENTRIES: &str = "1.3.6.1.4.1.3808.1.1.3.2.1.0";

// 转换开关（ATS）
pub const OID_ATS_PREFERRED_SOURCE: &str = "1.3.6.1.4.1.3808.1.1.3.4.1.1.0";
pub const OID_ATS_CURRENT_SOURCE: &str = "1.3.6.1.4.1.3808.1.1.3.4.1.2.0";
pub const OID_ATS_AUTO_TRANSFER: &str = "1.3.6.1.4.1.3808.1.1.3.4.1.3.0";

// ePDU2 源状态（电压/频率为 0.1 单位，状态 1=normal 2=over 3=under）
pub const OID_SOURCE_A_VOLTAGE: &str = "1.3.6.1.4.1.3808.1.1.6.9.4.1.5.1";
pub const OID_SOURCE_B_VOLTAGE: &str = "1.3.6.1.4.1.3808.1.1.6.9.4.1.6.1";
pub const OID_SOURCE_A_FREQUENCY: &str = "1.3.6.1.4.1.3808.1.1.6.9.4.1.7.1";
pub const OID_SOURCE_B_FREQUENCY: &str = "1.3.6.1.4.1.3808.1.1.6.9.4.1.8.1";
pub const OID_SOURCE_A_STATUS: &str = "1.3.6.1.4.1.3808.1.1.6.9.4.1.9.1";
pub const OID_SOURCE_B_STATUS: &str = "1.3.6.1.4.1.3808.1.1.6.9.4.1.10.1";
/// 1=lost，2=redundant。
pub const OID_SOURCE_REDUNDANCY: &str = "1.3.6.1.4.1.3808.1.1.6.9.4.1.16.1";

// 环境传感器（可选探头，缺失时 GET 返回 noSuchObject）
pub const OID_ENVIRO_TEMPERATURE: &str = "1.3.6.1.4.1.3808.1.1.4.2.1.0";
pub const OID_ENVIRO_TEMP_UNIT: &str = "1.3.6.1.4.1.3808.1.1.4.2.2.0";
pub const OID_ENVIRO_HUMIDITY: &str = "1.3.6.1.4.1.3808.1.1.4.3.1.0";

// 标准 MIB-II system 组
pub const OID_SYS_DESCR: &str = "1.3.6.1.2.1.1.1.0";
pub const OID_SYS_UPTIME: &str = "1.3.6.1.2.1.1.3.0";
pub const OID_SYS_CONTACT: &str = "1.3.6.1.2.1.1.4.0";
pub const OID_SYS_NAME: &str = "1.3.6.1.2.1.1.5.0";
pub const OID_SYS_LOCATION: &str = "1.3.6.1.2.1.1.6.0";

pub fn oid_enviro_contact(n: u8) -> String {
    format!("{ENVIRO_BASE}.4.1.{n}")
}

pub fn oid_outlet_name(n: u16) -> String {
    format!("{BASE_OID}.3.3.1.1.2.{n}")
}

pub fn oid_outlet_command(n: u16) -> String {
    format!("{BASE_OID}.3.3.1.1.4.{n}")
}

pub fn oid_outlet_bank_assignment(n: u16) -> String {
    format!("{BASE_OID}.3.3.1.1.5.{n}")
}

pub fn oid_outlet_max_load(n: u16) -> String {
    format!("{BASE_OID}.3.3.1.1.6.{n}")
}

pub fn oid_outlet_state(n: u16) -> String {
    format!("{BASE_OID}.3.5.1.1.4.{n}")
}

pub fn oid_outlet_current(n: u16) -> String {
    format!("{BASE_OID}.3.5.1.1.5.{n}")
}

pub fn oid_outlet_power(n: u16) -> String {
    format!("{BASE_OID}.3.5.1.1.6.{n}")
}

pub fn oid_outlet_energy(n: u16) -> String {
    format!("{BASE_OID}.3.5.1.1.7.{n}")
}

pub fn oid_bank_current(idx: u16) -> String {
    format!("{BASE_OID}.2.3.1.1.2.{idx}")
}

pub fn oid_bank_load_state(idx: u16) -> String {
    format!("{BASE_OID}.2.3.1.1.3.{idx}")
}

pub fn oid_bank_voltage(idx: u16) -> String {
    format!("{BASE_OID}.2.3.1.1.6.{idx}")
}

pub fn oid_bank_active_power(idx: u16) -> String {
    format!("{BASE_OID}.2.3.1.1.7.{idx}")
}

pub fn oid_bank_apparent_power(idx: u16) -> String {
    format!("{BASE_OID}.2.3.1.1.8.{idx}")
}

pub fn oid_bank_power_factor(idx: u16) -> String {
    format!("{BASE_OID}.2.3.1.1.9.{idx}")
}

pub fn oid_bank_energy(idx: u16) -> String {
    format!("{BASE_OID}.2.3.1.1.10.{idx}")
}

pub fn oid_bank_timestamp(idx: u16) -> String {
    format!("{BASE_OID}.2.3.1.1.11.{idx}")
}

/// 插座命令的 SNMP SET 整数值。延时类命令仅串口支持，返回 None。
pub fn outlet_command_value(action: OutletAction) -> Option<i64> {
    match action {
        OutletAction::On => Some(1),
        OutletAction::Off => Some(2),
        OutletAction::Reboot => Some(3),
        OutletAction::DelayOn | OutletAction::DelayOff | OutletAction::Cancel => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outlet_oids_are_rooted_in_base() {
        assert_eq!(oid_outlet_state(3), "1.3.6.1.4.1.3808.1.1.3.3.5.1.1.4.3");
        assert_eq!(oid_outlet_command(10), format!("{BASE_OID}.3.3.1.1.4.10"));
        assert!(oid_bank_power_factor(2).starts_with(BASE_OID));
    }

    #[test]
    fn delayed_commands_have_no_snmp_value() {
        assert_eq!(outlet_command_value(OutletAction::On), Some(1));
        assert_eq!(outlet_command_value(OutletAction::Off), Some(2));
        assert_eq!(outlet_command_value(OutletAction::Reboot), Some(3));
        assert_eq!(outlet_command_value(OutletAction::DelayOn), None);
        assert_eq!(outlet_command_value(OutletAction::Cancel), None);
    }
}

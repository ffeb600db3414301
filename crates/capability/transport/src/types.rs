//! 管理操作的数据结构。
//!
//! 串口控制台各个 `* show` 命令的解析结果与对应 `set` 命令的输入。
//! 字段与 HTTP 管理端点的 JSON 一一对应。

use serde::{Deserialize, Serialize};

/// 设备与负载组阈值（`devcfg show` / `bankcfg show`）。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Thresholds {
    pub device_overload: Option<f64>,
    pub device_near_overload: Option<f64>,
    pub device_low_load: Option<f64>,
    pub banks: std::collections::BTreeMap<u16, BankThresholds>,
}

/// 单个负载组的阈值。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BankThresholds {
    pub overload: Option<f64>,
    pub near_overload: Option<f64>,
    pub low_load: Option<f64>,
}

/// 阈值写入目标。
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope")]
pub enum ThresholdTarget {
    DeviceOverload,
    DeviceNearOverload,
    DeviceLowLoad,
    BankOverload { bank: u16 },
    BankNearOverload { bank: u16 },
    BankLowLoad { bank: u16 },
}

/// 网络配置（`netcfg show`）。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub dhcp: bool,
    pub ip: String,
    pub subnet_mask: String,
    pub gateway: String,
}

/// 网络配置更新。None 字段保持不变。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkUpdate {
    pub dhcp: Option<bool>,
    pub ip: Option<String>,
    pub subnet_mask: Option<String>,
    pub gateway: Option<String>,
}

/// ATS 源配置（`srccfg show`）。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AtsConfig {
    pub preferred_source: Option<String>,
    pub voltage_sensitivity: String,
    pub transfer_voltage: Option<f64>,
    pub voltage_upper_limit: Option<f64>,
    pub voltage_lower_limit: Option<f64>,
}

/// ATS 源配置更新。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AtsConfigUpdate {
    pub preferred_source: Option<String>,
    pub voltage_sensitivity: Option<String>,
    pub voltage_upper_limit: Option<f64>,
    pub voltage_lower_limit: Option<f64>,
}

/// 插座配置条目（`oltcfg show`）。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutletConfigEntry {
    pub name: String,
    pub on_delay: Option<u32>,
    pub off_delay: Option<u32>,
    pub reboot_duration: Option<u32>,
}

/// 插座配置更新。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutletConfigUpdate {
    pub name: Option<String>,
    pub on_delay: Option<u32>,
    pub off_delay: Option<u32>,
    pub reboot_duration: Option<u32>,
}

/// 设备事件日志条目（`eventlog show`）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub timestamp: String,
    /// info | warning | critical。
    pub severity: String,
    pub description: String,
}

/// 通知配置聚合（trap/SMTP/email/syslog）。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationsConfig {
    pub traps: Vec<TrapReceiver>,
    pub smtp: SmtpConfig,
    pub email_recipients: Vec<EmailRecipient>,
    pub syslog_servers: Vec<SyslogServer>,
}

/// 通知配置更新。None 段保持不变。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationsUpdate {
    pub trap: Option<TrapReceiver>,
    pub smtp: Option<SmtpConfig>,
    pub email: Option<EmailRecipient>,
    pub syslog: Option<SyslogServer>,
}

/// SNMP trap 接收端。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrapReceiver {
    pub index: u8,
    pub ip: String,
    pub community: String,
    pub enabled: bool,
}

/// SMTP 服务器配置。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub server: String,
    pub port: u16,
    pub sender: String,
}

/// 邮件通知收件人。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailRecipient {
    pub index: u8,
    pub address: String,
    pub enabled: bool,
}

/// syslog 服务器。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyslogServer {
    pub index: u8,
    pub ip: String,
    pub port: u16,
    pub enabled: bool,
}

/// EnergyWise 配置（`energywise show`）。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnergywiseConfig {
    pub enabled: bool,
    pub domain: String,
    pub port: u16,
}

/// 控制台账户（`usercfg show`）。口令不回显。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserAccount {
    pub name: String,
    /// admin | outlet | viewer。
    pub role: String,
}

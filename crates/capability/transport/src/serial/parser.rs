//! CyberPower 控制台输出的固定格式解析。
//!
//! 控制台输出有两种形态：`Key : Value` 行和表格。解析对多余空白、
//! ANSI 转义与分页残留保持宽容，缺失字段一律返回 `None`。

use std::collections::BTreeMap;

use domain::model::{
    AtsSource, BankData, DeviceIdentity, OutletData, OutletState, Snapshot, SourceData,
    SourceVoltageStatus,
};

use crate::types::{
    AtsConfig, BankThresholds, EmailRecipient, EnergywiseConfig, EventLogEntry, NetworkConfig,
    OutletConfigEntry, SmtpConfig, SyslogServer, Thresholds, TrapReceiver, UserAccount,
};

/// 控制台提示符。
pub const PROMPT: &str = "CyberPower > ";
/// 登录名提示（兼容 `Login Name:` 与 `Login Name :`）。
pub const LOGIN_PROMPT: &str = "Login Name";
/// 口令提示。
pub const PASSWORD_PROMPT: &str = "Login Password";
/// 分页提示（`press <space> for next page`）。
pub const PAGINATION_PROMPT: &str = "press";

/// 去掉 ANSI 转义、空行与提示符行。
pub fn strip_cli(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    for raw_line in text.lines() {
        let line = strip_ansi(raw_line);
        let line = line.trim_end();
        if line.is_empty() || line.trim_start().starts_with("CyberPower >") {
            continue;
        }
        lines.push(line.to_string());
    }
    lines
}

fn strip_ansi(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            if chars.peek() == Some(&'[') {
                chars.next();
                // CSI 序列以字母结尾
                for inner in chars.by_ref() {
                    if inner.is_ascii_alphabetic() {
                        break;
                    }
                }
            }
            continue;
        }
        out.push(c);
    }
    out
}

/// 把 `Key : Value` 行解析为映射。
pub fn parse_kv(text: &str) -> BTreeMap<String, String> {
    let mut result = BTreeMap::new();
    for line in strip_cli(text) {
        if let Some((key, value)) = line.split_once(':') {
            let key = key.trim();
            let value = value.trim();
            if !key.is_empty() && !value.is_empty() {
                result.insert(key.to_string(), value.to_string());
            }
        }
    }
    result
}

/// 取字符串开头的数值（`119.7 /119.7 V` 取 119.7）。
fn leading_number(s: &str) -> Option<f64> {
    let trimmed = s.trim_start();
    let end = trimmed
        .char_indices()
        .take_while(|(_, c)| c.is_ascii_digit() || *c == '.' || *c == '-')
        .map(|(i, c)| i + c.len_utf8())
        .last()?;
    trimmed[..end].parse().ok()
}

/// 解析 `a /b` 形式的成对数值。
fn pair_of_numbers(s: &str) -> (Option<f64>, Option<f64>) {
    match s.split_once('/') {
        Some((a, b)) => (leading_number(a), leading_number(b)),
        None => (leading_number(s), None),
    }
}

fn source_status(s: &str) -> SourceVoltageStatus {
    match s.trim().to_ascii_lowercase().as_str() {
        "normal" => SourceVoltageStatus::Normal,
        "overvoltage" | "over" => SourceVoltageStatus::OverVoltage,
        "undervoltage" | "under" => SourceVoltageStatus::UnderVoltage,
        _ => SourceVoltageStatus::Unknown,
    }
}

/// 解析 `sys show` 为设备身份。
pub fn parse_sys_show(text: &str) -> DeviceIdentity {
    let kv = parse_kv(text);
    let get = |key: &str| kv.get(key).cloned().unwrap_or_default();
    DeviceIdentity {
        name: get("Name"),
        model: kv
            .get("Model Name")
            .or_else(|| kv.get("Model"))
            .cloned()
            .unwrap_or_default(),
        serial: get("Serial Number"),
        firmware: get("Firmware Version"),
        mac_address: get("MAC Address"),
        hardware_rev: kv
            .get("Hardware Version")
            .and_then(|v| v.trim().parse().ok()),
        location: get("Location"),
        outlet_count: 0,
        phase_count: 1,
        max_input_current: None,
    }
}

/// `devsta show` 的解析结果。
#[derive(Debug, Clone, Default)]
pub struct DeviceStatus {
    pub active_source: Option<AtsSource>,
    pub source_a_voltage: Option<f64>,
    pub source_b_voltage: Option<f64>,
    pub source_a_frequency: Option<f64>,
    pub source_b_frequency: Option<f64>,
    pub source_a_status: SourceVoltageStatus,
    pub source_b_status: SourceVoltageStatus,
    pub total_load: Option<f64>,
    pub total_power: Option<f64>,
    pub total_energy: Option<f64>,
    pub bank_currents: BTreeMap<u16, f64>,
}

/// 解析 `devsta show`。
pub fn parse_devsta_show(text: &str) -> DeviceStatus {
    let kv = parse_kv(text);
    let mut status = DeviceStatus::default();

    if let Some(active) = kv.get("Active Source") {
        status.active_source = match active.trim().to_ascii_uppercase().as_str() {
            "A" => Some(AtsSource::A),
            "B" => Some(AtsSource::B),
            _ => None,
        };
    }
    if let Some(v) = kv.get("Source Voltage (A/B)") {
        let (a, b) = pair_of_numbers(v);
        status.source_a_voltage = a;
        status.source_b_voltage = b;
    }
    if let Some(v) = kv.get("Source Frequency (A/B)") {
        let (a, b) = pair_of_numbers(v);
        status.source_a_frequency = a;
        status.source_b_frequency = b;
    }
    if let Some(v) = kv.get("Source Status (A/B)") {
        if let Some((a, b)) = v.split_once('/') {
            status.source_a_status = source_status(a);
            status.source_b_status = source_status(b);
        }
    }
    status.total_load = kv.get("Total Load").and_then(|v| leading_number(v));
    status.total_power = kv.get("Total Power").and_then(|v| leading_number(v));
    status.total_energy = kv.get("Total Energy").and_then(|v| leading_number(v));

    for (key, value) in &kv {
        if let Some(rest) = key.strip_prefix("Bank ") {
            if let Some(bank_str) = rest.strip_suffix(" Current") {
                if let Ok(bank) = bank_str.trim().parse::<u16>() {
                    if let Some(current) = leading_number(value) {
                        status.bank_currents.insert(bank, current);
                    }
                }
            }
        }
    }
    status
}

/// 解析 `oltsta show`（表格优先，Key:Value 兜底）。
pub fn parse_oltsta_show(text: &str) -> BTreeMap<u16, OutletData> {
    let mut outlets = BTreeMap::new();

    for line in strip_cli(text) {
        let mut fields = line.split_whitespace().peekable();
        let Some(first) = fields.peek() else { continue };
        let Ok(index) = first.parse::<u16>() else {
            continue;
        };
        fields.next();

        // 名字可能含空格：回头从状态列切分
        let rest: Vec<&str> = fields.collect();
        let Some(state_pos) = rest
            .iter()
            .position(|f| f.eq_ignore_ascii_case("on") || f.eq_ignore_ascii_case("off"))
        else {
            continue;
        };
        let name = rest[..state_pos].join(" ");
        let state = OutletState::from_wire(rest[state_pos]);
        let current = rest.get(state_pos + 1).and_then(|v| v.parse().ok());
        let power = rest.get(state_pos + 2).and_then(|v| v.parse().ok());

        let mut outlet = OutletData::new(index);
        outlet.name = name;
        outlet.state = state;
        outlet.current = current;
        outlet.power = power;
        outlets.insert(index, outlet);
    }

    if !outlets.is_empty() {
        return outlets;
    }

    // Key-Value 兜底：`Outlet 1 Name : ...` / `Outlet 1 Status : On`
    let kv = parse_kv(text);
    for (key, value) in &kv {
        let Some(rest) = key.strip_prefix("Outlet ") else {
            continue;
        };
        let Some((index_str, field)) = rest.split_once(' ') else {
            continue;
        };
        let Ok(index) = index_str.parse::<u16>() else {
            continue;
        };
        let outlet = outlets
            .entry(index)
            .or_insert_with(|| OutletData::new(index));
        match field.trim().to_ascii_lowercase().as_str() {
            "name" => outlet.name = value.clone(),
            "status" => outlet.state = OutletState::from_wire(value),
            "current" => outlet.current = leading_number(value),
            "power" => outlet.power = leading_number(value),
            _ => {}
        }
    }
    outlets
}

/// 由 `devsta show` + `oltsta show` 组装快照。
pub fn build_snapshot(
    device_status: &DeviceStatus,
    outlets: BTreeMap<u16, OutletData>,
    identity: Option<&DeviceIdentity>,
    num_banks: u16,
    ts_ms: i64,
) -> Snapshot {
    let mut snapshot = Snapshot::empty(ts_ms);
    snapshot.outlet_count = outlets.len() as u16;
    snapshot.outlets = outlets;
    snapshot.ats_current_source = device_status.active_source;
    snapshot.total_load = device_status.total_load;
    snapshot.total_power = device_status.total_power;
    snapshot.total_energy = device_status.total_energy;

    snapshot.source_a = Some(SourceData {
        voltage: device_status.source_a_voltage,
        frequency: device_status.source_a_frequency,
        voltage_status: device_status.source_a_status,
    });
    snapshot.source_b = Some(SourceData {
        voltage: device_status.source_b_voltage,
        frequency: device_status.source_b_frequency,
        voltage_status: device_status.source_b_status,
    });

    // 串口输出给活动源电压，把它作为输入电压上报
    snapshot.input_voltage = match device_status.active_source {
        Some(AtsSource::B) => device_status.source_b_voltage,
        _ => device_status.source_a_voltage,
    };
    snapshot.input_frequency = match device_status.active_source {
        Some(AtsSource::B) => device_status.source_b_frequency,
        _ => device_status.source_a_frequency,
    };

    for idx in 1..=num_banks {
        let mut bank = BankData::new(idx);
        bank.current = device_status.bank_currents.get(&idx).copied();
        snapshot.banks.insert(idx, bank);
    }

    if let Some(identity) = identity {
        snapshot.device_name = identity.name.clone();
        snapshot.identity = Some(identity.clone());
        if identity.outlet_count > 0 {
            snapshot.outlet_count = identity.outlet_count;
        }
        snapshot.phase_count = identity.phase_count;
    }
    snapshot
}

/// 解析 `srccfg show`。
pub fn parse_srccfg_show(text: &str) -> AtsConfig {
    let kv = parse_kv(text);
    let preferred = kv
        .get("Preferred Source")
        .map(|v| v.trim().to_ascii_uppercase())
        .filter(|v| v == "A" || v == "B");
    AtsConfig {
        preferred_source: preferred,
        voltage_sensitivity: kv.get("Voltage Sensitivity").cloned().unwrap_or_default(),
        transfer_voltage: kv.get("Transfer Voltage").and_then(|v| leading_number(v)),
        voltage_upper_limit: kv
            .get("Voltage Upper Limit")
            .and_then(|v| leading_number(v)),
        voltage_lower_limit: kv
            .get("Voltage Lower Limit")
            .and_then(|v| leading_number(v)),
    }
}

/// 解析 `oltcfg show`。
///
/// 格式：`Outlet 3 Name : Router`、`Outlet 3 On Delay : 5`。
pub fn parse_oltcfg_show(text: &str) -> BTreeMap<u16, OutletConfigEntry> {
    let kv = parse_kv(text);
    let mut entries: BTreeMap<u16, OutletConfigEntry> = BTreeMap::new();
    for (key, value) in &kv {
        let Some(rest) = key.strip_prefix("Outlet ") else {
            continue;
        };
        let Some((index_str, field)) = rest.split_once(' ') else {
            continue;
        };
        let Ok(index) = index_str.parse::<u16>() else {
            continue;
        };
        let entry = entries.entry(index).or_default();
        match field.trim().to_ascii_lowercase().as_str() {
            "name" => entry.name = value.clone(),
            "on delay" => entry.on_delay = leading_number(value).map(|v| v as u32),
            "off delay" => entry.off_delay = leading_number(value).map(|v| v as u32),
            "reboot duration" => entry.reboot_duration = leading_number(value).map(|v| v as u32),
            _ => {}
        }
    }
    entries
}

/// 解析 `devcfg show` 的设备级阈值与冷启动配置。
pub fn parse_devcfg_show(text: &str) -> (Thresholds, Option<u32>, Option<String>) {
    let kv = parse_kv(text);
    let thresholds = Thresholds {
        device_overload: kv.get("Overload Threshold").and_then(|v| leading_number(v)),
        device_near_overload: kv
            .get("Near Overload Threshold")
            .and_then(|v| leading_number(v)),
        device_low_load: kv.get("Low Load Threshold").and_then(|v| leading_number(v)),
        banks: BTreeMap::new(),
    };
    let coldstart_delay = kv
        .get("Coldstart Delay")
        .and_then(|v| leading_number(v))
        .map(|v| v as u32);
    let coldstart_state = kv
        .get("Coldstart State")
        .map(|v| v.trim().to_ascii_lowercase());
    (thresholds, coldstart_delay, coldstart_state)
}

/// 解析 `bankcfg show` 的每组阈值。
pub fn parse_bankcfg_show(text: &str) -> BTreeMap<u16, BankThresholds> {
    let kv = parse_kv(text);
    let mut banks: BTreeMap<u16, BankThresholds> = BTreeMap::new();
    for (key, value) in &kv {
        let Some(rest) = key.strip_prefix("Bank ") else {
            continue;
        };
        let Some((index_str, field)) = rest.split_once(' ') else {
            continue;
        };
        let Ok(index) = index_str.parse::<u16>() else {
            continue;
        };
        let entry = banks.entry(index).or_default();
        match field.trim().to_ascii_lowercase().as_str() {
            "overload threshold" => entry.overload = leading_number(value),
            "near overload threshold" => entry.near_overload = leading_number(value),
            "low load threshold" => entry.low_load = leading_number(value),
            _ => {}
        }
    }
    banks
}

/// 解析 `netcfg show`。
pub fn parse_netcfg_show(text: &str) -> NetworkConfig {
    let kv = parse_kv(text);
    NetworkConfig {
        dhcp: kv
            .get("DHCP")
            .map(|v| v.trim().eq_ignore_ascii_case("enabled"))
            .unwrap_or(false),
        ip: kv.get("IP Address").cloned().unwrap_or_default(),
        subnet_mask: kv.get("Subnet Mask").cloned().unwrap_or_default(),
        gateway: kv.get("Gateway").cloned().unwrap_or_default(),
    }
}

/// 解析 `eventlog show`。
///
/// 行格式：`2026/07/21 14:03:11  Outlet 3 turned OFF`。
pub fn parse_eventlog_show(text: &str) -> Vec<EventLogEntry> {
    let mut entries = Vec::new();
    for line in strip_cli(text) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            continue;
        }
        // 前两列为日期时间
        if !fields[0].contains('/') || !fields[1].contains(':') {
            continue;
        }
        let timestamp = format!("{} {}", fields[0], fields[1]);
        let description = fields[2..].join(" ");
        entries.push(EventLogEntry {
            timestamp,
            severity: classify_event(&description),
            description,
        });
    }
    entries
}

fn classify_event(description: &str) -> String {
    let lower = description.to_ascii_lowercase();
    if lower.contains("overload")
        || lower.contains("failure")
        || lower.contains("lost")
        || lower.contains("transfer")
    {
        "critical".to_string()
    } else if lower.contains("warning")
        || lower.contains("near")
        || lower.contains("login failed")
    {
        "warning".to_string()
    } else {
        "info".to_string()
    }
}

/// 解析 `usercfg show`。
pub fn parse_usercfg_show(text: &str) -> Vec<UserAccount> {
    let kv = parse_kv(text);
    let mut users = Vec::new();
    for (key, value) in &kv {
        if let Some(role) = key.strip_suffix(" Account") {
            users.push(UserAccount {
                name: value.clone(),
                role: role.trim().to_ascii_lowercase(),
            });
        }
    }
    users
}

/// 解析 `energywise show`。
pub fn parse_energywise_show(text: &str) -> EnergywiseConfig {
    let kv = parse_kv(text);
    EnergywiseConfig {
        enabled: kv
            .get("EnergyWise")
            .map(|v| v.trim().eq_ignore_ascii_case("enabled"))
            .unwrap_or(false),
        domain: kv.get("Domain").cloned().unwrap_or_default(),
        port: kv
            .get("Port")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0),
    }
}

/// 解析 `trapcfg show`。
pub fn parse_trapcfg_show(text: &str) -> Vec<TrapReceiver> {
    indexed_sections(text, "Receiver")
        .into_iter()
        .map(|(index, kv)| TrapReceiver {
            index,
            ip: kv.get("IP").cloned().unwrap_or_default(),
            community: kv.get("Community").cloned().unwrap_or_default(),
            enabled: kv
                .get("Status")
                .map(|v| v.eq_ignore_ascii_case("enabled"))
                .unwrap_or(false),
        })
        .collect()
}

/// 解析 `smtpcfg show`。
pub fn parse_smtpcfg_show(text: &str) -> SmtpConfig {
    let kv = parse_kv(text);
    SmtpConfig {
        server: kv.get("SMTP Server").cloned().unwrap_or_default(),
        port: kv
            .get("Port")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(25),
        sender: kv.get("Sender").cloned().unwrap_or_default(),
    }
}

/// 解析 `emailcfg show`。
pub fn parse_emailcfg_show(text: &str) -> Vec<EmailRecipient> {
    indexed_sections(text, "Recipient")
        .into_iter()
        .map(|(index, kv)| EmailRecipient {
            index,
            address: kv.get("Address").cloned().unwrap_or_default(),
            enabled: kv
                .get("Status")
                .map(|v| v.eq_ignore_ascii_case("enabled"))
                .unwrap_or(false),
        })
        .collect()
}

/// 解析 `syslogcfg show`。
pub fn parse_syslogcfg_show(text: &str) -> Vec<SyslogServer> {
    indexed_sections(text, "Server")
        .into_iter()
        .map(|(index, kv)| SyslogServer {
            index,
            ip: kv.get("IP").cloned().unwrap_or_default(),
            port: kv
                .get("Port")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(514),
            enabled: kv
                .get("Status")
                .map(|v| v.eq_ignore_ascii_case("enabled"))
                .unwrap_or(false),
        })
        .collect()
}

/// 把 `Receiver 1 IP : x` 形式的行聚合为按序号分组的小节。
fn indexed_sections(text: &str, prefix: &str) -> BTreeMap<u8, BTreeMap<String, String>> {
    let kv = parse_kv(text);
    let mut sections: BTreeMap<u8, BTreeMap<String, String>> = BTreeMap::new();
    let with_space = format!("{prefix} ");
    for (key, value) in kv {
        let Some(rest) = key.strip_prefix(&with_space) else {
            continue;
        };
        let Some((index_str, field)) = rest.split_once(' ') else {
            continue;
        };
        let Ok(index) = index_str.parse::<u8>() else {
            continue;
        };
        sections
            .entry(index)
            .or_default()
            .insert(field.trim().to_string(), value);
    }
    sections
}

#[cfg(test)]
mod tests {
    use super::*;

    const SYS_SHOW: &str = "\
Name           : PDU44001\r
Location       : Server Room\r
Model Name     : PDU44001\r
Firmware Version : 1.3.4\r
MAC Address    : 00:0C:15:40:78:AA\r
Serial Number  : NLKQY7000136\r
Hardware Version : 3\r
CyberPower > ";

    const DEVSTA_SHOW: &str = "\
Active Source   : A\r
Source Voltage (A/B) : 119.7 /118.2 V\r
Source Frequency (A/B) : 60.0 /59.9 Hz\r
Source Status (A/B) : Normal /UnderVoltage\r
Total Load     : 0.3 A\r
Total Power    : 36 W\r
Total Energy   : 123.4 kWh\r
Bank 1 Current : 0.2 A\r
Bank 2 Current : 0.1 A\r
CyberPower > ";

    const OLTSTA_SHOW: &str = "\
Index  Name        Status  Current(A)  Power(W)\r
1      Rack Switch On      0.1         12\r
2      Outlet2     On      0.0         0\r
10     Outlet10    Off\r
CyberPower > ";

    #[test]
    fn sys_show_parses_identity() {
        let identity = parse_sys_show(SYS_SHOW);
        assert_eq!(identity.name, "PDU44001");
        assert_eq!(identity.serial, "NLKQY7000136");
        assert_eq!(identity.firmware, "1.3.4");
        assert_eq!(identity.hardware_rev, Some(3));
        assert_eq!(identity.location, "Server Room");
    }

    #[test]
    fn devsta_show_parses_sources_and_banks() {
        let status = parse_devsta_show(DEVSTA_SHOW);
        assert_eq!(status.active_source, Some(AtsSource::A));
        assert_eq!(status.source_a_voltage, Some(119.7));
        assert_eq!(status.source_b_voltage, Some(118.2));
        assert_eq!(status.source_b_status, SourceVoltageStatus::UnderVoltage);
        assert_eq!(status.total_power, Some(36.0));
        assert_eq!(status.bank_currents.get(&1), Some(&0.2));
        assert_eq!(status.bank_currents.get(&2), Some(&0.1));
    }

    #[test]
    fn oltsta_show_parses_table_with_multiword_names() {
        let outlets = parse_oltsta_show(OLTSTA_SHOW);
        assert_eq!(outlets.len(), 3);
        assert_eq!(outlets[&1].name, "Rack Switch");
        assert_eq!(outlets[&1].state, OutletState::On);
        assert_eq!(outlets[&1].current, Some(0.1));
        assert_eq!(outlets[&1].power, Some(12.0));
        assert_eq!(outlets[&10].state, OutletState::Off);
        assert_eq!(outlets[&10].current, None);
    }

    #[test]
    fn oltsta_show_key_value_fallback() {
        let text = "\
Outlet 1 Name  : Router\r
Outlet 1 Status : On\r
Outlet 1 Current : 0.3 A\r
CyberPower > ";
        let outlets = parse_oltsta_show(text);
        assert_eq!(outlets[&1].name, "Router");
        assert_eq!(outlets[&1].state, OutletState::On);
        assert_eq!(outlets[&1].current, Some(0.3));
    }

    #[test]
    fn build_snapshot_wires_active_source_input() {
        let status = parse_devsta_show(DEVSTA_SHOW);
        let outlets = parse_oltsta_show(OLTSTA_SHOW);
        let snapshot = build_snapshot(&status, outlets, None, 2, 1_000);
        assert_eq!(snapshot.input_voltage, Some(119.7));
        assert_eq!(snapshot.ats_current_source, Some(AtsSource::A));
        assert_eq!(snapshot.total_power, Some(36.0));
        assert_eq!(snapshot.banks[&1].current, Some(0.2));
        let source_b = snapshot.source_b.as_ref().expect("source b");
        assert_eq!(source_b.voltage_status, SourceVoltageStatus::UnderVoltage);
    }

    #[test]
    fn srccfg_show_parses_limits() {
        let text = "\
Preferred Source : A\r
Voltage Sensitivity : Normal\r
Transfer Voltage : 88 V\r
Voltage Upper Limit : 148 V\r
Voltage Lower Limit : 88 V\r
CyberPower > ";
        let config = parse_srccfg_show(text);
        assert_eq!(config.preferred_source.as_deref(), Some("A"));
        assert_eq!(config.voltage_sensitivity, "Normal");
        assert_eq!(config.transfer_voltage, Some(88.0));
        assert_eq!(config.voltage_upper_limit, Some(148.0));
    }

    #[test]
    fn eventlog_entries_are_classified() {
        let text = "\
2026/07/21 14:03:11 Outlet 3 turned OFF\r
2026/07/21 14:05:40 Source transfer to B\r
2026/07/21 14:07:02 Login failed from console\r
CyberPower > ";
        let entries = parse_eventlog_show(text);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].severity, "info");
        assert_eq!(entries[1].severity, "critical");
        assert_eq!(entries[2].severity, "warning");
        assert_eq!(entries[0].timestamp, "2026/07/21 14:03:11");
    }

    #[test]
    fn ansi_escapes_are_stripped() {
        let text = "\x1b[2J\x1b[0;1HName : PDU44001\r\nCyberPower > ";
        let kv = parse_kv(text);
        assert_eq!(kv.get("Name").map(String::as_str), Some("PDU44001"));
    }

    #[test]
    fn indexed_sections_group_by_number() {
        let text = "\
Receiver 1 IP : 10.0.0.2\r
Receiver 1 Community : public\r
Receiver 1 Status : Enabled\r
Receiver 2 IP : 10.0.0.3\r
Receiver 2 Status : Disabled\r
CyberPower > ";
        let traps = parse_trapcfg_show(text);
        assert_eq!(traps.len(), 2);
        assert_eq!(traps[0].ip, "10.0.0.2");
        assert!(traps[0].enabled);
        assert!(!traps[1].enabled);
    }
}

//! 主题空间：每设备前缀 `pdu/{device_id}` 下的状态与命令主题。

/// 设备主题前缀。
pub fn prefix(device_id: &str) -> String {
    format!("pdu/{device_id}")
}

/// JSON 汇总状态（约 1 Hz，保留）。
pub fn status(device_id: &str) -> String {
    format!("pdu/{device_id}/status")
}

/// 身份 + 设置 JSON（约 30 s，保留）。
pub fn device_info(device_id: &str) -> String {
    format!("pdu/{device_id}/device")
}

/// 桥接器在线状态（遗嘱主题）。
pub fn bridge_status(device_id: &str) -> String {
    format!("pdu/{device_id}/bridge/status")
}

pub fn input_voltage(device_id: &str) -> String {
    format!("pdu/{device_id}/input/voltage")
}

pub fn input_frequency(device_id: &str) -> String {
    format!("pdu/{device_id}/input/frequency")
}

pub fn outlet_state(device_id: &str, outlet: u16) -> String {
    format!("pdu/{device_id}/outlet/{outlet}/state")
}

pub fn outlet_name(device_id: &str, outlet: u16) -> String {
    format!("pdu/{device_id}/outlet/{outlet}/name")
}

pub fn outlet_metric(device_id: &str, outlet: u16, metric: &str) -> String {
    format!("pdu/{device_id}/outlet/{outlet}/{metric}")
}

pub fn outlet_command_filter(device_id: &str) -> String {
    format!("pdu/{device_id}/outlet/+/command")
}

/// 所有设备的命令过滤器（管理器级订阅）。
pub const ALL_COMMANDS_FILTER: &str = "pdu/+/outlet/+/command";

pub fn outlet_command_response(device_id: &str, outlet: u16) -> String {
    format!("pdu/{device_id}/outlet/{outlet}/command/response")
}

pub fn bank_metric(device_id: &str, bank: u16, metric: &str) -> String {
    format!("pdu/{device_id}/bank/{bank}/{metric}")
}

pub fn ats_metric(device_id: &str, metric: &str) -> String {
    format!("pdu/{device_id}/ats/{metric}")
}

pub fn source_metric(device_id: &str, source: &str, metric: &str) -> String {
    format!("pdu/{device_id}/source/{source}/{metric}")
}

pub fn total_metric(device_id: &str, metric: &str) -> String {
    format!("pdu/{device_id}/total/{metric}")
}

pub fn coldstart(device_id: &str, metric: &str) -> String {
    format!("pdu/{device_id}/coldstart/{metric}")
}

pub fn environment_metric(device_id: &str, metric: &str) -> String {
    format!("pdu/{device_id}/environment/{metric}")
}

pub fn environment_contact(device_id: &str, contact: u8) -> String {
    format!("pdu/{device_id}/environment/contact/{contact}")
}

pub fn automation_status(device_id: &str) -> String {
    format!("pdu/{device_id}/automation/status")
}

pub fn automation_event(device_id: &str) -> String {
    format!("pdu/{device_id}/automation/event")
}

/// 解析命令主题 `pdu/{device_id}/outlet/{n}/command`。
pub fn parse_outlet_command(topic: &str) -> Option<(String, u16)> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() == 5
        && parts[0] == "pdu"
        && parts[2] == "outlet"
        && parts[4] == "command"
    {
        let outlet = parts[3].parse().ok()?;
        return Some((parts[1].to_string(), outlet));
    }
    None
}

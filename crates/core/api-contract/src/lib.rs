//! 稳定的 DTO 与 API 响应契约。
//!
//! 字段名与 MQTT/HTTP 线上格式一一对应（snake_case），可选计量字段
//! 缺失时不序列化，消费方不得把缺失当作零。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 稳定错误码清单（HTTP 状态码映射见 facade 层）。
pub mod error_codes {
    pub const AUTH_UNAUTHORIZED: &str = "AUTH.UNAUTHORIZED";
    pub const AUTH_FORBIDDEN: &str = "AUTH.FORBIDDEN";
    pub const INVALID_REQUEST: &str = "INVALID.REQUEST";
    pub const RESOURCE_NOT_FOUND: &str = "RESOURCE.NOT_FOUND";
    pub const CONFLICT: &str = "RESOURCE.CONFLICT";
    pub const REQUIRES_SERIAL: &str = "TRANSPORT.REQUIRES_SERIAL";
    pub const INTERNAL_ERROR: &str = "INTERNAL.ERROR";
}

/// 标准 API 响应封装。
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

/// 失败响应的错误体。
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

// ============================================================================
// 状态与健康
// ============================================================================

/// `/api/status` 设备段。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusDeviceDto {
    pub name: String,
    pub id: String,
    pub label: String,
    pub outlet_count: u16,
    pub phase_count: u16,
    /// 当前活动传输：snmp | serial | mock。
    pub transport: String,
    /// 传输健康状态：healthy | degraded | recovering | lost。
    pub health: String,
}

/// `/api/status` 单路输入源段。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSourceDto {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voltage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<f64>,
    pub voltage_status: String,
}

/// `/api/status` ATS 段。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusAtsDto {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_source: Option<String>,
    pub auto_transfer: bool,
    pub transferred: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redundancy_ok: Option<bool>,
    pub source_a: StatusSourceDto,
    pub source_b: StatusSourceDto,
}

/// `/api/status` 负载组段。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusBankDto {
    pub number: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voltage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apparent_power: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_factor: Option<f64>,
    pub load_state: String,
}

/// `/api/status` 插座段。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusOutletDto {
    pub number: u16,
    pub name: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub energy: Option<f64>,
}

/// `/api/status` 汇总段。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSummaryDto {
    pub total_power: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_voltage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_frequency: Option<f64>,
    pub active_outlets: usize,
    pub total_outlets: u16,
}

/// MQTT 连接健康段。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttStatusDto {
    pub connected: bool,
    pub reconnect_count: u64,
    pub queued: usize,
    pub dropped: u64,
    pub broker: String,
    pub port: u16,
}

/// `/api/status` 响应体（同时也是 `pdu/{id}/status` 主题载荷）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusDto {
    pub device: StatusDeviceDto,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ats: Option<StatusAtsDto>,
    pub inputs: BTreeMap<String, StatusBankDto>,
    pub outlets: BTreeMap<String, StatusOutletDto>,
    pub summary: StatusSummaryDto,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mqtt: Option<MqttStatusDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_age_seconds: Option<f64>,
    pub ts_ms: i64,
}

/// 设备身份返回结构。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityDto {
    pub name: String,
    pub model: String,
    pub serial: String,
    pub firmware: String,
    pub mac_address: String,
    pub location: String,
    pub outlet_count: u16,
    pub phase_count: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_input_current: Option<f64>,
}

/// `/api/health` 单设备明细。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceHealthDto {
    pub state: String,
    pub consecutive_failures: u32,
    pub transport: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_age_seconds: Option<f64>,
}

/// `/api/health` 响应体。健康返回 200，降级返回 503，永不鉴权。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthDto {
    /// healthy | degraded | unhealthy。
    pub status: String,
    pub issues: Vec<String>,
    pub devices: BTreeMap<String, DeviceHealthDto>,
    pub mqtt_connected: bool,
}

// ============================================================================
// 设备管理
// ============================================================================

/// PDU 设备返回结构。社区口令永不回显。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PduDto {
    pub device_id: String,
    pub host: String,
    pub snmp_port: u16,
    pub label: String,
    pub enabled: bool,
    pub transport: String,
    pub num_banks: u16,
    pub has_serial: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
}

/// PDU 创建请求体。`device_id` 缺省时由桥接器推导。
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePduRequest {
    pub device_id: Option<String>,
    #[serde(default)]
    pub host: String,
    pub snmp_port: Option<u16>,
    pub community_read: Option<String>,
    pub community_write: Option<String>,
    #[serde(default)]
    pub serial_port: String,
    pub serial_baud: Option<u32>,
    pub serial_username: Option<String>,
    pub serial_password: Option<String>,
    pub transport: Option<String>,
    #[serde(default)]
    pub label: String,
    pub enabled: Option<bool>,
    pub num_banks: Option<u16>,
}

/// PDU 更新请求体（字段级合并）。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePduRequest {
    pub host: Option<String>,
    pub snmp_port: Option<u16>,
    pub community_read: Option<String>,
    pub community_write: Option<String>,
    pub serial_port: Option<String>,
    pub serial_baud: Option<u32>,
    pub label: Option<String>,
    pub enabled: Option<bool>,
    pub transport: Option<String>,
    pub num_banks: Option<u16>,
}

// ============================================================================
// 桥接器配置
// ============================================================================

/// `/api/config` 返回结构。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfigDto {
    pub poll_interval_ms: u64,
    pub history_retention_days: u32,
    pub web_port: u16,
    pub auth_enabled: bool,
}

/// `/api/config` 更新请求体。`poll_interval_ms` 下限 1000。
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateBridgeConfigRequest {
    pub poll_interval_ms: Option<u64>,
    pub history_retention_days: Option<u32>,
}

// ============================================================================
// 插座命令与命名
// ============================================================================

/// 插座命令请求体。
#[derive(Debug, Clone, Deserialize)]
pub struct OutletCommandRequest {
    pub action: String,
}

/// 插座命令同步确认。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutletCommandAck {
    pub outlet: u16,
    pub action: String,
    pub ok: bool,
}

/// 命令执行结果记录（发布到 `.../command/response` 主题）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResponseDto {
    pub success: bool,
    pub command: String,
    pub outlet: u16,
    pub error: Option<String>,
    pub ts_ms: i64,
}

/// 插座改名请求体。空名字清除覆盖。
#[derive(Debug, Clone, Deserialize)]
pub struct RenameOutletRequest {
    #[serde(default)]
    pub name: String,
}

// ============================================================================
// 自动化
// ============================================================================

/// 自动化事件记录。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDto {
    pub device_id: String,
    pub rule: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub details: String,
    pub ts_ms: i64,
}

// ============================================================================
// 历史与报表
// ============================================================================

/// 历史查询参数。`range` 预设（1h/6h/24h/7d/30d/60d）或显式 start/end。
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryQuery {
    pub device_id: Option<String>,
    pub range: Option<String>,
    pub start: Option<i64>,
    pub end: Option<i64>,
}

/// 负载组历史点。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankPointDto {
    pub bucket: i64,
    pub bank: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voltage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub apparent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pf: Option<f64>,
}

/// 插座历史点。state 为桶内最后值，数值为桶内均值。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutletPointDto {
    pub bucket: i64,
    pub outlet: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub energy: Option<f64>,
}

/// 周报摘要。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSummaryDto {
    pub id: String,
    pub device_id: String,
    pub week_start: String,
    pub week_end: String,
    pub created_at: String,
}

/// 周报全文。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportDto {
    pub id: String,
    pub device_id: String,
    pub week_start: String,
    pub week_end: String,
    pub created_at: String,
    pub data: serde_json::Value,
}

// ============================================================================
// 认证
// ============================================================================

/// 登录请求体。
#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub password: String,
}

/// `/api/auth/status` 返回结构。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatusDto {
    pub auth_enabled: bool,
    pub authenticated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_shape() {
        let response = ApiResponse::success(42u32);
        let json = serde_json::to_value(&response).expect("json");
        assert_eq!(json["success"], true);
        assert_eq!(json["data"], 42);
        assert!(json["error"].is_null());
    }

    #[test]
    fn error_envelope_shape() {
        let response = ApiResponse::<()>::error(error_codes::RESOURCE_NOT_FOUND, "not found");
        let json = serde_json::to_value(&response).expect("json");
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], error_codes::RESOURCE_NOT_FOUND);
    }

    #[test]
    fn optional_metering_is_omitted() {
        let outlet = StatusOutletDto {
            number: 4,
            name: "Outlet 4".to_string(),
            state: "on".to_string(),
            current: None,
            power: None,
            energy: None,
        };
        let json = serde_json::to_value(&outlet).expect("json");
        assert!(json.get("current").is_none());
        assert!(json.get("power").is_none());
        assert_eq!(json["state"], "on");
    }

    #[test]
    fn event_type_uses_wire_key() {
        let event = EventDto {
            device_id: "pdu44001".to_string(),
            rule: "low".to_string(),
            event_type: "triggered".to_string(),
            details: "Input 1 voltage_below 100".to_string(),
            ts_ms: 1_700_000_000_000,
        };
        let json = serde_json::to_value(&event).expect("json");
        assert_eq!(json["type"], "triggered");
    }
}

//! 应用运行配置加载。
//!
//! 两层配置：
//! - [`AppConfig`]：进程级运行参数，从环境变量读取（支持 `.env`）。
//!   未知的 `BRIDGE_*` 键视为配置错误，启动即失败。
//! - [`PduConfig`]：单台 PDU 的设备记录，来自 `pdus.json`、环境变量
//!   或 mock 模式，优先级依次降低。

mod devices;

use std::env;
use std::path::PathBuf;

pub use devices::{load_pdu_configs, save_pdu_configs, PduConfig, TransportKind};

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
    #[error("unknown configuration key: {0}")]
    UnknownKey(String),
    #[error("invalid device config: {0}")]
    Device(String),
    #[error("io error on {0}: {1}")]
    Io(String, String),
}

/// `BRIDGE_*` 命名空间下可接受的键。
const KNOWN_BRIDGE_KEYS: &[&str] = &[
    "BRIDGE_POLL_INTERVAL_MS",
    "BRIDGE_MOCK_MODE",
    "BRIDGE_LOG_LEVEL",
    "BRIDGE_WEB_PORT",
    "BRIDGE_WEB_PASSWORD",
    "BRIDGE_DATA_DIR",
];

/// 应用运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub mqtt_broker: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub poll_interval_ms: u64,
    pub mock_mode: bool,
    pub log_level: String,
    pub web_port: u16,
    /// 设置后所有写端点要求会话认证。
    pub web_password: Option<String>,
    pub data_dir: PathBuf,
    pub history_retention_days: u32,
    pub house_monthly_kwh: f64,
    // 单设备环境变量回退（pdus.json 缺失时生效）
    pub env_host: String,
    pub env_snmp_port: u16,
    pub env_community_read: String,
    pub env_community_write: String,
    pub env_device_id: String,
    pub env_serial_port: String,
    pub env_serial_baud: u32,
    pub env_serial_username: String,
    pub env_serial_password: String,
    pub env_transport: String,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        reject_unknown_bridge_keys()?;

        Ok(Self {
            mqtt_broker: env::var("MQTT_BROKER").unwrap_or_else(|_| "mosquitto".to_string()),
            mqtt_port: read_u16_with_default("MQTT_PORT", 1883)?,
            mqtt_username: read_optional("MQTT_USERNAME"),
            mqtt_password: read_optional("MQTT_PASSWORD"),
            poll_interval_ms: read_u64_with_default("BRIDGE_POLL_INTERVAL_MS", 1000)?,
            mock_mode: read_bool_with_default("BRIDGE_MOCK_MODE", false),
            log_level: env::var("BRIDGE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            web_port: read_u16_with_default("BRIDGE_WEB_PORT", 8080)?,
            web_password: read_optional("BRIDGE_WEB_PASSWORD"),
            data_dir: PathBuf::from(
                env::var("BRIDGE_DATA_DIR").unwrap_or_else(|_| "/data".to_string()),
            ),
            history_retention_days: read_u32_with_default("HISTORY_RETENTION_DAYS", 60)?,
            house_monthly_kwh: read_f64_with_default("HOUSE_MONTHLY_KWH", 0.0)?,
            env_host: env::var("PDU_HOST").unwrap_or_default(),
            env_snmp_port: read_u16_with_default("PDU_SNMP_PORT", 161)?,
            env_community_read: env::var("PDU_COMMUNITY_READ")
                .unwrap_or_else(|_| "public".to_string()),
            env_community_write: env::var("PDU_COMMUNITY_WRITE")
                .unwrap_or_else(|_| "private".to_string()),
            env_device_id: env::var("PDU_DEVICE_ID").unwrap_or_else(|_| "pdu44001".to_string()),
            env_serial_port: env::var("PDU_SERIAL_PORT").unwrap_or_default(),
            env_serial_baud: read_u32_with_default("PDU_SERIAL_BAUD", 9600)?,
            env_serial_username: env::var("PDU_SERIAL_USERNAME")
                .unwrap_or_else(|_| "cyber".to_string()),
            env_serial_password: env::var("PDU_SERIAL_PASSWORD")
                .unwrap_or_else(|_| "cyber".to_string()),
            env_transport: env::var("PDU_TRANSPORT").unwrap_or_else(|_| "snmp".to_string()),
        })
    }

    pub fn pdus_file(&self) -> PathBuf {
        self.data_dir.join("pdus.json")
    }

    pub fn history_db(&self) -> PathBuf {
        self.data_dir.join("history.db")
    }

    pub fn settings_file(&self) -> PathBuf {
        self.data_dir.join("bridge_settings.json")
    }

    pub fn rules_file(&self, device_id: &str) -> PathBuf {
        self.data_dir.join(format!("rules_{device_id}.json"))
    }

    pub fn outlet_names_file(&self, device_id: &str) -> PathBuf {
        self.data_dir.join(format!("outlet_names_{device_id}.json"))
    }
}

fn reject_unknown_bridge_keys() -> Result<(), ConfigError> {
    for (key, _) in env::vars() {
        if key.starts_with("BRIDGE_") && !KNOWN_BRIDGE_KEYS.contains(&key.as_str()) {
            return Err(ConfigError::UnknownKey(key));
        }
    }
    Ok(())
}

fn read_u16_with_default(key: &str, default: u16) -> Result<u16, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u16>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u32_with_default(key: &str, default: u32) -> Result<u32, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u32>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_f64_with_default(key: &str, default: f64) -> Result<f64, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .parse::<f64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        Err(_) => default,
    }
}

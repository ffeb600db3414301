//! PDU 设备清单：单台或多台，来自 `pdus.json` 或环境变量。
//!
//! 加载优先级：
//! 1. 非空的 `pdus.json`
//! 2. 环境变量（单设备，兼容旧 `.env`）
//! 3. mock 模式生成一台模拟设备
//!
//! 保存采用写临时文件再原子改名，断电不会留下半截文件。

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{AppConfig, ConfigError};

/// 主传输选择。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Snmp,
    Serial,
    Mock,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Snmp => "snmp",
            TransportKind::Serial => "serial",
            TransportKind::Mock => "mock",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "snmp" => Some(TransportKind::Snmp),
            "serial" => Some(TransportKind::Serial),
            "mock" => Some(TransportKind::Mock),
            _ => None,
        }
    }
}

fn default_snmp_port() -> u16 {
    161
}

fn default_community_read() -> String {
    "public".to_string()
}

fn default_community_write() -> String {
    "private".to_string()
}

fn default_serial_baud() -> u32 {
    9600
}

fn default_serial_credential() -> String {
    "cyber".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_num_banks() -> u16 {
    2
}

fn default_transport() -> TransportKind {
    TransportKind::Snmp
}

/// 单台 PDU 的设备记录。`device_id` 一经分配不可变。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PduConfig {
    /// MQTT 主题键，例如 `rack1-pdu`。禁止 `/ # +` 与空白字符。
    pub device_id: String,
    /// IP 或主机名，空串表示无 SNMP。
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_snmp_port")]
    pub snmp_port: u16,
    #[serde(default = "default_community_read")]
    pub community_read: String,
    #[serde(default = "default_community_write")]
    pub community_write: String,
    /// 串口路径，例如 `/dev/ttyUSB3`，空串表示无串口。
    #[serde(default)]
    pub serial_port: String,
    #[serde(default = "default_serial_baud")]
    pub serial_baud: u32,
    #[serde(default = "default_serial_credential")]
    pub serial_username: String,
    #[serde(default = "default_serial_credential")]
    pub serial_password: String,
    #[serde(default = "default_transport")]
    pub transport: TransportKind,
    #[serde(default)]
    pub label: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 默认值，启动时自动探测覆盖。
    #[serde(default = "default_num_banks")]
    pub num_banks: u16,
    /// 硬件序列号，首次发现后回写，用于 DHCP 恢复扫描。
    #[serde(default)]
    pub serial: String,
    /// 覆盖自动推导的 /24 恢复网段。
    #[serde(default)]
    pub recovery_subnet: String,
}

impl PduConfig {
    pub fn mock(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            host: "127.0.0.1".to_string(),
            snmp_port: default_snmp_port(),
            community_read: default_community_read(),
            community_write: default_community_write(),
            serial_port: String::new(),
            serial_baud: default_serial_baud(),
            serial_username: default_serial_credential(),
            serial_password: default_serial_credential(),
            transport: TransportKind::Mock,
            label: "Mock PDU".to_string(),
            enabled: true,
            num_banks: default_num_banks(),
            serial: String::new(),
            recovery_subnet: String::new(),
        }
    }

    pub fn has_serial(&self) -> bool {
        !self.serial_port.is_empty()
    }

    /// 次级传输可用：主传输为 SNMP 且配置了串口。
    pub fn has_fallback(&self) -> bool {
        self.transport == TransportKind::Snmp && self.has_serial()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device_id.is_empty() {
            return Err(ConfigError::Device("device_id is empty".to_string()));
        }
        if self
            .device_id
            .chars()
            .any(|c| matches!(c, '/' | '#' | '+') || c.is_whitespace())
        {
            return Err(ConfigError::Device(format!(
                "device_id contains invalid MQTT characters: {:?}",
                self.device_id
            )));
        }
        if self.transport != TransportKind::Mock && self.host.is_empty() && !self.has_serial() {
            return Err(ConfigError::Device(format!(
                "PDU {:?} has no host or serial_port configured",
                self.device_id
            )));
        }
        if !self.host.is_empty() && self.snmp_port == 0 {
            return Err(ConfigError::Device(format!(
                "PDU {:?} snmp_port out of range: {}",
                self.device_id, self.snmp_port
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct PdusDocument {
    #[serde(default)]
    pdus: Vec<PduConfig>,
}

/// 按优先级加载设备清单。
pub fn load_pdu_configs(config: &AppConfig) -> Result<Vec<PduConfig>, ConfigError> {
    let path = config.pdus_file();

    if path.exists() {
        match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<PdusDocument>(&text) {
                Ok(doc) if !doc.pdus.is_empty() => {
                    for pdu in &doc.pdus {
                        pdu.validate()?;
                    }
                    ensure_unique_ids(&doc.pdus)?;
                    info!(count = doc.pdus.len(), path = %path.display(), "loaded PDU configs");
                    return Ok(doc.pdus);
                }
                Ok(_) => {
                    warn!(path = %path.display(), "pdus.json exists but has no PDUs, falling back to env");
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to parse pdus.json, falling back to env");
                }
            },
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to read pdus.json, falling back to env");
            }
        }
    }

    if config.mock_mode {
        info!("mock mode, using simulated PDU config");
        return Ok(vec![PduConfig::mock(&config.env_device_id)]);
    }

    if !config.env_host.is_empty() || !config.env_serial_port.is_empty() {
        let pdu = PduConfig {
            device_id: config.env_device_id.clone(),
            host: config.env_host.clone(),
            snmp_port: config.env_snmp_port,
            community_read: config.env_community_read.clone(),
            community_write: config.env_community_write.clone(),
            serial_port: config.env_serial_port.clone(),
            serial_baud: config.env_serial_baud,
            serial_username: config.env_serial_username.clone(),
            serial_password: config.env_serial_password.clone(),
            transport: TransportKind::parse(&config.env_transport).ok_or_else(|| {
                ConfigError::Invalid("PDU_TRANSPORT".to_string(), config.env_transport.clone())
            })?,
            label: String::new(),
            enabled: true,
            num_banks: default_num_banks(),
            serial: String::new(),
            recovery_subnet: String::new(),
        };
        pdu.validate()?;
        info!(device_id = %pdu.device_id, "using single PDU from env vars");
        return Ok(vec![pdu]);
    }

    Err(ConfigError::Device(
        "no PDU configuration found: create pdus.json, set PDU_HOST or PDU_SERIAL_PORT, \
         or enable BRIDGE_MOCK_MODE"
            .to_string(),
    ))
}

fn ensure_unique_ids(pdus: &[PduConfig]) -> Result<(), ConfigError> {
    for (i, pdu) in pdus.iter().enumerate() {
        if pdus[..i].iter().any(|p| p.device_id == pdu.device_id) {
            return Err(ConfigError::Device(format!(
                "duplicate device_id: {:?}",
                pdu.device_id
            )));
        }
    }
    Ok(())
}

/// 原子保存设备清单（写临时文件 + rename）。
pub fn save_pdu_configs(pdus: &[PduConfig], path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|err| ConfigError::Io(parent.display().to_string(), err.to_string()))?;
    }
    let doc = PdusDocument {
        pdus: pdus.to_vec(),
    };
    let data = serde_json::to_string_pretty(&doc)
        .map_err(|err| ConfigError::Io(path.display().to_string(), err.to_string()))?;
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, data)
        .map_err(|err| ConfigError::Io(tmp.display().to_string(), err.to_string()))?;
    fs::rename(&tmp, path).map_err(|err| {
        let _ = fs::remove_file(&tmp);
        ConfigError::Io(path.display().to_string(), err.to_string())
    })?;
    info!(count = pdus.len(), path = %path.display(), "saved PDU configs");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_charset_is_enforced() {
        let mut pdu = PduConfig::mock("rack1-pdu");
        assert!(pdu.validate().is_ok());

        for bad in ["rack/1", "rack#1", "rack+1", "rack 1"] {
            pdu.device_id = bad.to_string();
            assert!(pdu.validate().is_err(), "expected {bad:?} to be rejected");
        }
    }

    #[test]
    fn host_or_serial_is_required() {
        let mut pdu = PduConfig::mock("pdu44001");
        pdu.transport = TransportKind::Snmp;
        pdu.host = String::new();
        assert!(pdu.validate().is_err());

        pdu.serial_port = "/dev/ttyUSB3".to_string();
        assert!(pdu.validate().is_ok());
    }

    #[test]
    fn fallback_requires_snmp_primary_and_serial() {
        let mut pdu = PduConfig::mock("pdu44001");
        pdu.transport = TransportKind::Snmp;
        pdu.host = "192.168.20.177".to_string();
        assert!(!pdu.has_fallback());
        pdu.serial_port = "/dev/ttyUSB3".to_string();
        assert!(pdu.has_fallback());
        pdu.transport = TransportKind::Serial;
        assert!(!pdu.has_fallback());
    }

    #[test]
    fn document_roundtrip_defaults() {
        let json = r#"{"pdus": [{"device_id": "rack1-pdu", "host": "10.0.0.5"}]}"#;
        let doc: PdusDocument = serde_json::from_str(json).expect("parse");
        let pdu = &doc.pdus[0];
        assert_eq!(pdu.snmp_port, 161);
        assert_eq!(pdu.community_read, "public");
        assert_eq!(pdu.serial_baud, 9600);
        assert_eq!(pdu.transport, TransportKind::Snmp);
        assert!(pdu.enabled);
        assert_eq!(pdu.num_banks, 2);
    }

    #[test]
    fn save_is_atomic_and_reloadable() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("pdus.json");
        let pdus = vec![PduConfig::mock("pdu44001")];
        save_pdu_configs(&pdus, &path).expect("save");
        assert!(path.exists());
        assert!(!path.with_extension("tmp").exists());

        let text = fs::read_to_string(&path).expect("read");
        let doc: PdusDocument = serde_json::from_str(&text).expect("parse");
        assert_eq!(doc.pdus.len(), 1);
        assert_eq!(doc.pdus[0].device_id, "pdu44001");
    }
}

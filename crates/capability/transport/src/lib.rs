//! # PDU 传输能力模块
//!
//! 对单台 PDU 执行读写的可插拔接口与三个实现：
//! - **SNMP**：批量 GET/SET CyberPower ePDU MIB（自带 SNMPv2c 编解码，
//!   UDP 传输）
//! - **Serial**：RS-232 控制台会话（登录、命令执行、固定格式解析），
//!   额外提供管理操作扩展
//! - **Mock**：一等公民的模拟 PDU，用于无硬件测试
//!
//! ## 架构
//!
//! ```text
//! PduPoller
//!    │
//!    ▼
//! dyn Transport ── identify / poll / set_outlet
//!    │
//!    ├── SnmpTransport ──► SnmpClient ──► UDP + BER codec
//!    ├── SerialTransport ─► SerialClient ─► tokio-serial 会话
//!    │        └── ManagementOps（阈值/网络/通知/用户/事件日志…）
//!    └── MockTransport（含 ManagementOps）
//! ```
//!
//! 传输只在配置的重试次数内重试，一切失败恢复策略属于轮询器。

mod error;
pub mod mock;
pub mod serial;
pub mod snmp;
mod types;

use async_trait::async_trait;
use domain::{AtsSource, DeviceIdentity, OutletAction, Snapshot};

pub use error::{ErrorKind, TransportError};
pub use mock::MockTransport;
pub use serial::{SerialClient, SerialConfig, SerialTransport};
pub use snmp::{SnmpClient, SnmpClientConfig, SnmpTransport};
pub use types::{
    AtsConfig, AtsConfigUpdate, EnergywiseConfig, EventLogEntry, NetworkConfig, NetworkUpdate,
    NotificationsConfig, NotificationsUpdate, OutletConfigEntry, OutletConfigUpdate, Thresholds,
    ThresholdTarget, UserAccount,
};

/// 传输标识，用于健康上报与设备信息主题。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportId {
    Snmp,
    Serial,
    Mock,
}

impl TransportId {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportId::Snmp => "snmp",
            TransportId::Serial => "serial",
            TransportId::Mock => "mock",
        }
    }
}

/// PDU 通信传输接口。
///
/// 实现：[`SnmpTransport`]、[`SerialTransport`]、[`MockTransport`]。
/// 轮询器对具体传输无感知。
#[async_trait]
pub trait Transport: Send + Sync {
    /// 传输标识。
    fn id(&self) -> TransportId;

    /// 查询设备身份（启动时与传输切换后各一次）。
    async fn identify(&self) -> Result<DeviceIdentity, TransportError>;

    /// 探测负载组数量。
    async fn discover_num_banks(&self) -> Result<u16, TransportError>;

    /// 轮询一次，返回解码快照。
    async fn poll(&self) -> Result<Snapshot, TransportError>;

    /// 执行插座命令。
    async fn set_outlet(&self, outlet: u16, action: OutletAction) -> Result<(), TransportError>;

    /// 设置 ATS 首选源。
    async fn set_preferred_source(&self, source: AtsSource) -> Result<(), TransportError>;

    /// 设置 ATS 自动切换开关。
    async fn set_auto_transfer(&self, enabled: bool) -> Result<(), TransportError>;

    /// 管理操作扩展（串口与 mock 提供，SNMP 返回 None）。
    fn management(&self) -> Option<&dyn ManagementOps> {
        None
    }
}

/// 管理操作扩展（串口控制台专属能力）。
#[async_trait]
pub trait ManagementOps: Send + Sync {
    async fn get_thresholds(&self) -> Result<Thresholds, TransportError>;
    async fn set_threshold(
        &self,
        target: ThresholdTarget,
        value: f64,
    ) -> Result<(), TransportError>;
    async fn get_network(&self) -> Result<NetworkConfig, TransportError>;
    async fn set_network(&self, update: NetworkUpdate) -> Result<(), TransportError>;
    async fn get_ats_config(&self) -> Result<AtsConfig, TransportError>;
    async fn set_ats_config(&self, update: AtsConfigUpdate) -> Result<(), TransportError>;
    async fn get_outlet_config(
        &self,
    ) -> Result<std::collections::BTreeMap<u16, OutletConfigEntry>, TransportError>;
    async fn set_outlet_config(
        &self,
        outlet: u16,
        update: OutletConfigUpdate,
    ) -> Result<(), TransportError>;
    async fn set_device_name(&self, name: &str) -> Result<(), TransportError>;
    async fn set_device_location(&self, location: &str) -> Result<(), TransportError>;
    /// 检查设备是否仍在使用出厂口令。
    async fn check_default_credentials(&self) -> Result<bool, TransportError>;
    async fn change_password(
        &self,
        account: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), TransportError>;
    async fn get_event_log(&self) -> Result<Vec<EventLogEntry>, TransportError>;
    async fn get_notifications(&self) -> Result<NotificationsConfig, TransportError>;
    async fn set_notifications(&self, update: NotificationsUpdate) -> Result<(), TransportError>;
    async fn get_energywise(&self) -> Result<EnergywiseConfig, TransportError>;
    async fn set_energywise(&self, config: EnergywiseConfig) -> Result<(), TransportError>;
    async fn get_users(&self) -> Result<Vec<UserAccount>, TransportError>;
}

//! # 桥接器运行时
//!
//! 两个核心子系统：
//! - [`poller`]：每设备一个的 1 Hz 控制循环，持有传输失效状态机
//!   与设备命令 FIFO
//! - [`manager`]：监督全部轮询器，持有共享服务（MQTT、历史存储、
//!   定时任务），路由 MQTT/HTTP 命令到正确的轮询器
//!
//! 所有权是单向的：管理器拥有轮询器；轮询器只通过注入的发布器与
//! 写入器回指共享服务。其他组件读取设备状态只经由
//! [`poller::PollerShared`] 的只读视图或轮询器消息通道。

pub mod health;
pub mod manager;
pub mod poller;
pub mod publish;

use thiserror::Error;

pub use health::{HealthState, SwapRecord, TransportHealth};
pub use manager::BridgeManager;
pub use poller::{
    CommandOrigin, CommandResponse, ManagementCall, PollerConfig, PollerHandle, PollerShared,
    RecoveryScanner,
};

/// 运行时错误。
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("no devices configured")]
    NoDevices,
    #[error("device_id is ambiguous, pass ?device_id=")]
    AmbiguousDevice,
    #[error("device already exists: {0}")]
    DeviceExists(String),
    #[error("poller unavailable: {0}")]
    PollerGone(String),
    #[error("command timed out")]
    CommandTimeout,
    #[error("management ops require the serial console or mock transport")]
    RequiresSerial,
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("automation error: {0}")]
    Automation(#[from] pdu_automation::AutomationError),
    #[error("storage error: {0}")]
    Storage(String),
}

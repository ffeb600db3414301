//! Handlers 模块。

pub mod auth;
pub mod config;
pub mod devices;
pub mod history;
pub mod management;
pub mod outlets;
pub mod reports;
pub mod rules;
pub mod status;

pub use auth::*;
pub use config::*;
pub use devices::*;
pub use history::*;
pub use management::*;
pub use outlets::*;
pub use reports::*;
pub use rules::*;
pub use status::*;

use serde::Deserialize;

/// 多设备端点的通用查询参数。只有一台设备时可省略。
#[derive(Debug, Deserialize)]
pub struct DeviceQuery {
    pub device_id: Option<String>,
}

//! 桥接管理器：轮询器监督与共享服务。
//!
//! 管理器独占 `device_id → 轮询器` 映射。轮询器只由管理器创建、
//! 暂停/恢复与销毁。入站命令路由：
//! - MQTT：订阅 `pdu/+/outlet/+/command`，按 device_id 解多路，
//!   入队到对应轮询器
//! - HTTP：facade 调用管理器的方法
//!
//! 设备清单任何变更都原子落盘（写临时文件 + rename）。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use api_contract::{DeviceHealthDto, HealthDto};
use async_trait::async_trait;
use chrono::Local;
use domain::model::OutletAction;
use pdu_automation::Engine;
use pdu_config::{load_pdu_configs, save_pdu_configs, AppConfig, PduConfig, TransportKind};
use pdu_mqtt::{topics, BridgeMqtt, MessageHandler, MqttStatus, Publisher};
use pdu_storage::{
    generate_weekly_report, HistoryStore, JsonDocStore, SampleWriter,
};
use pdu_transport::{
    MockTransport, SerialClient, SerialConfig, SerialTransport, SnmpClient, SnmpClientConfig,
    SnmpTransport, Transport,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::poller::{
    spawn_poller, CommandOrigin, CommandResponse, PollerConfig, PollerDeps, PollerHandle,
    RecoveryScanner,
};
use crate::{HealthState, RuntimeError};

/// 启动错峰间隔，避免 SNMP GET 的惊群。
const START_STAGGER: Duration = Duration::from_millis(100);
/// 数据超过该秒数算过期（健康聚合）。
const STALE_AFTER_SECS: f64 = 30.0;

/// 运行期可调设置（`bridge_settings.json`）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSettings {
    pub poll_interval_ms: u64,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
        }
    }
}

struct ManagerInner {
    config: AppConfig,
    mqtt: BridgeMqtt,
    publisher: Arc<dyn Publisher>,
    history: Arc<dyn HistoryStore>,
    writer: Arc<SampleWriter>,
    scanner: Option<Arc<dyn RecoveryScanner>>,
    settings: Mutex<BridgeSettings>,
    devices: Mutex<BTreeMap<String, PduConfig>>,
    pollers: Mutex<BTreeMap<String, Arc<PollerHandle>>>,
    tasks: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

/// 桥接管理器。
#[derive(Clone)]
pub struct BridgeManager {
    inner: Arc<ManagerInner>,
}

impl BridgeManager {
    /// 加载设备清单，按 100 ms 错峰启动轮询器，订阅命令主题，
    /// 挂起定时任务（小时级保留清理与周报）。
    pub async fn start(
        config: AppConfig,
        mqtt: BridgeMqtt,
        history: Arc<dyn HistoryStore>,
        writer: Arc<SampleWriter>,
        scanner: Option<Arc<dyn RecoveryScanner>>,
    ) -> Result<Self, RuntimeError> {
        let devices = load_pdu_configs(&config)
            .map_err(|err| RuntimeError::Config(err.to_string()))?;

        let settings_store = JsonDocStore::new(config.settings_file());
        let mut settings: BridgeSettings = if settings_store.exists() {
            settings_store.load().unwrap_or_default()
        } else {
            // 首次启动：环境变量给初值，设置文档接管后续变更
            BridgeSettings {
                poll_interval_ms: config.poll_interval_ms,
            }
        };
        if settings.poll_interval_ms < 1000 {
            settings.poll_interval_ms = 1000;
        }

        let publisher: Arc<dyn Publisher> = Arc::new(mqtt.clone());
        let inner = Arc::new(ManagerInner {
            config,
            mqtt,
            publisher,
            history,
            writer,
            scanner,
            settings: Mutex::new(settings),
            devices: Mutex::new(
                devices
                    .iter()
                    .map(|d| (d.device_id.clone(), d.clone()))
                    .collect(),
            ),
            pollers: Mutex::new(BTreeMap::new()),
            tasks: std::sync::Mutex::new(Vec::new()),
        });
        let manager = Self { inner };

        for device in devices.iter().filter(|d| d.enabled) {
            match manager.build_poller(device.clone(), true).await {
                Ok(handle) => {
                    manager
                        .inner
                        .pollers
                        .lock()
                        .await
                        .insert(device.device_id.clone(), handle);
                    manager.inner.mqtt.register_device_status(&device.device_id).await;
                }
                Err(err) => {
                    error!(device_id = %device.device_id, error = %err, "failed to start poller");
                }
            }
            tokio::time::sleep(START_STAGGER).await;
        }

        // 命令主题路由
        let router = Arc::new(CommandRouter {
            manager: manager.clone(),
        });
        if let Err(err) = manager
            .inner
            .mqtt
            .subscribe(topics::ALL_COMMANDS_FILTER, 1, router)
            .await
        {
            warn!(error = %err, "command topic subscription failed");
        }

        manager.spawn_maintenance();
        let device_count = manager.inner.devices.lock().await.len();
        info!(devices = device_count, "bridge manager started");
        Ok(manager)
    }

    /// 小时级维护：保留清理 + 周报生成。
    fn spawn_maintenance(&self) {
        let manager = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(3600));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let retention_secs =
                    manager.inner.config.history_retention_days as i64 * 86_400;
                let cutoff = now_epoch_ms() / 1000 - retention_secs;
                if let Err(err) = manager.inner.history.sweep_retention(cutoff).await {
                    error!(error = %err, "retention sweep failed");
                }

                let device_ids: Vec<String> =
                    manager.inner.devices.lock().await.keys().cloned().collect();
                for device_id in device_ids {
                    match generate_weekly_report(
                        manager.inner.history.as_ref(),
                        &device_id,
                        Local::now(),
                        manager.inner.config.house_monthly_kwh,
                    )
                    .await
                    {
                        Ok(Some(report)) => {
                            info!(device_id = %device_id, week_start = %report.week_start, "weekly report ready");
                        }
                        Ok(None) => {}
                        Err(err) => {
                            error!(device_id = %device_id, error = %err, "weekly report failed");
                        }
                    }
                }
            }
        });
        self.inner
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(handle);
    }

    async fn build_poller(
        &self,
        device: PduConfig,
        start_running: bool,
    ) -> Result<Arc<PollerHandle>, RuntimeError> {
        let interval =
            Duration::from_millis(self.inner.settings.lock().await.poll_interval_ms);
        let data_dir = &self.inner.config.data_dir;

        let mut primary_snmp: Option<Arc<SnmpTransport>> = None;
        let primary: Arc<dyn Transport> = match device.transport {
            TransportKind::Mock => Arc::new(MockTransport::new()),
            TransportKind::Serial => {
                let mut serial_config =
                    SerialConfig::new(device.serial_port.clone(), device.serial_baud);
                serial_config.username = device.serial_username.clone();
                serial_config.password = device.serial_password.clone();
                Arc::new(SerialTransport::new(
                    SerialClient::new(serial_config),
                    device.num_banks,
                ))
            }
            TransportKind::Snmp => {
                let mut client_config =
                    SnmpClientConfig::new(device.host.clone(), device.snmp_port);
                client_config.community_read = device.community_read.clone();
                client_config.community_write = device.community_write.clone();
                let client = SnmpClient::bind(client_config)
                    .await
                    .map_err(|err| RuntimeError::Config(err.to_string()))?;
                let transport = Arc::new(SnmpTransport::new(client, device.num_banks));
                primary_snmp = Some(transport.clone());
                transport
            }
        };

        let secondary: Option<Arc<dyn Transport>> = if device.has_fallback() {
            let mut serial_config =
                SerialConfig::new(device.serial_port.clone(), device.serial_baud);
            serial_config.username = device.serial_username.clone();
            serial_config.password = device.serial_password.clone();
            Some(Arc::new(SerialTransport::new(
                SerialClient::new(serial_config),
                device.num_banks,
            )))
        } else {
            None
        };

        let rules_store = JsonDocStore::new(
            data_dir.join(format!("rules_{}.json", device.device_id)),
        );
        let names_store = JsonDocStore::new(
            data_dir.join(format!("outlet_names_{}.json", device.device_id)),
        );
        let engine = Engine::load(device.device_id.clone(), rules_store, 48);

        let config = PollerConfig {
            device,
            interval,
            command_timeout: Duration::from_secs(5),
        };
        Ok(spawn_poller(
            config,
            PollerDeps {
                primary,
                secondary,
                primary_snmp,
                publisher: self.inner.publisher.clone(),
                writer: self.inner.writer.clone(),
                engine,
                names_store,
                mqtt: Some(self.inner.mqtt.clone()),
                recovery_scanner: self.inner.scanner.clone(),
            },
            start_running,
        ))
    }

    /// 找轮询器。`device_id` 缺省时要求恰好一台设备。
    pub async fn poller_for(
        &self,
        device_id: Option<&str>,
    ) -> Result<Arc<PollerHandle>, RuntimeError> {
        let pollers = self.inner.pollers.lock().await;
        match device_id {
            Some(id) => pollers
                .get(id)
                .cloned()
                .ok_or_else(|| RuntimeError::DeviceNotFound(id.to_string())),
            None => match pollers.len() {
                0 => Err(RuntimeError::NoDevices),
                1 => pollers
                    .values()
                    .next()
                    .cloned()
                    .ok_or(RuntimeError::NoDevices),
                _ => Err(RuntimeError::AmbiguousDevice),
            },
        }
    }

    pub async fn list_devices(&self) -> Vec<PduConfig> {
        self.inner.devices.lock().await.values().cloned().collect()
    }

    pub async fn get_device(&self, device_id: &str) -> Option<PduConfig> {
        self.inner.devices.lock().await.get(device_id).cloned()
    }

    /// 热添加：创建暂停的轮询器，下一拍自动启动。
    pub async fn add_device(&self, device: PduConfig) -> Result<PduConfig, RuntimeError> {
        device
            .validate()
            .map_err(|err| RuntimeError::Invalid(err.to_string()))?;
        {
            let devices = self.inner.devices.lock().await;
            if devices.contains_key(&device.device_id) {
                return Err(RuntimeError::DeviceExists(device.device_id.clone()));
            }
        }

        if device.enabled {
            let handle = self.build_poller(device.clone(), false).await?;
            self.inner
                .pollers
                .lock()
                .await
                .insert(device.device_id.clone(), handle.clone());
            self.inner.mqtt.register_device_status(&device.device_id).await;
            let interval =
                Duration::from_millis(self.inner.settings.lock().await.poll_interval_ms);
            tokio::spawn(async move {
                tokio::time::sleep(interval).await;
                handle.start();
            });
        }

        self.inner
            .devices
            .lock()
            .await
            .insert(device.device_id.clone(), device.clone());
        self.persist_devices().await?;
        info!(device_id = %device.device_id, "device added");
        Ok(device)
    }

    /// 更新设备配置并重建其轮询器。
    pub async fn update_device(
        &self,
        device_id: &str,
        apply: impl FnOnce(&mut PduConfig),
    ) -> Result<PduConfig, RuntimeError> {
        let updated = {
            let mut devices = self.inner.devices.lock().await;
            let device = devices
                .get_mut(device_id)
                .ok_or_else(|| RuntimeError::DeviceNotFound(device_id.to_string()))?;
            apply(device);
            // device_id 不可变
            device.device_id = device_id.to_string();
            device
                .validate()
                .map_err(|err| RuntimeError::Invalid(err.to_string()))?;
            device.clone()
        };

        if let Some(old) = self.inner.pollers.lock().await.remove(device_id) {
            old.shutdown().await;
        }
        if updated.enabled {
            let handle = self.build_poller(updated.clone(), true).await?;
            self.inner
                .pollers
                .lock()
                .await
                .insert(device_id.to_string(), handle);
        }
        self.persist_devices().await?;
        info!(device_id, "device updated");
        Ok(updated)
    }

    /// 移除设备：停轮询器、退订主题、清离线队列、删规则与命名文档。
    pub async fn remove_device(&self, device_id: &str) -> Result<(), RuntimeError> {
        let existed = self.inner.devices.lock().await.remove(device_id).is_some();
        if !existed {
            return Err(RuntimeError::DeviceNotFound(device_id.to_string()));
        }

        if let Some(handle) = self.inner.pollers.lock().await.remove(device_id) {
            handle.shutdown().await;
        }
        self.inner.mqtt.unregister_device_status(device_id).await;
        self.inner
            .mqtt
            .unsubscribe_prefix(&topics::prefix(device_id))
            .await;

        let data_dir = &self.inner.config.data_dir;
        for doc in [
            JsonDocStore::new(data_dir.join(format!("rules_{device_id}.json"))),
            JsonDocStore::new(data_dir.join(format!("outlet_names_{device_id}.json"))),
        ] {
            if let Err(err) = doc.delete() {
                warn!(device_id, error = %err, "document cleanup failed");
            }
        }

        self.persist_devices().await?;
        info!(device_id, "device removed");
        Ok(())
    }

    async fn persist_devices(&self) -> Result<(), RuntimeError> {
        let devices: Vec<PduConfig> =
            self.inner.devices.lock().await.values().cloned().collect();
        save_pdu_configs(&devices, &self.inner.config.pdus_file())
            .map_err(|err| RuntimeError::Storage(err.to_string()))
    }

    pub async fn settings(&self) -> BridgeSettings {
        self.inner.settings.lock().await.clone()
    }

    /// 更新轮询间隔（≥ 1000 ms）并重建全部轮询器。
    pub async fn set_poll_interval(&self, poll_interval_ms: u64) -> Result<(), RuntimeError> {
        if poll_interval_ms < 1000 {
            return Err(RuntimeError::Invalid(
                "poll_interval_ms must be >= 1000".to_string(),
            ));
        }
        {
            let mut settings = self.inner.settings.lock().await;
            settings.poll_interval_ms = poll_interval_ms;
            let store = JsonDocStore::new(self.inner.config.settings_file());
            store
                .save(&*settings)
                .map_err(|err| RuntimeError::Storage(err.to_string()))?;
        }

        let device_ids: Vec<String> =
            self.inner.pollers.lock().await.keys().cloned().collect();
        for device_id in device_ids {
            let device = self.get_device(&device_id).await;
            if let Some(device) = device {
                if let Some(old) = self.inner.pollers.lock().await.remove(&device_id) {
                    old.shutdown().await;
                }
                match self.build_poller(device, true).await {
                    Ok(handle) => {
                        self.inner.pollers.lock().await.insert(device_id, handle);
                    }
                    Err(err) => {
                        error!(device_id = %device_id, error = %err, "poller rebuild failed");
                    }
                }
            }
        }
        Ok(())
    }

    pub fn mqtt_status(&self) -> MqttStatus {
        self.inner.mqtt.status()
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    pub fn history(&self) -> Arc<dyn HistoryStore> {
        self.inner.history.clone()
    }

    /// 路由一条插座命令到对应轮询器并等待结果。
    pub async fn outlet_command(
        &self,
        device_id: Option<&str>,
        outlet: u16,
        action: OutletAction,
        origin: CommandOrigin,
    ) -> Result<CommandResponse, RuntimeError> {
        let poller = self.poller_for(device_id).await?;
        poller.send_command(outlet, action, origin).await
    }

    /// 健康聚合：整体状态 + 每设备明细 + 人类可读问题列表。
    pub async fn health(&self) -> HealthDto {
        let now_ms = now_epoch_ms();
        let mqtt_connected = self.inner.mqtt.is_connected();
        let mut issues = Vec::new();
        let mut devices = BTreeMap::new();
        let mut any_lost = false;

        if !mqtt_connected {
            issues.push("MQTT disconnected".to_string());
        }

        let pollers = self.inner.pollers.lock().await;
        for (device_id, handle) in pollers.iter() {
            let health = handle.shared.health();
            let age = handle.shared.data_age_seconds(now_ms);

            match health.state {
                HealthState::Lost => {
                    any_lost = true;
                    issues.push(format!("[{device_id}] Device unreachable (transport lost)"));
                }
                HealthState::Degraded => {
                    issues.push(format!(
                        "[{device_id}] Transport degraded ({} consecutive failures)",
                        health.consecutive_failures
                    ));
                }
                HealthState::Recovering => {
                    issues.push(format!(
                        "[{device_id}] Running on fallback transport ({})",
                        health.active_transport
                    ));
                }
                HealthState::Healthy => {}
            }
            match age {
                Some(age) if age > STALE_AFTER_SECS => {
                    issues.push(format!("[{device_id}] Data is {}s stale", age as u64));
                }
                None => {
                    issues.push(format!("[{device_id}] No data yet"));
                }
                _ => {}
            }

            devices.insert(
                device_id.clone(),
                DeviceHealthDto {
                    state: health.state.as_str().to_string(),
                    consecutive_failures: health.consecutive_failures,
                    transport: health.active_transport,
                    last_success_ms: health.last_success_ms,
                    data_age_seconds: age,
                },
            );
        }
        drop(pollers);

        let status = if any_lost || !mqtt_connected {
            "unhealthy"
        } else if issues.is_empty() {
            "healthy"
        } else {
            "degraded"
        };

        HealthDto {
            status: status.to_string(),
            issues,
            devices,
            mqtt_connected,
        }
    }

    /// 有序停机：并行取消轮询器 → 发布 offline 并断开 MQTT →
    /// 冲刷并关闭历史存储。
    pub async fn shutdown(&self) {
        info!("bridge manager shutting down");
        let handles: Vec<Arc<PollerHandle>> = {
            let mut pollers = self.inner.pollers.lock().await;
            std::mem::take(&mut *pollers).into_values().collect()
        };
        let mut joins = Vec::new();
        for handle in handles {
            joins.push(tokio::spawn(async move { handle.shutdown().await }));
        }
        for join in joins {
            let _ = join.await;
        }

        for task in self
            .inner
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
        {
            task.abort();
        }

        self.inner.mqtt.shutdown().await;
        if let Err(err) = self.inner.writer.flush().await {
            error!(error = %err, "final history flush failed");
        }
        info!("bridge manager stopped");
    }
}

/// 为无 device_id 的创建请求推导确定性 ID。
pub fn derive_device_id(host: &str, serial_port: &str, hardware_serial: &str) -> String {
    if !hardware_serial.is_empty() {
        return format!("pdu-{}", hardware_serial.to_ascii_lowercase());
    }
    if !host.is_empty() {
        return format!("pdu-{}", host.replace(['.', ':'], "-"));
    }
    let base = serial_port.rsplit('/').next().unwrap_or("serial");
    format!("pdu-{}", base.to_ascii_lowercase())
}

/// MQTT 命令路由器：按主题里的 device_id 解多路。
struct CommandRouter {
    manager: BridgeManager,
}

#[async_trait]
impl MessageHandler for CommandRouter {
    async fn handle(&self, topic: &str, payload: &[u8]) {
        let Some((device_id, outlet)) = topics::parse_outlet_command(topic) else {
            return;
        };
        let text = String::from_utf8_lossy(payload);
        let Some(action) = OutletAction::parse(&text) else {
            warn!(topic = %topic, payload = %text, "unknown outlet command");
            let response = CommandResponse {
                success: false,
                command: text.trim().to_string(),
                outlet,
                error: Some(format!("unknown command: {}", text.trim())),
                ts_ms: now_epoch_ms(),
            };
            if let Ok(payload) = serde_json::to_vec(&response) {
                let _ = self
                    .manager
                    .inner
                    .publisher
                    .publish(
                        &topics::outlet_command_response(&device_id, outlet),
                        payload,
                        false,
                        1,
                    )
                    .await;
            }
            return;
        };

        let poller = match self.manager.poller_for(Some(&device_id)).await {
            Ok(poller) => poller,
            Err(err) => {
                warn!(device_id = %device_id, error = %err, "command for unknown device");
                return;
            }
        };
        if let Err(err) = poller
            .send_command_nowait(outlet, action, CommandOrigin::Mqtt)
            .await
        {
            warn!(device_id = %device_id, error = %err, "command enqueue failed");
        }
    }
}

fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_derivation_prefers_hardware_serial() {
        assert_eq!(
            derive_device_id("192.168.20.177", "", "NLKQY7000136"),
            "pdu-nlkqy7000136"
        );
        assert_eq!(
            derive_device_id("192.168.20.177", "", ""),
            "pdu-192-168-20-177"
        );
        assert_eq!(
            derive_device_id("", "/dev/ttyUSB3", ""),
            "pdu-ttyusb3"
        );
    }
}

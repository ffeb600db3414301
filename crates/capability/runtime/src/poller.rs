//! 每设备轮询器：1 Hz 控制循环 + 命令 FIFO + 失效状态机。
//!
//! 轮询器是一个协作式任务，独占自己的传输、最近快照与规则集。
//! 设备的所有写操作（插座命令、管理操作、自动化动作）都进入同一
//! 条消息通道，由本任务在轮询间隙串行执行；写操作在途时传输
//! 不会被轮询占用。
//!
//! 周期纪律：每轮先计算 deadline = now + interval，轮询预算不超过
//! interval；周期超时最多跳过一个周期，绝不补课。

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Local;
use domain::model::{DeviceIdentity, OutletAction, Snapshot};
use pdu_automation::{Engine, EventRecord, RuleDoc, RuleView};
use pdu_config::PduConfig;
use pdu_mqtt::{topics, BridgeMqtt, Publisher};
use pdu_storage::{samples_from_snapshot, JsonDocStore, SampleWriter};
use pdu_transport::{
    AtsConfig, AtsConfigUpdate, EnergywiseConfig, NetworkUpdate, NotificationsUpdate,
    OutletConfigUpdate, ThresholdTarget, Transport, TransportError, TransportId,
};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{error, info, warn};

use crate::health::{FailureDecision, HealthState, TransportHealth};
use crate::publish;
use crate::RuntimeError;

/// 命令来源（日志与审计用）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOrigin {
    Mqtt,
    Http,
    Automation,
}

impl CommandOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandOrigin::Mqtt => "mqtt",
            CommandOrigin::Http => "http",
            CommandOrigin::Automation => "automation",
        }
    }
}

/// 命令执行结果，发布到响应主题并回给同步调用者。
#[derive(Debug, Clone, Serialize)]
pub struct CommandResponse {
    pub success: bool,
    pub command: String,
    pub outlet: u16,
    pub error: Option<String>,
    pub ts_ms: i64,
}

/// 管理操作调用（串口/模拟传输专属）。
#[derive(Debug)]
pub enum ManagementCall {
    GetThresholds,
    SetThreshold(ThresholdTarget, f64),
    GetNetwork,
    SetNetwork(NetworkUpdate),
    GetAtsConfig,
    SetAtsConfig(AtsConfigUpdate),
    GetOutletConfig,
    SetOutletConfig(u16, OutletConfigUpdate),
    SetDeviceName(String),
    SetDeviceLocation(String),
    CheckDefaultCredentials,
    ChangePassword {
        account: String,
        old_password: String,
        new_password: String,
    },
    GetEventLog,
    GetNotifications,
    SetNotifications(NotificationsUpdate),
    GetEnergywise,
    SetEnergywise(EnergywiseConfig),
    GetUsers,
}

/// 规则操作。HTTP 的规则变更经此转发给规则属主（轮询器）。
pub enum RuleOp {
    List(oneshot::Sender<Vec<RuleView>>),
    Create(RuleDoc, oneshot::Sender<Result<RuleView, RuntimeError>>),
    Update(String, RuleDoc, oneshot::Sender<Result<RuleView, RuntimeError>>),
    Delete(String, oneshot::Sender<Result<(), RuntimeError>>),
    Toggle(String, oneshot::Sender<Result<RuleView, RuntimeError>>),
    Events(oneshot::Sender<Vec<EventRecord>>),
}

enum PollerMsg {
    Command {
        outlet: u16,
        action: OutletAction,
        origin: CommandOrigin,
        reply: Option<oneshot::Sender<CommandResponse>>,
    },
    Rule(RuleOp),
    SetOutletName {
        outlet: u16,
        name: Option<String>,
        reply: oneshot::Sender<Result<(), RuntimeError>>,
    },
    GetOutletNames(oneshot::Sender<BTreeMap<String, String>>),
    Management {
        call: ManagementCall,
        reply: oneshot::Sender<Result<serde_json::Value, RuntimeError>>,
    },
    RecoveryScanFinished(Option<String>),
}

/// 外部 DHCP 恢复扫描协作者。可能缺席；Lost 是稳定状态。
#[async_trait::async_trait]
pub trait RecoveryScanner: Send + Sync {
    /// 在给定网段内按硬件序列号找设备，返回新主机地址。
    async fn find_device(&self, serial: &str, subnet: &str) -> Option<String>;
}

/// 健康只读视图。
#[derive(Debug, Clone)]
pub struct HealthView {
    pub state: HealthState,
    pub consecutive_failures: u32,
    pub active_transport: String,
    pub last_success_ms: Option<i64>,
    pub last_error: Option<String>,
    pub swap_count: usize,
}

impl HealthView {
    fn from(health: &TransportHealth) -> Self {
        Self {
            state: health.state,
            consecutive_failures: health.consecutive_failures,
            active_transport: health.active.as_str().to_string(),
            last_success_ms: health.last_success_ms,
            last_error: health.last_error.clone(),
            swap_count: health.swaps.len(),
        }
    }
}

/// 轮询器对外的只读状态。管理器与 HTTP 层经此读取快照与健康。
pub struct PollerShared {
    pub device_id: String,
    last_snapshot: RwLock<Option<Snapshot>>,
    health: RwLock<HealthView>,
    identity: RwLock<Option<DeviceIdentity>>,
}

impl PollerShared {
    fn new(device_id: String, primary: TransportId) -> Self {
        Self {
            device_id,
            last_snapshot: RwLock::new(None),
            health: RwLock::new(HealthView::from(&TransportHealth::new(primary))),
            identity: RwLock::new(None),
        }
    }

    pub fn snapshot(&self) -> Option<Snapshot> {
        self.last_snapshot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn health(&self) -> HealthView {
        self.health.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn identity(&self) -> Option<DeviceIdentity> {
        self.identity
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// 最近快照距今的秒数。
    pub fn data_age_seconds(&self, now_ms: i64) -> Option<f64> {
        self.snapshot()
            .map(|snapshot| ((now_ms - snapshot.ts_ms).max(0)) as f64 / 1000.0)
    }

    fn store_snapshot(&self, snapshot: Snapshot) {
        *self
            .last_snapshot
            .write()
            .unwrap_or_else(|e| e.into_inner()) = Some(snapshot);
    }

    fn store_health(&self, view: HealthView) {
        *self.health.write().unwrap_or_else(|e| e.into_inner()) = view;
    }

    fn store_identity(&self, identity: Option<DeviceIdentity>) {
        *self.identity.write().unwrap_or_else(|e| e.into_inner()) = identity;
    }
}

/// 轮询器配置。
#[derive(Clone)]
pub struct PollerConfig {
    pub device: PduConfig,
    pub interval: Duration,
    pub command_timeout: Duration,
}

/// 轮询器句柄。管理器独占创建与销毁。
pub struct PollerHandle {
    pub device_id: String,
    pub shared: Arc<PollerShared>,
    tx: mpsc::Sender<PollerMsg>,
    run_tx: watch::Sender<bool>,
    shutdown_tx: watch::Sender<bool>,
    join: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
    command_timeout: Duration,
}

impl PollerHandle {
    /// 启动（热添加的轮询器创建时暂停，下一拍启动）。
    pub fn start(&self) {
        let _ = self.run_tx.send(true);
    }

    pub fn pause(&self) {
        let _ = self.run_tx.send(false);
    }

    /// 入队插座命令并等待执行结果。
    pub async fn send_command(
        &self,
        outlet: u16,
        action: OutletAction,
        origin: CommandOrigin,
    ) -> Result<CommandResponse, RuntimeError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PollerMsg::Command {
                outlet,
                action,
                origin,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| RuntimeError::PollerGone(self.device_id.clone()))?;
        tokio::time::timeout(self.command_timeout + Duration::from_secs(10), reply_rx)
            .await
            .map_err(|_| RuntimeError::CommandTimeout)?
            .map_err(|_| RuntimeError::PollerGone(self.device_id.clone()))
    }

    /// 入队插座命令，不等待（MQTT 来源，结果经响应主题发布）。
    pub async fn send_command_nowait(
        &self,
        outlet: u16,
        action: OutletAction,
        origin: CommandOrigin,
    ) -> Result<(), RuntimeError> {
        self.tx
            .send(PollerMsg::Command {
                outlet,
                action,
                origin,
                reply: None,
            })
            .await
            .map_err(|_| RuntimeError::PollerGone(self.device_id.clone()))
    }

    async fn rule_op<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RuleOp,
    ) -> Result<T, RuntimeError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PollerMsg::Rule(build(reply_tx)))
            .await
            .map_err(|_| RuntimeError::PollerGone(self.device_id.clone()))?;
        reply_rx
            .await
            .map_err(|_| RuntimeError::PollerGone(self.device_id.clone()))
    }

    pub async fn list_rules(&self) -> Result<Vec<RuleView>, RuntimeError> {
        self.rule_op(RuleOp::List).await
    }

    pub async fn create_rule(&self, doc: RuleDoc) -> Result<RuleView, RuntimeError> {
        self.rule_op(|reply| RuleOp::Create(doc, reply)).await?
    }

    pub async fn update_rule(&self, name: String, doc: RuleDoc) -> Result<RuleView, RuntimeError> {
        self.rule_op(|reply| RuleOp::Update(name, doc, reply)).await?
    }

    pub async fn delete_rule(&self, name: String) -> Result<(), RuntimeError> {
        self.rule_op(|reply| RuleOp::Delete(name, reply)).await?
    }

    pub async fn toggle_rule(&self, name: String) -> Result<RuleView, RuntimeError> {
        self.rule_op(|reply| RuleOp::Toggle(name, reply)).await?
    }

    pub async fn rule_events(&self) -> Result<Vec<EventRecord>, RuntimeError> {
        self.rule_op(RuleOp::Events).await
    }

    pub async fn set_outlet_name(
        &self,
        outlet: u16,
        name: Option<String>,
    ) -> Result<(), RuntimeError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PollerMsg::SetOutletName {
                outlet,
                name,
                reply: reply_tx,
            })
            .await
            .map_err(|_| RuntimeError::PollerGone(self.device_id.clone()))?;
        reply_rx
            .await
            .map_err(|_| RuntimeError::PollerGone(self.device_id.clone()))?
    }

    pub async fn outlet_names(&self) -> Result<BTreeMap<String, String>, RuntimeError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PollerMsg::GetOutletNames(reply_tx))
            .await
            .map_err(|_| RuntimeError::PollerGone(self.device_id.clone()))?;
        reply_rx
            .await
            .map_err(|_| RuntimeError::PollerGone(self.device_id.clone()))
    }

    pub async fn management(
        &self,
        call: ManagementCall,
    ) -> Result<serde_json::Value, RuntimeError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PollerMsg::Management {
                call,
                reply: reply_tx,
            })
            .await
            .map_err(|_| RuntimeError::PollerGone(self.device_id.clone()))?;
        tokio::time::timeout(Duration::from_secs(60), reply_rx)
            .await
            .map_err(|_| RuntimeError::CommandTimeout)?
            .map_err(|_| RuntimeError::PollerGone(self.device_id.clone()))?
    }

    /// 通知恢复扫描结果（外部协作者找到了设备的新地址）。
    pub async fn notify_recovered_host(&self, host: String) {
        let _ = self
            .tx
            .send(PollerMsg::RecoveryScanFinished(Some(host)))
            .await;
    }

    /// 停止轮询器：周期边界取消，命令 FIFO 以 cancelled 清空。
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.join.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

/// 轮询器的注入依赖。
pub struct PollerDeps {
    pub primary: Arc<dyn Transport>,
    pub secondary: Option<Arc<dyn Transport>>,
    /// 主传输为 SNMP 时的原始句柄，DHCP 恢复后更新目标地址。
    pub primary_snmp: Option<Arc<pdu_transport::SnmpTransport>>,
    pub publisher: Arc<dyn Publisher>,
    pub writer: Arc<SampleWriter>,
    pub engine: Engine,
    pub names_store: JsonDocStore,
    pub mqtt: Option<BridgeMqtt>,
    pub recovery_scanner: Option<Arc<dyn RecoveryScanner>>,
}

/// 创建并启动轮询器任务。`start_running=false` 时暂停等待 start()。
pub fn spawn_poller(config: PollerConfig, deps: PollerDeps, start_running: bool) -> Arc<PollerHandle> {
    let device_id = config.device.device_id.clone();
    let (tx, rx) = mpsc::channel(64);
    let (run_tx, run_rx) = watch::channel(start_running);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shared = Arc::new(PollerShared::new(device_id.clone(), deps.primary.id()));

    let poller = Poller {
        config: config.clone(),
        primary: deps.primary,
        secondary: deps.secondary,
        primary_snmp: deps.primary_snmp,
        publisher: deps.publisher,
        writer: deps.writer,
        engine: deps.engine,
        names_store: deps.names_store,
        mqtt: deps.mqtt,
        recovery_scanner: deps.recovery_scanner,
        self_tx: tx.clone(),
        shared: shared.clone(),
        health: TransportHealth::new(TransportId::Snmp),
        rx,
        run_rx,
        shutdown_rx,
        active_is_primary: true,
        identity: None,
        identity_stale: true,
        outlet_names: BTreeMap::new(),
        ats_config: None,
        last_uptime: None,
        last_ts_ms: 0,
        cycle_count: 0,
        recovery_pending: false,
    };

    let join = tokio::spawn(poller.run());

    Arc::new(PollerHandle {
        device_id,
        shared,
        tx,
        run_tx,
        shutdown_tx,
        join: tokio::sync::Mutex::new(Some(join)),
        command_timeout: config.command_timeout,
    })
}

struct Poller {
    config: PollerConfig,
    primary: Arc<dyn Transport>,
    secondary: Option<Arc<dyn Transport>>,
    primary_snmp: Option<Arc<pdu_transport::SnmpTransport>>,
    publisher: Arc<dyn Publisher>,
    writer: Arc<SampleWriter>,
    engine: Engine,
    names_store: JsonDocStore,
    mqtt: Option<BridgeMqtt>,
    recovery_scanner: Option<Arc<dyn RecoveryScanner>>,
    self_tx: mpsc::Sender<PollerMsg>,
    shared: Arc<PollerShared>,
    health: TransportHealth,
    rx: mpsc::Receiver<PollerMsg>,
    run_rx: watch::Receiver<bool>,
    shutdown_rx: watch::Receiver<bool>,
    active_is_primary: bool,
    identity: Option<DeviceIdentity>,
    identity_stale: bool,
    outlet_names: BTreeMap<String, String>,
    ats_config: Option<AtsConfig>,
    last_uptime: Option<u32>,
    last_ts_ms: i64,
    cycle_count: u64,
    recovery_pending: bool,
}

impl Poller {
    fn device_id(&self) -> &str {
        &self.shared.device_id
    }

    fn active(&self) -> Arc<dyn Transport> {
        if self.active_is_primary {
            self.primary.clone()
        } else {
            self.secondary
                .clone()
                .unwrap_or_else(|| self.primary.clone())
        }
    }

    async fn run(mut self) {
        // 初始化健康视图为真实的主传输
        self.health = TransportHealth::new(self.primary.id());
        self.publish_health();

        self.outlet_names = self.names_store.load().unwrap_or_default();
        if !self.outlet_names.is_empty() {
            info!(
                device_id = %self.device_id(),
                count = self.outlet_names.len(),
                "loaded outlet name overrides"
            );
        }

        info!(device_id = %self.device_id(), transport = self.primary.id().as_str(), "poller started");

        loop {
            if *self.shutdown_rx.borrow() {
                break;
            }
            if !*self.run_rx.borrow() {
                // 暂停：等待启动/停机，期间仍处理消息
                tokio::select! {
                    _ = self.run_rx.changed() => continue,
                    _ = self.shutdown_rx.changed() => continue,
                    msg = self.rx.recv() => {
                        match msg {
                            Some(msg) => self.handle_msg(msg).await,
                            None => break,
                        }
                        continue;
                    }
                }
            }

            let deadline = tokio::time::Instant::now() + self.config.interval;
            self.cycle(deadline).await;

            // 轮询间隙处理命令 FIFO，直到 deadline
            loop {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => break,
                    _ = self.shutdown_rx.changed() => break,
                    msg = self.rx.recv() => match msg {
                        Some(msg) => self.handle_msg(msg).await,
                        None => break,
                    },
                }
            }

            // 周期超限：立即开始下一轮，但最多跳过一个周期
            let now = tokio::time::Instant::now();
            if now > deadline + self.config.interval {
                warn!(device_id = %self.device_id(), "poll cycle overran, skipping one cycle");
            }
        }

        self.drain_cancelled().await;
        info!(device_id = %self.device_id(), "poller stopped");
    }

    async fn cycle(&mut self, _deadline: tokio::time::Instant) {
        self.cycle_count += 1;

        // 身份缺失或失效时补一次发现
        if self.identity_stale {
            self.refresh_identity().await;
        }

        let transport = self.active();
        let started = std::time::Instant::now();
        let result =
            tokio::time::timeout(self.config.interval, transport.poll()).await;
        let result = match result {
            Ok(result) => result,
            Err(_) => Err(TransportError::timeout(format!(
                "poll exceeded {:?} budget",
                self.config.interval
            ))),
        };

        match result {
            Ok(snapshot) => {
                pdu_telemetry::record_poll_success(started.elapsed().as_millis() as u64);
                self.on_poll_success(snapshot).await;
            }
            Err(err) => {
                pdu_telemetry::record_poll_failure();
                self.on_poll_failure(err).await;
            }
        }

        // 设备信息主题每 30 个周期刷新一次
        if self.cycle_count % 30 == 1 {
            self.refresh_ats_config().await;
            publish::publish_device_info(
                self.publisher.as_ref(),
                &self.shared.device_id,
                &self.config.device.label,
                self.health.active.as_str(),
                self.identity.as_ref(),
                self.config.interval.as_millis() as u64,
            )
            .await;
        }
    }

    async fn on_poll_success(&mut self, mut snapshot: Snapshot) {
        let now_ms = now_epoch_ms();
        let recovered = self.health.record_success(now_ms);
        if recovered {
            info!(
                device_id = %self.device_id(),
                transport = self.health.active.as_str(),
                "transport recovered"
            );
        }

        // 重启检测：sysUpTime 回退即设备重启
        if let (Some(previous), Some(current)) = (self.last_uptime, snapshot.uptime_ticks) {
            if current < previous {
                warn!(device_id = %self.device_id(), "device reboot detected");
                pdu_telemetry::record_device_reboot();
                self.identity_stale = true;
                let event = self.engine.record_external_event(
                    "device_reboot",
                    "Device uptime went backwards, re-reading identity".to_string(),
                    now_ms,
                );
                self.publish_event(&event).await;
            }
        }
        self.last_uptime = snapshot.uptime_ticks;

        // 快照时间戳严格递增
        snapshot.ts_ms = snapshot.ts_ms.max(self.last_ts_ms + 1);
        self.last_ts_ms = snapshot.ts_ms;

        if snapshot.identity.is_none() {
            snapshot.identity = self.identity.clone();
        }
        self.apply_outlet_names(&mut snapshot);

        // 发布指标主题与汇总
        let mqtt_status = self.mqtt.as_ref().map(|m| m.status());
        publish::publish_snapshot(
            self.publisher.as_ref(),
            &self.shared.device_id,
            &self.config.device.label,
            &snapshot,
            self.health.state.as_str(),
            self.health.active.as_str(),
            mqtt_status.as_ref(),
            self.ats_config.as_ref(),
        )
        .await;

        // 历史样本
        let samples = samples_from_snapshot(&self.shared.device_id, &snapshot);
        if let Err(err) = self.writer.submit(samples).await {
            // 写入器自带重试与重连，这里只记录
            warn!(device_id = %self.device_id(), error = %err, "history submit failed");
        }

        // 自动化
        let outcome = self.engine.evaluate(&snapshot, Local::now());
        for event in &outcome.events {
            self.publish_event(event).await;
        }
        if outcome.status_changed {
            self.publish_automation_status().await;
        }
        for intent in outcome.intents {
            self.execute_command(intent.outlet, intent.action, CommandOrigin::Automation, None)
                .await;
        }

        self.shared.store_snapshot(snapshot);
        self.publish_health();

        if self.cycle_count == 1 {
            publish::publish_discovery(
                self.publisher.as_ref(),
                &self.shared.device_id,
                self.identity.as_ref(),
                self.shared
                    .snapshot()
                    .map(|s| s.outlet_count)
                    .unwrap_or(0),
            )
            .await;
            self.publish_automation_status().await;
        }
    }

    async fn on_poll_failure(&mut self, err: TransportError) {
        let has_secondary = self.secondary.is_some() && self.config.device.has_fallback();
        let decision = self.health.record_failure(&err, has_secondary);

        match decision {
            FailureDecision::Count => {}
            FailureDecision::LogWarn => {
                warn!(
                    device_id = %self.device_id(),
                    failures = self.health.consecutive_failures,
                    kind = err.kind.as_str(),
                    error = %err,
                    "transport degraded"
                );
            }
            FailureDecision::AttemptSwap => {
                self.attempt_swap().await;
            }
            FailureDecision::EnterLost => {
                error!(
                    device_id = %self.device_id(),
                    failures = self.health.consecutive_failures,
                    "all transports failed, device lost"
                );
                let event = self.engine.record_external_event(
                    "transport_lost",
                    format!("Device unreachable after {} failures", self.health.consecutive_failures),
                    now_epoch_ms(),
                );
                self.publish_event(&event).await;
                self.schedule_recovery_scan();
            }
            FailureDecision::StayLost => {
                if !self.recovery_pending {
                    self.schedule_recovery_scan();
                }
            }
        }

        // 失败周期不发布过期指标，只更新健康
        self.publish_health();
    }

    async fn attempt_swap(&mut self) {
        let Some(secondary) = self.secondary.clone() else {
            return;
        };
        let now_ms = now_epoch_ms();
        let from = self.health.active;
        self.active_is_primary = false;
        self.health.record_swap(now_ms, secondary.id());
        self.identity_stale = true;
        pdu_telemetry::record_transport_swap();
        warn!(
            device_id = %self.device_id(),
            from = from.as_str(),
            to = secondary.id().as_str(),
            "hot-swapped to fallback transport"
        );
        let event = self.engine.record_external_event(
            "transport_swap",
            format!("Transport {} -> {}", from.as_str(), secondary.id().as_str()),
            now_ms,
        );
        self.publish_event(&event).await;
        self.publish_health();
    }

    /// LOST 且配置了主机名时调用外部子网扫描器。扫描器可能缺席。
    fn schedule_recovery_scan(&mut self) {
        let Some(scanner) = self.recovery_scanner.clone() else {
            return;
        };
        let serial = self
            .identity
            .as_ref()
            .map(|i| i.serial.clone())
            .filter(|s| !s.is_empty())
            .or_else(|| {
                let configured = self.config.device.serial.clone();
                if configured.is_empty() {
                    None
                } else {
                    Some(configured)
                }
            });
        let Some(serial) = serial else { return };
        let subnet = if self.config.device.recovery_subnet.is_empty() {
            derive_subnet(&self.config.device.host)
        } else {
            Some(self.config.device.recovery_subnet.clone())
        };
        let Some(subnet) = subnet else { return };

        self.recovery_pending = true;
        info!(device_id = %self.device_id(), subnet = %subnet, "scheduling recovery scan");
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            let found = scanner.find_device(&serial, &subnet).await;
            let _ = tx.send(PollerMsg::RecoveryScanFinished(found)).await;
        });
    }

    async fn refresh_identity(&mut self) {
        let transport = self.active();
        match tokio::time::timeout(self.config.interval, transport.identify()).await {
            Ok(Ok(identity)) => {
                info!(
                    device_id = %self.device_id(),
                    model = %identity.model,
                    serial = %identity.serial,
                    outlets = identity.outlet_count,
                    "device identified"
                );
                self.engine.set_max_outlet(identity.outlet_count);
                self.identity = Some(identity.clone());
                self.identity_stale = false;
                self.shared.store_identity(Some(identity));
                let _ = transport.discover_num_banks().await;
            }
            Ok(Err(err)) => {
                warn!(device_id = %self.device_id(), error = %err, "identify failed");
            }
            Err(_) => {
                warn!(device_id = %self.device_id(), "identify timed out");
            }
        }
    }

    async fn refresh_ats_config(&mut self) {
        let transport = self.active();
        if let Some(management) = transport.management() {
            if let Ok(config) = management.get_ats_config().await {
                self.ats_config = Some(config);
            }
        }
    }

    fn apply_outlet_names(&self, snapshot: &mut Snapshot) {
        for (key, name) in &self.outlet_names {
            if let Ok(outlet) = key.parse::<u16>() {
                if let Some(data) = snapshot.outlets.get_mut(&outlet) {
                    data.name = name.clone();
                }
            }
        }
    }

    fn publish_health(&self) {
        self.shared.store_health(HealthView::from(&self.health));
    }

    async fn publish_event(&self, event: &EventRecord) {
        if let Ok(payload) = serde_json::to_vec(event) {
            let _ = self
                .publisher
                .publish(
                    &topics::automation_event(&self.shared.device_id),
                    payload,
                    false,
                    1,
                )
                .await;
        }
    }

    async fn publish_automation_status(&self) {
        if let Ok(payload) = serde_json::to_vec(&self.engine.list_rules()) {
            let _ = self
                .publisher
                .publish(
                    &topics::automation_status(&self.shared.device_id),
                    payload,
                    true,
                    0,
                )
                .await;
        }
    }

    async fn execute_command(
        &mut self,
        outlet: u16,
        action: OutletAction,
        origin: CommandOrigin,
        reply: Option<oneshot::Sender<CommandResponse>>,
    ) {
        pdu_telemetry::record_command_issued();
        let transport = self.active();
        let result = tokio::time::timeout(
            self.config.command_timeout,
            transport.set_outlet(outlet, action),
        )
        .await;
        let error = match result {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err.to_string()),
            Err(_) => Some(format!(
                "command timed out after {:?}",
                self.config.command_timeout
            )),
        };
        let success = error.is_none();
        if !success {
            pdu_telemetry::record_command_failure();
        }

        let response = CommandResponse {
            success,
            command: action.as_str().to_string(),
            outlet,
            error,
            ts_ms: now_epoch_ms(),
        };
        info!(
            device_id = %self.device_id(),
            outlet,
            action = action.as_str(),
            origin = origin.as_str(),
            success,
            "outlet command executed"
        );
        self.publish_command_response(&response).await;
        if let Some(reply) = reply {
            let _ = reply.send(response);
        }
    }

    async fn publish_command_response(&self, response: &CommandResponse) {
        if let Ok(payload) = serde_json::to_vec(response) {
            let _ = self
                .publisher
                .publish(
                    &topics::outlet_command_response(&self.shared.device_id, response.outlet),
                    payload,
                    false,
                    1,
                )
                .await;
        }
    }

    async fn handle_msg(&mut self, msg: PollerMsg) {
        match msg {
            PollerMsg::Command {
                outlet,
                action,
                origin,
                reply,
            } => {
                self.execute_command(outlet, action, origin, reply).await;
            }
            PollerMsg::Rule(op) => self.handle_rule_op(op).await,
            PollerMsg::SetOutletName {
                outlet,
                name,
                reply,
            } => {
                match name {
                    Some(name) if !name.is_empty() => {
                        self.outlet_names.insert(outlet.to_string(), name);
                    }
                    _ => {
                        self.outlet_names.remove(&outlet.to_string());
                    }
                }
                let result = self
                    .names_store
                    .save(&self.outlet_names)
                    .map_err(|err| RuntimeError::Storage(err.to_string()));
                let _ = reply.send(result);
            }
            PollerMsg::GetOutletNames(reply) => {
                let _ = reply.send(self.outlet_names.clone());
            }
            PollerMsg::Management { call, reply } => {
                let result = self.handle_management(call).await;
                let _ = reply.send(result);
            }
            PollerMsg::RecoveryScanFinished(found) => {
                self.recovery_pending = false;
                let Some(host) = found else {
                    info!(device_id = %self.device_id(), "recovery scan found nothing");
                    return;
                };
                if let Some(snmp) = &self.primary_snmp {
                    info!(device_id = %self.device_id(), host = %host, "recovered device address");
                    snmp.client().update_target(&host, None);
                    self.active_is_primary = true;
                    self.health.recover_primary(now_epoch_ms());
                    self.identity_stale = true;
                    self.publish_health();
                    let event = self.engine.record_external_event(
                        "device_recovered",
                        format!("Device found at {host} by subnet scan"),
                        now_epoch_ms(),
                    );
                    self.publish_event(&event).await;
                }
            }
        }
    }

    async fn handle_rule_op(&mut self, op: RuleOp) {
        let now_ms = now_epoch_ms();
        let mut status_dirty = true;
        match op {
            RuleOp::List(reply) => {
                status_dirty = false;
                let _ = reply.send(self.engine.list_rules());
            }
            RuleOp::Create(doc, reply) => {
                let result = self.engine.create_rule(doc, now_ms).map_err(Into::into);
                let _ = reply.send(result);
            }
            RuleOp::Update(name, doc, reply) => {
                let result = self
                    .engine
                    .update_rule(&name, doc, now_ms)
                    .map_err(Into::into);
                let _ = reply.send(result);
            }
            RuleOp::Delete(name, reply) => {
                let result = self.engine.delete_rule(&name, now_ms).map_err(Into::into);
                let _ = reply.send(result);
            }
            RuleOp::Toggle(name, reply) => {
                let result = self.engine.toggle_rule(&name, now_ms).map_err(Into::into);
                let _ = reply.send(result);
            }
            RuleOp::Events(reply) => {
                status_dirty = false;
                let _ = reply.send(self.engine.events());
            }
        }
        if status_dirty {
            self.publish_automation_status().await;
        }
    }

    async fn handle_management(
        &mut self,
        call: ManagementCall,
    ) -> Result<serde_json::Value, RuntimeError> {
        let transport = self.active();
        let Some(ops) = transport.management() else {
            return Err(RuntimeError::RequiresSerial);
        };

        fn to_value<T: Serialize>(
            result: Result<T, TransportError>,
        ) -> Result<serde_json::Value, RuntimeError> {
            match result {
                Ok(value) => serde_json::to_value(value)
                    .map_err(|err| RuntimeError::Storage(err.to_string())),
                Err(err) => Err(RuntimeError::Invalid(err.to_string())),
            }
        }

        match call {
            ManagementCall::GetThresholds => to_value(ops.get_thresholds().await),
            ManagementCall::SetThreshold(target, value) => {
                to_value(ops.set_threshold(target, value).await)
            }
            ManagementCall::GetNetwork => to_value(ops.get_network().await),
            ManagementCall::SetNetwork(update) => to_value(ops.set_network(update).await),
            ManagementCall::GetAtsConfig => to_value(ops.get_ats_config().await),
            ManagementCall::SetAtsConfig(update) => {
                let result = to_value(ops.set_ats_config(update).await);
                self.refresh_ats_config().await;
                result
            }
            ManagementCall::GetOutletConfig => to_value(ops.get_outlet_config().await),
            ManagementCall::SetOutletConfig(outlet, update) => {
                to_value(ops.set_outlet_config(outlet, update).await)
            }
            ManagementCall::SetDeviceName(name) => to_value(ops.set_device_name(&name).await),
            ManagementCall::SetDeviceLocation(location) => {
                to_value(ops.set_device_location(&location).await)
            }
            ManagementCall::CheckDefaultCredentials => {
                let result = ops.check_default_credentials().await;
                if let Ok(true) = result {
                    let event = self.engine.record_external_event(
                        "security_warning",
                        "Device is still using factory default credentials".to_string(),
                        now_epoch_ms(),
                    );
                    self.publish_event(&event).await;
                }
                to_value(result)
            }
            ManagementCall::ChangePassword {
                account,
                old_password,
                new_password,
            } => to_value(
                ops.change_password(&account, &old_password, &new_password)
                    .await,
            ),
            ManagementCall::GetEventLog => to_value(ops.get_event_log().await),
            ManagementCall::GetNotifications => to_value(ops.get_notifications().await),
            ManagementCall::SetNotifications(update) => {
                to_value(ops.set_notifications(update).await)
            }
            ManagementCall::GetEnergywise => to_value(ops.get_energywise().await),
            ManagementCall::SetEnergywise(config) => to_value(ops.set_energywise(config).await),
            ManagementCall::GetUsers => to_value(ops.get_users().await),
        }
    }

    /// 停机：命令 FIFO 以 cancelled 响应清空。
    async fn drain_cancelled(&mut self) {
        self.rx.close();
        while let Ok(msg) = self.rx.try_recv() {
            if let PollerMsg::Command {
                outlet,
                action,
                reply,
                ..
            } = msg
            {
                let response = CommandResponse {
                    success: false,
                    command: action.as_str().to_string(),
                    outlet,
                    error: Some("cancelled".to_string()),
                    ts_ms: now_epoch_ms(),
                };
                self.publish_command_response(&response).await;
                if let Some(reply) = reply {
                    let _ = reply.send(response);
                }
            }
        }
    }
}

fn now_epoch_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// 从主机地址推导 /24 恢复网段。
fn derive_subnet(host: &str) -> Option<String> {
    let octets: Vec<&str> = host.split('.').collect();
    if octets.len() == 4 && octets.iter().all(|o| o.parse::<u8>().is_ok()) {
        return Some(format!(
            "{}.{}.{}.0/24",
            octets[0], octets[1], octets[2]
        ));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subnet_derivation() {
        assert_eq!(
            derive_subnet("192.168.20.177").as_deref(),
            Some("192.168.20.0/24")
        );
        assert_eq!(derive_subnet("pdu.local"), None);
        assert_eq!(derive_subnet(""), None);
    }
}

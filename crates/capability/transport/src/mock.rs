//! 模拟 PDU，无硬件测试用的一等传输实现。
//!
//! 模拟一台 CyberPower PDU44001：双输入 ATS、10 个插座。输入 A 为
//! 首选源，市电电压围绕 120 V 缓慢漂移；活动输入失电时 ATS 自动
//! 切换到另一路。reboot 命令让插座断电 5 秒后恢复。
//!
//! 额外提供故障注入（轮询失败、输入失电），供轮询器的失效状态机
//! 测试使用。

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use domain::model::{
    AtsSource, BankData, BankLoadState, ColdstartState, DeviceIdentity, OutletAction, OutletData,
    OutletState, Snapshot, SourceData, SourceVoltageStatus,
};
use tracing::info;

use crate::error::TransportError;
use crate::types::{
    AtsConfig, AtsConfigUpdate, EnergywiseConfig, EventLogEntry, NetworkConfig, NetworkUpdate,
    NotificationsConfig, NotificationsUpdate, OutletConfigEntry, OutletConfigUpdate, Thresholds,
    ThresholdTarget, UserAccount,
};
use crate::{ManagementOps, Transport, TransportId};

const NUM_OUTLETS: u16 = 10;
const NUM_BANKS: u16 = 2;
const REBOOT_OFF_SECS: f64 = 5.0;

struct MockState {
    outlet_states: BTreeMap<u16, OutletState>,
    outlet_names: BTreeMap<u16, String>,
    reboot_until: BTreeMap<u16, Instant>,
    failed_inputs: [bool; 2],
    active_input: AtsSource,
    preferred_source: AtsSource,
    auto_transfer: bool,
    failing: bool,
    uptime_base: Instant,
    device_name: String,
    location: String,
    poll_seq: u64,
    last_ts_ms: i64,
    thresholds: Thresholds,
    network: NetworkConfig,
    ats_config: AtsConfig,
    outlet_config: BTreeMap<u16, OutletConfigEntry>,
    energywise: EnergywiseConfig,
}

/// 模拟 PDU 传输。
pub struct MockTransport {
    state: Mutex<MockState>,
    started: Instant,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        let mut outlet_states = BTreeMap::new();
        let mut outlet_names = BTreeMap::new();
        let mut outlet_config = BTreeMap::new();
        for n in 1..=NUM_OUTLETS {
            outlet_states.insert(n, OutletState::On);
            outlet_names.insert(n, format!("Outlet {n}"));
            outlet_config.insert(
                n,
                OutletConfigEntry {
                    name: format!("Outlet {n}"),
                    on_delay: Some(0),
                    off_delay: Some(0),
                    reboot_duration: Some(5),
                },
            );
        }
        Self {
            state: Mutex::new(MockState {
                outlet_states,
                outlet_names,
                outlet_config,
                reboot_until: BTreeMap::new(),
                failed_inputs: [false, false],
                active_input: AtsSource::A,
                preferred_source: AtsSource::A,
                auto_transfer: true,
                failing: false,
                uptime_base: Instant::now(),
                device_name: "CyberPower PDU44001 (Mock)".to_string(),
                location: String::new(),
                poll_seq: 0,
                last_ts_ms: 0,
                thresholds: Thresholds {
                    device_overload: Some(16.0),
                    device_near_overload: Some(12.0),
                    device_low_load: Some(0.5),
                    banks: BTreeMap::new(),
                },
                network: NetworkConfig {
                    dhcp: true,
                    ip: "192.168.20.177".to_string(),
                    subnet_mask: "255.255.255.0".to_string(),
                    gateway: "192.168.20.1".to_string(),
                },
                ats_config: AtsConfig {
                    preferred_source: Some("A".to_string()),
                    voltage_sensitivity: "Normal".to_string(),
                    transfer_voltage: Some(88.0),
                    voltage_upper_limit: Some(148.0),
                    voltage_lower_limit: Some(88.0),
                },
                energywise: EnergywiseConfig {
                    enabled: false,
                    domain: "cyber".to_string(),
                    port: 43440,
                },
            }),
            started: Instant::now(),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 注入轮询失败（断网模拟）。
    pub fn set_failing(&self, failing: bool) {
        self.state().failing = failing;
    }

    /// 模拟某路输入失电（1=A，2=B）。
    pub fn simulate_input_failure(&self, input: u8) {
        if (1..=2).contains(&input) {
            self.state().failed_inputs[(input - 1) as usize] = true;
            info!(input, "mock input failure");
        }
    }

    /// 恢复某路输入。
    pub fn simulate_input_restore(&self, input: u8) {
        if (1..=2).contains(&input) {
            self.state().failed_inputs[(input - 1) as usize] = false;
            info!(input, "mock input restore");
        }
    }

    /// 模拟设备重启（uptime 归零）。
    pub fn simulate_reboot(&self) {
        self.state().uptime_base = Instant::now();
    }

    /// 读取当前插座状态（测试断言用）。
    pub fn outlet_state(&self, outlet: u16) -> Option<OutletState> {
        self.state().outlet_states.get(&outlet).copied()
    }

    fn input_failed(state: &MockState, source: AtsSource) -> bool {
        match source {
            AtsSource::A => state.failed_inputs[0],
            AtsSource::B => state.failed_inputs[1],
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn id(&self) -> TransportId {
        TransportId::Mock
    }

    async fn identify(&self) -> Result<DeviceIdentity, TransportError> {
        let state = self.state();
        Ok(DeviceIdentity {
            name: state.device_name.clone(),
            model: "PDU44001".to_string(),
            serial: "MOCK00000001".to_string(),
            firmware: "1.3.4".to_string(),
            mac_address: "00:0C:15:00:00:01".to_string(),
            hardware_rev: Some(3),
            location: state.location.clone(),
            outlet_count: NUM_OUTLETS,
            phase_count: 1,
            max_input_current: Some(16.0),
        })
    }

    async fn discover_num_banks(&self) -> Result<u16, TransportError> {
        Ok(NUM_BANKS)
    }

    async fn poll(&self) -> Result<Snapshot, TransportError> {
        let mut state = self.state();
        if state.failing {
            return Err(TransportError::timeout("mock transport failing"));
        }

        let now = Instant::now();
        let elapsed = self.started.elapsed().as_secs_f64();
        state.poll_seq += 1;

        // 重启中的插座到点恢复
        let due: Vec<u16> = state
            .reboot_until
            .iter()
            .filter(|(_, until)| now >= **until)
            .map(|(n, _)| *n)
            .collect();
        for n in due {
            state.outlet_states.insert(n, OutletState::On);
            state.reboot_until.remove(&n);
            info!(outlet = n, "mock reboot complete");
        }

        // 市电缓慢漂移；确定性的伪噪声避免对随机数的依赖
        let base_voltage = 120.0 + 2.0 * (elapsed / 60.0).sin();
        let noise = 0.3 * (elapsed * 7.3).sin();
        let frequency = 60.0 + 0.02 * (elapsed / 30.0).sin();
        let input_voltage = |failed: bool| if failed { 0.0 } else { base_voltage + noise };

        let voltage_a = input_voltage(state.failed_inputs[0]);
        let voltage_b = input_voltage(state.failed_inputs[1]);

        // ATS：活动输入失电且自动切换开启时切到另一路
        if state.auto_transfer && Self::input_failed(&state, state.active_input) {
            let other = match state.active_input {
                AtsSource::A => AtsSource::B,
                AtsSource::B => AtsSource::A,
            };
            if !Self::input_failed(&state, other) {
                state.active_input = other;
                info!(source = other.as_str(), "mock ATS transferred");
            }
        }

        let mut snapshot = Snapshot::empty(next_ts_ms(&mut state));
        snapshot.device_name = state.device_name.clone();
        snapshot.outlet_count = NUM_OUTLETS;
        snapshot.phase_count = 1;

        let mut on_count = 0u16;
        for n in 1..=NUM_OUTLETS {
            let outlet_state = state.outlet_states[&n];
            if outlet_state == OutletState::On {
                on_count += 1;
            }
            let mut outlet = OutletData::new(n);
            outlet.name = state.outlet_names[&n].clone();
            outlet.state = outlet_state;
            outlet.bank_assignment = Some(if n <= NUM_OUTLETS / 2 { 1 } else { 2 });
            snapshot.outlets.insert(n, outlet);
        }

        // 近乎空载：继电器线圈级的电流
        let total_current = on_count as f64 * 0.003 + 0.005 + 0.005 * (elapsed * 3.1).sin();

        for idx in 1..=NUM_BANKS {
            let source = if idx == 1 { AtsSource::A } else { AtsSource::B };
            let voltage = if idx == 1 { voltage_a } else { voltage_b };
            let is_active = source == state.active_input;

            let mut bank = BankData::new(idx);
            bank.voltage = Some(round1(voltage));
            if is_active && voltage > 10.0 {
                let current = round2(total_current);
                bank.current = Some(current);
                bank.power = Some(round1(current * voltage));
                bank.apparent_power = Some(round1(current * voltage));
                bank.power_factor = Some(if current > 0.01 { 0.98 } else { 1.0 });
                bank.load_state = BankLoadState::Normal;
            } else {
                bank.current = Some(0.0);
                bank.power = Some(0.0);
                bank.apparent_power = Some(0.0);
                bank.power_factor = Some(1.0);
                bank.load_state = if voltage > 10.0 {
                    BankLoadState::Normal
                } else {
                    BankLoadState::Low
                };
            }
            snapshot.banks.insert(idx, bank);
        }

        snapshot.input_voltage = Some(round1(match state.active_input {
            AtsSource::A => voltage_a,
            AtsSource::B => voltage_b,
        }));
        snapshot.input_frequency = Some(round1(frequency));

        snapshot.ats_preferred_source = Some(state.preferred_source);
        snapshot.ats_current_source = Some(state.active_input);
        snapshot.ats_auto_transfer = state.auto_transfer;
        snapshot.source_a = Some(SourceData {
            voltage: Some(round1(voltage_a)),
            frequency: Some(if state.failed_inputs[0] {
                0.0
            } else {
                round1(frequency)
            }),
            voltage_status: if state.failed_inputs[0] {
                SourceVoltageStatus::UnderVoltage
            } else {
                SourceVoltageStatus::Normal
            },
        });
        snapshot.source_b = Some(SourceData {
            voltage: Some(round1(voltage_b)),
            frequency: Some(if state.failed_inputs[1] {
                0.0
            } else {
                round1(frequency)
            }),
            voltage_status: if state.failed_inputs[1] {
                SourceVoltageStatus::UnderVoltage
            } else {
                SourceVoltageStatus::Normal
            },
        });
        snapshot.redundancy_ok = Some(!state.failed_inputs[0] && !state.failed_inputs[1]);
        snapshot.coldstart_delay = Some(0);
        snapshot.coldstart_state = Some(ColdstartState::PrevState);
        snapshot.uptime_ticks = Some((state.uptime_base.elapsed().as_millis() / 10) as u32);
        Ok(snapshot)
    }

    async fn set_outlet(&self, outlet: u16, action: OutletAction) -> Result<(), TransportError> {
        if outlet == 0 || outlet > NUM_OUTLETS {
            return Err(TransportError::refused(format!(
                "invalid outlet {outlet}"
            )));
        }
        let mut state = self.state();
        match action {
            OutletAction::On | OutletAction::DelayOn => {
                state.outlet_states.insert(outlet, OutletState::On);
            }
            OutletAction::Off | OutletAction::DelayOff => {
                state.outlet_states.insert(outlet, OutletState::Off);
            }
            OutletAction::Reboot => {
                state.outlet_states.insert(outlet, OutletState::Off);
                state.reboot_until.insert(
                    outlet,
                    Instant::now() + std::time::Duration::from_secs_f64(REBOOT_OFF_SECS),
                );
            }
            OutletAction::Cancel => {
                state.reboot_until.remove(&outlet);
            }
        }
        info!(outlet, action = action.as_str(), "mock outlet command");
        Ok(())
    }

    async fn set_preferred_source(&self, source: AtsSource) -> Result<(), TransportError> {
        let mut state = self.state();
        state.preferred_source = source;
        state.ats_config.preferred_source = Some(source.as_str().to_string());
        Ok(())
    }

    async fn set_auto_transfer(&self, enabled: bool) -> Result<(), TransportError> {
        self.state().auto_transfer = enabled;
        Ok(())
    }

    fn management(&self) -> Option<&dyn ManagementOps> {
        Some(self)
    }
}

#[async_trait]
impl ManagementOps for MockTransport {
    async fn get_thresholds(&self) -> Result<Thresholds, TransportError> {
        Ok(self.state().thresholds.clone())
    }

    async fn set_threshold(
        &self,
        target: ThresholdTarget,
        value: f64,
    ) -> Result<(), TransportError> {
        let mut state = self.state();
        match target {
            ThresholdTarget::DeviceOverload => state.thresholds.device_overload = Some(value),
            ThresholdTarget::DeviceNearOverload => {
                state.thresholds.device_near_overload = Some(value)
            }
            ThresholdTarget::DeviceLowLoad => state.thresholds.device_low_load = Some(value),
            ThresholdTarget::BankOverload { bank } => {
                state.thresholds.banks.entry(bank).or_default().overload = Some(value)
            }
            ThresholdTarget::BankNearOverload { bank } => {
                state
                    .thresholds
                    .banks
                    .entry(bank)
                    .or_default()
                    .near_overload = Some(value)
            }
            ThresholdTarget::BankLowLoad { bank } => {
                state.thresholds.banks.entry(bank).or_default().low_load = Some(value)
            }
        }
        Ok(())
    }

    async fn get_network(&self) -> Result<NetworkConfig, TransportError> {
        Ok(self.state().network.clone())
    }

    async fn set_network(&self, update: NetworkUpdate) -> Result<(), TransportError> {
        let mut state = self.state();
        if let Some(dhcp) = update.dhcp {
            state.network.dhcp = dhcp;
        }
        if let Some(ip) = update.ip {
            state.network.ip = ip;
        }
        if let Some(mask) = update.subnet_mask {
            state.network.subnet_mask = mask;
        }
        if let Some(gateway) = update.gateway {
            state.network.gateway = gateway;
        }
        Ok(())
    }

    async fn get_ats_config(&self) -> Result<AtsConfig, TransportError> {
        Ok(self.state().ats_config.clone())
    }

    async fn set_ats_config(&self, update: AtsConfigUpdate) -> Result<(), TransportError> {
        let mut state = self.state();
        if let Some(source) = update.preferred_source {
            state.ats_config.preferred_source = Some(source.to_ascii_uppercase());
        }
        if let Some(sensitivity) = update.voltage_sensitivity {
            state.ats_config.voltage_sensitivity = sensitivity;
        }
        if let Some(upper) = update.voltage_upper_limit {
            state.ats_config.voltage_upper_limit = Some(upper);
        }
        if let Some(lower) = update.voltage_lower_limit {
            state.ats_config.voltage_lower_limit = Some(lower);
        }
        Ok(())
    }

    async fn get_outlet_config(
        &self,
    ) -> Result<BTreeMap<u16, OutletConfigEntry>, TransportError> {
        Ok(self.state().outlet_config.clone())
    }

    async fn set_outlet_config(
        &self,
        outlet: u16,
        update: OutletConfigUpdate,
    ) -> Result<(), TransportError> {
        let mut guard = self.state();
        let state = &mut *guard;
        let entry = state.outlet_config.entry(outlet).or_default();
        if let Some(name) = update.name {
            entry.name = name.clone();
            state.outlet_names.insert(outlet, name);
        }
        if let Some(delay) = update.on_delay {
            entry.on_delay = Some(delay);
        }
        if let Some(delay) = update.off_delay {
            entry.off_delay = Some(delay);
        }
        if let Some(duration) = update.reboot_duration {
            entry.reboot_duration = Some(duration);
        }
        Ok(())
    }

    async fn set_device_name(&self, name: &str) -> Result<(), TransportError> {
        self.state().device_name = name.to_string();
        Ok(())
    }

    async fn set_device_location(&self, location: &str) -> Result<(), TransportError> {
        self.state().location = location.to_string();
        Ok(())
    }

    async fn check_default_credentials(&self) -> Result<bool, TransportError> {
        Ok(true)
    }

    async fn change_password(
        &self,
        _account: &str,
        _old_password: &str,
        _new_password: &str,
    ) -> Result<(), TransportError> {
        Ok(())
    }

    async fn get_event_log(&self) -> Result<Vec<EventLogEntry>, TransportError> {
        Ok(vec![EventLogEntry {
            timestamp: "2026/01/01 00:00:00".to_string(),
            severity: "info".to_string(),
            description: "Mock device started".to_string(),
        }])
    }

    async fn get_notifications(&self) -> Result<NotificationsConfig, TransportError> {
        Ok(NotificationsConfig::default())
    }

    async fn set_notifications(&self, _update: NotificationsUpdate) -> Result<(), TransportError> {
        Ok(())
    }

    async fn get_energywise(&self) -> Result<EnergywiseConfig, TransportError> {
        Ok(self.state().energywise.clone())
    }

    async fn set_energywise(&self, config: EnergywiseConfig) -> Result<(), TransportError> {
        self.state().energywise = config;
        Ok(())
    }

    async fn get_users(&self) -> Result<Vec<UserAccount>, TransportError> {
        Ok(vec![UserAccount {
            name: "cyber".to_string(),
            role: "admin".to_string(),
        }])
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// 快照时间戳严格递增。
fn next_ts_ms(state: &mut MockState) -> i64 {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64;
    let ts = now.max(state.last_ts_ms + 1);
    state.last_ts_ms = ts;
    ts
}

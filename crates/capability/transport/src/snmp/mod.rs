//! SNMP 传输实现。
//!
//! [`SnmpClient`] 负责 UDP 报文收发、请求重试与响应关联；
//! [`SnmpTransport`] 在其上拼装轮询 OID 列表并调用领域层解码。
//! 一次轮询约 40 个 OID，按批次合并 varbind 以把单周期耗时压在
//! 预算之内。

pub mod codec;

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use domain::decode::{decode_snapshot, RawValue, SnapshotLayout};
use domain::model::{AtsSource, DeviceIdentity, OutletAction, Snapshot};
use domain::oids;
use tokio::net::{lookup_host, UdpSocket};
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::{Transport, TransportId};
use codec::{Message, Pdu, SnmpValue, VarBind};

/// SNMP 客户端配置。
#[derive(Debug, Clone)]
pub struct SnmpClientConfig {
    pub host: String,
    pub port: u16,
    pub community_read: String,
    pub community_write: String,
    /// 单次请求超时。
    pub timeout: Duration,
    /// 超时后的重发次数。
    pub retries: u32,
    /// 单个请求最多携带的 varbind 数。
    pub max_varbinds: usize,
}

impl SnmpClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            community_read: "public".to_string(),
            community_write: "private".to_string(),
            timeout: Duration::from_secs(2),
            retries: 1,
            max_varbinds: 24,
        }
    }
}

/// SNMPv2c GET/SET 客户端。
pub struct SnmpClient {
    socket: UdpSocket,
    config: Mutex<SnmpClientConfig>,
    request_id: AtomicI32,
}

impl SnmpClient {
    /// 绑定本地套接字。SNMP 无连接，目标可随时更换。
    pub async fn bind(config: SnmpClientConfig) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        Ok(Self {
            socket,
            config: Mutex::new(config),
            request_id: AtomicI32::new(1),
        })
    }

    /// 更换目标主机（DHCP 恢复后由轮询器调用）。
    pub fn update_target(&self, host: &str, port: Option<u16>) {
        let mut config = self.config.lock().unwrap_or_else(|e| e.into_inner());
        config.host = host.to_string();
        if let Some(port) = port {
            config.port = port;
        }
        info!(host = %config.host, port = config.port, "snmp target updated");
    }

    fn config(&self) -> SnmpClientConfig {
        self.config.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    async fn resolve_target(&self, config: &SnmpClientConfig) -> Result<SocketAddr, TransportError> {
        let target = format!("{}:{}", config.host, config.port);
        let result = lookup_host(&target)
            .await
            .map_err(|err| TransportError::unreachable(format!("{target}: {err}")))?
            .next()
            .ok_or_else(|| TransportError::unreachable(format!("{target}: no address")));
        result
    }

    /// 发送请求并等待匹配 request-id 的响应，按配置超时与重试。
    async fn transact(&self, message: &Message) -> Result<Message, TransportError> {
        let config = self.config();
        let target = self.resolve_target(&config).await?;
        let encoded = codec::encode_message(message);
        let mut last_error = TransportError::timeout("no response");

        for attempt in 0..=config.retries {
            if attempt > 0 {
                debug!(attempt, "snmp retransmit");
            }
            self.socket.send_to(&encoded, target).await?;

            let deadline = tokio::time::Instant::now() + config.timeout;
            loop {
                let mut buf = [0u8; 8192];
                let received = tokio::time::timeout_at(deadline, self.socket.recv_from(&mut buf))
                    .await;
                match received {
                    Ok(Ok((len, from))) => {
                        if from != target {
                            continue;
                        }
                        match codec::decode_message(&buf[..len]) {
                            Ok(response)
                                if response.pdu.request_id == message.pdu.request_id =>
                            {
                                return check_response(response);
                            }
                            Ok(_) => continue,
                            Err(err) => {
                                last_error = err;
                                break;
                            }
                        }
                    }
                    Ok(Err(err)) => return Err(err.into()),
                    Err(_) => {
                        last_error =
                            TransportError::timeout(format!("snmp timeout after {:?}", config.timeout));
                        break;
                    }
                }
            }
        }
        Err(last_error)
    }

    fn next_request_id(&self) -> i32 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// GET 一批 OID。缺失对象（noSuchObject 等）静默跳过；
    /// 超时或协议错误返回整体失败。
    pub async fn get_many(
        &self,
        oid_texts: &[String],
    ) -> Result<BTreeMap<String, RawValue>, TransportError> {
        let config = self.config();
        let mut values = BTreeMap::new();

        for chunk in oid_texts.chunks(config.max_varbinds.max(1)) {
            let mut varbinds = Vec::with_capacity(chunk.len());
            for text in chunk {
                varbinds.push(VarBind {
                    oid: codec::parse_oid(text)?,
                    value: SnmpValue::Null,
                });
            }
            let request = Message {
                version: codec::VERSION_2C,
                community: config.community_read.clone().into_bytes(),
                pdu: Pdu {
                    pdu_type: codec::PDU_GET_REQUEST,
                    request_id: self.next_request_id(),
                    error_status: 0,
                    error_index: 0,
                    varbinds,
                },
            };
            let response = self.transact(&request).await?;
            for vb in response.pdu.varbinds {
                if vb.value.is_exception() {
                    continue;
                }
                if let Some(raw) = to_raw_value(vb.value) {
                    values.insert(codec::format_oid(&vb.oid), raw);
                }
            }
        }
        Ok(values)
    }

    /// GET 单个 OID，缺失返回 None。
    pub async fn get(&self, oid: &str) -> Result<Option<RawValue>, TransportError> {
        let values = self.get_many(std::slice::from_ref(&oid.to_string())).await?;
        Ok(values.into_iter().next().map(|(_, v)| v))
    }

    /// SET 一个整数值。
    pub async fn set_integer(&self, oid: &str, value: i64) -> Result<(), TransportError> {
        self.set(oid, SnmpValue::Integer(value)).await
    }

    /// SET 一个字符串值。
    pub async fn set_string(&self, oid: &str, value: &str) -> Result<(), TransportError> {
        self.set(oid, SnmpValue::OctetString(value.as_bytes().to_vec()))
            .await
    }

    async fn set(&self, oid: &str, value: SnmpValue) -> Result<(), TransportError> {
        let config = self.config();
        let request = Message {
            version: codec::VERSION_2C,
            community: config.community_write.clone().into_bytes(),
            pdu: Pdu {
                pdu_type: codec::PDU_SET_REQUEST,
                request_id: self.next_request_id(),
                error_status: 0,
                error_index: 0,
                varbinds: vec![VarBind {
                    oid: codec::parse_oid(oid)?,
                    value,
                }],
            },
        };
        self.transact(&request).await?;
        Ok(())
    }
}

/// 响应级错误检查。error-status 非零即拒绝。
fn check_response(response: Message) -> Result<Message, TransportError> {
    if response.pdu.pdu_type != codec::PDU_RESPONSE {
        return Err(TransportError::parse(format!(
            "unexpected PDU type {:#04x}",
            response.pdu.pdu_type
        )));
    }
    if response.pdu.error_status != 0 {
        return Err(TransportError::refused(format!(
            "snmp error-status {} at index {}",
            response.pdu.error_status, response.pdu.error_index
        )));
    }
    Ok(response)
}

fn to_raw_value(value: SnmpValue) -> Option<RawValue> {
    match value {
        SnmpValue::Integer(v) => Some(RawValue::Integer(v)),
        SnmpValue::OctetString(bytes) => {
            Some(RawValue::Text(String::from_utf8_lossy(&bytes).into_owned()))
        }
        SnmpValue::Counter32(v) | SnmpValue::Gauge32(v) => Some(RawValue::Unsigned(v as u64)),
        SnmpValue::TimeTicks(v) => Some(RawValue::TimeTicks(v)),
        SnmpValue::Counter64(v) => Some(RawValue::Unsigned(v)),
        SnmpValue::Oid(oid) => Some(RawValue::Oid(oid)),
        SnmpValue::IpAddress(octets) => Some(RawValue::Text(
            format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3]),
        )),
        SnmpValue::Null
        | SnmpValue::Opaque(_)
        | SnmpValue::NoSuchObject
        | SnmpValue::NoSuchInstance
        | SnmpValue::EndOfMibView => None,
    }
}

struct SnmpState {
    outlet_count: u16,
    num_banks: u16,
    identity: Option<DeviceIdentity>,
    /// None=未知，Some(false)=探测 3 次后确认无环境探头。
    enviro_supported: Option<bool>,
    enviro_probe_count: u8,
}

/// 基于 SNMP 的 [`Transport`] 实现。
pub struct SnmpTransport {
    client: SnmpClient,
    state: Mutex<SnmpState>,
}

impl SnmpTransport {
    pub fn new(client: SnmpClient, default_num_banks: u16) -> Self {
        Self {
            client,
            state: Mutex::new(SnmpState {
                outlet_count: 0,
                num_banks: default_num_banks,
                identity: None,
                enviro_supported: None,
                enviro_probe_count: 0,
            }),
        }
    }

    pub fn client(&self) -> &SnmpClient {
        &self.client
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SnmpState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn poll_oids(outlet_count: u16, num_banks: u16) -> Vec<String> {
        let mut oids: Vec<String> = vec![
            oids::OID_DEVICE_NAME.to_string(),
            oids::OID_OUTLET_COUNT.to_string(),
            oids::OID_PHASE_COUNT.to_string(),
            oids::OID_INPUT_VOLTAGE.to_string(),
            oids::OID_INPUT_FREQUENCY.to_string(),
            oids::OID_ATS_PREFERRED_SOURCE.to_string(),
            oids::OID_ATS_CURRENT_SOURCE.to_string(),
            oids::OID_ATS_AUTO_TRANSFER.to_string(),
            oids::OID_SOURCE_A_VOLTAGE.to_string(),
            oids::OID_SOURCE_B_VOLTAGE.to_string(),
            oids::OID_SOURCE_A_FREQUENCY.to_string(),
            oids::OID_SOURCE_B_FREQUENCY.to_string(),
            oids::OID_SOURCE_A_STATUS.to_string(),
            oids::OID_SOURCE_B_STATUS.to_string(),
            oids::OID_SOURCE_REDUNDANCY.to_string(),
            oids::OID_SYS_UPTIME.to_string(),
        ];
        for n in 1..=outlet_count {
            oids.push(oids::oid_outlet_name(n));
            oids.push(oids::oid_outlet_state(n));
            oids.push(oids::oid_outlet_current(n));
            oids.push(oids::oid_outlet_power(n));
            oids.push(oids::oid_outlet_energy(n));
        }
        for idx in 1..=num_banks {
            oids.push(oids::oid_bank_current(idx));
            oids.push(oids::oid_bank_load_state(idx));
            oids.push(oids::oid_bank_voltage(idx));
            oids.push(oids::oid_bank_active_power(idx));
            oids.push(oids::oid_bank_apparent_power(idx));
            oids.push(oids::oid_bank_power_factor(idx));
            oids.push(oids::oid_bank_energy(idx));
            oids.push(oids::oid_bank_timestamp(idx));
        }
        oids
    }

    /// 环境探头轮询。连续 3 次读不到温度即认定不存在，停止探测。
    async fn poll_environment(&self) -> Result<BTreeMap<String, RawValue>, TransportError> {
        let supported = self.state().enviro_supported;
        if supported == Some(false) {
            return Ok(BTreeMap::new());
        }

        let mut env_oids = vec![
            oids::OID_ENVIRO_TEMPERATURE.to_string(),
            oids::OID_ENVIRO_TEMP_UNIT.to_string(),
            oids::OID_ENVIRO_HUMIDITY.to_string(),
        ];
        for n in 1..=4u8 {
            env_oids.push(oids::oid_enviro_contact(n));
        }

        let values = self.client.get_many(&env_oids).await?;
        let mut state = self.state();
        if values.contains_key(oids::OID_ENVIRO_TEMPERATURE) {
            state.enviro_supported = Some(true);
        } else {
            state.enviro_probe_count = state.enviro_probe_count.saturating_add(1);
            if state.enviro_probe_count >= 3 && state.enviro_supported.is_none() {
                state.enviro_supported = Some(false);
                info!(
                    probes = state.enviro_probe_count,
                    "no environmental sensor detected"
                );
            }
        }
        Ok(values)
    }
}

#[async_trait]
impl Transport for SnmpTransport {
    fn id(&self) -> TransportId {
        TransportId::Snmp
    }

    async fn identify(&self) -> Result<DeviceIdentity, TransportError> {
        let oid_list: Vec<String> = [
            oids::OID_DEVICE_NAME,
            oids::OID_IDENT_MODEL,
            oids::OID_IDENT_SERIAL,
            oids::OID_IDENT_FIRMWARE,
            oids::OID_OUTLET_COUNT,
            oids::OID_PHASE_COUNT,
            oids::OID_INPUT_MAX_CURRENT,
            oids::OID_SYS_NAME,
            oids::OID_SYS_LOCATION,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        let values = self.client.get_many(&oid_list).await?;

        let text = |oid: &str| -> String {
            values
                .get(oid)
                .and_then(RawValue::as_text)
                .unwrap_or_default()
                .to_string()
        };
        let int = |oid: &str| values.get(oid).and_then(RawValue::as_i64);

        let identity = DeviceIdentity {
            name: text(oids::OID_DEVICE_NAME),
            model: text(oids::OID_IDENT_MODEL),
            serial: text(oids::OID_IDENT_SERIAL),
            firmware: text(oids::OID_IDENT_FIRMWARE),
            mac_address: String::new(),
            hardware_rev: None,
            location: text(oids::OID_SYS_LOCATION),
            outlet_count: int(oids::OID_OUTLET_COUNT)
                .and_then(|v| u16::try_from(v).ok())
                .unwrap_or(10),
            phase_count: int(oids::OID_PHASE_COUNT)
                .and_then(|v| u16::try_from(v).ok())
                .unwrap_or(1),
            max_input_current: int(oids::OID_INPUT_MAX_CURRENT)
                .map(domain::decode::scale_tenths),
        };

        let mut state = self.state();
        state.outlet_count = identity.outlet_count;
        state.identity = Some(identity.clone());
        Ok(identity)
    }

    async fn discover_num_banks(&self) -> Result<u16, TransportError> {
        match self.client.get(oids::OID_NUM_BANK_TABLE_ENTRIES).await? {
            Some(value) => {
                let count = value
                    .as_i64()
                    .and_then(|v| u16::try_from(v).ok())
                    .filter(|v| *v >= 1);
                let mut state = self.state();
                if let Some(count) = count {
                    state.num_banks = count;
                }
                Ok(state.num_banks)
            }
            None => Ok(self.state().num_banks),
        }
    }

    async fn poll(&self) -> Result<Snapshot, TransportError> {
        let (outlet_count, num_banks, identity) = {
            let state = self.state();
            (
                if state.outlet_count == 0 {
                    10
                } else {
                    state.outlet_count
                },
                state.num_banks,
                state.identity.clone(),
            )
        };

        let oid_list = Self::poll_oids(outlet_count, num_banks);
        let mut values = self.client.get_many(&oid_list).await?;

        // 环境探头失败不应使整次轮询失败
        match self.poll_environment().await {
            Ok(env_values) => values.extend(env_values),
            Err(err) => warn!(error = %err, "environment probe failed"),
        }

        let layout = SnapshotLayout {
            outlet_count,
            num_banks,
        };
        let mut snapshot = decode_snapshot(&values, layout, now_epoch_ms());
        snapshot.identity = identity;
        Ok(snapshot)
    }

    async fn set_outlet(&self, outlet: u16, action: OutletAction) -> Result<(), TransportError> {
        let value = oids::outlet_command_value(action).ok_or_else(|| {
            TransportError::refused(format!(
                "command {:?} requires the serial console",
                action.as_str()
            ))
        })?;
        self.client
            .set_integer(&oids::oid_outlet_command(outlet), value)
            .await
    }

    async fn set_preferred_source(&self, source: AtsSource) -> Result<(), TransportError> {
        self.client
            .set_integer(oids::OID_ATS_PREFERRED_SOURCE, source.raw())
            .await
    }

    async fn set_auto_transfer(&self, enabled: bool) -> Result<(), TransportError> {
        let value = if enabled { 1 } else { 2 };
        self.client
            .set_integer(oids::OID_ATS_AUTO_TRANSFER, value)
            .await
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

    /// 进程内模拟代理：一个 UDP socket 按固定表应答 GET/SET。
    async fn spawn_agent(
        responses: BTreeMap<String, SnmpValue>,
    ) -> (SocketAddr, tokio::task::JoinHandle<()>) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.expect("bind agent");
        let addr = socket.local_addr().expect("addr");
        let handle = tokio::spawn(async move {
            let mut buf = [0u8; 8192];
            loop {
                let Ok((len, from)) = socket.recv_from(&mut buf).await else {
                    return;
                };
                let Ok(request) = codec::decode_message(&buf[..len]) else {
                    continue;
                };
                let varbinds = request
                    .pdu
                    .varbinds
                    .iter()
                    .map(|vb| {
                        let key = codec::format_oid(&vb.oid);
                        let value = match request.pdu.pdu_type {
                            codec::PDU_SET_REQUEST => vb.value.clone(),
                            _ => responses
                                .get(&key)
                                .cloned()
                                .unwrap_or(SnmpValue::NoSuchObject),
                        };
                        VarBind {
                            oid: vb.oid.clone(),
                            value,
                        }
                    })
                    .collect();
                let response = Message {
                    version: codec::VERSION_2C,
                    community: request.community.clone(),
                    pdu: Pdu {
                        pdu_type: codec::PDU_RESPONSE,
                        request_id: request.pdu.request_id,
                        error_status: 0,
                        error_index: 0,
                        varbinds,
                    },
                };
                let _ = socket.send_to(&codec::encode_message(&response), from).await;
            }
        });
        (addr, handle)
    }

    fn client_config(addr: SocketAddr) -> SnmpClientConfig {
        let mut config = SnmpClientConfig::new(addr.ip().to_string(), addr.port());
        config.timeout = Duration::from_millis(500);
        config.retries = 0;
        config
    }

    #[tokio::test]
    async fn get_many_skips_missing_objects() {
        let mut table = BTreeMap::new();
        table.insert(
            oids::OID_INPUT_VOLTAGE.to_string(),
            SnmpValue::Integer(1204),
        );
        table.insert(
            oids::OID_DEVICE_NAME.to_string(),
            SnmpValue::OctetString(b"PDU44001".to_vec()),
        );
        let (addr, agent) = spawn_agent(table).await;

        let client = SnmpClient::bind(client_config(addr)).await.expect("client");
        let oids_list = vec![
            oids::OID_INPUT_VOLTAGE.to_string(),
            oids::OID_DEVICE_NAME.to_string(),
            oids::OID_ENVIRO_TEMPERATURE.to_string(),
        ];
        let values = client.get_many(&oids_list).await.expect("get_many");
        assert_eq!(
            values.get(oids::OID_INPUT_VOLTAGE),
            Some(&RawValue::Integer(1204))
        );
        assert_eq!(
            values.get(oids::OID_DEVICE_NAME).and_then(RawValue::as_text),
            Some("PDU44001")
        );
        assert!(!values.contains_key(oids::OID_ENVIRO_TEMPERATURE));
        agent.abort();
    }

    #[tokio::test]
    async fn timeout_is_reported_as_timeout_kind() {
        // 绑定但不应答的代理
        let silent = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
        let addr = silent.local_addr().expect("addr");
        let client = SnmpClient::bind(client_config(addr)).await.expect("client");

        let err = client
            .get(oids::OID_INPUT_VOLTAGE)
            .await
            .expect_err("should time out");
        assert_eq!(err.kind, crate::ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn poll_decodes_snapshot_through_domain() {
        let mut table = BTreeMap::new();
        table.insert(
            oids::OID_INPUT_VOLTAGE.to_string(),
            SnmpValue::Integer(1204),
        );
        table.insert(
            oids::OID_DEVICE_NAME.to_string(),
            SnmpValue::OctetString(b"PDU44001".to_vec()),
        );
        table.insert(oids::OID_OUTLET_COUNT.to_string(), SnmpValue::Integer(2));
        table.insert(oids::oid_outlet_state(1), SnmpValue::Integer(1));
        table.insert(oids::oid_outlet_state(2), SnmpValue::Integer(2));
        table.insert(oids::oid_outlet_current(2), SnmpValue::Integer(2));
        table.insert(
            oids::OID_SYS_UPTIME.to_string(),
            SnmpValue::TimeTicks(12_345),
        );
        let (addr, agent) = spawn_agent(table).await;

        let client = SnmpClient::bind(client_config(addr)).await.expect("client");
        let transport = SnmpTransport::new(client, 2);
        transport.state().outlet_count = 2;

        let snapshot = transport.poll().await.expect("poll");
        assert_eq!(snapshot.input_voltage, Some(120.4));
        assert_eq!(snapshot.outlets[&1].state, domain::OutletState::On);
        assert_eq!(snapshot.outlets[&2].state, domain::OutletState::Off);
        // 计量下限：raw 2 -> 0.0
        assert_eq!(snapshot.outlets[&2].current, Some(0.0));
        assert_eq!(snapshot.uptime_ticks, Some(12_345));
        agent.abort();
    }

    #[tokio::test]
    async fn delayed_command_is_refused_over_snmp() {
        let (addr, agent) = spawn_agent(BTreeMap::new()).await;
        let client = SnmpClient::bind(client_config(addr)).await.expect("client");
        let transport = SnmpTransport::new(client, 2);
        let err = transport
            .set_outlet(3, OutletAction::DelayOn)
            .await
            .expect_err("refused");
        assert_eq!(err.kind, crate::ErrorKind::Refused);
        agent.abort();
    }
}

//! 串口控制台传输实现。
//!
//! CyberPower PDU 的 RS-232 控制台协议（在 PDU44001 上验证）：
//! - 登录名与口令用空格（0x20）作为提交键
//! - `\n` 触发登录提示并作为命令结束符
//! - 认证过程可达 15-20 秒（"Please wait for authentication...."）
//! - 命令输出以 `CyberPower > ` 提示符收尾，长输出分页，
//!   发送空格翻页
//!
//! 控制台是单线程 CLI，所有操作通过一把 `tokio::sync::Mutex`
//! 串行化；会话级错误会丢弃连接，下一次操作重新登录。

pub mod parser;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use domain::model::{AtsSource, DeviceIdentity, OutletAction, Snapshot};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info};

use crate::error::TransportError;
use crate::types::{
    AtsConfig, AtsConfigUpdate, EnergywiseConfig, EventLogEntry, NetworkConfig, NetworkUpdate,
    NotificationsConfig, NotificationsUpdate, OutletConfigEntry, OutletConfigUpdate, Thresholds,
    ThresholdTarget, UserAccount,
};
use crate::{ManagementOps, Transport, TransportId};

/// 串口配置。
#[derive(Debug, Clone)]
pub struct SerialConfig {
    pub port: String,
    pub baud: u32,
    pub username: String,
    pub password: String,
    /// 单次读超时。登录认证另有更长的上限。
    pub timeout: Duration,
}

impl SerialConfig {
    pub fn new(port: impl Into<String>, baud: u32) -> Self {
        Self {
            port: port.into(),
            baud,
            username: "cyber".to_string(),
            password: "cyber".to_string(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// 会话用字节流。生产环境是 tokio-serial，测试可注入内存双工流。
pub trait ConsoleStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> ConsoleStream for T {}

struct Session {
    stream: Box<dyn ConsoleStream>,
}

/// 串口控制台会话客户端。
pub struct SerialClient {
    config: SerialConfig,
    session: tokio::sync::Mutex<Option<Session>>,
}

impl SerialClient {
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            session: tokio::sync::Mutex::new(None),
        }
    }

    /// 用已建立的流构造客户端（测试注入）。流被视为已登录。
    pub fn with_stream(config: SerialConfig, stream: Box<dyn ConsoleStream>) -> Self {
        Self {
            config,
            session: tokio::sync::Mutex::new(Some(Session { stream })),
        }
    }

    async fn open_session(&self) -> Result<Session, TransportError> {
        let stream = tokio_serial::new(&self.config.port, self.config.baud)
            .timeout(self.config.timeout)
            .open_native_async()
            .map_err(|err| {
                TransportError::unreachable(format!("open {}: {err}", self.config.port))
            })?;
        info!(port = %self.config.port, baud = self.config.baud, "serial port opened");
        let mut session = Session {
            stream: Box::new(stream),
        };
        self.login(&mut session).await?;
        Ok(session)
    }

    /// 登录流程：`\n` 探测当前状态，按提示送出用户名与口令
    /// （空格提交），等待提示符。部分固件缓存了用户名会直接跳到
    /// 口令提示。
    async fn login(&self, session: &mut Session) -> Result<(), TransportError> {
        let auth_timeout = self.config.timeout.max(Duration::from_secs(30));
        let deadline = tokio::time::Instant::now() + auth_timeout;

        session.stream.write_all(b"\n").await?;
        session.stream.flush().await?;

        let mut window = String::new();
        let mut sent_username = false;
        let mut sent_password = false;
        loop {
            let mut buf = [0u8; 256];
            let read = tokio::time::timeout_at(deadline, session.stream.read(&mut buf))
                .await
                .map_err(|_| TransportError::authentication("login timed out"))??;
            if read == 0 {
                return Err(TransportError::unreachable("console closed during login"));
            }
            window.push_str(&String::from_utf8_lossy(&buf[..read]));

            if window.contains(parser::PROMPT) {
                debug!("console prompt reached");
                return Ok(());
            }
            if !sent_username && window.contains(parser::LOGIN_PROMPT) {
                session
                    .stream
                    .write_all(format!("{} ", self.config.username).as_bytes())
                    .await?;
                session.stream.flush().await?;
                sent_username = true;
                window.clear();
                continue;
            }
            if !sent_password && window.contains(parser::PASSWORD_PROMPT) {
                session
                    .stream
                    .write_all(format!("{} ", self.config.password).as_bytes())
                    .await?;
                session.stream.flush().await?;
                sent_password = true;
                window.clear();
                continue;
            }
            if window.to_ascii_lowercase().contains("login failed")
                || window.to_ascii_lowercase().contains("access denied")
            {
                return Err(TransportError::authentication("console rejected credentials"));
            }
        }
    }

    /// 执行一条命令并收集到提示符为止的输出。遇到分页提示发送
    /// 空格继续。命令级失败会丢弃会话。
    pub async fn execute(&self, command: &str) -> Result<String, TransportError> {
        let mut guard = self.session.lock().await;
        if guard.is_none() {
            *guard = Some(self.open_session().await?);
        }
        let session = guard.as_mut().ok_or_else(|| {
            TransportError::unknown("serial session unavailable")
        })?;

        match self.execute_inner(session, command).await {
            Ok(output) => Ok(output),
            Err(err) => {
                // 会话状态不可信，下一次操作重新登录
                *guard = None;
                Err(err)
            }
        }
    }

    async fn execute_inner(
        &self,
        session: &mut Session,
        command: &str,
    ) -> Result<String, TransportError> {
        session
            .stream
            .write_all(format!("{command}\n").as_bytes())
            .await?;
        session.stream.flush().await?;

        let mut output = String::new();
        loop {
            let mut buf = [0u8; 1024];
            let read = tokio::time::timeout(self.config.timeout, session.stream.read(&mut buf))
                .await
                .map_err(|_| {
                    TransportError::timeout(format!("console timeout running {command:?}"))
                })??;
            if read == 0 {
                return Err(TransportError::unreachable("console closed"));
            }
            output.push_str(&String::from_utf8_lossy(&buf[..read]));

            if output.trim_end().ends_with(parser::PROMPT.trim_end()) {
                return Ok(output);
            }
            if let Some(tail) = output.lines().last() {
                if tail.to_ascii_lowercase().contains(parser::PAGINATION_PROMPT)
                    && tail.contains("page")
                {
                    session.stream.write_all(b" ").await?;
                    session.stream.flush().await?;
                }
            }
        }
    }

    /// 执行一条设置命令并确认控制台没有报错。
    pub async fn execute_ok(&self, command: &str) -> Result<(), TransportError> {
        let output = self.execute(command).await?;
        let lower = output.to_ascii_lowercase();
        if lower.contains("invalid") || lower.contains("error") || lower.contains("failed") {
            return Err(TransportError::refused(format!(
                "console rejected {command:?}"
            )));
        }
        Ok(())
    }

    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    /// 丢弃当前会话（传输切换或关闭时调用）。
    pub async fn close(&self) {
        let mut guard = self.session.lock().await;
        *guard = None;
    }
}

struct SerialState {
    identity: Option<DeviceIdentity>,
    num_banks: u16,
}

/// 基于串口控制台的 [`Transport`] 实现，含管理操作扩展。
pub struct SerialTransport {
    client: SerialClient,
    state: std::sync::Mutex<SerialState>,
}

impl SerialTransport {
    pub fn new(client: SerialClient, default_num_banks: u16) -> Self {
        Self {
            client,
            state: std::sync::Mutex::new(SerialState {
                identity: None,
                num_banks: default_num_banks,
            }),
        }
    }

    pub fn client(&self) -> &SerialClient {
        &self.client
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SerialState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Transport for SerialTransport {
    fn id(&self) -> TransportId {
        TransportId::Serial
    }

    async fn identify(&self) -> Result<DeviceIdentity, TransportError> {
        let output = self.client.execute("sys show").await?;
        let mut identity = parser::parse_sys_show(&output);

        // 插座数从状态表推导
        let olt_output = self.client.execute("oltsta show").await?;
        let outlets = parser::parse_oltsta_show(&olt_output);
        identity.outlet_count = outlets.len() as u16;

        self.state().identity = Some(identity.clone());
        Ok(identity)
    }

    async fn discover_num_banks(&self) -> Result<u16, TransportError> {
        let output = self.client.execute("devsta show").await?;
        let status = parser::parse_devsta_show(&output);
        let mut state = self.state();
        if !status.bank_currents.is_empty() {
            state.num_banks = status.bank_currents.len() as u16;
        }
        Ok(state.num_banks)
    }

    async fn poll(&self) -> Result<Snapshot, TransportError> {
        let devsta = self.client.execute("devsta show").await?;
        let oltsta = self.client.execute("oltsta show").await?;

        let status = parser::parse_devsta_show(&devsta);
        let outlets = parser::parse_oltsta_show(&oltsta);
        if outlets.is_empty() && status.active_source.is_none() {
            return Err(TransportError::parse("console output had no status data"));
        }

        let (identity, num_banks) = {
            let state = self.state();
            (state.identity.clone(), state.num_banks)
        };
        Ok(parser::build_snapshot(
            &status,
            outlets,
            identity.as_ref(),
            num_banks,
            now_epoch_ms(),
        ))
    }

    async fn set_outlet(&self, outlet: u16, action: OutletAction) -> Result<(), TransportError> {
        self.client
            .execute_ok(&format!("olt {} {}", outlet, action.as_str()))
            .await
    }

    async fn set_preferred_source(&self, source: AtsSource) -> Result<(), TransportError> {
        self.client
            .execute_ok(&format!("srccfg prefer {}", source.as_str()))
            .await
    }

    async fn set_auto_transfer(&self, enabled: bool) -> Result<(), TransportError> {
        let value = if enabled { "enable" } else { "disable" };
        self.client
            .execute_ok(&format!("srccfg autotransfer {value}"))
            .await
    }

    fn management(&self) -> Option<&dyn ManagementOps> {
        Some(self)
    }
}

#[async_trait]
impl ManagementOps for SerialTransport {
    async fn get_thresholds(&self) -> Result<Thresholds, TransportError> {
        let dev_output = self.client.execute("devcfg show").await?;
        let (mut thresholds, _, _) = parser::parse_devcfg_show(&dev_output);
        let bank_output = self.client.execute("bankcfg show").await?;
        thresholds.banks = parser::parse_bankcfg_show(&bank_output);
        Ok(thresholds)
    }

    async fn set_threshold(
        &self,
        target: ThresholdTarget,
        value: f64,
    ) -> Result<(), TransportError> {
        let command = match target {
            ThresholdTarget::DeviceOverload => format!("devcfg overload {value}"),
            ThresholdTarget::DeviceNearOverload => format!("devcfg nearoverload {value}"),
            ThresholdTarget::DeviceLowLoad => format!("devcfg lowload {value}"),
            ThresholdTarget::BankOverload { bank } => format!("bankcfg {bank} overload {value}"),
            ThresholdTarget::BankNearOverload { bank } => {
                format!("bankcfg {bank} nearoverload {value}")
            }
            ThresholdTarget::BankLowLoad { bank } => format!("bankcfg {bank} lowload {value}"),
        };
        self.client.execute_ok(&command).await
    }

    async fn get_network(&self) -> Result<NetworkConfig, TransportError> {
        let output = self.client.execute("netcfg show").await?;
        Ok(parser::parse_netcfg_show(&output))
    }

    async fn set_network(&self, update: NetworkUpdate) -> Result<(), TransportError> {
        if let Some(dhcp) = update.dhcp {
            let value = if dhcp { "enable" } else { "disable" };
            self.client.execute_ok(&format!("netcfg dhcp {value}")).await?;
        }
        if let Some(ip) = update.ip {
            self.client.execute_ok(&format!("netcfg ip {ip}")).await?;
        }
        if let Some(mask) = update.subnet_mask {
            self.client.execute_ok(&format!("netcfg mask {mask}")).await?;
        }
        if let Some(gateway) = update.gateway {
            self.client
                .execute_ok(&format!("netcfg gateway {gateway}"))
                .await?;
        }
        Ok(())
    }

    async fn get_ats_config(&self) -> Result<AtsConfig, TransportError> {
        let output = self.client.execute("srccfg show").await?;
        Ok(parser::parse_srccfg_show(&output))
    }

    async fn set_ats_config(&self, update: AtsConfigUpdate) -> Result<(), TransportError> {
        if let Some(source) = update.preferred_source {
            self.client
                .execute_ok(&format!("srccfg prefer {}", source.to_ascii_uppercase()))
                .await?;
        }
        if let Some(sensitivity) = update.voltage_sensitivity {
            self.client
                .execute_ok(&format!("srccfg sensitivity {sensitivity}"))
                .await?;
        }
        if let Some(upper) = update.voltage_upper_limit {
            self.client
                .execute_ok(&format!("srccfg upperlimit {upper}"))
                .await?;
        }
        if let Some(lower) = update.voltage_lower_limit {
            self.client
                .execute_ok(&format!("srccfg lowerlimit {lower}"))
                .await?;
        }
        Ok(())
    }

    async fn get_outlet_config(
        &self,
    ) -> Result<BTreeMap<u16, OutletConfigEntry>, TransportError> {
        let output = self.client.execute("oltcfg show").await?;
        Ok(parser::parse_oltcfg_show(&output))
    }

    async fn set_outlet_config(
        &self,
        outlet: u16,
        update: OutletConfigUpdate,
    ) -> Result<(), TransportError> {
        if let Some(name) = update.name {
            self.client
                .execute_ok(&format!("oltcfg {outlet} name {name}"))
                .await?;
        }
        if let Some(delay) = update.on_delay {
            self.client
                .execute_ok(&format!("oltcfg {outlet} ondelay {delay}"))
                .await?;
        }
        if let Some(delay) = update.off_delay {
            self.client
                .execute_ok(&format!("oltcfg {outlet} offdelay {delay}"))
                .await?;
        }
        if let Some(duration) = update.reboot_duration {
            self.client
                .execute_ok(&format!("oltcfg {outlet} rebootduration {duration}"))
                .await?;
        }
        Ok(())
    }

    async fn set_device_name(&self, name: &str) -> Result<(), TransportError> {
        self.client.execute_ok(&format!("sys name {name}")).await
    }

    async fn set_device_location(&self, location: &str) -> Result<(), TransportError> {
        self.client
            .execute_ok(&format!("sys location {location}"))
            .await
    }

    async fn check_default_credentials(&self) -> Result<bool, TransportError> {
        // 桥接器用配置的凭据登录；若仍是出厂值即告警
        let config = self.client.config();
        Ok(config.username == "cyber" && config.password == "cyber")
    }

    async fn change_password(
        &self,
        account: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), TransportError> {
        self.client
            .execute_ok(&format!("usercfg {account} password {old_password} {new_password}"))
            .await
    }

    async fn get_event_log(&self) -> Result<Vec<EventLogEntry>, TransportError> {
        let output = self.client.execute("eventlog show").await?;
        Ok(parser::parse_eventlog_show(&output))
    }

    async fn get_notifications(&self) -> Result<NotificationsConfig, TransportError> {
        let traps = self.client.execute("trapcfg show").await?;
        let smtp = self.client.execute("smtpcfg show").await?;
        let email = self.client.execute("emailcfg show").await?;
        let syslog = self.client.execute("syslogcfg show").await?;
        Ok(NotificationsConfig {
            traps: parser::parse_trapcfg_show(&traps),
            smtp: parser::parse_smtpcfg_show(&smtp),
            email_recipients: parser::parse_emailcfg_show(&email),
            syslog_servers: parser::parse_syslogcfg_show(&syslog),
        })
    }

    async fn set_notifications(&self, update: NotificationsUpdate) -> Result<(), TransportError> {
        if let Some(trap) = update.trap {
            self.client
                .execute_ok(&format!(
                    "trapcfg {} ip {} community {}",
                    trap.index, trap.ip, trap.community
                ))
                .await?;
        }
        if let Some(smtp) = update.smtp {
            self.client
                .execute_ok(&format!(
                    "smtpcfg server {} port {} sender {}",
                    smtp.server, smtp.port, smtp.sender
                ))
                .await?;
        }
        if let Some(email) = update.email {
            self.client
                .execute_ok(&format!("emailcfg {} address {}", email.index, email.address))
                .await?;
        }
        if let Some(syslog) = update.syslog {
            self.client
                .execute_ok(&format!(
                    "syslogcfg {} ip {} port {}",
                    syslog.index, syslog.ip, syslog.port
                ))
                .await?;
        }
        Ok(())
    }

    async fn get_energywise(&self) -> Result<EnergywiseConfig, TransportError> {
        let output = self.client.execute("energywise show").await?;
        Ok(parser::parse_energywise_show(&output))
    }

    async fn set_energywise(&self, config: EnergywiseConfig) -> Result<(), TransportError> {
        let value = if config.enabled { "enable" } else { "disable" };
        self.client
            .execute_ok(&format!(
                "energywise {value} domain {} port {}",
                config.domain, config.port
            ))
            .await
    }

    async fn get_users(&self) -> Result<Vec<UserAccount>, TransportError> {
        let output = self.client.execute("usercfg show").await?;
        Ok(parser::parse_usercfg_show(&output))
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

    const DEVSTA: &str = "\
Active Source   : A\r\n\
Source Voltage (A/B) : 119.7 /118.2 V\r\n\
Bank 1 Current : 0.2 A\r\n\
Bank 2 Current : 0.1 A\r\n\
CyberPower > ";

    /// 内存里的假控制台：读命令行，按表回应，并在第一页后要求翻页。
    fn spawn_console(
        mut device_side: tokio::io::DuplexStream,
        responses: Vec<(&'static str, String)>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut buf = vec![0u8; 256];
            let mut pending = String::new();
            loop {
                let Ok(read) = device_side.read(&mut buf).await else {
                    return;
                };
                if read == 0 {
                    return;
                }
                pending.push_str(&String::from_utf8_lossy(&buf[..read]));
                while let Some(pos) = pending.find('\n') {
                    let line = pending[..pos].trim().to_string();
                    pending = pending[pos + 1..].to_string();
                    for (command, response) in &responses {
                        if line == *command {
                            let _ = device_side.write_all(response.as_bytes()).await;
                            let _ = device_side.flush().await;
                        }
                    }
                }
            }
        })
    }

    fn test_client(device_side: tokio::io::DuplexStream) -> SerialClient {
        let mut config = SerialConfig::new("/dev/null", 9600);
        config.timeout = Duration::from_millis(500);
        SerialClient::with_stream(config, Box::new(device_side))
    }

    #[tokio::test]
    async fn execute_reads_until_prompt() {
        let (bridge_side, device_side) = tokio::io::duplex(4096);
        let console = spawn_console(
            device_side,
            vec![("devsta show", DEVSTA.to_string())],
        );
        let client = test_client(bridge_side);

        let output = client.execute("devsta show").await.expect("execute");
        assert!(output.contains("Active Source"));
        let status = parser::parse_devsta_show(&output);
        assert_eq!(status.source_a_voltage, Some(119.7));
        console.abort();
    }

    #[tokio::test]
    async fn pagination_is_continued_with_space() {
        let page1 = "Line 1\r\npress <space> for next page\r\n";
        let page2 = "Line 2\r\nCyberPower > ";
        let (bridge_side, mut device_side) = tokio::io::duplex(4096);

        let console = tokio::spawn(async move {
            let mut buf = vec![0u8; 64];
            // 等待命令行
            let read = device_side.read(&mut buf).await.expect("command");
            assert!(String::from_utf8_lossy(&buf[..read]).contains("eventlog show"));
            device_side.write_all(page1.as_bytes()).await.expect("page1");
            // 等待翻页空格
            let read = device_side.read(&mut buf).await.expect("space");
            assert_eq!(&buf[..read], b" ");
            device_side.write_all(page2.as_bytes()).await.expect("page2");
        });

        let client = test_client(bridge_side);
        let output = client.execute("eventlog show").await.expect("execute");
        assert!(output.contains("Line 1"));
        assert!(output.contains("Line 2"));
        console.await.expect("console");
    }

    #[tokio::test]
    async fn console_error_output_is_refused() {
        let (bridge_side, device_side) = tokio::io::duplex(4096);
        let console = spawn_console(
            device_side,
            vec![(
                "olt 3 on",
                "Invalid command\r\nCyberPower > ".to_string(),
            )],
        );
        let client = test_client(bridge_side);
        let transport = SerialTransport::new(client, 2);

        let err = transport
            .set_outlet(3, OutletAction::On)
            .await
            .expect_err("refused");
        assert_eq!(err.kind, crate::ErrorKind::Refused);
        console.abort();
    }

    #[tokio::test]
    async fn poll_builds_snapshot_from_console_output() {
        let oltsta = "\
Index  Name        Status  Current(A)  Power(W)\r\n\
1      Outlet1     On      0.1         12\r\n\
2      Outlet2     Off\r\n\
CyberPower > ";
        let (bridge_side, device_side) = tokio::io::duplex(4096);
        let console = spawn_console(
            device_side,
            vec![
                ("devsta show", DEVSTA.to_string()),
                ("oltsta show", oltsta.to_string()),
            ],
        );
        let client = test_client(bridge_side);
        let transport = SerialTransport::new(client, 2);

        let snapshot = transport.poll().await.expect("poll");
        assert_eq!(snapshot.ats_current_source, Some(AtsSource::A));
        assert_eq!(snapshot.outlets[&1].state, domain::OutletState::On);
        assert_eq!(snapshot.outlets[&2].state, domain::OutletState::Off);
        assert_eq!(snapshot.banks[&1].current, Some(0.2));
        console.abort();
    }
}

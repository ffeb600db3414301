//! 轮询器端到端行为：模拟传输上的轮询、命令、失效切换与自动化。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::model::{OutletAction, OutletState};
use pdu_automation::{Engine, RuleDoc, ScheduleType};
use pdu_config::{PduConfig, TransportKind};
use pdu_mqtt::{MqttError, Publisher};
use pdu_runtime::poller::{spawn_poller, PollerDeps};
use pdu_runtime::{CommandOrigin, HealthState, PollerConfig, PollerHandle};
use pdu_storage::{InMemoryHistoryStore, JsonDocStore, SampleWriter, SampleWriterConfig};
use pdu_transport::{MockTransport, Transport};

/// 记录发布的测试发布器。
#[derive(Default)]
struct RecordingPublisher {
    messages: tokio::sync::Mutex<Vec<(String, Vec<u8>, bool)>>,
}

impl RecordingPublisher {
    async fn last_payload(&self, topic: &str) -> Option<Vec<u8>> {
        self.messages
            .lock()
            .await
            .iter()
            .rev()
            .find(|(t, _, _)| t == topic)
            .map(|(_, payload, _)| payload.clone())
    }

    async fn count_for(&self, topic: &str) -> usize {
        self.messages
            .lock()
            .await
            .iter()
            .filter(|(t, _, _)| t == topic)
            .count()
    }
}

#[async_trait]
impl Publisher for RecordingPublisher {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retained: bool,
        _qos: u8,
    ) -> Result<(), MqttError> {
        self.messages
            .lock()
            .await
            .push((topic.to_string(), payload, retained));
        Ok(())
    }
}

struct Rig {
    handle: Arc<PollerHandle>,
    publisher: Arc<RecordingPublisher>,
    store: Arc<InMemoryHistoryStore>,
    mock: Arc<MockTransport>,
    secondary: Option<Arc<MockTransport>>,
    _dir: tempfile::TempDir,
}

fn device_config(with_fallback: bool) -> PduConfig {
    let mut device = PduConfig::mock("pdu44001");
    if with_fallback {
        // 失效切换要求主传输为 SNMP 且配置了串口；测试里两路都由
        // 模拟传输扮演
        device.transport = TransportKind::Snmp;
        device.host = "192.0.2.10".to_string();
        device.serial_port = "/dev/ttyUSB3".to_string();
    }
    device
}

fn build_rig(interval_ms: u64, with_fallback: bool, rules: Vec<RuleDoc>) -> Rig {
    let dir = tempfile::tempdir().expect("tempdir");
    let publisher = Arc::new(RecordingPublisher::default());
    let store = Arc::new(InMemoryHistoryStore::new());
    let writer = Arc::new(SampleWriter::new(
        store.clone(),
        SampleWriterConfig {
            batch_size: 1,
            flush_interval: Duration::from_millis(0),
            max_failures: 5,
        },
    ));

    let rules_store = JsonDocStore::new(dir.path().join("rules_pdu44001.json"));
    if !rules.is_empty() {
        rules_store.save(&rules).expect("seed rules");
    }
    let engine = Engine::load("pdu44001", rules_store, 10);
    let names_store = JsonDocStore::new(dir.path().join("outlet_names_pdu44001.json"));

    let mock = Arc::new(MockTransport::new());
    let secondary = if with_fallback {
        Some(Arc::new(MockTransport::new()))
    } else {
        None
    };

    let handle = spawn_poller(
        PollerConfig {
            device: device_config(with_fallback),
            interval: Duration::from_millis(interval_ms),
            command_timeout: Duration::from_secs(2),
        },
        PollerDeps {
            primary: mock.clone() as Arc<dyn Transport>,
            secondary: secondary
                .clone()
                .map(|s| s as Arc<dyn Transport>),
            primary_snmp: None,
            publisher: publisher.clone(),
            writer,
            engine,
            names_store,
            mqtt: None,
            recovery_scanner: None,
        },
        true,
    );

    Rig {
        handle,
        publisher,
        store,
        mock,
        secondary,
        _dir: dir,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test]
async fn polling_publishes_retained_metrics_and_records_history() {
    let rig = build_rig(20, false, Vec::new());

    assert!(
        wait_until(|| rig.handle.shared.snapshot().is_some(), Duration::from_secs(5)).await,
        "no snapshot produced"
    );
    tokio::time::sleep(Duration::from_millis(100)).await;

    let state = rig
        .publisher
        .last_payload("pdu/pdu44001/outlet/3/state")
        .await
        .expect("outlet state topic");
    assert_eq!(state, b"on");

    let status = rig
        .publisher
        .last_payload("pdu/pdu44001/status")
        .await
        .expect("status topic");
    let status: serde_json::Value = serde_json::from_slice(&status).expect("status json");
    assert_eq!(status["device"]["id"], "pdu44001");
    assert_eq!(status["outlets"]["3"]["state"], "on");

    // 保留标志
    let messages = rig.publisher.messages.lock().await;
    let outlet_state = messages
        .iter()
        .find(|(topic, _, _)| topic == "pdu/pdu44001/outlet/3/state")
        .expect("outlet state message");
    assert!(outlet_state.2, "metric topics are retained");
    drop(messages);

    // 历史样本持续写入
    assert!(rig.store.len() > 0, "history samples recorded");

    // 健康为 healthy
    let health = rig.handle.shared.health();
    assert_eq!(health.state, HealthState::Healthy);

    // 快照时间戳严格递增
    let first = rig.handle.shared.snapshot().expect("snapshot").ts_ms;
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = rig.handle.shared.snapshot().expect("snapshot").ts_ms;
    assert!(second > first);

    rig.handle.shutdown().await;
}

#[tokio::test]
async fn outlet_command_flows_through_the_fifo() {
    let rig = build_rig(20, false, Vec::new());
    assert!(
        wait_until(|| rig.handle.shared.snapshot().is_some(), Duration::from_secs(5)).await
    );

    let response = rig
        .handle
        .send_command(3, OutletAction::Off, CommandOrigin::Http)
        .await
        .expect("command");
    assert!(response.success);
    assert_eq!(response.command, "off");
    assert_eq!(response.outlet, 3);
    assert!(response.error.is_none());
    assert_eq!(rig.mock.outlet_state(3), Some(OutletState::Off));

    // 响应主题已发布
    let mut response_seen = false;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if rig
            .publisher
            .count_for("pdu/pdu44001/outlet/3/command/response")
            .await
            > 0
        {
            response_seen = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(response_seen, "command response published");

    // 下一拍快照反映 off 状态
    assert!(
        wait_until(
            || {
                rig.handle
                    .shared
                    .snapshot()
                    .map(|s| s.outlets[&3].state == OutletState::Off)
                    .unwrap_or(false)
            },
            Duration::from_secs(2)
        )
        .await
    );

    rig.handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transport_failover_swaps_to_secondary_after_thirty_failures() {
    let rig = build_rig(10, true, Vec::new());
    assert!(
        wait_until(|| rig.handle.shared.snapshot().is_some(), Duration::from_secs(5)).await
    );

    // 打断主传输
    rig.mock.set_failing(true);

    assert!(
        wait_until(
            || rig.handle.shared.health().state == HealthState::Recovering,
            Duration::from_secs(10)
        )
        .await,
        "expected swap to fallback, got {:?}",
        rig.handle.shared.health()
    );
    let health = rig.handle.shared.health();
    assert_eq!(health.swap_count, 1);
    assert_eq!(health.consecutive_failures, 0);

    // 备用传输继续出数
    let secondary = rig.secondary.as_ref().expect("secondary");
    secondary
        .set_outlet(5, OutletAction::Off)
        .await
        .expect("prime secondary");
    assert!(
        wait_until(
            || {
                rig.handle
                    .shared
                    .snapshot()
                    .map(|s| s.outlets[&5].state == OutletState::Off)
                    .unwrap_or(false)
            },
            Duration::from_secs(5)
        )
        .await,
        "metrics resume via fallback"
    );

    rig.handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn without_secondary_the_device_goes_lost_and_stays_polled() {
    let rig = build_rig(10, false, Vec::new());
    assert!(
        wait_until(|| rig.handle.shared.snapshot().is_some(), Duration::from_secs(5)).await
    );

    rig.mock.set_failing(true);
    assert!(
        wait_until(
            || rig.handle.shared.health().state == HealthState::Lost,
            Duration::from_secs(10)
        )
        .await
    );

    // 恢复后回到 healthy
    rig.mock.set_failing(false);
    assert!(
        wait_until(
            || rig.handle.shared.health().state == HealthState::Healthy,
            Duration::from_secs(5)
        )
        .await
    );

    rig.handle.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn automation_rule_fires_and_restores_via_the_command_path() {
    let rule = RuleDoc {
        name: "low".to_string(),
        input: 1,
        condition: "voltage_below".to_string(),
        threshold: serde_json::json!(100.0),
        outlet: serde_json::json!(5),
        action: "off".to_string(),
        restore: true,
        delay: 0,
        days_of_week: vec![],
        schedule_type: ScheduleType::Continuous,
        enabled: true,
    };
    let rig = build_rig(20, false, vec![rule]);
    assert!(
        wait_until(|| rig.handle.shared.snapshot().is_some(), Duration::from_secs(5)).await
    );

    // 输入 A 失电 → 源电压 0 → 规则触发，插座 5 关断
    rig.mock.simulate_input_failure(1);
    assert!(
        wait_until(
            || rig.mock.outlet_state(5) == Some(OutletState::Off),
            Duration::from_secs(5)
        )
        .await,
        "rule should switch outlet 5 off"
    );

    // 事件已发布
    let mut event_seen = false;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if rig
            .publisher
            .count_for("pdu/pdu44001/automation/event")
            .await
            > 0
        {
            event_seen = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(event_seen, "automation event published");

    // 输入恢复 → restore，插座 5 回到 on
    rig.mock.simulate_input_restore(1);
    assert!(
        wait_until(
            || rig.mock.outlet_state(5) == Some(OutletState::On),
            Duration::from_secs(5)
        )
        .await,
        "restore should switch outlet 5 back on"
    );

    let events = rig.handle.rule_events().await.expect("events");
    assert!(events.iter().any(|e| e.event_type == "triggered"));
    assert!(events.iter().any(|e| e.event_type == "restored"));

    rig.handle.shutdown().await;
}

#[tokio::test]
async fn outlet_name_overrides_apply_to_snapshots() {
    let rig = build_rig(20, false, Vec::new());
    assert!(
        wait_until(|| rig.handle.shared.snapshot().is_some(), Duration::from_secs(5)).await
    );

    rig.handle
        .set_outlet_name(3, Some("Router".to_string()))
        .await
        .expect("rename");
    assert!(
        wait_until(
            || {
                rig.handle
                    .shared
                    .snapshot()
                    .map(|s| s.outlets[&3].name == "Router")
                    .unwrap_or(false)
            },
            Duration::from_secs(2)
        )
        .await
    );

    let names = rig.handle.outlet_names().await.expect("names");
    assert_eq!(names.get("3").map(String::as_str), Some("Router"));

    rig.handle.shutdown().await;
}

#[tokio::test]
async fn rules_crud_via_the_poller_channel() {
    let rig = build_rig(20, false, Vec::new());

    let doc = RuleDoc {
        name: "night".to_string(),
        input: 0,
        condition: "time_between".to_string(),
        threshold: serde_json::json!("22:00-06:00"),
        outlet: serde_json::json!("1-3"),
        action: "off".to_string(),
        restore: true,
        delay: 0,
        days_of_week: vec![],
        schedule_type: ScheduleType::Continuous,
        enabled: true,
    };
    let view = rig.handle.create_rule(doc.clone()).await.expect("create");
    assert_eq!(view.doc.name, "night");

    let listed = rig.handle.list_rules().await.expect("list");
    assert_eq!(listed.len(), 1);

    // 越界插座被拒绝（mock 有 10 个插座）
    let mut bad = doc.clone();
    bad.name = "bad".to_string();
    bad.outlet = serde_json::json!(11);
    assert!(rig.handle.create_rule(bad).await.is_err());

    let toggled = rig.handle.toggle_rule("night".to_string()).await.expect("toggle");
    assert!(!toggled.doc.enabled);

    rig.handle.delete_rule("night".to_string()).await.expect("delete");
    assert!(rig.handle.list_rules().await.expect("list").is_empty());

    rig.handle.shutdown().await;
}

#[tokio::test]
async fn paused_poller_starts_on_demand() {
    let dir = tempfile::tempdir().expect("tempdir");
    let publisher = Arc::new(RecordingPublisher::default());
    let store = Arc::new(InMemoryHistoryStore::new());
    let writer = Arc::new(SampleWriter::new(store, SampleWriterConfig::default()));
    let engine = Engine::load(
        "pdu44001",
        JsonDocStore::new(dir.path().join("rules.json")),
        10,
    );
    let handle = spawn_poller(
        PollerConfig {
            device: device_config(false),
            interval: Duration::from_millis(20),
            command_timeout: Duration::from_secs(2),
        },
        PollerDeps {
            primary: Arc::new(MockTransport::new()),
            secondary: None,
            primary_snmp: None,
            publisher,
            writer,
            engine,
            names_store: JsonDocStore::new(dir.path().join("names.json")),
            mqtt: None,
            recovery_scanner: None,
        },
        false,
    );

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(handle.shared.snapshot().is_none(), "paused poller must not poll");

    handle.start();
    assert!(
        wait_until(|| handle.shared.snapshot().is_some(), Duration::from_secs(5)).await
    );
    handle.shutdown().await;
}

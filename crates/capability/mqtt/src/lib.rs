//! # MQTT 客户端包装
//!
//! 在 rumqttc 之上提供桥接器需要的契约：
//! - **遗嘱**：连接时在 `pdu/{device_id}/bridge/status` 注册保留的
//!   `offline` 遗嘱（broker 侧遗嘱只有一条，挂在首个设备主题上；
//!   正常关闭时逐设备发布 `offline`）
//! - **上线标记**：连接成功后向每个设备状态主题发布保留的 `online`
//! - **离线队列**：断连期间 `publish` 入有界 FIFO（默认 10 000），
//!   队满丢最旧并计数；重连后按序回放，保留 retained 标志
//! - **订阅分发**：`+`/`#` 通配符匹配，处理器错误只记日志不断订阅
//!
//! `publish`/`subscribe` 可从任意任务调用；事件循环由独立任务驱动，
//! 出错退避 1 秒重试。

pub mod topics;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Packet, QoS};
use tracing::{debug, info, warn};

/// MQTT 层错误。
#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    #[error("mqtt client error: {0}")]
    Client(String),
}

/// 发布接口。生产实现是 [`BridgeMqtt`]，测试可注入记录器。
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retained: bool,
        qos: u8,
    ) -> Result<(), MqttError>;
}

/// 空发布器（接线与测试占位）。
#[derive(Debug, Default)]
pub struct NoopPublisher;

#[async_trait]
impl Publisher for NoopPublisher {
    async fn publish(
        &self,
        _topic: &str,
        _payload: Vec<u8>,
        _retained: bool,
        _qos: u8,
    ) -> Result<(), MqttError> {
        Ok(())
    }
}

/// 订阅消息处理器。
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, topic: &str, payload: &[u8]);
}

/// 连接健康信息（/api/status 的 mqtt 段）。
#[derive(Debug, Clone)]
pub struct MqttStatus {
    pub connected: bool,
    pub reconnect_count: u64,
    pub queued: usize,
    pub dropped: u64,
    pub broker: String,
    pub port: u16,
}

/// MQTT 配置。
#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    /// 离线队列上限，队满丢最旧。
    pub queue_limit: usize,
    /// 连接时注册遗嘱的主题（首个设备的 bridge/status）。
    pub will_topic: Option<String>,
}

impl MqttConfig {
    pub fn new(broker: impl Into<String>, port: u16, client_id: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
            port,
            username: None,
            password: None,
            client_id: client_id.into(),
            queue_limit: 10_000,
            will_topic: None,
        }
    }
}

struct QueuedPublish {
    topic: String,
    payload: Vec<u8>,
    retained: bool,
    qos: QoS,
}

struct Subscription {
    filter: String,
    qos: QoS,
    handler: Arc<dyn MessageHandler>,
}

struct Inner {
    client: AsyncClient,
    config: MqttConfig,
    connected: AtomicBool,
    ever_connected: AtomicBool,
    reconnect_count: AtomicU64,
    dropped: AtomicU64,
    queue: Mutex<VecDeque<QueuedPublish>>,
    subscriptions: Mutex<Vec<Subscription>>,
    /// 连接后要发布保留 `online` 的设备状态主题。
    online_topics: Mutex<Vec<String>>,
}

/// 线程安全的桥接 MQTT 客户端。
#[derive(Clone)]
pub struct BridgeMqtt {
    inner: Arc<Inner>,
}

impl BridgeMqtt {
    /// 建立客户端并启动事件循环任务。连接本身是异步建立的，
    /// 期间的发布进入离线队列。
    pub fn connect(config: MqttConfig) -> (Self, tokio::task::JoinHandle<()>) {
        let mut options =
            MqttOptions::new(config.client_id.clone(), config.broker.clone(), config.port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_max_packet_size(1024 * 1024, 1024 * 1024);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username.clone(), password.clone());
        }
        if let Some(will_topic) = &config.will_topic {
            options.set_last_will(LastWill::new(
                will_topic.clone(),
                b"offline".to_vec(),
                QoS::AtLeastOnce,
                true,
            ));
        }

        let (client, mut eventloop) = AsyncClient::new(options, 64);
        let inner = Arc::new(Inner {
            client,
            config,
            connected: AtomicBool::new(false),
            ever_connected: AtomicBool::new(false),
            reconnect_count: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            queue: Mutex::new(VecDeque::new()),
            subscriptions: Mutex::new(Vec::new()),
            online_topics: Mutex::new(Vec::new()),
        });

        let driver = inner.clone();
        let handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        driver.on_connected().await;
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        driver
                            .dispatch(&publish.topic, &publish.payload)
                            .await;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        if driver.connected.swap(false, Ordering::SeqCst) {
                            warn!(error = %err, "mqtt connection lost");
                        }
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        (Self { inner }, handle)
    }

    /// 注册一个设备状态主题：连接后发布保留 `online`。
    pub async fn register_device_status(&self, device_id: &str) {
        let topic = topics::bridge_status(device_id);
        self.inner
            .online_topics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(topic.clone());
        if self.inner.connected.load(Ordering::SeqCst) {
            let _ = self.publish(&topic, b"online".to_vec(), true, 1).await;
        }
    }

    /// 取消注册并发布保留 `offline`（设备移除）。
    pub async fn unregister_device_status(&self, device_id: &str) {
        let topic = topics::bridge_status(device_id);
        self.inner
            .online_topics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|t| t != &topic);
        let _ = self.publish(&topic, b"offline".to_vec(), true, 1).await;
    }

    /// 订阅主题过滤器。断连期间注册的订阅会在重连后补订。
    pub async fn subscribe(
        &self,
        filter: &str,
        qos: u8,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), MqttError> {
        let qos = qos_from_u8(qos);
        self.inner
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Subscription {
                filter: filter.to_string(),
                qos,
                handler,
            });
        if self.inner.connected.load(Ordering::SeqCst) {
            self.inner
                .client
                .subscribe(filter, qos)
                .await
                .map_err(|err| MqttError::Client(err.to_string()))?;
        }
        Ok(())
    }

    /// 退订并丢弃离线队列中该前缀的待发布消息（设备移除路径）。
    pub async fn unsubscribe_prefix(&self, prefix: &str) {
        let removed: Vec<String> = {
            let mut subscriptions = self
                .inner
                .subscriptions
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            let (dropped, kept): (Vec<_>, Vec<_>) = subscriptions
                .drain(..)
                .partition(|s| s.filter.starts_with(prefix));
            *subscriptions = kept;
            dropped.into_iter().map(|s| s.filter).collect()
        };
        for filter in removed {
            let _ = self.inner.client.unsubscribe(filter).await;
        }
        self.inner
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|q| !q.topic.starts_with(prefix));
    }

    /// 连接健康信息。
    pub fn status(&self) -> MqttStatus {
        MqttStatus {
            connected: self.inner.connected.load(Ordering::SeqCst),
            reconnect_count: self.inner.reconnect_count.load(Ordering::SeqCst),
            queued: self
                .inner
                .queue
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .len(),
            dropped: self.inner.dropped.load(Ordering::SeqCst),
            broker: self.inner.config.broker.clone(),
            port: self.inner.config.port,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// 正常关闭：逐设备发布保留 `offline` 后断开。
    pub async fn shutdown(&self) {
        let topics: Vec<String> = self
            .inner
            .online_topics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for topic in topics {
            let _ = self
                .inner
                .client
                .publish(topic, QoS::AtLeastOnce, true, b"offline".to_vec())
                .await;
        }
        let _ = self.inner.client.disconnect().await;
    }
}

impl Inner {
    async fn on_connected(&self) {
        if self.ever_connected.swap(true, Ordering::SeqCst) {
            self.reconnect_count.fetch_add(1, Ordering::SeqCst);
            pdu_telemetry::record_mqtt_reconnect();
        }
        self.connected.store(true, Ordering::SeqCst);
        info!("mqtt connected");

        // 补订阅
        let filters: Vec<(String, QoS)> = {
            let subscriptions = self
                .subscriptions
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            subscriptions
                .iter()
                .map(|s| (s.filter.clone(), s.qos))
                .collect()
        };
        for (filter, qos) in filters {
            if let Err(err) = self.client.subscribe(filter.as_str(), qos).await {
                warn!(filter = %filter, error = %err, "resubscribe failed");
            }
        }

        // 上线标记
        let online: Vec<String> = self
            .online_topics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for topic in online {
            let _ = self
                .client
                .publish(topic, QoS::AtLeastOnce, true, b"online".to_vec())
                .await;
        }

        // 按序回放离线队列
        loop {
            let next = {
                let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
                queue.pop_front()
            };
            let Some(item) = next else { break };
            if let Err(err) = self
                .client
                .publish(item.topic.as_str(), item.qos, item.retained, item.payload)
                .await
            {
                warn!(topic = %item.topic, error = %err, "offline queue drain failed");
                break;
            }
        }
        let remaining = self
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len();
        if remaining == 0 {
            debug!("offline queue drained");
        }
    }

    async fn dispatch(&self, topic: &str, payload: &[u8]) {
        let handlers: Vec<Arc<dyn MessageHandler>> = {
            let subscriptions = self
                .subscriptions
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            subscriptions
                .iter()
                .filter(|s| topic_matches(&s.filter, topic))
                .map(|s| s.handler.clone())
                .collect()
        };
        for handler in handlers {
            handler.handle(topic, payload).await;
        }
    }

    fn enqueue(&self, item: QueuedPublish) {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        if queue.len() >= self.config.queue_limit {
            queue.pop_front();
            self.dropped.fetch_add(1, Ordering::SeqCst);
            pdu_telemetry::record_publish_dropped();
        }
        queue.push_back(item);
        pdu_telemetry::record_publish_queued();
    }
}

#[async_trait]
impl Publisher for BridgeMqtt {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        retained: bool,
        qos: u8,
    ) -> Result<(), MqttError> {
        let qos = qos_from_u8(qos);
        if self.inner.connected.load(Ordering::SeqCst) {
            match self
                .inner
                .client
                .publish(topic, qos, retained, payload.clone())
                .await
            {
                Ok(()) => {
                    pdu_telemetry::record_publish_sent();
                    return Ok(());
                }
                Err(err) => {
                    debug!(topic = %topic, error = %err, "publish failed, queueing");
                }
            }
        }
        self.inner.enqueue(QueuedPublish {
            topic: topic.to_string(),
            payload,
            retained,
            qos,
        });
        Ok(())
    }
}

fn qos_from_u8(value: u8) -> QoS {
    match value {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

/// MQTT 主题过滤器匹配（`+` 单层，`#` 尾部多层）。
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');

    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matching() {
        assert!(topic_matches("pdu/+/outlet/+/command", "pdu/rack1/outlet/3/command"));
        assert!(!topic_matches("pdu/+/outlet/+/command", "pdu/rack1/outlet/3/state"));
        assert!(!topic_matches(
            "pdu/+/outlet/+/command",
            "pdu/rack1/outlet/3/command/response"
        ));
        assert!(topic_matches("pdu/rack1/#", "pdu/rack1/outlet/3/command"));
        assert!(topic_matches("pdu/rack1/#", "pdu/rack1"));
        assert!(!topic_matches("pdu/rack2/#", "pdu/rack1/status"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(!topic_matches("pdu/+", "pdu/rack1/status"));
        assert!(topic_matches("pdu/+", "pdu/rack1"));
    }

    fn unconnectable() -> MqttConfig {
        // 端口 1 上没有 broker，连接永远失败，发布全部入队
        let mut config = MqttConfig::new("127.0.0.1", 1, "test-client");
        config.queue_limit = 2;
        config
    }

    #[tokio::test]
    async fn offline_publishes_queue_in_order_and_drop_oldest() {
        let (mqtt, driver) = BridgeMqtt::connect(unconnectable());
        mqtt.publish("t/1", b"a".to_vec(), true, 1).await.expect("publish");
        mqtt.publish("t/2", b"b".to_vec(), true, 1).await.expect("publish");
        mqtt.publish("t/3", b"c".to_vec(), true, 1).await.expect("publish");

        let status = mqtt.status();
        assert!(!status.connected);
        assert_eq!(status.queued, 2);
        assert_eq!(status.dropped, 1);

        {
            let queue = mqtt.inner.queue.lock().expect("lock");
            let topics: Vec<&str> = queue.iter().map(|q| q.topic.as_str()).collect();
            assert_eq!(topics, vec!["t/2", "t/3"]);
            assert!(queue.iter().all(|q| q.retained));
        }
        driver.abort();
    }

    #[tokio::test]
    async fn unsubscribe_prefix_purges_queue() {
        let (mqtt, driver) = BridgeMqtt::connect(unconnectable());
        mqtt.publish("pdu/rack1/status", b"x".to_vec(), true, 1)
            .await
            .expect("publish");
        mqtt.publish("pdu/rack2/status", b"y".to_vec(), true, 1)
            .await
            .expect("publish");

        mqtt.unsubscribe_prefix("pdu/rack1").await;
        let queue = mqtt.inner.queue.lock().expect("lock");
        let topics: Vec<&str> = queue.iter().map(|q| q.topic.as_str()).collect();
        assert_eq!(topics, vec!["pdu/rack2/status"]);
        drop(queue);
        driver.abort();
    }

    struct Recorder {
        seen: tokio::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        async fn handle(&self, topic: &str, _payload: &[u8]) {
            self.seen.lock().await.push(topic.to_string());
        }
    }

    #[tokio::test]
    async fn dispatch_routes_by_filter() {
        let (mqtt, driver) = BridgeMqtt::connect(unconnectable());
        let recorder = Arc::new(Recorder {
            seen: tokio::sync::Mutex::new(Vec::new()),
        });
        mqtt.subscribe("pdu/+/outlet/+/command", 1, recorder.clone())
            .await
            .expect("subscribe");

        mqtt.inner
            .dispatch("pdu/rack1/outlet/3/command", b"off")
            .await;
        mqtt.inner.dispatch("pdu/rack1/status", b"{}").await;

        let seen = recorder.seen.lock().await;
        assert_eq!(seen.as_slice(), ["pdu/rack1/outlet/3/command"]);
        drop(seen);
        driver.abort();
    }
}

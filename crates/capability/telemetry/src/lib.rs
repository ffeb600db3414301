//! 追踪与桥接器运行指标。
//!
//! 指标为进程级原子计数器，经 [`metrics`] 获取全局实例，
//! `record_*` 自由函数在热路径上无锁累加，HTTP 层通过
//! [`TelemetryMetrics::snapshot`] 导出一致视图。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use tracing_subscriber::{fmt, EnvFilter};

/// 请求级追踪标识。
#[derive(Debug, Clone)]
pub struct RequestIds {
    pub request_id: String,
    pub trace_id: String,
}

/// 桥接器指标快照。
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub poll_success: u64,
    pub poll_failure: u64,
    pub transport_swaps: u64,
    pub device_reboots: u64,
    pub publish_sent: u64,
    pub publish_queued: u64,
    pub publish_dropped: u64,
    pub mqtt_reconnects: u64,
    pub history_samples_written: u64,
    pub history_write_failures: u64,
    pub commands_issued: u64,
    pub command_failures: u64,
    pub rules_fired: u64,
    pub rules_restored: u64,
    pub poll_latency_ms_total: u64,
    pub poll_latency_ms_count: u64,
}

/// 桥接器运行指标。
pub struct TelemetryMetrics {
    poll_success: AtomicU64,
    poll_failure: AtomicU64,
    transport_swaps: AtomicU64,
    device_reboots: AtomicU64,
    publish_sent: AtomicU64,
    publish_queued: AtomicU64,
    publish_dropped: AtomicU64,
    mqtt_reconnects: AtomicU64,
    history_samples_written: AtomicU64,
    history_write_failures: AtomicU64,
    commands_issued: AtomicU64,
    command_failures: AtomicU64,
    rules_fired: AtomicU64,
    rules_restored: AtomicU64,
    poll_latency_ms_total: AtomicU64,
    poll_latency_ms_count: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            poll_success: AtomicU64::new(0),
            poll_failure: AtomicU64::new(0),
            transport_swaps: AtomicU64::new(0),
            device_reboots: AtomicU64::new(0),
            publish_sent: AtomicU64::new(0),
            publish_queued: AtomicU64::new(0),
            publish_dropped: AtomicU64::new(0),
            mqtt_reconnects: AtomicU64::new(0),
            history_samples_written: AtomicU64::new(0),
            history_write_failures: AtomicU64::new(0),
            commands_issued: AtomicU64::new(0),
            command_failures: AtomicU64::new(0),
            rules_fired: AtomicU64::new(0),
            rules_restored: AtomicU64::new(0),
            poll_latency_ms_total: AtomicU64::new(0),
            poll_latency_ms_count: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            poll_success: self.poll_success.load(Ordering::Relaxed),
            poll_failure: self.poll_failure.load(Ordering::Relaxed),
            transport_swaps: self.transport_swaps.load(Ordering::Relaxed),
            device_reboots: self.device_reboots.load(Ordering::Relaxed),
            publish_sent: self.publish_sent.load(Ordering::Relaxed),
            publish_queued: self.publish_queued.load(Ordering::Relaxed),
            publish_dropped: self.publish_dropped.load(Ordering::Relaxed),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
            history_samples_written: self.history_samples_written.load(Ordering::Relaxed),
            history_write_failures: self.history_write_failures.load(Ordering::Relaxed),
            commands_issued: self.commands_issued.load(Ordering::Relaxed),
            command_failures: self.command_failures.load(Ordering::Relaxed),
            rules_fired: self.rules_fired.load(Ordering::Relaxed),
            rules_restored: self.rules_restored.load(Ordering::Relaxed),
            poll_latency_ms_total: self.poll_latency_ms_total.load(Ordering::Relaxed),
            poll_latency_ms_count: self.poll_latency_ms_count.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info，`RUST_LOG` 可覆盖）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成新的 request_id 与 trace_id。
pub fn new_request_ids() -> RequestIds {
    RequestIds {
        request_id: uuid::Uuid::new_v4().to_string(),
        trace_id: uuid::Uuid::new_v4().to_string(),
    }
}

/// 记录一次成功轮询及其耗时。
pub fn record_poll_success(latency_ms: u64) {
    let metrics = metrics();
    metrics.poll_success.fetch_add(1, Ordering::Relaxed);
    metrics
        .poll_latency_ms_total
        .fetch_add(latency_ms, Ordering::Relaxed);
    metrics
        .poll_latency_ms_count
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录一次失败轮询。
pub fn record_poll_failure() {
    metrics().poll_failure.fetch_add(1, Ordering::Relaxed);
}

/// 记录一次传输热切换。
pub fn record_transport_swap() {
    metrics().transport_swaps.fetch_add(1, Ordering::Relaxed);
}

/// 记录一次设备重启检测。
pub fn record_device_reboot() {
    metrics().device_reboots.fetch_add(1, Ordering::Relaxed);
}

/// 记录一次直接发布。
pub fn record_publish_sent() {
    metrics().publish_sent.fetch_add(1, Ordering::Relaxed);
}

/// 记录一次离线入队。
pub fn record_publish_queued() {
    metrics().publish_queued.fetch_add(1, Ordering::Relaxed);
}

/// 记录一次离线队列满丢弃。
pub fn record_publish_dropped() {
    metrics().publish_dropped.fetch_add(1, Ordering::Relaxed);
}

/// 记录一次 MQTT 重连。
pub fn record_mqtt_reconnect() {
    metrics().mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
}

/// 记录历史样本写入条数。
pub fn record_history_written(count: u64) {
    metrics()
        .history_samples_written
        .fetch_add(count, Ordering::Relaxed);
}

/// 记录一次历史写入失败。
pub fn record_history_write_failure() {
    metrics()
        .history_write_failures
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录一次插座命令。
pub fn record_command_issued() {
    metrics().commands_issued.fetch_add(1, Ordering::Relaxed);
}

/// 记录一次插座命令失败。
pub fn record_command_failure() {
    metrics().command_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录一次规则触发。
pub fn record_rule_fired() {
    metrics().rules_fired.fetch_add(1, Ordering::Relaxed);
}

/// 记录一次规则恢复。
pub fn record_rule_restored() {
    metrics().rules_restored.fetch_add(1, Ordering::Relaxed);
}

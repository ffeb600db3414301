//! 样本写入合并。
//!
//! 每个轮询周期提交一小批样本；写入器按条数（默认 10）或时间窗
//! （默认 1000 ms）先到先触发地合并提交。写失败时保留缓冲下次
//! 重试；连续失败达到阈值后让存储重连并丢弃当前缓冲（过载即
//! 有损是设计约定），丢弃计入指标。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{error, warn};

use crate::error::StorageError;
use crate::models::Sample;
use crate::traits::HistoryStore;

/// 写入合并配置。
#[derive(Debug, Clone)]
pub struct SampleWriterConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
    /// 连续失败达到该值后触发存储重连。
    pub max_failures: u32,
}

impl Default for SampleWriterConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            flush_interval: Duration::from_millis(1000),
            max_failures: 5,
        }
    }
}

struct WriterState {
    buffer: Vec<Sample>,
    last_flush: Instant,
    consecutive_failures: u32,
}

/// 合并写入器。历史存储的唯一写入口。
pub struct SampleWriter {
    store: Arc<dyn HistoryStore>,
    config: SampleWriterConfig,
    state: Mutex<WriterState>,
}

impl SampleWriter {
    pub fn new(store: Arc<dyn HistoryStore>, config: SampleWriterConfig) -> Self {
        Self {
            store,
            config,
            state: Mutex::new(WriterState {
                buffer: Vec::new(),
                last_flush: Instant::now(),
                consecutive_failures: 0,
            }),
        }
    }

    /// 提交一批样本，按条数或时间窗触发落盘。
    pub async fn submit(&self, samples: Vec<Sample>) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        state.buffer.extend(samples);
        let due_by_count = state.buffer.len() >= self.config.batch_size;
        let due_by_time = state.last_flush.elapsed() >= self.config.flush_interval;
        if due_by_count || due_by_time {
            self.flush_locked(&mut state).await?;
        }
        Ok(())
    }

    /// 立即落盘（关闭路径调用）。
    pub async fn flush(&self) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        self.flush_locked(&mut state).await
    }

    /// 当前缓冲大小（测试用）。
    pub async fn buffered(&self) -> usize {
        self.state.lock().await.buffer.len()
    }

    async fn flush_locked(&self, state: &mut WriterState) -> Result<(), StorageError> {
        if state.buffer.is_empty() {
            state.last_flush = Instant::now();
            return Ok(());
        }
        match self.store.append(&state.buffer).await {
            Ok(()) => {
                pdu_telemetry::record_history_written(state.buffer.len() as u64);
                state.buffer.clear();
                state.last_flush = Instant::now();
                state.consecutive_failures = 0;
                Ok(())
            }
            Err(err) => {
                pdu_telemetry::record_history_write_failure();
                state.consecutive_failures += 1;
                state.last_flush = Instant::now();
                if state.consecutive_failures >= self.config.max_failures {
                    error!(
                        failures = state.consecutive_failures,
                        dropped = state.buffer.len(),
                        error = %err,
                        "history writes keep failing, reconnecting store"
                    );
                    state.buffer.clear();
                    state.consecutive_failures = 0;
                    self.store.reconnect().await?;
                } else {
                    warn!(
                        failures = state.consecutive_failures,
                        buffered = state.buffer.len(),
                        error = %err,
                        "history write failed, will retry with next batch"
                    );
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::InMemoryHistoryStore;
    use crate::models::{BankSample, Sample};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    fn bank_sample(ts: i64) -> Sample {
        Sample::Bank(BankSample {
            ts,
            device_id: "pdu44001".to_string(),
            bank: 1,
            voltage: Some(120.0),
            current: Some(0.1),
            power: Some(12.0),
            apparent: Some(12.0),
            pf: Some(0.98),
        })
    }

    #[tokio::test]
    async fn flushes_when_batch_size_reached() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let writer = SampleWriter::new(
            store.clone(),
            SampleWriterConfig {
                batch_size: 3,
                flush_interval: Duration::from_secs(3600),
                max_failures: 5,
            },
        );

        writer.submit(vec![bank_sample(1)]).await.expect("submit");
        writer.submit(vec![bank_sample(2)]).await.expect("submit");
        assert_eq!(store.len(), 0);
        writer.submit(vec![bank_sample(3)]).await.expect("submit");
        assert_eq!(store.len(), 3);
        assert_eq!(writer.buffered().await, 0);
    }

    #[tokio::test]
    async fn explicit_flush_drains_buffer() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let writer = SampleWriter::new(store.clone(), SampleWriterConfig::default());
        writer.submit(vec![bank_sample(1)]).await.expect("submit");
        writer.flush().await.expect("flush");
        assert_eq!(store.len(), 1);
    }

    /// 一直失败的存储，记录 reconnect 调用。
    struct FailingStore {
        reconnects: AtomicU32,
        healthy: AtomicBool,
        inner: InMemoryHistoryStore,
    }

    #[async_trait]
    impl HistoryStore for FailingStore {
        async fn append(&self, samples: &[Sample]) -> Result<(), StorageError> {
            if self.healthy.load(Ordering::SeqCst) {
                self.inner.append(samples).await
            } else {
                Err(StorageError::new("disk on fire"))
            }
        }
        async fn query_banks(
            &self,
            device_id: &str,
            start: i64,
            end: i64,
            interval: Option<u32>,
        ) -> Result<Vec<crate::BankPoint>, StorageError> {
            self.inner.query_banks(device_id, start, end, interval).await
        }
        async fn query_outlets(
            &self,
            device_id: &str,
            start: i64,
            end: i64,
            interval: Option<u32>,
        ) -> Result<Vec<crate::OutletPoint>, StorageError> {
            self.inner
                .query_outlets(device_id, start, end, interval)
                .await
        }
        async fn sweep_retention(&self, cutoff: i64) -> Result<u64, StorageError> {
            self.inner.sweep_retention(cutoff).await
        }
        async fn vacuum(&self) -> Result<(), StorageError> {
            Ok(())
        }
        async fn reconnect(&self) -> Result<(), StorageError> {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            self.healthy.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn insert_report(&self, report: crate::ReportRecord) -> Result<(), StorageError> {
            self.inner.insert_report(report).await
        }
        async fn find_report(
            &self,
            device_id: &str,
            week_start: &str,
        ) -> Result<Option<crate::ReportRecord>, StorageError> {
            self.inner.find_report(device_id, week_start).await
        }
        async fn list_reports(
            &self,
            device_id: Option<&str>,
        ) -> Result<Vec<crate::ReportSummary>, StorageError> {
            self.inner.list_reports(device_id).await
        }
        async fn get_report(
            &self,
            id: &str,
        ) -> Result<Option<crate::ReportRecord>, StorageError> {
            self.inner.get_report(id).await
        }
        async fn latest_report(
            &self,
            device_id: Option<&str>,
        ) -> Result<Option<crate::ReportRecord>, StorageError> {
            self.inner.latest_report(device_id).await
        }
    }

    #[tokio::test]
    async fn repeated_failures_reconnect_and_drop_batch() {
        let store = Arc::new(FailingStore {
            reconnects: AtomicU32::new(0),
            healthy: AtomicBool::new(false),
            inner: InMemoryHistoryStore::new(),
        });
        let writer = SampleWriter::new(
            store.clone(),
            SampleWriterConfig {
                batch_size: 1,
                flush_interval: Duration::from_millis(0),
                max_failures: 3,
            },
        );

        for ts in 1..=2 {
            let _ = writer.submit(vec![bank_sample(ts)]).await;
        }
        // 第三次失败触发重连并丢弃缓冲
        let _ = writer.submit(vec![bank_sample(3)]).await;
        assert_eq!(store.reconnects.load(Ordering::SeqCst), 1);
        assert_eq!(writer.buffered().await, 0);

        // 重连后的写入恢复成功
        writer.submit(vec![bank_sample(4)]).await.expect("submit");
        assert_eq!(store.inner.len(), 1);
    }
}

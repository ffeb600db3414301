//! 历史存储内存实现。
//!
//! 仅用于测试和演示。聚合语义与 SQLite 实现保持一致：数值取桶
//! 均值，插座 state/energy 取桶内最后值。

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::models::{
    BankPoint, BankSample, OutletPoint, OutletSample, ReportRecord, ReportSummary, Sample,
};
use crate::traits::{pick_interval, HistoryStore};

/// 内存历史存储。
#[derive(Default)]
pub struct InMemoryHistoryStore {
    banks: RwLock<Vec<BankSample>>,
    outlets: RwLock<Vec<OutletSample>>,
    reports: RwLock<Vec<ReportRecord>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前样本总数（测试断言用）。
    pub fn len(&self) -> usize {
        let banks = self.banks.read().map(|v| v.len()).unwrap_or(0);
        let outlets = self.outlets.read().map(|v| v.len()).unwrap_or(0);
        banks + outlets
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
struct NumericAcc {
    sum: f64,
    count: u64,
}

impl NumericAcc {
    fn push(&mut self, value: Option<f64>) {
        if let Some(value) = value {
            self.sum += value;
            self.count += 1;
        }
    }

    fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            None
        } else {
            Some(self.sum / self.count as f64)
        }
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, samples: &[Sample]) -> Result<(), StorageError> {
        let mut banks = self
            .banks
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut outlets = self
            .outlets
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        for sample in samples {
            match sample {
                Sample::Bank(s) => banks.push(s.clone()),
                Sample::Outlet(s) => outlets.push(s.clone()),
            }
        }
        Ok(())
    }

    async fn query_banks(
        &self,
        device_id: &str,
        start: i64,
        end: i64,
        interval: Option<u32>,
    ) -> Result<Vec<BankPoint>, StorageError> {
        let interval = interval.unwrap_or_else(|| pick_interval(start, end)) as i64;
        let samples = self
            .banks
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;

        #[derive(Default)]
        struct Acc {
            voltage: NumericAcc,
            current: NumericAcc,
            power: NumericAcc,
            apparent: NumericAcc,
            pf: NumericAcc,
        }

        let mut buckets: BTreeMap<(i64, u16), Acc> = BTreeMap::new();
        for sample in samples.iter() {
            if sample.device_id != device_id || sample.ts < start || sample.ts > end {
                continue;
            }
            let bucket = sample.ts / interval * interval;
            let acc = buckets.entry((bucket, sample.bank)).or_default();
            acc.voltage.push(sample.voltage);
            acc.current.push(sample.current);
            acc.power.push(sample.power);
            acc.apparent.push(sample.apparent);
            acc.pf.push(sample.pf);
        }

        Ok(buckets
            .into_iter()
            .map(|((bucket, bank), acc)| BankPoint {
                bucket,
                bank,
                voltage: acc.voltage.mean(),
                current: acc.current.mean(),
                power: acc.power.mean(),
                apparent: acc.apparent.mean(),
                pf: acc.pf.mean(),
            })
            .collect())
    }

    async fn query_outlets(
        &self,
        device_id: &str,
        start: i64,
        end: i64,
        interval: Option<u32>,
    ) -> Result<Vec<OutletPoint>, StorageError> {
        let interval = interval.unwrap_or_else(|| pick_interval(start, end)) as i64;
        let samples = self
            .outlets
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;

        #[derive(Default)]
        struct Acc {
            current: NumericAcc,
            power: NumericAcc,
            last_ts: i64,
            state: Option<String>,
            energy: Option<f64>,
        }

        let mut buckets: BTreeMap<(i64, u16), Acc> = BTreeMap::new();
        for sample in samples.iter() {
            if sample.device_id != device_id || sample.ts < start || sample.ts > end {
                continue;
            }
            let bucket = sample.ts / interval * interval;
            let acc = buckets.entry((bucket, sample.outlet)).or_default();
            acc.current.push(sample.current);
            acc.power.push(sample.power);
            if sample.ts >= acc.last_ts {
                acc.last_ts = sample.ts;
                acc.state = sample.state.clone();
                acc.energy = sample.energy;
            }
        }

        Ok(buckets
            .into_iter()
            .map(|((bucket, outlet), acc)| OutletPoint {
                bucket,
                outlet,
                state: acc.state,
                current: acc.current.mean(),
                power: acc.power.mean(),
                energy: acc.energy,
            })
            .collect())
    }

    async fn sweep_retention(&self, cutoff: i64) -> Result<u64, StorageError> {
        let mut removed = 0u64;
        {
            let mut banks = self
                .banks
                .write()
                .map_err(|_| StorageError::new("lock failed"))?;
            let before = banks.len();
            banks.retain(|s| s.ts >= cutoff);
            removed += (before - banks.len()) as u64;
        }
        {
            let mut outlets = self
                .outlets
                .write()
                .map_err(|_| StorageError::new("lock failed"))?;
            let before = outlets.len();
            outlets.retain(|s| s.ts >= cutoff);
            removed += (before - outlets.len()) as u64;
        }
        Ok(removed)
    }

    async fn vacuum(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn insert_report(&self, report: ReportRecord) -> Result<(), StorageError> {
        let mut reports = self
            .reports
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        if reports
            .iter()
            .any(|r| r.device_id == report.device_id && r.week_start == report.week_start)
        {
            return Ok(());
        }
        reports.push(report);
        Ok(())
    }

    async fn find_report(
        &self,
        device_id: &str,
        week_start: &str,
    ) -> Result<Option<ReportRecord>, StorageError> {
        let reports = self
            .reports
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(reports
            .iter()
            .find(|r| r.device_id == device_id && r.week_start == week_start)
            .cloned())
    }

    async fn list_reports(
        &self,
        device_id: Option<&str>,
    ) -> Result<Vec<ReportSummary>, StorageError> {
        let reports = self
            .reports
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut summaries: Vec<ReportSummary> = reports
            .iter()
            .filter(|r| device_id.map(|d| r.device_id == d).unwrap_or(true))
            .map(ReportRecord::summary)
            .collect();
        summaries.sort_by(|a, b| b.week_start.cmp(&a.week_start));
        Ok(summaries)
    }

    async fn get_report(&self, id: &str) -> Result<Option<ReportRecord>, StorageError> {
        let reports = self
            .reports
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(reports.iter().find(|r| r.id == id).cloned())
    }

    async fn latest_report(
        &self,
        device_id: Option<&str>,
    ) -> Result<Option<ReportRecord>, StorageError> {
        let reports = self
            .reports
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        Ok(reports
            .iter()
            .filter(|r| device_id.map(|d| r.device_id == d).unwrap_or(true))
            .max_by(|a, b| a.week_start.cmp(&b.week_start))
            .cloned())
    }
}

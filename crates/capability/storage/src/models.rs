//! 存储数据模型。
//!
//! 样本以 1 Hz 原始分辨率写入，时间戳为 epoch 秒。查询返回的
//! 点（Point）是桶聚合结果。

use domain::model::Snapshot;
use serde::{Deserialize, Serialize};

/// 负载组样本。
#[derive(Debug, Clone, PartialEq)]
pub struct BankSample {
    pub ts: i64,
    pub device_id: String,
    pub bank: u16,
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub power: Option<f64>,
    pub apparent: Option<f64>,
    pub pf: Option<f64>,
}

/// 插座样本。
#[derive(Debug, Clone, PartialEq)]
pub struct OutletSample {
    pub ts: i64,
    pub device_id: String,
    pub outlet: u16,
    pub state: Option<String>,
    pub current: Option<f64>,
    pub power: Option<f64>,
    pub energy: Option<f64>,
}

/// 写入批次中的一条样本。
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    Bank(BankSample),
    Outlet(OutletSample),
}

impl Sample {
    pub fn ts(&self) -> i64 {
        match self {
            Sample::Bank(s) => s.ts,
            Sample::Outlet(s) => s.ts,
        }
    }

    pub fn device_id(&self) -> &str {
        match self {
            Sample::Bank(s) => &s.device_id,
            Sample::Outlet(s) => &s.device_id,
        }
    }
}

/// 把一次轮询快照展开为样本批次。
pub fn samples_from_snapshot(device_id: &str, snapshot: &Snapshot) -> Vec<Sample> {
    let ts = snapshot.ts_ms / 1000;
    let mut samples = Vec::with_capacity(snapshot.banks.len() + snapshot.outlets.len());

    for bank in snapshot.banks.values() {
        samples.push(Sample::Bank(BankSample {
            ts,
            device_id: device_id.to_string(),
            bank: bank.number,
            voltage: bank.voltage,
            current: bank.current,
            power: bank.power,
            apparent: bank.apparent_power,
            pf: bank.power_factor,
        }));
    }
    for outlet in snapshot.outlets.values() {
        samples.push(Sample::Outlet(OutletSample {
            ts,
            device_id: device_id.to_string(),
            outlet: outlet.number,
            state: Some(outlet.state.as_str().to_string()),
            current: outlet.current,
            power: outlet.power,
            energy: outlet.energy,
        }));
    }
    samples
}

/// 负载组查询点（桶聚合）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankPoint {
    pub bucket: i64,
    pub bank: u16,
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub power: Option<f64>,
    pub apparent: Option<f64>,
    pub pf: Option<f64>,
}

/// 插座查询点（数值为桶均值，state/energy 为桶内最后值）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutletPoint {
    pub bucket: i64,
    pub outlet: u16,
    pub state: Option<String>,
    pub current: Option<f64>,
    pub power: Option<f64>,
    pub energy: Option<f64>,
}

/// 周报记录。`id` 由 `(device_id, week_start)` 确定性派生，
/// 重复生成天然幂等。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRecord {
    pub id: String,
    pub device_id: String,
    /// ISO 日期，周一。
    pub week_start: String,
    /// ISO 日期，下周一（独占端点）。
    pub week_end: String,
    /// RFC 3339 生成时间。
    pub created_at: String,
    pub data: serde_json::Value,
}

/// 周报摘要（列表端点用，不含载荷）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub id: String,
    pub device_id: String,
    pub week_start: String,
    pub week_end: String,
    pub created_at: String,
}

impl ReportRecord {
    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            id: self.id.clone(),
            device_id: self.device_id.clone(),
            week_start: self.week_start.clone(),
            week_end: self.week_end.clone(),
            created_at: self.created_at.clone(),
        }
    }

    /// 确定性报表 ID。
    pub fn stable_id(device_id: &str, week_start: &str) -> String {
        let name = format!("report:{device_id}:{week_start}");
        uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_URL, name.as_bytes()).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::model::{BankData, OutletData, OutletState};

    #[test]
    fn snapshot_expands_to_bank_and_outlet_samples() {
        let mut snapshot = Snapshot::empty(1_700_000_000_500);
        let mut bank = BankData::new(1);
        bank.voltage = Some(120.1);
        bank.power = Some(36.0);
        snapshot.banks.insert(1, bank);
        let mut outlet = OutletData::new(3);
        outlet.state = OutletState::On;
        outlet.current = Some(0.3);
        snapshot.outlets.insert(3, outlet);

        let samples = samples_from_snapshot("pdu44001", &snapshot);
        assert_eq!(samples.len(), 2);
        assert!(samples.iter().all(|s| s.ts() == 1_700_000_000));
        assert!(samples.iter().all(|s| s.device_id() == "pdu44001"));
        match &samples[1] {
            Sample::Outlet(s) => {
                assert_eq!(s.outlet, 3);
                assert_eq!(s.state.as_deref(), Some("on"));
                assert_eq!(s.current, Some(0.3));
                assert_eq!(s.energy, None);
            }
            other => panic!("expected outlet sample, got {other:?}"),
        }
    }

    #[test]
    fn report_ids_are_deterministic() {
        let a = ReportRecord::stable_id("pdu44001", "2026-07-20");
        let b = ReportRecord::stable_id("pdu44001", "2026-07-20");
        let c = ReportRecord::stable_id("pdu44001", "2026-07-27");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}

//! 存储接口 Trait 定义。
//!
//! 设计原则：
//! - 所有接口返回 StorageError
//! - 使用 async_trait 支持动态分发
//! - 单写者多读者：写路径只有 [`crate::SampleWriter`] 一个入口

use async_trait::async_trait;

use crate::error::StorageError;
use crate::models::{BankPoint, OutletPoint, ReportRecord, ReportSummary, Sample};

/// 按区间宽度自动选择降采样桶（秒）。
pub fn pick_interval(start: i64, end: i64) -> u32 {
    let span = (end - start).max(0);
    if span <= 3_600 {
        1
    } else if span <= 6 * 3_600 {
        10
    } else if span <= 24 * 3_600 {
        60
    } else if span <= 7 * 86_400 {
        300
    } else if span <= 30 * 86_400 {
        900
    } else {
        1_800
    }
}

/// 时序样本与周报存储接口。
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// 追加一个样本批次（事务性，批内不撕裂）。
    async fn append(&self, samples: &[Sample]) -> Result<(), StorageError>;

    /// 查询负载组历史。`interval` 缺省时按区间宽度自动选桶。
    async fn query_banks(
        &self,
        device_id: &str,
        start: i64,
        end: i64,
        interval: Option<u32>,
    ) -> Result<Vec<BankPoint>, StorageError>;

    /// 查询插座历史。
    async fn query_outlets(
        &self,
        device_id: &str,
        start: i64,
        end: i64,
        interval: Option<u32>,
    ) -> Result<Vec<OutletPoint>, StorageError>;

    /// 删除 `ts < cutoff` 的样本，返回删除行数。
    async fn sweep_retention(&self, cutoff: i64) -> Result<u64, StorageError>;

    /// 压缩存储。显式操作，不自动执行。
    async fn vacuum(&self) -> Result<(), StorageError>;

    /// 连续写失败后由写入器调用，重建底层连接。
    async fn reconnect(&self) -> Result<(), StorageError>;

    async fn insert_report(&self, report: ReportRecord) -> Result<(), StorageError>;

    async fn find_report(
        &self,
        device_id: &str,
        week_start: &str,
    ) -> Result<Option<ReportRecord>, StorageError>;

    /// 按周起始倒序列出报表摘要。
    async fn list_reports(
        &self,
        device_id: Option<&str>,
    ) -> Result<Vec<ReportSummary>, StorageError>;

    async fn get_report(&self, id: &str) -> Result<Option<ReportRecord>, StorageError>;

    async fn latest_report(
        &self,
        device_id: Option<&str>,
    ) -> Result<Option<ReportRecord>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_table_matches_range_widths() {
        assert_eq!(pick_interval(0, 3_600), 1);
        assert_eq!(pick_interval(0, 3_601), 10);
        assert_eq!(pick_interval(0, 6 * 3_600), 10);
        assert_eq!(pick_interval(0, 24 * 3_600), 60);
        assert_eq!(pick_interval(0, 7 * 86_400), 300);
        assert_eq!(pick_interval(0, 30 * 86_400), 900);
        assert_eq!(pick_interval(0, 60 * 86_400), 1_800);
    }

    #[test]
    fn point_counts_are_bounded_per_range() {
        // 每个区间宽度的返回点数有已知上界，前端绘图不会被打爆
        for (span, max_points) in [
            (3_600i64, 3_600usize),
            (6 * 3_600, 2_160),
            (24 * 3_600, 1_440),
            (7 * 86_400, 2_016),
            (30 * 86_400, 2_880),
            (60 * 86_400, 2_880),
        ] {
            let interval = pick_interval(0, span) as i64;
            let points = (span / interval) as usize;
            assert!(
                points <= max_points,
                "span {span}: {points} points exceeds {max_points}"
            );
        }
    }
}

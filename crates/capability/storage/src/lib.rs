//! # 历史存储模块
//!
//! 提供时序样本与周报的统一存储抽象，支持多种后端实现。
//!
//! ## 架构设计
//!
//! 1. **接口抽象层**（`traits.rs`）：[`HistoryStore`] 异步 Trait
//! 2. **数据模型层**（`models.rs`）：样本、查询点与报表记录
//! 3. **错误处理层**（`error.rs`）：统一的存储错误类型
//! 4. **实现层**：
//!    - `in_memory`：内存实现（测试与演示）
//!    - `sqlite`：SQLite + WAL 实现（生产使用，单写多读）
//! 5. **写入合并层**（`writer.rs`）：按条数/时间窗合并提交的
//!    [`SampleWriter`]
//! 6. **报表层**（`report.rs`）：周一对齐的周报生成（幂等）
//! 7. **文档层**（`docs.rs`）：规则/插座命名/设置的原子 JSON 文档
//!
//! ## 降采样
//!
//! 查询按区间宽度自动选桶：≤1h 原始 1s，≤6h 10s，≤24h 60s，
//! ≤7d 300s，≤30d 900s，其余 1800s。桶内数值取均值，插座状态与
//! 电能取桶内最后值，输出按 `(bucket, bank|outlet)` 排序。
//!
//! ## 一致性
//!
//! 单写者多读者；SQLite 打开 WAL。崩溃最多丢失最后一个未提交
//! 批次，不会出现撕裂行。

pub mod docs;
pub mod error;
pub mod in_memory;
pub mod models;
pub mod report;
pub mod sqlite;
pub mod traits;
pub mod writer;

pub use docs::JsonDocStore;
pub use error::StorageError;
pub use in_memory::InMemoryHistoryStore;
pub use models::{
    samples_from_snapshot, BankPoint, BankSample, OutletPoint, OutletSample, ReportRecord,
    ReportSummary, Sample,
};
pub use report::{compute_week_window, generate_weekly_report};
pub use sqlite::SqliteHistoryStore;
pub use traits::{pick_interval, HistoryStore};
pub use writer::{SampleWriter, SampleWriterConfig};

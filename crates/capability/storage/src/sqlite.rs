//! SQLite 历史存储实现。
//!
//! 连接打开即设置 `journal_mode=WAL`，读者与单一写者并发。
//! 降采样直接在 SQL 里按 `(ts / 桶) * 桶` 分组完成。

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{info, warn};

use async_trait::async_trait;

use crate::error::StorageError;
use crate::models::{
    BankPoint, OutletPoint, ReportRecord, ReportSummary, Sample,
};
use crate::traits::{pick_interval, HistoryStore};

/// SQLite 历史存储。
pub struct SqliteHistoryStore {
    path: PathBuf,
    pool: RwLock<SqlitePool>,
}

impl SqliteHistoryStore {
    /// 打开（必要时创建）数据库并建表。
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let pool = Self::connect(&path).await?;
        let store = Self {
            path,
            pool: RwLock::new(pool),
        };
        store.create_tables().await?;
        Ok(store)
    }

    async fn connect(path: &Path) -> Result<SqlitePool, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        info!(path = %path.display(), "history store opened");
        Ok(pool)
    }

    async fn create_tables(&self) -> Result<(), StorageError> {
        let pool = self.pool.read().await.clone();
        let statements = [
            "CREATE TABLE IF NOT EXISTS bank_samples (
                ts INTEGER NOT NULL,
                device_id TEXT NOT NULL,
                bank INTEGER NOT NULL,
                voltage REAL,
                current REAL,
                power REAL,
                apparent REAL,
                pf REAL
            )",
            "CREATE INDEX IF NOT EXISTS idx_bank_device_ts
                ON bank_samples(device_id, ts)",
            "CREATE TABLE IF NOT EXISTS outlet_samples (
                ts INTEGER NOT NULL,
                device_id TEXT NOT NULL,
                outlet INTEGER NOT NULL,
                state TEXT,
                current REAL,
                power REAL,
                energy REAL
            )",
            "CREATE INDEX IF NOT EXISTS idx_outlet_device_ts
                ON outlet_samples(device_id, ts)",
            "CREATE TABLE IF NOT EXISTS energy_reports (
                id TEXT PRIMARY KEY,
                device_id TEXT NOT NULL,
                week_start TEXT NOT NULL,
                week_end TEXT NOT NULL,
                created_at TEXT NOT NULL,
                data TEXT NOT NULL
            )",
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_report_device_week
                ON energy_reports(device_id, week_start)",
        ];
        for statement in statements {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(())
    }

    async fn pool(&self) -> SqlitePool {
        self.pool.read().await.clone()
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn append(&self, samples: &[Sample]) -> Result<(), StorageError> {
        if samples.is_empty() {
            return Ok(());
        }
        let pool = self.pool().await;
        let mut tx = pool.begin().await?;
        for sample in samples {
            match sample {
                Sample::Bank(s) => {
                    sqlx::query(
                        "INSERT INTO bank_samples \
                         (ts, device_id, bank, voltage, current, power, apparent, pf) \
                         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                    )
                    .bind(s.ts)
                    .bind(&s.device_id)
                    .bind(s.bank as i64)
                    .bind(s.voltage)
                    .bind(s.current)
                    .bind(s.power)
                    .bind(s.apparent)
                    .bind(s.pf)
                    .execute(&mut *tx)
                    .await?;
                }
                Sample::Outlet(s) => {
                    sqlx::query(
                        "INSERT INTO outlet_samples \
                         (ts, device_id, outlet, state, current, power, energy) \
                         VALUES (?, ?, ?, ?, ?, ?, ?)",
                    )
                    .bind(s.ts)
                    .bind(&s.device_id)
                    .bind(s.outlet as i64)
                    .bind(&s.state)
                    .bind(s.current)
                    .bind(s.power)
                    .bind(s.energy)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }
        tx.commit().await?;
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
        let pool = self.pool().await;
        let rows = sqlx::query(
            "SELECT (ts / ?1) * ?1 AS bucket, bank, \
             AVG(voltage) AS voltage, AVG(current) AS current, \
             AVG(power) AS power, AVG(apparent) AS apparent, AVG(pf) AS pf \
             FROM bank_samples \
             WHERE device_id = ?2 AND ts >= ?3 AND ts <= ?4 \
             GROUP BY bucket, bank ORDER BY bucket, bank",
        )
        .bind(interval)
        .bind(device_id)
        .bind(start)
        .bind(end)
        .fetch_all(&pool)
        .await?;

        let mut points = Vec::with_capacity(rows.len());
        for row in rows {
            points.push(BankPoint {
                bucket: row.try_get("bucket")?,
                bank: row.try_get::<i64, _>("bank")? as u16,
                voltage: row.try_get("voltage")?,
                current: row.try_get("current")?,
                power: row.try_get("power")?,
                apparent: row.try_get("apparent")?,
                pf: row.try_get("pf")?,
            });
        }
        Ok(points)
    }

    async fn query_outlets(
        &self,
        device_id: &str,
        start: i64,
        end: i64,
        interval: Option<u32>,
    ) -> Result<Vec<OutletPoint>, StorageError> {
        let interval = interval.unwrap_or_else(|| pick_interval(start, end)) as i64;
        let pool = self.pool().await;
        // MAX(ts) 聚合让裸列 state/energy 来自桶内最后一行
        let rows = sqlx::query(
            "SELECT (ts / ?1) * ?1 AS bucket, outlet, \
             AVG(current) AS current, AVG(power) AS power, \
             MAX(ts) AS last_ts, state, energy \
             FROM outlet_samples \
             WHERE device_id = ?2 AND ts >= ?3 AND ts <= ?4 \
             GROUP BY bucket, outlet ORDER BY bucket, outlet",
        )
        .bind(interval)
        .bind(device_id)
        .bind(start)
        .bind(end)
        .fetch_all(&pool)
        .await?;

        let mut points = Vec::with_capacity(rows.len());
        for row in rows {
            points.push(OutletPoint {
                bucket: row.try_get("bucket")?,
                outlet: row.try_get::<i64, _>("outlet")? as u16,
                state: row.try_get("state")?,
                current: row.try_get("current")?,
                power: row.try_get("power")?,
                energy: row.try_get("energy")?,
            });
        }
        Ok(points)
    }

    async fn sweep_retention(&self, cutoff: i64) -> Result<u64, StorageError> {
        let pool = self.pool().await;
        let banks = sqlx::query("DELETE FROM bank_samples WHERE ts < ?")
            .bind(cutoff)
            .execute(&pool)
            .await?;
        let outlets = sqlx::query("DELETE FROM outlet_samples WHERE ts < ?")
            .bind(cutoff)
            .execute(&pool)
            .await?;
        let removed = banks.rows_affected() + outlets.rows_affected();
        info!(cutoff, removed, "retention sweep complete");
        Ok(removed)
    }

    async fn vacuum(&self) -> Result<(), StorageError> {
        let pool = self.pool().await;
        sqlx::query("VACUUM").execute(&pool).await?;
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), StorageError> {
        warn!(path = %self.path.display(), "reconnecting history store");
        let new_pool = Self::connect(&self.path).await?;
        let mut pool = self.pool.write().await;
        let old = std::mem::replace(&mut *pool, new_pool);
        old.close().await;
        Ok(())
    }

    async fn insert_report(&self, report: ReportRecord) -> Result<(), StorageError> {
        let pool = self.pool().await;
        sqlx::query(
            "INSERT OR IGNORE INTO energy_reports \
             (id, device_id, week_start, week_end, created_at, data) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&report.id)
        .bind(&report.device_id)
        .bind(&report.week_start)
        .bind(&report.week_end)
        .bind(&report.created_at)
        .bind(report.data.to_string())
        .execute(&pool)
        .await?;
        Ok(())
    }

    async fn find_report(
        &self,
        device_id: &str,
        week_start: &str,
    ) -> Result<Option<ReportRecord>, StorageError> {
        let pool = self.pool().await;
        let row = sqlx::query(
            "SELECT id, device_id, week_start, week_end, created_at, data \
             FROM energy_reports WHERE device_id = ? AND week_start = ?",
        )
        .bind(device_id)
        .bind(week_start)
        .fetch_optional(&pool)
        .await?;
        row.map(report_from_row).transpose()
    }

    async fn list_reports(
        &self,
        device_id: Option<&str>,
    ) -> Result<Vec<ReportSummary>, StorageError> {
        let pool = self.pool().await;
        let rows = sqlx::query(
            "SELECT id, device_id, week_start, week_end, created_at \
             FROM energy_reports \
             WHERE (?1 IS NULL OR device_id = ?1) \
             ORDER BY week_start DESC",
        )
        .bind(device_id)
        .fetch_all(&pool)
        .await?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in rows {
            summaries.push(ReportSummary {
                id: row.try_get("id")?,
                device_id: row.try_get("device_id")?,
                week_start: row.try_get("week_start")?,
                week_end: row.try_get("week_end")?,
                created_at: row.try_get("created_at")?,
            });
        }
        Ok(summaries)
    }

    async fn get_report(&self, id: &str) -> Result<Option<ReportRecord>, StorageError> {
        let pool = self.pool().await;
        let row = sqlx::query(
            "SELECT id, device_id, week_start, week_end, created_at, data \
             FROM energy_reports WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&pool)
        .await?;
        row.map(report_from_row).transpose()
    }

    async fn latest_report(
        &self,
        device_id: Option<&str>,
    ) -> Result<Option<ReportRecord>, StorageError> {
        let pool = self.pool().await;
        let row = sqlx::query(
            "SELECT id, device_id, week_start, week_end, created_at, data \
             FROM energy_reports \
             WHERE (?1 IS NULL OR device_id = ?1) \
             ORDER BY week_start DESC LIMIT 1",
        )
        .bind(device_id)
        .fetch_optional(&pool)
        .await?;
        row.map(report_from_row).transpose()
    }
}

fn report_from_row(row: sqlx::sqlite::SqliteRow) -> Result<ReportRecord, StorageError> {
    let data_text: String = row.try_get("data")?;
    Ok(ReportRecord {
        id: row.try_get("id")?,
        device_id: row.try_get("device_id")?,
        week_start: row.try_get("week_start")?,
        week_end: row.try_get("week_end")?,
        created_at: row.try_get("created_at")?,
        data: serde_json::from_str(&data_text)?,
    })
}

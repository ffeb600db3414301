//! 周报生成。
//!
//! 每台设备每个完整的周一到周日自然周一份报表，按
//! `(device_id, week_start)` 幂等。能耗从分钟级功率均值积分：
//! 每个分钟桶代表 1/60 小时。

use chrono::{DateTime, Datelike, Days, Local, NaiveDate, Timelike};
use serde_json::json;
use tracing::info;

use crate::error::StorageError;
use crate::models::{BankPoint, OutletPoint, ReportRecord};
use crate::traits::HistoryStore;

/// 最近一个完整自然周的 `[周一, 下周一)` 窗口。
///
/// 周一凌晨第一个小时内仍回退到上一个完整周，给采样一点收尾余地。
pub fn compute_week_window(now: DateTime<Local>) -> (NaiveDate, NaiveDate) {
    let today = now.date_naive();
    let days_since_monday = today.weekday().num_days_from_monday() as u64;
    let mut week_end = today - Days::new(days_since_monday);
    if days_since_monday == 0 && now.hour() < 1 {
        week_end = week_end - Days::new(7);
    }
    let week_start = week_end - Days::new(7);
    (week_start, week_end)
}

fn local_midnight_ts(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .and_then(|dt| dt.and_local_timezone(Local).single())
        .map(|dt| dt.timestamp())
        .unwrap_or_default()
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// 由分钟级聚合点构建报表载荷。
pub fn build_report_payload(
    week_start: NaiveDate,
    week_end: NaiveDate,
    bank_points: &[BankPoint],
    outlet_points: &[OutletPoint],
    house_monthly_kwh: f64,
) -> serde_json::Value {
    // 每分钟的设备总功率（跨负载组求和）
    let mut total_power_by_minute: std::collections::BTreeMap<i64, f64> =
        std::collections::BTreeMap::new();
    for point in bank_points {
        if let Some(power) = point.power {
            *total_power_by_minute.entry(point.bucket).or_insert(0.0) += power;
        }
    }

    let total_kwh: f64 = total_power_by_minute.values().sum::<f64>() / 60.0 / 1000.0;
    let positive: Vec<f64> = total_power_by_minute
        .values()
        .copied()
        .filter(|p| *p > 0.0)
        .collect();
    let peak_power = positive.iter().copied().fold(0.0f64, f64::max);
    let avg_power = if positive.is_empty() {
        0.0
    } else {
        positive.iter().sum::<f64>() / positive.len() as f64
    };

    // 每插座
    let mut per_outlet = serde_json::Map::new();
    let mut outlet_powers: std::collections::BTreeMap<u16, Vec<f64>> =
        std::collections::BTreeMap::new();
    for point in outlet_points {
        if let Some(power) = point.power {
            outlet_powers.entry(point.outlet).or_default().push(power);
        }
    }
    for (outlet, powers) in &outlet_powers {
        let kwh = powers.iter().sum::<f64>() / 60.0 / 1000.0;
        let avg = powers.iter().sum::<f64>() / powers.len() as f64;
        let peak = powers.iter().copied().fold(0.0f64, f64::max);
        per_outlet.insert(
            outlet.to_string(),
            json!({
                "kwh": round3(kwh),
                "avg_power": round1(avg),
                "peak_power": round1(peak),
            }),
        );
    }

    // 每日
    let mut daily_powers: std::collections::BTreeMap<String, Vec<f64>> =
        std::collections::BTreeMap::new();
    for (minute_ts, power) in &total_power_by_minute {
        let day = chrono::DateTime::from_timestamp(*minute_ts, 0)
            .map(|dt| dt.with_timezone(&Local).date_naive().to_string())
            .unwrap_or_default();
        daily_powers.entry(day).or_default().push(*power);
    }
    let mut daily = serde_json::Map::new();
    for (day, powers) in &daily_powers {
        let kwh = powers.iter().sum::<f64>() / 60.0 / 1000.0;
        let avg = powers.iter().sum::<f64>() / powers.len() as f64;
        let peak = powers.iter().copied().fold(0.0f64, f64::max);
        daily.insert(
            day.clone(),
            json!({
                "kwh": round3(kwh),
                "avg_power": round1(avg),
                "peak_power": round1(peak),
            }),
        );
    }

    let house_pct = if house_monthly_kwh > 0.0 {
        let weekly_house = house_monthly_kwh * 7.0 / 30.0;
        Some(round1(total_kwh / weekly_house * 100.0))
    } else {
        None
    };

    json!({
        "week_start": week_start.to_string(),
        "week_end": week_end.to_string(),
        "total_kwh": round3(total_kwh),
        "peak_power_w": round1(peak_power),
        "avg_power_w": round1(avg_power),
        "per_outlet": per_outlet,
        "daily": daily,
        "house_pct": house_pct,
        "sample_count": total_power_by_minute.len(),
    })
}

/// 为一台设备生成最近完整周的报表。已存在或无数据时返回 None。
pub async fn generate_weekly_report(
    store: &dyn HistoryStore,
    device_id: &str,
    now: DateTime<Local>,
    house_monthly_kwh: f64,
) -> Result<Option<ReportRecord>, StorageError> {
    let (week_start, week_end) = compute_week_window(now);
    let week_start_str = week_start.to_string();

    if store.find_report(device_id, &week_start_str).await?.is_some() {
        return Ok(None);
    }

    let start_ts = local_midnight_ts(week_start);
    let end_ts = local_midnight_ts(week_end) - 1;

    let bank_points = store
        .query_banks(device_id, start_ts, end_ts, Some(60))
        .await?;
    let outlet_points = store
        .query_outlets(device_id, start_ts, end_ts, Some(60))
        .await?;
    if bank_points.is_empty() && outlet_points.is_empty() {
        return Ok(None);
    }

    let data = build_report_payload(
        week_start,
        week_end,
        &bank_points,
        &outlet_points,
        house_monthly_kwh,
    );
    let report = ReportRecord {
        id: ReportRecord::stable_id(device_id, &week_start_str),
        device_id: device_id.to_string(),
        week_start: week_start_str.clone(),
        week_end: week_end.to_string(),
        created_at: now.to_rfc3339(),
        data,
    };
    store.insert_report(report.clone()).await?;
    info!(
        device_id,
        week_start = %week_start_str,
        total_kwh = report.data["total_kwh"].as_f64().unwrap_or(0.0),
        "weekly report generated"
    );
    Ok(Some(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn week_window_is_monday_aligned() {
        // 2026-07-29 是周三
        let now = Local.with_ymd_and_hms(2026, 7, 29, 12, 0, 0).single().expect("time");
        let (start, end) = compute_week_window(now);
        assert_eq!(start.to_string(), "2026-07-20");
        assert_eq!(end.to_string(), "2026-07-27");
        assert_eq!(start.weekday(), chrono::Weekday::Mon);
    }

    #[test]
    fn monday_early_morning_backs_off_one_week() {
        let monday_early = Local.with_ymd_and_hms(2026, 7, 27, 0, 30, 0).single().expect("time");
        let (start, end) = compute_week_window(monday_early);
        assert_eq!(start.to_string(), "2026-07-13");
        assert_eq!(end.to_string(), "2026-07-20");

        let monday_later = Local.with_ymd_and_hms(2026, 7, 27, 8, 0, 0).single().expect("time");
        let (start, _) = compute_week_window(monday_later);
        assert_eq!(start.to_string(), "2026-07-20");
    }

    #[test]
    fn payload_integrates_power_to_kwh() {
        let week_start = NaiveDate::from_ymd_opt(2026, 7, 20).expect("date");
        let week_end = NaiveDate::from_ymd_opt(2026, 7, 27).expect("date");
        // 60 个分钟桶，每桶 1000 W => 1 kWh
        let bank_points: Vec<BankPoint> = (0..60)
            .map(|i| BankPoint {
                bucket: 1_700_000_000 + i * 60,
                bank: 1,
                voltage: Some(120.0),
                current: Some(8.3),
                power: Some(1000.0),
                apparent: Some(1000.0),
                pf: Some(1.0),
            })
            .collect();
        let payload = build_report_payload(week_start, week_end, &bank_points, &[], 0.0);
        assert_eq!(payload["total_kwh"].as_f64(), Some(1.0));
        assert_eq!(payload["peak_power_w"].as_f64(), Some(1000.0));
        assert_eq!(payload["sample_count"].as_u64(), Some(60));
        assert!(payload["house_pct"].is_null());
    }

    #[tokio::test]
    async fn generation_is_idempotent_per_week() {
        use crate::in_memory::InMemoryHistoryStore;
        use crate::models::{BankSample, Sample};

        let store = InMemoryHistoryStore::new();
        let now = Local.with_ymd_and_hms(2026, 7, 29, 12, 0, 0).single().expect("time");
        let (week_start, _) = compute_week_window(now);
        let base_ts = local_midnight_ts(week_start) + 3600;
        let samples: Vec<Sample> = (0..120)
            .map(|i| {
                Sample::Bank(BankSample {
                    ts: base_ts + i,
                    device_id: "pdu44001".to_string(),
                    bank: 1,
                    voltage: Some(120.0),
                    current: Some(0.3),
                    power: Some(36.0),
                    apparent: Some(36.0),
                    pf: Some(0.98),
                })
            })
            .collect();
        store.append(&samples).await.expect("append");

        let first = generate_weekly_report(&store, "pdu44001", now, 0.0)
            .await
            .expect("generate");
        assert!(first.is_some());
        let second = generate_weekly_report(&store, "pdu44001", now, 0.0)
            .await
            .expect("generate again");
        assert!(second.is_none());

        let listed = store.list_reports(Some("pdu44001")).await.expect("list");
        assert_eq!(listed.len(), 1);
    }
}

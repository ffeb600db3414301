//! 历史存储行为测试：降采样、保留清理与两个后端的一致语义。

use pdu_storage::{
    BankSample, HistoryStore, InMemoryHistoryStore, OutletSample, Sample, SqliteHistoryStore,
};

fn bank_sample(device_id: &str, ts: i64, power: f64) -> Sample {
    Sample::Bank(BankSample {
        ts,
        device_id: device_id.to_string(),
        bank: 1,
        voltage: Some(120.0),
        current: Some(power / 120.0),
        power: Some(power),
        apparent: Some(power),
        pf: Some(0.98),
    })
}

fn outlet_sample(device_id: &str, ts: i64, state: &str, energy: f64) -> Sample {
    Sample::Outlet(OutletSample {
        ts,
        device_id: device_id.to_string(),
        outlet: 3,
        state: Some(state.to_string()),
        current: Some(0.1),
        power: Some(12.0),
        energy: Some(energy),
    })
}

async fn open_sqlite(dir: &tempfile::TempDir) -> SqliteHistoryStore {
    SqliteHistoryStore::open(dir.path().join("history.db"))
        .await
        .expect("open store")
}

#[tokio::test]
async fn one_hour_of_raw_samples_comes_back_unbucketed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_sqlite(&dir).await;

    let start = 1_700_000_000i64;
    let samples: Vec<Sample> = (0..3600)
        .map(|i| bank_sample("pdu44001", start + i, 36.0))
        .collect();
    store.append(&samples).await.expect("append");

    // 1h 区间：原始 1s 桶，3600 个点
    let points = store
        .query_banks("pdu44001", start, start + 3599, None)
        .await
        .expect("query");
    assert_eq!(points.len(), 3600);

    // 24h 区间：60s 桶，每桶恰好 60s，点数不超过 1440
    let day_points = store
        .query_banks("pdu44001", start, start + 24 * 3600 - 1, None)
        .await
        .expect("query");
    assert!(day_points.len() <= 1440);
    assert_eq!(day_points.len(), 60);
    for pair in day_points.windows(2) {
        assert_eq!(pair[1].bucket - pair[0].bucket, 60);
    }
    // 桶内均值保持数值
    assert!((day_points[0].power.expect("power") - 36.0).abs() < 1e-9);
}

#[tokio::test]
async fn outlet_buckets_average_numbers_and_keep_last_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_sqlite(&dir).await;

    let start = 1_700_000_000i64 - (1_700_000_000i64 % 60);
    store
        .append(&[
            outlet_sample("pdu44001", start, "on", 10.0),
            outlet_sample("pdu44001", start + 20, "on", 10.1),
            outlet_sample("pdu44001", start + 40, "off", 10.2),
        ])
        .await
        .expect("append");

    let points = store
        .query_outlets("pdu44001", start, start + 7200, Some(60))
        .await
        .expect("query");
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].state.as_deref(), Some("off"));
    assert_eq!(points[0].energy, Some(10.2));
    assert!((points[0].current.expect("current") - 0.1).abs() < 1e-9);
}

#[tokio::test]
async fn devices_are_isolated_by_id() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_sqlite(&dir).await;
    let start = 1_700_000_000i64;
    store
        .append(&[
            bank_sample("rack1-pdu", start, 100.0),
            bank_sample("rack2-pdu", start, 200.0),
        ])
        .await
        .expect("append");

    let rack1 = store
        .query_banks("rack1-pdu", start - 10, start + 10, None)
        .await
        .expect("query");
    assert_eq!(rack1.len(), 1);
    assert_eq!(rack1[0].power, Some(100.0));
}

#[tokio::test]
async fn retention_sweep_honors_the_cutoff_boundary() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = open_sqlite(&dir).await;

    let now = 1_700_000_000i64;
    let retention_secs = 60 * 86_400;
    let cutoff = now - retention_secs;
    store
        .append(&[
            bank_sample("pdu44001", cutoff - 1, 1.0),
            bank_sample("pdu44001", cutoff + 1, 2.0),
        ])
        .await
        .expect("append");

    let removed = store.sweep_retention(cutoff).await.expect("sweep");
    assert_eq!(removed, 1);

    let points = store
        .query_banks("pdu44001", 0, now, Some(1))
        .await
        .expect("query");
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].power, Some(2.0));
}

#[tokio::test]
async fn data_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let start = 1_700_000_000i64;
    {
        let store = open_sqlite(&dir).await;
        store
            .append(&[bank_sample("pdu44001", start, 36.0)])
            .await
            .expect("append");
    }
    let store = open_sqlite(&dir).await;
    let points = store
        .query_banks("pdu44001", start - 1, start + 1, None)
        .await
        .expect("query");
    assert_eq!(points.len(), 1);
}

#[tokio::test]
async fn in_memory_matches_sqlite_bucket_semantics() {
    let dir = tempfile::tempdir().expect("tempdir");
    let sqlite = open_sqlite(&dir).await;
    let memory = InMemoryHistoryStore::new();

    let start = 1_700_000_100i64 - (1_700_000_100i64 % 600);
    let samples: Vec<Sample> = (0..600)
        .map(|i| bank_sample("pdu44001", start + i, (i % 10) as f64))
        .collect();
    sqlite.append(&samples).await.expect("append sqlite");
    memory.append(&samples).await.expect("append memory");

    let from_sqlite = sqlite
        .query_banks("pdu44001", start, start + 599, Some(300))
        .await
        .expect("sqlite query");
    let from_memory = memory
        .query_banks("pdu44001", start, start + 599, Some(300))
        .await
        .expect("memory query");

    assert_eq!(from_sqlite.len(), from_memory.len());
    for (a, b) in from_sqlite.iter().zip(from_memory.iter()) {
        assert_eq!(a.bucket, b.bucket);
        assert_eq!(a.bank, b.bank);
        let pa = a.power.expect("power");
        let pb = b.power.expect("power");
        assert!((pa - pb).abs() < 1e-9, "bucket {}: {pa} != {pb}", a.bucket);
    }
}

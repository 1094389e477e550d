//! 파티션 저장소 통합 테스트

mod common;

use chrono::Duration;
use common::{candle, series, utc};
use ohlcv_core::{Candle, PartitionKey, Timeframe};
use ohlcv_store::{Codec, Column, PartitionStore};
use proptest::prelude::*;
use tempfile::TempDir;

fn store() -> (TempDir, PartitionStore) {
    let dir = TempDir::new().unwrap();
    let store = PartitionStore::new(dir.path());
    (dir, store)
}

fn jan() -> PartitionKey {
    PartitionKey::new("BTCUSDT", Timeframe::H1, 2024, 1)
}

#[test]
fn test_round_trip_sorted_without_duplicates() {
    let (_dir, store) = store();
    let mut rows = series("BTCUSDT", Timeframe::H1, utc(2024, 1, 1, 0), 48);
    rows.reverse();
    rows.push(rows[10].clone());

    store.write_partition(&rows, &jan()).unwrap();

    let read = store.read_candles(&jan()).unwrap();
    let mut expected = rows[..48].to_vec();
    expected.sort_by_key(|c| c.timestamp);
    assert_eq!(read, expected);
    assert_eq!(
        store.partition_path(&jan()),
        store.base_path().join("btcusdt").join("1h").join("2024-01").join("data")
    );
}

#[test]
fn test_idempotent_write() {
    let (_dir, store) = store();
    let rows = series("BTCUSDT", Timeframe::H1, utc(2024, 1, 3, 0), 30);

    store.write_partition(&rows, &jan()).unwrap();
    let once = store.read_candles(&jan()).unwrap();
    store.write_partition(&rows, &jan()).unwrap();
    let twice = store.read_candles(&jan()).unwrap();

    assert_eq!(once, twice);
    assert_eq!(store.partition_stats(&jan()).unwrap().row_count, 30);
}

#[test]
fn test_rewrite_of_existing_timestamp_keeps_newest_values() {
    let (_dir, store) = store();
    let ts = utc(2024, 1, 5, 0);
    store.write_partition(&[candle("BTCUSDT", Timeframe::H1, ts)], &jan()).unwrap();

    let mut updated = candle("BTCUSDT", Timeframe::H1, ts);
    updated.close = updated.high;
    updated.volume = 99.0;
    store.write_partition(&[updated.clone()], &jan()).unwrap();

    assert_eq!(store.read_candles(&jan()).unwrap(), vec![updated]);
}

#[test]
fn test_write_rejects_rows_outside_partition() {
    let (_dir, store) = store();
    let feb = candle("BTCUSDT", Timeframe::H1, utc(2024, 2, 1, 0));
    let err = store.write_partition(&[feb], &jan()).unwrap_err();
    assert!(err.is_schema());
    assert!(!store.exists(&jan()));

    let mut invalid = candle("BTCUSDT", Timeframe::H1, utc(2024, 1, 1, 0));
    invalid.volume = -1.0;
    assert!(store.write_partition(&[invalid], &jan()).unwrap_err().is_schema());
}

#[test]
fn test_write_rejects_sub_millisecond_timestamps() {
    let (_dir, store) = store();
    let base = utc(2024, 1, 1, 0);
    let rows = vec![
        candle("BTCUSDT", Timeframe::M1, base + Duration::microseconds(100)),
        candle("BTCUSDT", Timeframe::M1, base + Duration::microseconds(900)),
    ];
    let key = PartitionKey::new("BTCUSDT", Timeframe::M1, 2024, 1);

    let err = store.write_partition(&rows, &key).unwrap_err();
    assert!(err.is_schema());
    assert!(!store.exists(&key));
}

#[test]
fn test_read_date_range_tolerates_missing_month() {
    let (_dir, store) = store();
    let jan_rows = series("BTCUSDT", Timeframe::D1, utc(2024, 1, 30, 0), 2);
    let mar_rows = series("BTCUSDT", Timeframe::D1, utc(2024, 3, 1, 0), 2);
    store
        .write_partition(&jan_rows, &PartitionKey::new("BTCUSDT", Timeframe::D1, 2024, 1))
        .unwrap();
    store
        .write_partition(&mar_rows, &PartitionKey::new("BTCUSDT", Timeframe::D1, 2024, 3))
        .unwrap();

    let read = store
        .read_date_range("BTCUSDT", Timeframe::D1, utc(2024, 1, 1, 0), utc(2024, 3, 31, 0), None)
        .unwrap();

    assert_eq!(read.rows.len(), 4);
    assert_eq!(read.missing, vec![PartitionKey::new("BTCUSDT", Timeframe::D1, 2024, 2)]);
    assert!(read.rows.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
}

#[test]
fn test_read_date_range_is_inclusive_and_projects_columns() {
    let (_dir, store) = store();
    let rows = series("BTCUSDT", Timeframe::H1, utc(2024, 1, 1, 0), 24);
    store.write_partition(&rows, &jan()).unwrap();

    let read = store
        .read_date_range(
            "BTCUSDT",
            Timeframe::H1,
            utc(2024, 1, 1, 5),
            utc(2024, 1, 1, 10),
            Some(&[Column::Close]),
        )
        .unwrap();

    assert_eq!(read.rows.len(), 6);
    assert_eq!(read.rows[0].timestamp, utc(2024, 1, 1, 5));
    assert_eq!(read.rows[5].timestamp, utc(2024, 1, 1, 10));
    assert!(read.rows.iter().all(|r| r.close.is_some() && r.open.is_none() && r.volume.is_none()));
    assert_eq!(read.rows[0].close, Some(rows[5].close));
}

#[test]
fn test_many_row_groups_are_pruned_consistently() {
    let dir = TempDir::new().unwrap();
    let store = PartitionStore::new(dir.path()).with_max_row_group_size(100);
    let rows = series("BTCUSDT", Timeframe::M1, utc(2024, 1, 10, 0), 720);
    let key = PartitionKey::new("BTCUSDT", Timeframe::M1, 2024, 1);
    store.write_partition(&rows, &key).unwrap();

    let stats = store.partition_stats(&key).unwrap();
    assert_eq!(stats.row_groups, 8);
    assert_eq!(stats.row_count, 720);
    assert_eq!(stats.min_ts, Some(rows[0].timestamp));
    assert_eq!(stats.max_ts, Some(rows[719].timestamp));

    let start = rows[250].timestamp;
    let end = rows[260].timestamp;
    let read = store
        .read_date_range("BTCUSDT", Timeframe::M1, start, end, None)
        .unwrap()
        .into_candles("BTCUSDT", Timeframe::M1);
    assert_eq!(read, rows[250..=260].to_vec());
}

#[test]
fn test_codec_is_recorded_in_footer() {
    let (_dir, store) = store();
    let rows = series("BTCUSDT", Timeframe::H1, utc(2024, 1, 1, 0), 10);
    store.write_partition_with(&rows, &jan(), Codec::Zstd(5)).unwrap();

    let stats = store.partition_stats(&jan()).unwrap();
    assert!(stats.compression.to_uppercase().starts_with("ZSTD"));
    assert_eq!(store.read_candles(&jan()).unwrap(), rows);
}

#[test]
fn test_list_and_delete_partitions() {
    let (_dir, store) = store();
    for month in [1, 2, 5] {
        let key = PartitionKey::new("BTCUSDT", Timeframe::H1, 2024, month);
        let ts = key.month_start().unwrap();
        store.write_partition(&[candle("BTCUSDT", Timeframe::H1, ts)], &key).unwrap();
    }
    // 데이터 파일이 없는 디렉터리는 무시
    std::fs::create_dir_all(store.base_path().join("btcusdt/1h/2024-07")).unwrap();

    let months: Vec<_> = store
        .list_partitions("BTCUSDT", Timeframe::H1)
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(months, vec![(2024, 1), (2024, 2), (2024, 5)]);

    assert!(store
        .delete_partition(&PartitionKey::new("BTCUSDT", Timeframe::H1, 2024, 2))
        .unwrap());
    assert!(!store
        .delete_partition(&PartitionKey::new("BTCUSDT", Timeframe::H1, 2024, 2))
        .unwrap());
    assert_eq!(store.list_partitions("BTCUSDT", Timeframe::H1).unwrap().len(), 2);
    assert!(store.list_partitions("ETHUSDT", Timeframe::H1).unwrap().is_empty());
}

#[test]
fn test_missing_partition_read_is_not_found() {
    let (_dir, store) = store();
    let err = store.read_partition(&jan(), None).unwrap_err();
    assert!(err.is_not_found());
    assert!(store.partition_stats(&jan()).unwrap_err().is_not_found());
}

fn hours_in_january() -> impl Strategy<Value = Vec<i64>> {
    prop::collection::btree_set(0i64..(31 * 24), 1..60).prop_map(|s| s.into_iter().collect())
}

fn at_hours(hours: &[i64]) -> Vec<Candle> {
    hours
        .iter()
        .map(|h| candle("BTCUSDT", Timeframe::H1, utc(2024, 1, 1, 0) + Duration::hours(*h)))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn merge_is_order_independent(hours in hours_in_january(), split in 0usize..60) {
        let split = split.min(hours.len());
        let (a, b) = hours.split_at(split);
        let (a, b) = (at_hours(a), at_hours(b));

        let (_d1, first) = store();
        first.write_partition(&a, &jan()).unwrap();
        first.write_partition(&b, &jan()).unwrap();

        let (_d2, second) = store();
        second.write_partition(&b, &jan()).unwrap();
        second.write_partition(&a, &jan()).unwrap();

        let expected = at_hours(&hours);
        prop_assert_eq!(first.read_candles(&jan()).unwrap(), expected.clone());
        prop_assert_eq!(second.read_candles(&jan()).unwrap(), expected);
    }
}

//! 하이브리드 저장소 시나리오 테스트
//!
//! Hot 티어 자리에 별도 디렉터리의 Warm 저장소를 두어 DB 없이 라우팅을 검증합니다.

mod common;

use chrono::{DateTime, Duration, Utc};
use common::{candle, series, utc};
use ohlcv_core::{FixedClock, Timeframe};
use ohlcv_store::{
    HybridRepository, MarketDataRepository, PartitionStore, TieringConfig, WarmRepository,
};
use std::sync::Arc;
use tempfile::TempDir;

struct Tiers {
    _dirs: (TempDir, TempDir),
    warm: Arc<WarmRepository>,
    hot: Arc<WarmRepository>,
    repo: HybridRepository,
}

fn tiers(now: DateTime<Utc>, hot_retention_days: u32) -> Tiers {
    let warm_dir = TempDir::new().unwrap();
    let hot_dir = TempDir::new().unwrap();
    let warm = Arc::new(WarmRepository::new(PartitionStore::new(warm_dir.path())));
    let hot = Arc::new(WarmRepository::new(PartitionStore::new(hot_dir.path())));
    let repo = HybridRepository::new(
        warm.clone(),
        hot.clone(),
        TieringConfig::default().with_hot_retention_days(hot_retention_days),
    )
    .with_clock(Arc::new(FixedClock::new(now)));
    Tiers {
        _dirs: (warm_dir, hot_dir),
        warm,
        hot,
        repo,
    }
}

async fn count(repo: &WarmRepository, interval: Timeframe) -> usize {
    repo.get_by_date_range("BTCUSDT", interval, utc(2000, 1, 1, 0), utc(2100, 1, 1, 0))
        .await
        .unwrap()
        .len()
}

#[tokio::test]
async fn test_routing_boundary() {
    let now = utc(2024, 6, 1, 0);
    let t = tiers(now, 30);
    let cutoff = t.repo.cutoff();
    assert_eq!(cutoff, now - Duration::days(30));

    let rows = vec![
        candle("BTCUSDT", Timeframe::M1, cutoff - Duration::seconds(1)),
        candle("BTCUSDT", Timeframe::M1, cutoff),
        candle("BTCUSDT", Timeframe::M1, cutoff + Duration::seconds(1)),
    ];
    assert_eq!(t.repo.save(&rows).await.unwrap(), 3);

    assert_eq!(count(&t.warm, Timeframe::M1).await, 1);
    assert_eq!(count(&t.hot, Timeframe::M1).await, 2);

    let both = t
        .repo
        .get_by_date_range("BTCUSDT", Timeframe::M1, cutoff - Duration::hours(1), now)
        .await
        .unwrap();
    assert_eq!(both, rows);
}

#[tokio::test]
async fn test_day_spanning_month_boundary_in_warm() {
    // cutoff가 먼 미래라 모두 Warm으로 감
    let t = tiers(utc(2100, 1, 1, 0), 30);
    let rows = series("BTCUSDT", Timeframe::H1, utc(2024, 1, 31, 13), 24);
    assert_eq!(rows.last().unwrap().timestamp, utc(2024, 2, 1, 12));

    assert_eq!(t.repo.save(&rows).await.unwrap(), 24);
    assert_eq!(count(&t.hot, Timeframe::H1).await, 0);

    let store = t.warm.store();
    let months: Vec<_> = store
        .list_partitions("BTCUSDT", Timeframe::H1)
        .unwrap()
        .into_iter()
        .collect();
    assert_eq!(months, vec![(2024, 1), (2024, 2)]);
    let jan = ohlcv_core::PartitionKey::new("BTCUSDT", Timeframe::H1, 2024, 1);
    let feb = ohlcv_core::PartitionKey::new("BTCUSDT", Timeframe::H1, 2024, 2);
    assert_eq!(store.partition_stats(&jan).unwrap().row_count, 11);
    assert_eq!(store.partition_stats(&feb).unwrap().row_count, 13);

    let window = t
        .repo
        .get_by_date_range("BTCUSDT", Timeframe::H1, utc(2024, 1, 31, 18), utc(2024, 2, 1, 6))
        .await
        .unwrap();
    assert_eq!(window.len(), 13);
    assert_eq!(window[0].timestamp, utc(2024, 1, 31, 18));
    assert_eq!(window[12].timestamp, utc(2024, 2, 1, 6));
    assert!(window.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
}

#[tokio::test]
async fn test_latest_comes_from_hot_tier() {
    let now = utc(2024, 6, 1, 0);
    let t = tiers(now, 30);
    let old = candle("BTCUSDT", Timeframe::H1, now - Duration::days(40));
    let recent = candle("BTCUSDT", Timeframe::H1, now - Duration::days(1));
    t.repo.save(&[old, recent.clone()]).await.unwrap();

    let latest = t.repo.get_latest("BTCUSDT", Timeframe::H1, 1).await.unwrap();
    assert_eq!(latest, vec![recent]);
}

#[tokio::test]
async fn test_migration_then_reads_are_unchanged() {
    let now = utc(2024, 6, 1, 0);
    let t = tiers(now, 3);
    // 10일치 시간봉: 처음 7일은 Warm, 나머지 3일은 Hot
    let rows = series("BTCUSDT", Timeframe::H1, now - Duration::days(10), 240);
    t.hot.save(&rows).await.unwrap();

    let before = t
        .repo
        .get_by_date_range("BTCUSDT", Timeframe::H1, now - Duration::days(10), now)
        .await
        .unwrap();
    // 아직 이관 전이라 Warm 구간은 비어 있음
    assert_eq!(before.len(), 72);

    let report = t
        .repo
        .migrate_to_warm("BTCUSDT", Timeframe::H1, None)
        .await
        .unwrap();
    assert_eq!(report.rows_read, 168);
    assert_eq!(report.rows_written, 168);
    assert_eq!(report.rows_deleted, 168);
    assert_eq!(count(&t.warm, Timeframe::H1).await, 168);
    assert_eq!(count(&t.hot, Timeframe::H1).await, 72);

    let after = t
        .repo
        .get_by_date_range("BTCUSDT", Timeframe::H1, now - Duration::days(10), now)
        .await
        .unwrap();
    assert_eq!(after, rows);

    let dates = t
        .repo
        .get_available_dates("BTCUSDT", Timeframe::H1)
        .await
        .unwrap();
    assert!(!dates.is_empty());
    assert!(dates.windows(2).all(|w| w[0] < w[1]));
}

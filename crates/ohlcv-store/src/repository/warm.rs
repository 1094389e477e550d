//! Warm 티어: 월 단위 Parquet 파티션 저장소.
//!
//! 파일 I/O는 모두 블로킹이므로 `spawn_blocking`으로 별도 스레드 풀에서 실행합니다.

use super::{validate_all, MarketDataRepository};
use crate::error::Result;
use crate::partition::{Column, PartialRead, PartitionStore};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use ohlcv_core::{months_between, Candle, PartitionKey, Timeframe};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument};

/// Parquet 파티션 기반 저장소.
#[derive(Debug, Clone)]
pub struct WarmRepository {
    store: PartitionStore,
}

impl WarmRepository {
    pub fn new(store: PartitionStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &PartitionStore {
        &self.store
    }

    /// 블로킹 파티션 작업을 별도 스레드에서 실행합니다.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(PartitionStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(store)).await?
    }

    /// 범위 조회 결과와 함께 누락된 파티션 목록을 반환합니다.
    ///
    /// 누락된 월이 있어도 실패하지 않으며, 호출자가 부분 결과인지 판단할 수 있습니다.
    pub async fn get_by_date_range_partial(
        &self,
        symbol: &str,
        interval: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<PartialRead> {
        let symbol = symbol.to_string();
        self.blocking(move |store| {
            match clamp_to_partitions(&store, &symbol, interval, start, end)? {
                Some((start, end)) => store.read_date_range(&symbol, interval, start, end, None),
                None => Ok(PartialRead::default()),
            }
        })
        .await
    }

    /// 파티션 목록 (오름차순).
    pub async fn list_partitions(&self, symbol: &str, interval: Timeframe) -> Result<Vec<PartitionKey>> {
        let symbol = symbol.to_string();
        self.blocking(move |store| {
            Ok(store
                .list_partitions(&symbol, interval)?
                .into_iter()
                .map(|(year, month)| PartitionKey::new(symbol.as_str(), interval, year, month))
                .collect())
        })
        .await
    }
}

/// 요청 범위를 실제 파티션이 있는 구간으로 좁힙니다. 겹치는 구간이 없으면 `None`.
///
/// 하한이 없는 범위(예: 0001년부터)도 빈 월을 하나씩 확인하지 않게 합니다.
fn clamp_to_partitions(
    store: &PartitionStore,
    symbol: &str,
    interval: Timeframe,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
    let months = store.list_partitions(symbol, interval)?;
    let (Some(&(first_y, first_m)), Some(&(last_y, last_m))) = (months.first(), months.last()) else {
        return Ok(None);
    };

    let lower = PartitionKey::new(symbol, interval, first_y, first_m).month_start();
    let upper = PartitionKey::new(symbol, interval, last_y, last_m)
        .next_month_start()
        .map(|t| t - Duration::nanoseconds(1));

    let start = lower.map_or(start, |lower| start.max(lower));
    let end = upper.map_or(end, |upper| end.min(upper));
    Ok((start <= end).then_some((start, end)))
}

#[async_trait]
impl MarketDataRepository for WarmRepository {
    #[instrument(skip(self), fields(tier = "warm"))]
    async fn get_by_date_range(
        &self,
        symbol: &str,
        interval: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        let read = self
            .get_by_date_range_partial(symbol, interval, start, end)
            .await?;
        Ok(read.into_candles(symbol, interval))
    }

    #[instrument(skip(self), fields(tier = "warm"))]
    async fn get_latest(
        &self,
        symbol: &str,
        interval: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let symbol = symbol.to_string();
        self.blocking(move |store| {
            let mut latest = Vec::new();
            // 최신 파티션부터 필요한 만큼만 읽음
            for (year, month) in store.list_partitions(&symbol, interval)?.into_iter().rev() {
                let key = PartitionKey::new(symbol.as_str(), interval, year, month);
                let rows = store.read_candles(&key)?;
                let needed = limit - latest.len();
                latest.extend(rows.into_iter().rev().take(needed));
                if latest.len() >= limit {
                    break;
                }
            }
            Ok(latest)
        })
        .await
    }

    #[instrument(skip(self, candles), fields(tier = "warm", count = candles.len()))]
    async fn save(&self, candles: &[Candle]) -> Result<usize> {
        if candles.is_empty() {
            return Ok(0);
        }
        validate_all(candles)?;

        let mut groups: BTreeMap<PartitionKey, Vec<Candle>> = BTreeMap::new();
        let mut distinct = BTreeSet::new();
        for candle in candles {
            let key = candle.key();
            groups
                .entry(PartitionKey::for_timestamp(&key.symbol, candle.interval, candle.timestamp))
                .or_default()
                .push(candle.clone());
            distinct.insert(key);
        }

        let partitions = groups.len();
        self.blocking(move |store| {
            for (key, rows) in &groups {
                store.write_partition(rows, key)?;
            }
            Ok(())
        })
        .await?;

        info!(rows = distinct.len(), partitions = partitions, "Warm 티어 저장 완료");
        Ok(distinct.len())
    }

    async fn exists(
        &self,
        symbol: &str,
        interval: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<bool> {
        let symbol = symbol.to_string();
        self.blocking(move |store| {
            let Some((start, end)) = clamp_to_partitions(&store, &symbol, interval, start, end)? else {
                return Ok(false);
            };
            let read =
                store.read_date_range(&symbol, interval, start, end, Some(&[Column::Timestamp]))?;
            Ok(!read.rows.is_empty())
        })
        .await
    }

    #[instrument(skip(self), fields(tier = "warm"))]
    async fn delete_by_date_range(
        &self,
        symbol: &str,
        interval: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<usize> {
        let symbol = symbol.to_string();
        self.blocking(move |store| {
            let Some((start, end)) = clamp_to_partitions(&store, &symbol, interval, start, end)? else {
                return Ok(0);
            };
            let mut deleted = 0;
            for (year, month) in months_between(start, end) {
                let key = PartitionKey::new(symbol.as_str(), interval, year, month);
                if !store.exists(&key) {
                    continue;
                }
                let (removed, kept): (Vec<Candle>, Vec<Candle>) = store
                    .read_candles(&key)?
                    .into_iter()
                    .partition(|c| c.timestamp >= start && c.timestamp <= end);
                if removed.is_empty() {
                    continue;
                }
                store.rewrite_partition(&key, &kept)?;
                debug!(partition = %key, removed = removed.len(), kept = kept.len(), "파티션 범위 삭제");
                deleted += removed.len();
            }
            Ok(deleted)
        })
        .await
    }

    async fn get_available_dates(
        &self,
        symbol: &str,
        interval: Timeframe,
    ) -> Result<Vec<DateTime<Utc>>> {
        let symbol = symbol.to_string();
        self.blocking(move |store| {
            let mut dates = Vec::new();
            for (year, month) in store.list_partitions(&symbol, interval)? {
                let key = PartitionKey::new(symbol.as_str(), interval, year, month);
                if let Some(min_ts) = store.partition_stats(&key)?.min_ts {
                    dates.push(min_ts);
                }
            }
            Ok(dates)
        })
        .await
    }
}

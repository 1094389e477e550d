//! 테스트용 메모리 저장소 (장애 주입 가능).

use super::{validate_all, MarketDataRepository};
use crate::error::{Result, StorageError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ohlcv_core::{Candle, CandleKey, Timeframe};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub(crate) struct MemoryRepository {
    rows: Mutex<BTreeMap<CandleKey, Candle>>,
    fail_saves: AtomicBool,
    fail_deletes: AtomicBool,
    pub(crate) range_calls: AtomicUsize,
}

impl MemoryRepository {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub(crate) fn all(&self) -> Vec<Candle> {
        let mut rows: Vec<Candle> = self.rows.lock().unwrap().values().cloned().collect();
        rows.sort_by_key(|c| c.timestamp);
        rows
    }

    fn in_range(
        c: &Candle,
        symbol: &str,
        interval: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> bool {
        c.symbol.eq_ignore_ascii_case(symbol) && c.interval == interval && c.timestamp >= start && c.timestamp <= end
    }
}

#[async_trait]
impl MarketDataRepository for MemoryRepository {
    async fn get_by_date_range(
        &self,
        symbol: &str,
        interval: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        self.range_calls.fetch_add(1, Ordering::SeqCst);
        let mut rows: Vec<Candle> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|c| Self::in_range(c, symbol, interval, start, end))
            .cloned()
            .collect();
        rows.sort_by_key(|c| c.timestamp);
        Ok(rows)
    }

    async fn get_latest(
        &self,
        symbol: &str,
        interval: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let mut rows: Vec<Candle> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.symbol.eq_ignore_ascii_case(symbol) && c.interval == interval)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn save(&self, candles: &[Candle]) -> Result<usize> {
        validate_all(candles)?;
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StorageError::Insert("injected save failure".into()));
        }
        let mut rows = self.rows.lock().unwrap();
        let mut written = std::collections::BTreeSet::new();
        for candle in candles {
            written.insert(candle.key());
            rows.insert(candle.key(), candle.clone());
        }
        Ok(written.len())
    }

    async fn exists(
        &self,
        symbol: &str,
        interval: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .any(|c| Self::in_range(c, symbol, interval, start, end)))
    }

    async fn delete_by_date_range(
        &self,
        symbol: &str,
        interval: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<usize> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StorageError::Delete("injected delete failure".into()));
        }
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|_, c| !Self::in_range(c, symbol, interval, start, end));
        Ok(before - rows.len())
    }

    async fn get_available_dates(
        &self,
        symbol: &str,
        interval: Timeframe,
    ) -> Result<Vec<DateTime<Utc>>> {
        let mut days: Vec<DateTime<Utc>> = self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.symbol.eq_ignore_ascii_case(symbol) && c.interval == interval)
            .filter_map(|c| {
                c.timestamp
                    .date_naive()
                    .and_hms_opt(0, 0, 0)
                    .map(|d| d.and_utc())
            })
            .collect();
        days.sort();
        days.dedup();
        Ok(days)
    }
}

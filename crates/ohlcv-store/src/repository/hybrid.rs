//! Hybrid 저장소: 경계 시각(cutoff) 기준으로 Hot/Warm 티어에 요청을 분배합니다.
//!
//! - `timestamp >= cutoff` → Hot
//! - `timestamp < cutoff` → Warm
//!
//! cutoff는 호출 시점마다 `now - hot_retention_days`로 다시 계산합니다.

use super::{validate_all, MarketDataRepository};
use crate::config::{cutoff_for, TieringConfig};
use crate::error::{MigrationStage, Result, StorageError, Tier};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use ohlcv_core::{storage_span, Candle, Clock, SystemClock, Timeframe};
use std::sync::Arc;
use tracing::{error, info, instrument, warn, Instrument};

/// 요청 범위가 어느 티어에 걸치는지.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Hot,
    Warm,
    /// 경계를 가로지름: Warm `[start, cutoff)`, Hot `[cutoff, end]`
    Both(DateTime<Utc>),
}

/// cutoff 바로 이전 시각 (Warm 구간의 포함 끝).
fn before(cutoff: DateTime<Utc>) -> DateTime<Utc> {
    cutoff - Duration::nanoseconds(1)
}

/// Hot → Warm 이관 결과.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub symbol: String,
    pub interval: Timeframe,
    /// 이관 기준 시각 (이보다 오래된 행이 이관 대상)
    pub cutoff: DateTime<Utc>,
    pub rows_read: usize,
    pub rows_written: usize,
    pub rows_deleted: usize,
}

/// Hot/Warm 티어를 하나의 저장소처럼 보이게 하는 라우터.
pub struct HybridRepository {
    warm: Arc<dyn MarketDataRepository>,
    hot: Arc<dyn MarketDataRepository>,
    tiering: TieringConfig,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for HybridRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridRepository")
            .field("tiering", &self.tiering)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl HybridRepository {
    pub fn new(
        warm: Arc<dyn MarketDataRepository>,
        hot: Arc<dyn MarketDataRepository>,
        tiering: TieringConfig,
    ) -> Self {
        Self {
            warm,
            hot,
            tiering,
            clock: Arc::new(SystemClock),
        }
    }

    /// 시계를 교체합니다 (테스트에서 고정 시각 사용).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn tiering(&self) -> &TieringConfig {
        &self.tiering
    }

    /// 현재 Hot/Warm 경계.
    pub fn cutoff(&self) -> DateTime<Utc> {
        self.tiering.cutoff(self.clock.now())
    }

    fn route(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Route {
        let cutoff = self.cutoff();
        if start >= cutoff {
            Route::Hot
        } else if end < cutoff {
            Route::Warm
        } else {
            Route::Both(cutoff)
        }
    }

    /// 두 티어 결과를 합치고 timestamp 순으로 정렬하며 중복 키를 제거합니다.
    fn merge(mut rows: Vec<Candle>) -> Vec<Candle> {
        rows.sort_by_key(|c| c.timestamp);
        rows.dedup_by(|a, b| {
            a.timestamp == b.timestamp
                && a.interval == b.interval
                && a.symbol.eq_ignore_ascii_case(&b.symbol)
        });
        rows
    }

    /// 두 티어 작업 결과를 합칩니다. 한쪽만 실패하면 성공한 쪽은 유지하고 실패 티어를 보고합니다.
    fn combine(
        op: &str,
        warm: Result<usize>,
        hot: Result<usize>,
    ) -> Result<usize> {
        match (warm, hot) {
            (Ok(w), Ok(h)) => Ok(w + h),
            (Err(e), Ok(h)) => {
                warn!(op = op, hot_rows = h, error = %e, "Warm 티어 실패 - Hot 티어 결과는 유지");
                Err(e.in_tier(Tier::Warm))
            }
            (Ok(w), Err(e)) => {
                warn!(op = op, warm_rows = w, error = %e, "Hot 티어 실패 - Warm 티어 결과는 유지");
                Err(e.in_tier(Tier::Hot))
            }
            (Err(warm_err), Err(hot_err)) => {
                error!(op = op, error = %hot_err, "Hot 티어도 실패");
                Err(warm_err.in_tier(Tier::Warm))
            }
        }
    }

    // =========================================================================
    // 이관
    // =========================================================================

    /// cutoff보다 오래된 Hot 행을 Warm으로 옮깁니다.
    ///
    /// 순서: Hot 읽기 → Warm 쓰기 → Hot 삭제. Warm 쓰기까지 성공해야만 Hot에서
    /// 삭제하므로, 중간에 실패하면 행이 두 티어에 모두 남을 수는 있어도 사라지지는
    /// 않습니다. 다시 실행하면 Warm upsert가 멱등이므로 같은 결과로 수렴합니다.
    ///
    /// `cutoff_days`가 없으면 설정의 `hot_retention_days`를 사용합니다.
    pub async fn migrate_to_warm(
        &self,
        symbol: &str,
        interval: Timeframe,
        cutoff_days: Option<u32>,
    ) -> Result<MigrationReport> {
        let span = storage_span!("migrate_to_warm", symbol, interval);
        self.migrate_inner(symbol, interval, cutoff_days)
            .instrument(span)
            .await
    }

    async fn migrate_inner(
        &self,
        symbol: &str,
        interval: Timeframe,
        cutoff_days: Option<u32>,
    ) -> Result<MigrationReport> {
        let days = cutoff_days.unwrap_or(self.tiering.hot_retention_days);
        let cutoff = cutoff_for(self.clock.now(), days);
        let lower = self.tiering.migration_lower_bound.unwrap_or_else(far_past);

        let aborted = |stage: MigrationStage, tier: Tier| {
            let symbol = symbol.to_string();
            move |e: StorageError| StorageError::MigrationAborted {
                symbol,
                interval,
                stage,
                source: Box::new(e.in_tier(tier)),
            }
        };

        let mut report = MigrationReport {
            symbol: symbol.to_string(),
            interval,
            cutoff,
            rows_read: 0,
            rows_written: 0,
            rows_deleted: 0,
        };

        // 1. Hot에서 cutoff 이전 행 읽기
        let rows = self
            .hot
            .get_by_date_range(symbol, interval, lower, before(cutoff))
            .await
            .map_err(aborted(MigrationStage::ReadHot, Tier::Hot))?;
        report.rows_read = rows.len();

        let (first, last) = match (rows.first(), rows.last()) {
            (Some(first), Some(last)) => (first.timestamp, last.timestamp),
            _ => {
                info!(cutoff = %cutoff, "이관할 데이터 없음");
                return Ok(report);
            }
        };

        // 2. Warm에 쓰기 (실패하면 Hot은 그대로)
        report.rows_written = self
            .warm
            .save(&rows)
            .await
            .map_err(aborted(MigrationStage::WriteWarm, Tier::Warm))?;

        // 3. 읽은 구간만 Hot에서 삭제
        report.rows_deleted = self
            .hot
            .delete_by_date_range(symbol, interval, first, last)
            .await
            .map_err(aborted(MigrationStage::DeleteHot, Tier::Hot))?;

        info!(
            cutoff = %cutoff,
            rows_read = report.rows_read,
            rows_written = report.rows_written,
            rows_deleted = report.rows_deleted,
            "Hot → Warm 이관 완료"
        );
        Ok(report)
    }
}

/// 하한이 설정되지 않았을 때의 스캔 시작 시각 (0001-01-01T00:00:00Z).
fn far_past() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(-62_135_596_800, 0).unwrap_or_default()
}

#[async_trait]
impl MarketDataRepository for HybridRepository {
    #[instrument(skip(self), fields(tier = "hybrid"))]
    async fn get_by_date_range(
        &self,
        symbol: &str,
        interval: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>> {
        if start > end {
            return Ok(Vec::new());
        }

        match self.route(start, end) {
            Route::Hot => self
                .hot
                .get_by_date_range(symbol, interval, start, end)
                .await
                .map_err(|e| e.in_tier(Tier::Hot)),
            Route::Warm => self
                .warm
                .get_by_date_range(symbol, interval, start, end)
                .await
                .map_err(|e| e.in_tier(Tier::Warm)),
            Route::Both(cutoff) => {
                let (warm, hot) = tokio::join!(
                    self.warm
                        .get_by_date_range(symbol, interval, start, before(cutoff)),
                    self.hot.get_by_date_range(symbol, interval, cutoff, end),
                );
                let mut rows = warm.map_err(|e| e.in_tier(Tier::Warm))?;
                rows.extend(hot.map_err(|e| e.in_tier(Tier::Hot))?);
                Ok(Self::merge(rows))
            }
        }
    }

    /// 최근 데이터는 항상 Hot 티어에 있으므로 Hot만 조회합니다.
    async fn get_latest(
        &self,
        symbol: &str,
        interval: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        self.hot
            .get_latest(symbol, interval, limit)
            .await
            .map_err(|e| e.in_tier(Tier::Hot))
    }

    #[instrument(skip(self, candles), fields(tier = "hybrid", count = candles.len()))]
    async fn save(&self, candles: &[Candle]) -> Result<usize> {
        if candles.is_empty() {
            return Ok(0);
        }
        validate_all(candles)?;

        let cutoff = self.cutoff();
        let (hot_rows, warm_rows): (Vec<Candle>, Vec<Candle>) =
            candles.iter().cloned().partition(|c| c.timestamp >= cutoff);

        let (warm, hot) = tokio::join!(
            async {
                if warm_rows.is_empty() {
                    Ok(0)
                } else {
                    self.warm.save(&warm_rows).await
                }
            },
            async {
                if hot_rows.is_empty() {
                    Ok(0)
                } else {
                    self.hot.save(&hot_rows).await
                }
            },
        );
        Self::combine("save", warm, hot)
    }

    async fn exists(
        &self,
        symbol: &str,
        interval: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<bool> {
        if start > end {
            return Ok(false);
        }

        match self.route(start, end) {
            Route::Hot => self
                .hot
                .exists(symbol, interval, start, end)
                .await
                .map_err(|e| e.in_tier(Tier::Hot)),
            Route::Warm => self
                .warm
                .exists(symbol, interval, start, end)
                .await
                .map_err(|e| e.in_tier(Tier::Warm)),
            Route::Both(cutoff) => {
                let in_hot = self
                    .hot
                    .exists(symbol, interval, cutoff, end)
                    .await
                    .map_err(|e| e.in_tier(Tier::Hot))?;
                if in_hot {
                    return Ok(true);
                }
                self.warm
                    .exists(symbol, interval, start, before(cutoff))
                    .await
                    .map_err(|e| e.in_tier(Tier::Warm))
            }
        }
    }

    #[instrument(skip(self), fields(tier = "hybrid"))]
    async fn delete_by_date_range(
        &self,
        symbol: &str,
        interval: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<usize> {
        if start > end {
            return Ok(0);
        }

        match self.route(start, end) {
            Route::Hot => self
                .hot
                .delete_by_date_range(symbol, interval, start, end)
                .await
                .map_err(|e| e.in_tier(Tier::Hot)),
            Route::Warm => self
                .warm
                .delete_by_date_range(symbol, interval, start, end)
                .await
                .map_err(|e| e.in_tier(Tier::Warm)),
            Route::Both(cutoff) => {
                let (warm, hot) = tokio::join!(
                    self.warm
                        .delete_by_date_range(symbol, interval, start, before(cutoff)),
                    self.hot.delete_by_date_range(symbol, interval, cutoff, end),
                );
                Self::combine("delete", warm, hot)
            }
        }
    }

    async fn get_available_dates(
        &self,
        symbol: &str,
        interval: Timeframe,
    ) -> Result<Vec<DateTime<Utc>>> {
        let (warm, hot) = tokio::join!(
            self.warm.get_available_dates(symbol, interval),
            self.hot.get_available_dates(symbol, interval),
        );
        let mut dates = warm.map_err(|e| e.in_tier(Tier::Warm))?;
        dates.extend(hot.map_err(|e| e.in_tier(Tier::Hot))?);
        dates.sort();
        dates.dedup();
        Ok(dates)
    }
}

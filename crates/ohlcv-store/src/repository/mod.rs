//! 티어별 시장 데이터 저장소.
//!
//! 모든 티어(Hot: PostgreSQL, Warm: Parquet 파티션, Hybrid: 둘의 조합)는
//! 같은 [`MarketDataRepository`] 계약을 구현하므로, 호출자는 데이터가 어느 티어에
//! 있는지 알 필요가 없습니다.
//!
//! 공통 규칙:
//! - 모든 범위는 양 끝을 포함합니다 (`[start, end]`).
//! - `start > end`이면 빈 결과를 반환합니다.
//! - 결과는 timestamp 오름차순입니다 (`get_latest`만 최신순).
//! - `(symbol, interval, timestamp)`가 같은 행을 다시 저장하면 교체됩니다.

mod hot;
mod hybrid;
#[cfg(test)]
pub(crate) mod memory;
mod warm;

pub use hot::{Database, DatabaseConfig, HotRepository, MarketDataRecord};
pub use hybrid::{HybridRepository, MigrationReport};
pub use warm::WarmRepository;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ohlcv_core::{Candle, Timeframe};

/// 시장 데이터 저장소 계약.
#[async_trait]
pub trait MarketDataRepository: Send + Sync {
    /// `[start, end]` 범위의 캔들을 timestamp 오름차순으로 조회합니다.
    async fn get_by_date_range(
        &self,
        symbol: &str,
        interval: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>>;

    /// 최근 캔들을 최신순으로 최대 `limit`개 조회합니다.
    async fn get_latest(&self, symbol: &str, interval: Timeframe, limit: usize)
        -> Result<Vec<Candle>>;

    /// 캔들을 저장(upsert)하고 기록된 고유 행 수를 반환합니다.
    ///
    /// 하나라도 OHLC 불변식을 위반하면 아무것도 쓰지 않고 스키마 오류를 반환합니다.
    async fn save(&self, candles: &[Candle]) -> Result<usize>;

    /// 범위 안에 행이 하나라도 있는지 확인합니다.
    async fn exists(
        &self,
        symbol: &str,
        interval: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<bool>;

    /// 범위 안의 행을 삭제하고 삭제된 행 수를 반환합니다.
    async fn delete_by_date_range(
        &self,
        symbol: &str,
        interval: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<usize>;

    /// 데이터가 있는 날짜 목록 (오름차순, UTC).
    ///
    /// Hot 티어는 UTC 자정 기준 일 단위, Warm 티어는 파티션별 가장 이른 시각을
    /// 반환하는 대략적인 색인입니다.
    async fn get_available_dates(
        &self,
        symbol: &str,
        interval: Timeframe,
    ) -> Result<Vec<DateTime<Utc>>>;
}

/// 저장 전 배치 전체를 검증합니다.
pub(crate) fn validate_all(candles: &[Candle]) -> Result<()> {
    for candle in candles {
        candle
            .validate()
            .map_err(|e| crate::error::StorageError::schema(candle, e))?;
    }
    Ok(())
}

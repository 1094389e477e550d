//! OHLCV 캔들 레코드.

use crate::domain::PartitionKey;
use crate::error::CandleError;
use crate::types::Timeframe;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 한 심볼/간격/시각의 OHLCV 레코드.
///
/// 고유 키는 `(symbol, interval, timestamp)`이며, 같은 키로 다시 저장하면
/// 기존 값을 그대로 대체합니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// 심볼 (예: "BTCUSDT")
    pub symbol: String,
    /// 캔들 간격
    pub interval: Timeframe,
    /// 캔들 시작 시각 (UTC)
    pub timestamp: DateTime<Utc>,
    /// 시가
    pub open: f64,
    /// 고가
    pub high: f64,
    /// 저가
    pub low: f64,
    /// 종가
    pub close: f64,
    /// 거래량
    pub volume: f64,
}

/// 캔들의 고유 키. 심볼은 소문자로 정규화됩니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CandleKey {
    pub symbol: String,
    pub interval: Timeframe,
    pub timestamp: DateTime<Utc>,
}

/// 저장 키에 쓰는 심볼 표기 (소문자).
///
/// 모든 티어가 이 표기로 심볼을 비교하므로 `BTCUSDT`와 `btcusdt`는 같은 심볼입니다.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.to_lowercase()
}

impl Candle {
    /// 새 캔들을 생성합니다.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        interval: Timeframe,
        timestamp: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// OHLC 불변식을 검사합니다.
    ///
    /// - 모든 가격과 거래량은 유한한 0 이상의 값
    /// - `high >= max(open, close)`, `low <= min(open, close)`, `high >= low`
    /// - 시각은 밀리초 단위 (모든 티어가 같은 정밀도로 왕복)
    pub fn validate(&self) -> Result<(), CandleError> {
        if self.timestamp.timestamp_subsec_nanos() % 1_000_000 != 0 {
            return Err(CandleError::SubMillisecondTimestamp {
                timestamp: self.timestamp,
            });
        }

        for (field, value) in [
            ("open", self.open),
            ("high", self.high),
            ("low", self.low),
            ("close", self.close),
            ("volume", self.volume),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(CandleError::InvalidValue { field, value });
            }
        }

        if self.high < self.low {
            return Err(CandleError::HighBelowLow {
                high: self.high,
                low: self.low,
            });
        }

        let body_top = self.open.max(self.close);
        if self.high < body_top {
            return Err(CandleError::HighBelowBody {
                high: self.high,
                body_top,
            });
        }

        let body_bottom = self.open.min(self.close);
        if self.low > body_bottom {
            return Err(CandleError::LowAboveBody {
                low: self.low,
                body_bottom,
            });
        }

        Ok(())
    }

    /// 고유 키를 반환합니다.
    pub fn key(&self) -> CandleKey {
        CandleKey {
            symbol: normalize_symbol(&self.symbol),
            interval: self.interval,
            timestamp: self.timestamp,
        }
    }

    /// 이 캔들이 속한 월 파티션 키를 반환합니다.
    pub fn partition_key(&self) -> PartitionKey {
        PartitionKey::for_timestamp(&self.symbol, self.interval, self.timestamp)
    }

    /// 전형가격 (H+L+C)/3.
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// 종가 - 시가.
    pub fn price_change(&self) -> f64 {
        self.close - self.open
    }

    /// 시가 대비 변동률(%). 시가가 0이면 0을 반환합니다.
    pub fn price_change_pct(&self) -> f64 {
        if self.open == 0.0 {
            0.0
        } else {
            self.price_change() / self.open * 100.0
        }
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn candle(open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle::new(
            "BTCUSDT",
            Timeframe::H1,
            Utc.with_ymd_and_hms(2024, 1, 31, 13, 0, 0).unwrap(),
            open,
            high,
            low,
            close,
            volume,
        )
    }

    #[test]
    fn test_valid_candle() {
        let c = candle(100.0, 110.0, 95.0, 105.0, 12.5);
        assert!(c.validate().is_ok());
        assert!(c.is_bullish());
        assert!(!c.is_bearish());
        assert!((c.typical_price() - 103.333_333).abs() < 1e-5);
        assert!((c.price_change_pct() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_flat_candle_is_valid() {
        assert!(candle(0.0, 0.0, 0.0, 0.0, 0.0).validate().is_ok());
    }

    #[test]
    fn test_negative_value_rejected() {
        let err = candle(100.0, 110.0, 95.0, 105.0, -1.0).validate().unwrap_err();
        assert_eq!(
            err,
            CandleError::InvalidValue {
                field: "volume",
                value: -1.0
            }
        );
    }

    #[test]
    fn test_non_finite_rejected() {
        let err = candle(f64::NAN, 110.0, 95.0, 105.0, 1.0).validate().unwrap_err();
        assert!(matches!(err, CandleError::InvalidValue { field: "open", .. }));
    }

    #[test]
    fn test_high_below_body_rejected() {
        let err = candle(100.0, 104.0, 95.0, 105.0, 1.0).validate().unwrap_err();
        assert!(matches!(err, CandleError::HighBelowBody { .. }));
    }

    #[test]
    fn test_low_above_body_rejected() {
        let err = candle(100.0, 110.0, 101.0, 105.0, 1.0).validate().unwrap_err();
        assert!(matches!(err, CandleError::LowAboveBody { .. }));
    }

    #[test]
    fn test_high_below_low_rejected() {
        let err = candle(100.0, 90.0, 95.0, 100.0, 1.0).validate().unwrap_err();
        assert!(matches!(err, CandleError::HighBelowLow { .. }));
    }

    #[test]
    fn test_sub_millisecond_timestamp_rejected() {
        let mut c = candle(100.0, 110.0, 95.0, 105.0, 1.0);
        c.timestamp += chrono::Duration::microseconds(1500);
        assert!(matches!(
            c.validate(),
            Err(CandleError::SubMillisecondTimestamp { .. })
        ));

        c.timestamp -= chrono::Duration::microseconds(500);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_key_ignores_symbol_case() {
        let upper = candle(1.0, 1.0, 1.0, 1.0, 1.0);
        let mut lower = upper.clone();
        lower.symbol = "btcusdt".into();
        assert_eq!(upper.key(), lower.key());
        assert_eq!(upper.key().symbol, "btcusdt");
    }

    #[test]
    fn test_partition_key() {
        let key = candle(1.0, 1.0, 1.0, 1.0, 1.0).partition_key();
        assert_eq!(key.relative_path(), "btcusdt/1h/2024-01/data");
    }
}

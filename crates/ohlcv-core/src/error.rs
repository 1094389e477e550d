//! 캔들 검증 오류 타입.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// 캔들이 OHLC 불변식을 위반했을 때의 오류.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CandleError {
    /// 음수이거나 유한하지 않은 값
    #[error("{field} must be a finite, non-negative number (got {value})")]
    InvalidValue { field: &'static str, value: f64 },

    /// 고가가 저가보다 낮음
    #[error("high {high} is below low {low}")]
    HighBelowLow { high: f64, low: f64 },

    /// 고가가 max(open, close)보다 낮음
    #[error("high {high} is below max(open, close) = {body_top}")]
    HighBelowBody { high: f64, body_top: f64 },

    /// 저가가 min(open, close)보다 높음
    #[error("low {low} is above min(open, close) = {body_bottom}")]
    LowAboveBody { low: f64, body_bottom: f64 },

    /// 밀리초 이하 정밀도가 남아 있는 시각
    #[error("timestamp {timestamp} has sub-millisecond precision")]
    SubMillisecondTimestamp { timestamp: DateTime<Utc> },
}

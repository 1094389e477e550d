//! 통합 테스트 공용 헬퍼.

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use ohlcv_core::{Candle, Timeframe};

pub fn utc(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

/// 시각에 따라 값이 달라지는 유효한 캔들.
pub fn candle(symbol: &str, interval: Timeframe, ts: DateTime<Utc>) -> Candle {
    let base = 100.0 + (ts.timestamp() % 1000) as f64 / 10.0;
    Candle::new(symbol, interval, ts, base, base + 3.0, base - 2.0, base + 1.0, 5.0)
}

/// `start`부터 `count`개의 연속 캔들.
pub fn series(symbol: &str, interval: Timeframe, start: DateTime<Utc>, count: i64) -> Vec<Candle> {
    let step = Duration::seconds(interval.as_secs() as i64);
    (0..count)
        .map(|i| candle(symbol, interval, start + step * i as i32))
        .collect()
}

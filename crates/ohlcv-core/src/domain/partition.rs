//! 월 단위 파티션 키.
//!
//! Warm 티어의 디스크 레이아웃과 Cold 아카이브의 오브젝트 키는 동일한 규칙을 따릅니다:
//! `{symbol_lowercase}/{interval}/{year}-{month:02}/data`

use crate::types::Timeframe;
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 파티션 데이터 파일 이름.
pub const DATA_FILE_NAME: &str = "data";

/// `(symbol, interval, year, month)`로 식별되는 월 파티션.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionKey {
    pub symbol: String,
    pub interval: Timeframe,
    pub year: i32,
    /// 1..=12
    pub month: u32,
}

impl PartitionKey {
    pub fn new(symbol: impl Into<String>, interval: Timeframe, year: i32, month: u32) -> Self {
        Self {
            symbol: symbol.into(),
            interval,
            year,
            month,
        }
    }

    /// 주어진 시각이 속한 파티션 키를 반환합니다.
    pub fn for_timestamp(symbol: &str, interval: Timeframe, ts: DateTime<Utc>) -> Self {
        Self::new(symbol, interval, ts.year(), ts.month())
    }

    /// 디렉터리에 쓰이는 소문자 심볼.
    pub fn symbol_dir(&self) -> String {
        self.symbol.to_lowercase()
    }

    /// `YYYY-MM` 형식의 월 라벨.
    pub fn month_label(&self) -> String {
        format!("{}-{:02}", self.year, self.month)
    }

    /// 파티션 디렉터리의 상대 경로 (`btcusdt/1h/2024-01`).
    pub fn relative_dir(&self) -> String {
        format!(
            "{}/{}/{}",
            self.symbol_dir(),
            self.interval,
            self.month_label()
        )
    }

    /// 파티션 데이터 파일의 상대 경로이자 아카이브 오브젝트 키.
    pub fn relative_path(&self) -> String {
        format!("{}/{}", self.relative_dir(), DATA_FILE_NAME)
    }

    /// 월의 첫 순간. 잘못된 월이면 `None`.
    pub fn month_start(&self) -> Option<DateTime<Utc>> {
        month_start(self.year, self.month)
    }

    /// 다음 달의 첫 순간 (이 파티션 범위의 배타적 상한).
    pub fn next_month_start(&self) -> Option<DateTime<Utc>> {
        let (year, month) = next_month(self.year, self.month);
        month_start(year, month)
    }

    /// 시각이 이 파티션의 달에 속하는지 여부.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts.year() == self.year && ts.month() == self.month
    }

    /// 상대 경로(또는 그 경로로 끝나는 경로/URL)에서 파티션 키를 복원합니다.
    ///
    /// 디렉터리에는 소문자 심볼만 남으므로 복원된 심볼도 소문자입니다.
    pub fn parse_path(path: &str) -> Option<Self> {
        let mut parts = path.trim_end_matches('/').rsplit(['/', '\\']);
        if parts.next()? != DATA_FILE_NAME {
            return None;
        }
        let month_label = parts.next()?;
        let interval: Timeframe = parts.next()?.parse().ok()?;
        let symbol = parts.next()?;
        if symbol.is_empty() {
            return None;
        }

        let (year, month) = month_label.split_once('-')?;
        let year: i32 = year.parse().ok()?;
        let month: u32 = month.parse().ok()?;
        if !(1..=12).contains(&month) {
            return None;
        }

        Some(Self::new(symbol, interval, year, month))
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.symbol, self.interval, self.month_label())
    }
}

fn month_start(year: i32, month: u32) -> Option<DateTime<Utc>> {
    let date = NaiveDate::from_ymd_opt(year, month, 1)?;
    Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month >= 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

/// `[start, end]`와 겹치는 모든 달력 월을 오름차순으로 반환합니다.
///
/// `start > end`이면 빈 목록을 반환합니다.
pub fn months_between(start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<(i32, u32)> {
    let mut months = Vec::new();
    if start > end {
        return months;
    }

    let last = (end.year(), end.month());
    let mut current = (start.year(), start.month());
    while current <= last {
        months.push(current);
        current = next_month(current.0, current.1);
    }
    months
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_relative_path_layout() {
        let key = PartitionKey::new("BTCUSDT", Timeframe::H1, 2024, 2);
        assert_eq!(key.relative_dir(), "btcusdt/1h/2024-02");
        assert_eq!(key.relative_path(), "btcusdt/1h/2024-02/data");
        assert_eq!(key.to_string(), "BTCUSDT/1h/2024-02");
    }

    #[test]
    fn test_month_bounds() {
        let key = PartitionKey::new("ETHUSDT", Timeframe::D1, 2023, 12);
        assert_eq!(key.month_start(), Some(ts(2023, 12, 1, 0)));
        assert_eq!(key.next_month_start(), Some(ts(2024, 1, 1, 0)));
        assert!(key.contains(ts(2023, 12, 31, 23)));
        assert!(!key.contains(ts(2024, 1, 1, 0)));
        assert_eq!(PartitionKey::new("X", Timeframe::D1, 2023, 13).month_start(), None);
    }

    #[test]
    fn test_months_between() {
        assert_eq!(
            months_between(ts(2023, 11, 15, 0), ts(2024, 2, 1, 0)),
            vec![(2023, 11), (2023, 12), (2024, 1), (2024, 2)]
        );
        assert_eq!(
            months_between(ts(2024, 1, 31, 13), ts(2024, 1, 31, 14)),
            vec![(2024, 1)]
        );
        assert!(months_between(ts(2024, 2, 1, 0), ts(2024, 1, 1, 0)).is_empty());
    }

    #[test]
    fn test_parse_path() {
        let key = PartitionKey::parse_path("/var/lib/ohlcv/btcusdt/1h/2024-01/data").unwrap();
        assert_eq!(key, PartitionKey::new("btcusdt", Timeframe::H1, 2024, 1));

        let remote =
            PartitionKey::parse_path("https://cdn.example.com/ethusdt/1M/2022-07/data").unwrap();
        assert_eq!(remote.interval, Timeframe::MN1);
        assert_eq!(remote.month, 7);

        assert!(PartitionKey::parse_path("btcusdt/1h/2024-13/data").is_none());
        assert!(PartitionKey::parse_path("btcusdt/1h/2024-01/other").is_none());
        assert!(PartitionKey::parse_path("data").is_none());
    }
}

//! 그룹별 집계 정의와 누산기.

use crate::error::{Result, StorageError};
use crate::partition::Column;
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use ohlcv_core::Timeframe;
use std::collections::BTreeMap;
use std::fmt;

/// 시간 버킷.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeBucket {
    /// epoch 기준 n분 간격
    Minutes(u32),
    /// epoch 기준 n시간 간격
    Hours(u32),
    /// UTC 자정
    Day,
    /// 월요일 00:00 UTC
    Week,
    /// 매월 1일 00:00 UTC
    Month,
}

impl TimeBucket {
    /// 시각이 속한 버킷의 시작 시각.
    pub fn floor(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            TimeBucket::Minutes(n) => floor_seconds(ts, i64::from((*n).max(1)) * 60),
            TimeBucket::Hours(n) => floor_seconds(ts, i64::from((*n).max(1)) * 3600),
            TimeBucket::Day => floor_seconds(ts, 86_400),
            TimeBucket::Week => {
                let day = floor_seconds(ts, 86_400);
                day - Duration::days(i64::from(ts.weekday().num_days_from_monday()))
            }
            TimeBucket::Month => NaiveDate::from_ymd_opt(ts.year(), ts.month(), 1)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|d| Utc.from_utc_datetime(&d))
                .unwrap_or(ts),
        }
    }
}

fn floor_seconds(ts: DateTime<Utc>, step: i64) -> DateTime<Utc> {
    let secs = ts.timestamp();
    let floored = secs - secs.rem_euclid(step);
    DateTime::<Utc>::from_timestamp(floored, 0).unwrap_or(ts)
}

impl From<Timeframe> for TimeBucket {
    fn from(tf: Timeframe) -> Self {
        match tf {
            Timeframe::D1 => TimeBucket::Day,
            Timeframe::W1 => TimeBucket::Week,
            Timeframe::MN1 => TimeBucket::Month,
            other => {
                let minutes = (other.as_secs() / 60) as u32;
                if minutes % 60 == 0 {
                    TimeBucket::Hours(minutes / 60)
                } else {
                    TimeBucket::Minutes(minutes)
                }
            }
        }
    }
}

/// 집계 함수.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFn {
    /// 가장 이른 timestamp의 값
    First,
    /// 가장 늦은 timestamp의 값
    Last,
    Min,
    Max,
    Sum,
    Avg,
    /// 값이 있는 행 수
    Count,
}

impl fmt::Display for AggFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AggFn::First => "first",
            AggFn::Last => "last",
            AggFn::Min => "min",
            AggFn::Max => "max",
            AggFn::Sum => "sum",
            AggFn::Avg => "avg",
            AggFn::Count => "count",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for AggFn {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "first" => Ok(AggFn::First),
            "last" => Ok(AggFn::Last),
            "min" => Ok(AggFn::Min),
            "max" => Ok(AggFn::Max),
            "sum" => Ok(AggFn::Sum),
            "avg" | "mean" => Ok(AggFn::Avg),
            "count" => Ok(AggFn::Count),
            _ => Err(StorageError::InvalidQuery(format!(
                "Unknown aggregation: {}",
                s
            ))),
        }
    }
}

/// 하나의 집계 출력 컬럼.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub func: AggFn,
    pub column: Column,
    pub alias: String,
}

impl Aggregation {
    /// 기본 별칭은 `{func}_{column}`입니다.
    pub fn new(func: AggFn, column: Column) -> Self {
        Self {
            func,
            column,
            alias: format!("{}_{}", func, column),
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }
}

/// 그룹 기준.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupBy {
    /// 시간 버킷 (없으면 전체를 한 그룹으로)
    pub bucket: Option<TimeBucket>,
    /// 파티션 경로에서 얻은 심볼별로 나눔
    pub by_symbol: bool,
}

impl GroupBy {
    pub fn bucket(bucket: TimeBucket) -> Self {
        Self {
            bucket: Some(bucket),
            by_symbol: false,
        }
    }

    pub fn with_symbol(mut self) -> Self {
        self.by_symbol = true;
        self
    }
}

/// 집계 결과 행.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    pub symbol: Option<String>,
    pub bucket: Option<DateTime<Utc>>,
    /// `AggregateResult::columns`와 같은 순서
    pub values: Vec<Option<f64>>,
}

/// 집계 결과. 행은 (symbol, bucket) 오름차순입니다.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateResult {
    pub columns: Vec<String>,
    pub rows: Vec<AggregateRow>,
}

impl AggregateResult {
    /// 별칭으로 값을 찾습니다.
    pub fn value(&self, row: usize, alias: &str) -> Option<f64> {
        let idx = self.columns.iter().position(|c| c == alias)?;
        self.rows.get(row)?.values.get(idx).copied().flatten()
    }
}

/// 누산기 상태.
#[derive(Debug, Clone)]
enum Acc {
    First(Option<(i64, f64)>),
    Last(Option<(i64, f64)>),
    Min(Option<f64>),
    Max(Option<f64>),
    Sum(Option<f64>),
    Avg { sum: f64, count: u64 },
    Count(u64),
}

impl Acc {
    fn new(func: AggFn) -> Self {
        match func {
            AggFn::First => Acc::First(None),
            AggFn::Last => Acc::Last(None),
            AggFn::Min => Acc::Min(None),
            AggFn::Max => Acc::Max(None),
            AggFn::Sum => Acc::Sum(None),
            AggFn::Avg => Acc::Avg { sum: 0.0, count: 0 },
            AggFn::Count => Acc::Count(0),
        }
    }

    fn update(&mut self, ts: i64, value: f64) {
        match self {
            Acc::First(slot) => {
                if slot.map_or(true, |(t, _)| ts < t) {
                    *slot = Some((ts, value));
                }
            }
            Acc::Last(slot) => {
                if slot.map_or(true, |(t, _)| ts >= t) {
                    *slot = Some((ts, value));
                }
            }
            Acc::Min(m) => *m = Some(m.map_or(value, |x| x.min(value))),
            Acc::Max(m) => *m = Some(m.map_or(value, |x| x.max(value))),
            Acc::Sum(s) => *s = Some(s.unwrap_or(0.0) + value),
            Acc::Avg { sum, count } => {
                *sum += value;
                *count += 1;
            }
            Acc::Count(n) => *n += 1,
        }
    }

    fn finish(&self) -> Option<f64> {
        match self {
            Acc::First(slot) | Acc::Last(slot) => slot.map(|(_, v)| v),
            Acc::Min(v) | Acc::Max(v) | Acc::Sum(v) => *v,
            Acc::Avg { sum, count } => (*count > 0).then(|| sum / *count as f64),
            Acc::Count(n) => Some(*n as f64),
        }
    }
}

type GroupKey = (Option<String>, Option<i64>);

/// 배치 단위로 값을 받아 그룹별 누산기를 갱신합니다.
#[derive(Debug)]
pub(crate) struct Aggregator {
    group_by: GroupBy,
    aggregations: Vec<Aggregation>,
    groups: BTreeMap<GroupKey, Vec<Acc>>,
}

impl Aggregator {
    pub fn new(group_by: GroupBy, aggregations: &[Aggregation]) -> Result<Self> {
        if aggregations.is_empty() {
            return Err(StorageError::InvalidQuery(
                "at least one aggregation is required".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for agg in aggregations {
            if !seen.insert(agg.alias.as_str()) {
                return Err(StorageError::InvalidQuery(format!(
                    "duplicate aggregation alias: {}",
                    agg.alias
                )));
            }
        }
        Ok(Self {
            group_by,
            aggregations: aggregations.to_vec(),
            groups: BTreeMap::new(),
        })
    }

    /// 디코딩해야 하는 컬럼.
    pub fn columns(&self) -> Vec<Column> {
        let mut cols = vec![Column::Timestamp];
        for agg in &self.aggregations {
            if !cols.contains(&agg.column) {
                cols.push(agg.column);
            }
        }
        cols
    }

    /// 한 행을 반영합니다. `value_of`는 컬럼 값을 돌려줍니다.
    pub fn update(
        &mut self,
        symbol: Option<&str>,
        ts: DateTime<Utc>,
        value_of: impl Fn(Column) -> Option<f64>,
    ) {
        let symbol = if self.group_by.by_symbol {
            symbol.map(str::to_string)
        } else {
            None
        };
        let bucket = self
            .group_by
            .bucket
            .map(|b| b.floor(ts).timestamp_millis());

        let aggregations = &self.aggregations;
        let accs = self
            .groups
            .entry((symbol, bucket))
            .or_insert_with(|| aggregations.iter().map(|a| Acc::new(a.func)).collect());

        let ts_ms = ts.timestamp_millis();
        for (acc, agg) in accs.iter_mut().zip(aggregations) {
            if let Some(v) = value_of(agg.column) {
                acc.update(ts_ms, v);
            }
        }
    }

    pub fn finish(self) -> AggregateResult {
        let columns = self.aggregations.iter().map(|a| a.alias.clone()).collect();
        let rows = self
            .groups
            .into_iter()
            .map(|((symbol, bucket), accs)| AggregateRow {
                symbol,
                bucket: bucket.and_then(DateTime::<Utc>::from_timestamp_millis),
                values: accs.iter().map(Acc::finish).collect(),
            })
            .collect();
        AggregateResult { columns, rows }
    }
}

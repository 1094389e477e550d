//! 파티션 파일의 Arrow 스키마와 행 변환.

use crate::error::{Result, StorageError};
use arrow::array::{Array, ArrayRef, Float64Array, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use ohlcv_core::{Candle, Timeframe};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// 파티션 파일의 컬럼.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Column {
    Timestamp,
    Open,
    High,
    Low,
    Close,
    Volume,
}

impl Column {
    /// 스키마 순서대로의 전체 컬럼.
    pub const ALL: [Column; 6] = [
        Column::Timestamp,
        Column::Open,
        Column::High,
        Column::Low,
        Column::Close,
        Column::Volume,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Column::Timestamp => "timestamp",
            Column::Open => "open",
            Column::High => "high",
            Column::Low => "low",
            Column::Close => "close",
            Column::Volume => "volume",
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, Column::Timestamp)
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Column {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        Column::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| StorageError::InvalidQuery(format!("Unknown column: {}", s)))
    }
}

/// 파티션 파일의 스키마.
///
/// `timestamp`는 UTC 밀리초, 나머지는 f64입니다.
pub fn candle_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(
            Column::Timestamp.name(),
            DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
            false,
        ),
        Field::new(Column::Open.name(), DataType::Float64, false),
        Field::new(Column::High.name(), DataType::Float64, false),
        Field::new(Column::Low.name(), DataType::Float64, false),
        Field::new(Column::Close.name(), DataType::Float64, false),
        Field::new(Column::Volume.name(), DataType::Float64, false),
    ]))
}

/// 컬럼 프로젝션이 적용된 캔들 행.
///
/// 요청하지 않은 컬럼은 `None`입니다. `timestamp`는 항상 포함됩니다.
#[derive(Debug, Clone, PartialEq)]
pub struct CandleRow {
    pub timestamp: DateTime<Utc>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
}

impl CandleRow {
    /// 컬럼 값을 반환합니다. `timestamp`는 epoch 밀리초로 반환합니다.
    pub fn get(&self, column: Column) -> Option<f64> {
        match column {
            Column::Timestamp => Some(self.timestamp.timestamp_millis() as f64),
            Column::Open => self.open,
            Column::High => self.high,
            Column::Low => self.low,
            Column::Close => self.close,
            Column::Volume => self.volume,
        }
    }

    /// 모든 컬럼이 있으면 캔들로 변환합니다.
    pub fn into_candle(self, symbol: &str, interval: Timeframe) -> Option<Candle> {
        Some(Candle::new(
            symbol,
            interval,
            self.timestamp,
            self.open?,
            self.high?,
            self.low?,
            self.close?,
            self.volume?,
        ))
    }
}

impl From<&Candle> for CandleRow {
    fn from(c: &Candle) -> Self {
        Self {
            timestamp: c.timestamp,
            open: Some(c.open),
            high: Some(c.high),
            low: Some(c.low),
            close: Some(c.close),
            volume: Some(c.volume),
        }
    }
}

/// 정렬된 캔들을 하나의 RecordBatch로 변환합니다.
pub(crate) fn candles_to_batch(schema: SchemaRef, candles: &[Candle]) -> Result<RecordBatch> {
    let timestamps: Vec<i64> = candles
        .iter()
        .map(|c| c.timestamp.timestamp_millis())
        .collect();
    let column = |f: fn(&Candle) -> f64| -> ArrayRef {
        Arc::new(Float64Array::from(candles.iter().map(f).collect::<Vec<_>>()))
    };

    let columns: Vec<ArrayRef> = vec![
        Arc::new(TimestampMillisecondArray::from(timestamps).with_timezone("UTC")),
        column(|c| c.open),
        column(|c| c.high),
        column(|c| c.low),
        column(|c| c.close),
        column(|c| c.volume),
    ];

    Ok(RecordBatch::try_new(schema, columns)?)
}

/// 배치의 timestamp 컬럼 (epoch 밀리초).
pub(crate) fn timestamp_column(batch: &RecordBatch) -> Result<&TimestampMillisecondArray> {
    batch
        .column_by_name(Column::Timestamp.name())
        .and_then(|col| col.as_any().downcast_ref::<TimestampMillisecondArray>())
        .ok_or_else(|| {
            StorageError::Arrow(ArrowError::SchemaError(
                "timestamp column missing or not millisecond precision".into(),
            ))
        })
}

/// 배치의 f64 컬럼 (프로젝션에서 빠졌으면 `None`).
pub(crate) fn float_column(batch: &RecordBatch, column: Column) -> Result<Option<&Float64Array>> {
    match batch.column_by_name(column.name()) {
        None => Ok(None),
        Some(col) => col
            .as_any()
            .downcast_ref::<Float64Array>()
            .map(Some)
            .ok_or_else(|| {
                StorageError::Arrow(ArrowError::SchemaError(format!(
                    "column {} is not Float64",
                    column
                )))
            }),
    }
}

pub(crate) fn millis_to_utc(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| {
        StorageError::Arrow(ArrowError::ComputeError(format!(
            "timestamp out of range: {}",
            ms
        )))
    })
}

/// 배치의 행을 `out`에 추가합니다.
pub(crate) fn append_rows(batch: &RecordBatch, out: &mut Vec<CandleRow>) -> Result<()> {
    let timestamps = timestamp_column(batch)?;
    let open = float_column(batch, Column::Open)?;
    let high = float_column(batch, Column::High)?;
    let low = float_column(batch, Column::Low)?;
    let close = float_column(batch, Column::Close)?;
    let volume = float_column(batch, Column::Volume)?;

    let value = |arr: Option<&Float64Array>, i: usize| -> Option<f64> {
        arr.filter(|a| !a.is_null(i)).map(|a| a.value(i))
    };

    out.reserve(batch.num_rows());
    for i in 0..batch.num_rows() {
        if timestamps.is_null(i) {
            continue;
        }
        out.push(CandleRow {
            timestamp: millis_to_utc(timestamps.value(i))?,
            open: value(open, i),
            high: value(high, i),
            low: value(low, i),
            close: value(close, i),
            volume: value(volume, i),
        });
    }
    Ok(())
}

//! 컬럼 프로젝션과 조건 푸시다운.
//!
//! 파티션 저장소와 쿼리 엔진이 같은 계획(`ScanPlan`)을 사용합니다:
//! 1. 요청한 컬럼만 디코딩 (`ProjectionMask`)
//! 2. row group min/max 통계로 읽을 row group을 선별
//! 3. 남은 row group은 디코딩 중에 행 필터(`RowFilter`)로 거름

use crate::error::{Result, StorageError};
use crate::partition::schema::{float_column, timestamp_column, Column};
use arrow::array::{Array, BooleanArray};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use parquet::arrow::arrow_reader::{
    ArrowPredicate, ArrowPredicateFn, ArrowReaderBuilder, RowFilter,
};
use parquet::arrow::ProjectionMask;
use parquet::file::metadata::{ParquetMetaData, RowGroupMetaData};
use parquet::file::statistics::Statistics;
use parquet::schema::types::SchemaDescriptor;
use std::fmt;

/// 비교 연산자.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    pub fn eval(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            CompareOp::Eq => lhs == rhs,
            CompareOp::Gt => lhs > rhs,
            CompareOp::Ge => lhs >= rhs,
            CompareOp::Lt => lhs < rhs,
            CompareOp::Le => lhs <= rhs,
        }
    }

    /// 값 범위 `[min, max]` 안에 조건을 만족하는 값이 있을 수 있는지.
    fn may_match(&self, min: f64, max: f64, rhs: f64) -> bool {
        match self {
            CompareOp::Eq => min <= rhs && rhs <= max,
            CompareOp::Gt => max > rhs,
            CompareOp::Ge => max >= rhs,
            CompareOp::Lt => min < rhs,
            CompareOp::Le => min <= rhs,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Eq => "=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
        };
        f.write_str(s)
    }
}

/// 숫자 컬럼 비교 조건.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: Column,
    pub op: CompareOp,
    pub value: f64,
}

/// 스캔 조건. 모든 조건은 AND로 결합됩니다.
///
/// 시간 범위는 양 끝을 포함합니다.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Predicate {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub filters: Vec<Filter>,
}

impl Predicate {
    pub fn new() -> Self {
        Self::default()
    }

    /// `[start, end]` 시간 범위.
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            filters: Vec::new(),
        }
    }

    pub fn since(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    pub fn until(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }

    /// 숫자 컬럼 조건을 추가합니다.
    pub fn filter(mut self, column: Column, op: CompareOp, value: f64) -> Self {
        self.filters.push(Filter { column, op, value });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none() && self.filters.is_empty()
    }

    fn bounds_ms(&self) -> (Option<i64>, Option<i64>) {
        (
            self.start.map(|t| t.timestamp_millis()),
            self.end.map(|t| t.timestamp_millis()),
        )
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err(StorageError::InvalidQuery(format!(
                    "start {} is after end {}",
                    start, end
                )));
            }
        }
        for f in &self.filters {
            if !f.column.is_numeric() {
                return Err(StorageError::InvalidQuery(
                    "timestamp must be constrained with start/end, not a value filter".into(),
                ));
            }
            if f.value.is_nan() {
                return Err(StorageError::InvalidQuery(format!(
                    "filter on {} compares against NaN",
                    f.column
                )));
            }
        }
        Ok(())
    }

    /// 한 행이 조건을 만족하는지 (푸시다운 후 잔여 검사/테스트용).
    pub fn matches(&self, timestamp_ms: i64, value_of: impl Fn(Column) -> Option<f64>) -> bool {
        let (start, end) = self.bounds_ms();
        if start.is_some_and(|s| timestamp_ms < s) || end.is_some_and(|e| timestamp_ms > e) {
            return false;
        }
        self.filters.iter().all(|f| {
            value_of(f.column)
                .map(|v| f.op.eval(v, f.value))
                .unwrap_or(false)
        })
    }
}

/// 하나의 Parquet 파일에 대한 읽기 계획.
#[derive(Debug, Clone)]
pub(crate) struct ScanPlan<'a> {
    pub columns: Option<&'a [Column]>,
    pub predicate: &'a Predicate,
    pub batch_size: usize,
}

impl<'a> ScanPlan<'a> {
    pub fn new(columns: Option<&'a [Column]>, predicate: &'a Predicate, batch_size: usize) -> Self {
        Self {
            columns,
            predicate,
            batch_size,
        }
    }

    /// 디코딩할 출력 컬럼 (timestamp는 항상 포함).
    fn output_columns(&self) -> Vec<Column> {
        let mut out = vec![Column::Timestamp];
        match self.columns {
            None => out.extend(Column::ALL.iter().copied().filter(|c| c.is_numeric())),
            Some(cols) => {
                for c in cols {
                    if !out.contains(c) {
                        out.push(*c);
                    }
                }
            }
        }
        out
    }

    /// 계획을 리더 빌더에 적용합니다. 동기/비동기 빌더 모두에 쓰입니다.
    pub fn apply<T>(&self, builder: ArrowReaderBuilder<T>) -> Result<ArrowReaderBuilder<T>> {
        self.predicate.validate()?;

        let schema = builder.parquet_schema();
        let output = leaf_indices(schema, &self.output_columns())?;
        let projection = ProjectionMask::roots(schema, output);

        let mut needed = Vec::new();
        if self.predicate.start.is_some() || self.predicate.end.is_some() {
            needed.push(Column::Timestamp);
        }
        for f in &self.predicate.filters {
            if !needed.contains(&f.column) {
                needed.push(f.column);
            }
        }
        let filter_indices = leaf_indices(schema, &needed)?;
        let filter_mask = ProjectionMask::roots(schema, filter_indices);

        let row_groups = self.prune_row_groups(builder.metadata(), schema)?;

        let mut builder = builder
            .with_projection(projection)
            .with_row_groups(row_groups)
            .with_batch_size(self.batch_size.max(1));

        if !needed.is_empty() {
            let predicate = self.predicate.clone();
            let row_predicate = ArrowPredicateFn::new(filter_mask, move |batch: RecordBatch| {
                evaluate(&predicate, &batch)
            });
            let predicates: Vec<Box<dyn ArrowPredicate>> = vec![Box::new(row_predicate)];
            builder = builder.with_row_filter(RowFilter::new(predicates));
        }

        Ok(builder)
    }

    /// row group 통계로 조건을 만족할 수 없는 row group을 제외합니다.
    fn prune_row_groups(
        &self,
        metadata: &ParquetMetaData,
        schema: &SchemaDescriptor,
    ) -> Result<Vec<usize>> {
        let ts_index = leaf_index(schema, Column::Timestamp)?;
        let filter_indices = self
            .predicate
            .filters
            .iter()
            .map(|f| leaf_index(schema, f.column).map(|i| (i, f)))
            .collect::<Result<Vec<_>>>()?;
        let (start, end) = self.predicate.bounds_ms();

        let keep = metadata
            .row_groups()
            .iter()
            .enumerate()
            .filter(|(_, rg)| {
                if let Some((min, max)) = int64_range(rg, ts_index) {
                    if start.is_some_and(|s| max < s) || end.is_some_and(|e| min > e) {
                        return false;
                    }
                }
                filter_indices.iter().all(|(idx, f)| match double_range(rg, *idx) {
                    Some((min, max)) => f.op.may_match(min, max, f.value),
                    None => true,
                })
            })
            .map(|(i, _)| i)
            .collect();
        Ok(keep)
    }
}

/// 디코딩 중 행 필터.
fn evaluate(predicate: &Predicate, batch: &RecordBatch) -> std::result::Result<BooleanArray, ArrowError> {
    let to_arrow = |e: StorageError| ArrowError::ComputeError(e.to_string());

    let (start, end) = predicate.bounds_ms();
    let timestamps = if start.is_some() || end.is_some() {
        Some(timestamp_column(batch).map_err(to_arrow)?)
    } else {
        None
    };
    let filter_columns = predicate
        .filters
        .iter()
        .map(|f| {
            float_column(batch, f.column)
                .map_err(to_arrow)?
                .ok_or_else(|| ArrowError::ComputeError(format!("column {} not projected", f.column)))
                .map(|arr| (arr, f))
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let mask: BooleanArray = (0..batch.num_rows())
        .map(|i| {
            let in_range = timestamps.map_or(true, |ts| {
                !ts.is_null(i) && {
                    let t = ts.value(i);
                    !(start.is_some_and(|s| t < s) || end.is_some_and(|e| t > e))
                }
            });
            let passes = filter_columns
                .iter()
                .all(|(arr, f)| !arr.is_null(i) && f.op.eval(arr.value(i), f.value));
            Some(in_range && passes)
        })
        .collect();
    Ok(mask)
}

fn leaf_index(schema: &SchemaDescriptor, column: Column) -> Result<usize> {
    schema
        .columns()
        .iter()
        .position(|c| c.name() == column.name())
        .ok_or_else(|| {
            StorageError::InvalidQuery(format!("column {} not present in partition file", column))
        })
}

fn leaf_indices(schema: &SchemaDescriptor, columns: &[Column]) -> Result<Vec<usize>> {
    columns.iter().map(|c| leaf_index(schema, *c)).collect()
}

/// timestamp(INT64) 컬럼의 min/max 통계.
pub(crate) fn int64_range(rg: &RowGroupMetaData, index: usize) -> Option<(i64, i64)> {
    match rg.column(index).statistics()? {
        Statistics::Int64(s) => Some((*s.min_opt()?, *s.max_opt()?)),
        _ => None,
    }
}

/// f64 컬럼의 min/max 통계.
pub(crate) fn double_range(rg: &RowGroupMetaData, index: usize) -> Option<(f64, f64)> {
    match rg.column(index).statistics()? {
        Statistics::Double(s) => {
            let (min, max) = (*s.min_opt()?, *s.max_opt()?);
            (!min.is_nan() && !max.is_nan()).then_some((min, max))
        }
        _ => None,
    }
}

/// timestamp 컬럼의 leaf 인덱스 (통계 조회용).
pub(crate) fn timestamp_leaf(schema: &SchemaDescriptor) -> Result<usize> {
    leaf_index(schema, Column::Timestamp)
}

//! 파티션 파일에 대한 분석 쿼리 엔진.
//!
//! 로컬 glob 패턴, HTTP(S) URL, 등록된 오브젝트 스토어의 파티션 파일을
//! 같은 방식으로 읽습니다. 컬럼 프로젝션과 조건은 파일 읽기 단계로
//! 내려보내므로 필요 없는 컬럼/row group은 디코딩하지 않습니다.

mod aggregate;

pub use aggregate::{AggFn, AggregateResult, AggregateRow, Aggregation, GroupBy, TimeBucket};
pub use crate::scan::{CompareOp, Filter, Predicate};

use crate::config::QueryConfig;
use crate::error::{Result, StorageError};
use crate::partition::schema::{append_rows, float_column, millis_to_utc, timestamp_column};
use crate::partition::{CandleRow, Column};
use crate::scan::ScanPlan;
use aggregate::Aggregator;
use arrow::array::{Array, Float64Array};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use object_store::http::HttpBuilder;
use object_store::path::Path as ObjectPath;
use object_store::{ClientOptions, ObjectStore};
use ohlcv_core::PartitionKey;
use parquet::arrow::async_reader::{AsyncFileReader, ParquetObjectReader};
use parquet::arrow::ParquetRecordBatchStreamBuilder;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};
use url::Url;

/// 쿼리 대상 파일 하나.
#[derive(Debug, Clone)]
enum Source {
    Local(PathBuf),
    Http(Url),
    Store {
        store: Arc<dyn ObjectStore>,
        location: ObjectPath,
        display: String,
    },
}

impl Source {
    fn is_remote(&self) -> bool {
        !matches!(self, Source::Local(_))
    }

    /// 파티션 레이아웃 경로에서 얻은 (소문자) 심볼.
    fn symbol(&self) -> Option<String> {
        PartitionKey::parse_path(&self.to_string()).map(|key| key.symbol)
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Local(path) => write!(f, "{}", path.display()),
            Source::Http(url) => write!(f, "{}", url),
            Source::Store { display, .. } => f.write_str(display),
        }
    }
}

/// 오브젝트 키 패턴을 실제 키 목록으로 펼칩니다.
///
/// glob 문자가 없으면 키 하나를 그대로 반환하고, 있으면 첫 glob 문자 앞의
/// 디렉터리를 나열해 경로 구분자 단위로 매칭합니다.
async fn expand_object_pattern(
    store: &Arc<dyn ObjectStore>,
    display: &str,
    key: &str,
) -> Result<Vec<ObjectPath>> {
    let Some(wildcard) = key.find(['*', '?', '[']) else {
        let location = ObjectPath::parse(key).map_err(|e| {
            StorageError::InvalidQuery(format!("invalid object path {}: {}", display, e))
        })?;
        return Ok(vec![location]);
    };

    let matcher = glob::Pattern::new(key)
        .map_err(|e| StorageError::InvalidQuery(format!("invalid pattern {}: {}", display, e)))?;
    let options = glob::MatchOptions {
        require_literal_separator: true,
        ..Default::default()
    };
    let literal = &key[..wildcard];
    let prefix = literal.rfind('/').map(|i| ObjectPath::from(&literal[..i]));

    let mut locations: Vec<ObjectPath> = store
        .list(prefix.as_ref())
        .map_err(|e| StorageError::object_store(display, e))
        .try_filter(|meta| futures::future::ready(matcher.matches_with(meta.location.as_ref(), options)))
        .map_ok(|meta| meta.location)
        .try_collect()
        .await?;
    locations.sort_by(|a, b| a.as_ref().cmp(b.as_ref()));
    let pattern = display;
    debug!(pattern, matched = locations.len(), "오브젝트 패턴 확장");
    Ok(locations)
}

/// OHLCV 요약 통계.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetStats {
    pub row_count: u64,
    pub min_ts: Option<DateTime<Utc>>,
    pub max_ts: Option<DateTime<Utc>>,
    /// 종가 기준
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub avg_price: Option<f64>,
    pub total_volume: f64,
}

/// 리샘플링된 OHLCV 봉.
#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// 봉에 포함된 원본 캔들 수
    pub candles: u64,
}

/// 쿼리 엔진.
#[derive(Debug, Clone, Default)]
pub struct QueryEngine {
    config: QueryConfig,
    stores: Vec<(String, Arc<dyn ObjectStore>)>,
}

impl QueryEngine {
    pub fn new(config: QueryConfig) -> Self {
        Self {
            config,
            stores: Vec::new(),
        }
    }

    /// URL 접두사(예: `s3://market-data/`)에 오브젝트 스토어를 등록합니다.
    ///
    /// 접두사로 시작하는 소스는 나머지 경로를 오브젝트 키로 사용해 읽습니다.
    pub fn with_object_store(mut self, prefix: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        let mut prefix = prefix.into();
        if !prefix.ends_with('/') {
            prefix.push('/');
        }
        self.stores.push((prefix, store));
        self
    }

    fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.config.remote_timeout_secs.max(1))
    }

    /// 패턴 목록을 개별 파일로 펼칩니다.
    ///
    /// 등록된 오브젝트 스토어 접두사와 `http(s)://` 외의 `scheme://` 소스는 거부합니다.
    async fn resolve<S: AsRef<str>>(&self, patterns: &[S]) -> Result<Vec<Source>> {
        let mut locals: Vec<PathBuf> = Vec::new();
        let mut remotes: Vec<Source> = Vec::new();

        let options = glob::MatchOptions {
            require_literal_leading_dot: true,
            ..Default::default()
        };

        for pattern in patterns {
            let pattern = pattern.as_ref();

            if let Some((prefix, store)) = self.stores.iter().find(|(p, _)| pattern.starts_with(p.as_str())) {
                for location in expand_object_pattern(store, pattern, &pattern[prefix.len()..]).await? {
                    remotes.push(Source::Store {
                        store: store.clone(),
                        display: format!("{}{}", prefix, location),
                        location,
                    });
                }
                continue;
            }

            if pattern.starts_with("http://") || pattern.starts_with("https://") {
                let url = Url::parse(pattern)
                    .map_err(|e| StorageError::InvalidQuery(format!("invalid URL {}: {}", pattern, e)))?;
                remotes.push(Source::Http(url));
                continue;
            }

            if let Some((scheme, _)) = pattern.split_once("://") {
                return Err(StorageError::InvalidQuery(format!(
                    "no object store registered for {}:// source {}",
                    scheme, pattern
                )));
            }

            let paths = glob::glob_with(pattern, options).map_err(|e| {
                StorageError::InvalidQuery(format!("invalid pattern {}: {}", pattern, e))
            })?;
            for entry in paths {
                let path = entry.map_err(|e| {
                    let context = format!("glob {}", e.path().display());
                    StorageError::io(context, e.into())
                })?;
                if path.is_file() {
                    locals.push(path);
                }
            }
        }

        locals.sort();
        locals.dedup();
        let mut sources: Vec<Source> = locals.into_iter().map(Source::Local).collect();
        sources.extend(remotes);
        Ok(sources)
    }

    async fn open(&self, source: &Source) -> Result<Box<dyn AsyncFileReader>> {
        match source {
            Source::Local(path) => {
                let file = tokio::fs::File::open(path)
                    .await
                    .map_err(|e| StorageError::io(format!("open {}", path.display()), e))?;
                Ok(Box::new(file))
            }
            Source::Http(url) => {
                let base = &url[..url::Position::BeforePath];
                let store = HttpBuilder::new()
                    .with_url(base)
                    .with_client_options(
                        ClientOptions::new()
                            .with_timeout(self.remote_timeout())
                            .with_allow_http(url.scheme() == "http"),
                    )
                    .build()
                    .map_err(|e| StorageError::object_store(url.as_str(), e))?;
                let location = ObjectPath::from_url_path(url.path()).map_err(|e| {
                    StorageError::InvalidQuery(format!("invalid URL path {}: {}", url, e))
                })?;
                let store: Arc<dyn ObjectStore> = Arc::new(store);
                let meta = store
                    .head(&location)
                    .await
                    .map_err(|e| StorageError::object_store(url.as_str(), e))?;
                Ok(Box::new(ParquetObjectReader::new(store, meta)))
            }
            Source::Store {
                store,
                location,
                display,
            } => {
                let meta = store
                    .head(location)
                    .await
                    .map_err(|e| StorageError::object_store(display.as_str(), e))?;
                Ok(Box::new(ParquetObjectReader::new(store.clone(), meta)))
            }
        }
    }

    async fn read_source<F>(
        &self,
        source: &Source,
        columns: Option<&[Column]>,
        predicate: &Predicate,
        on_batch: &mut F,
    ) -> Result<()>
    where
        F: FnMut(&Source, &RecordBatch) -> Result<()>,
    {
        let context = || format!("scan {}", source);
        let reader = self.open(source).await?;
        let builder = ParquetRecordBatchStreamBuilder::new(reader)
            .await
            .map_err(|e| StorageError::parquet(context(), e))?;

        let plan = ScanPlan::new(columns, predicate, self.config.batch_size);
        let mut stream = plan
            .apply(builder)?
            .build()
            .map_err(|e| StorageError::parquet(context(), e))?;

        let mut rows = 0usize;
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(|e| StorageError::parquet(context(), e))?
        {
            rows += batch.num_rows();
            on_batch(source, &batch)?;
        }
        debug!(source = %source, rows = rows, "소스 스캔 완료");
        Ok(())
    }

    /// 모든 소스의 배치를 순서대로 `on_batch`에 넘깁니다. 읽은 소스 수를 반환합니다.
    async fn for_each_batch<S, F>(
        &self,
        patterns: &[S],
        columns: Option<&[Column]>,
        predicate: &Predicate,
        mut on_batch: F,
    ) -> Result<usize>
    where
        S: AsRef<str>,
        F: FnMut(&Source, &RecordBatch) -> Result<()>,
    {
        predicate.validate()?;
        let sources = self.resolve(patterns).await?;

        for source in &sources {
            let read = self.read_source(source, columns, predicate, &mut on_batch);
            if source.is_remote() {
                tokio::time::timeout(self.remote_timeout(), read)
                    .await
                    .map_err(|_| StorageError::Timeout(format!("scan {}", source)))??;
            } else {
                read.await?;
            }
        }
        Ok(sources.len())
    }

    /// 조건을 만족하는 행을 읽습니다. 결과는 timestamp 오름차순입니다.
    ///
    /// 일치하는 파일이 없으면 빈 결과를 반환합니다.
    #[instrument(skip(self, patterns, predicate), fields(patterns = patterns.len()))]
    pub async fn scan<S: AsRef<str>>(
        &self,
        patterns: &[S],
        columns: Option<&[Column]>,
        predicate: &Predicate,
    ) -> Result<Vec<CandleRow>> {
        let mut rows = Vec::new();
        let sources = self
            .for_each_batch(patterns, columns, predicate, |_, batch| {
                append_rows(batch, &mut rows)
            })
            .await?;

        rows.sort_by_key(|r| r.timestamp);
        info!(sources = sources, rows = rows.len(), "scan 완료");
        Ok(rows)
    }

    /// 그룹별 집계를 엔진 안에서 수행합니다.
    #[instrument(skip_all, fields(patterns = patterns.len(), aggregations = aggregations.len()))]
    pub async fn aggregate<S: AsRef<str>>(
        &self,
        patterns: &[S],
        group_by: GroupBy,
        aggregations: &[Aggregation],
        predicate: &Predicate,
    ) -> Result<AggregateResult> {
        let mut aggregator = Aggregator::new(group_by, aggregations)?;
        let columns = aggregator.columns();

        self.for_each_batch(patterns, Some(&columns), predicate, |source, batch| {
            let symbol = if group_by.by_symbol {
                Some(source.symbol().ok_or_else(|| {
                    StorageError::InvalidQuery(format!(
                        "cannot derive symbol from {}; expected .../{{symbol}}/{{interval}}/{{YYYY-MM}}/data",
                        source
                    ))
                })?)
            } else {
                None
            };

            let timestamps = timestamp_column(batch)?;
            let mut values: Vec<(Column, &Float64Array)> = Vec::new();
            for column in &columns {
                if let Some(arr) = float_column(batch, *column)? {
                    values.push((*column, arr));
                }
            }

            for i in 0..batch.num_rows() {
                if timestamps.is_null(i) {
                    continue;
                }
                let ms = timestamps.value(i);
                let ts = millis_to_utc(ms)?;
                aggregator.update(symbol.as_deref(), ts, |column| {
                    if column == Column::Timestamp {
                        return Some(ms as f64);
                    }
                    values
                        .iter()
                        .find(|(c, _)| *c == column)
                        .filter(|(_, arr)| !arr.is_null(i))
                        .map(|(_, arr)| arr.value(i))
                });
            }
            Ok(())
        })
        .await?;

        let result = aggregator.finish();
        info!(groups = result.rows.len(), "aggregate 완료");
        Ok(result)
    }

    /// 캔들을 더 큰 시간 버킷의 OHLCV 봉으로 묶습니다.
    pub async fn resample<S: AsRef<str>>(
        &self,
        patterns: &[S],
        bucket: TimeBucket,
        predicate: &Predicate,
    ) -> Result<Vec<Bar>> {
        let aggregations = [
            Aggregation::new(AggFn::First, Column::Open).alias("open"),
            Aggregation::new(AggFn::Max, Column::High).alias("high"),
            Aggregation::new(AggFn::Min, Column::Low).alias("low"),
            Aggregation::new(AggFn::Last, Column::Close).alias("close"),
            Aggregation::new(AggFn::Sum, Column::Volume).alias("volume"),
            Aggregation::new(AggFn::Count, Column::Timestamp).alias("candles"),
        ];
        let result = self
            .aggregate(patterns, GroupBy::bucket(bucket), &aggregations, predicate)
            .await?;

        let bars = result
            .rows
            .into_iter()
            .filter_map(|row| match row.values.as_slice() {
                [Some(open), Some(high), Some(low), Some(close), Some(volume), Some(count)] => {
                    Some(Bar {
                        timestamp: row.bucket?,
                        open: *open,
                        high: *high,
                        low: *low,
                        close: *close,
                        volume: *volume,
                        candles: *count as u64,
                    })
                }
                _ => None,
            })
            .collect();
        Ok(bars)
    }

    /// 한 번의 스캔으로 요약 통계를 계산합니다.
    pub async fn stats<S: AsRef<str>>(&self, patterns: &[S]) -> Result<DatasetStats> {
        let aggregations = [
            Aggregation::new(AggFn::Count, Column::Timestamp),
            Aggregation::new(AggFn::Min, Column::Timestamp),
            Aggregation::new(AggFn::Max, Column::Timestamp),
            Aggregation::new(AggFn::Min, Column::Close),
            Aggregation::new(AggFn::Max, Column::Close),
            Aggregation::new(AggFn::Avg, Column::Close),
            Aggregation::new(AggFn::Sum, Column::Volume),
        ];
        let result = self
            .aggregate(patterns, GroupBy::default(), &aggregations, &Predicate::default())
            .await?;

        let Some(row) = result.rows.first() else {
            return Ok(DatasetStats::default());
        };
        let v = |i: usize| row.values.get(i).copied().flatten();
        let ts = |i: usize| v(i).and_then(|ms| DateTime::<Utc>::from_timestamp_millis(ms as i64));

        Ok(DatasetStats {
            row_count: v(0).unwrap_or(0.0) as u64,
            min_ts: ts(1),
            max_ts: ts(2),
            min_price: v(3),
            max_price: v(4),
            avg_price: v(5),
            total_volume: v(6).unwrap_or(0.0),
        })
    }
}

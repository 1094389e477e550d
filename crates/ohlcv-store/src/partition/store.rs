//! 파티션 파일 읽기/쓰기.

use super::codec::Codec;
use super::schema::{append_rows, candle_schema, candles_to_batch, millis_to_utc, CandleRow, Column};
use crate::config::PartitionStoreConfig;
use crate::error::{Result, StorageError};
use crate::scan::{int64_range, timestamp_leaf, Predicate, ScanPlan};
use chrono::{DateTime, Utc};
use ohlcv_core::{months_between, storage_span, Candle, PartitionKey, Timeframe, DATA_FILE_NAME};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 파티션 파일 메타데이터 요약 (전체 스캔 없이 footer에서 읽음).
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionStats {
    pub key: PartitionKey,
    pub row_count: u64,
    pub byte_size: u64,
    pub min_ts: Option<DateTime<Utc>>,
    pub max_ts: Option<DateTime<Utc>>,
    pub row_groups: usize,
    /// 첫 컬럼 청크의 압축 방식
    pub compression: String,
}

/// 일부 파티션이 없을 수 있는 범위 읽기 결과.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartialRead {
    /// 시각 오름차순 행
    pub rows: Vec<CandleRow>,
    /// 범위와 겹치지만 존재하지 않는 파티션
    pub missing: Vec<PartitionKey>,
}

impl PartialRead {
    /// 누락된 파티션 없이 완전한 결과인지.
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// 모든 컬럼이 있는 행을 캔들로 변환합니다.
    pub fn into_candles(self, symbol: &str, interval: Timeframe) -> Vec<Candle> {
        self.rows
            .into_iter()
            .filter_map(|row| row.into_candle(symbol, interval))
            .collect()
    }
}

/// 월 단위 Parquet 파티션 저장소.
///
/// 디스크 레이아웃: `{base}/{symbol_lowercase}/{interval}/{YYYY-MM}/data`.
/// 모든 쓰기는 임시 파일에 쓴 뒤 rename으로 교체하므로, 동시에 읽는 쪽은
/// 이전 파일 또는 새 파일 중 하나만 봅니다.
#[derive(Debug, Clone)]
pub struct PartitionStore {
    base_path: PathBuf,
    codec: Codec,
    max_row_group_size: usize,
    batch_size: usize,
}

impl PartitionStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            codec: Codec::Snappy,
            max_row_group_size: 8192,
            batch_size: 8192,
        }
    }

    pub fn from_config(config: &PartitionStoreConfig) -> Self {
        Self::new(config.base_path.clone())
            .with_codec(config.compression)
            .with_max_row_group_size(config.max_row_group_size)
    }

    /// 기본 쓰기 코덱을 설정합니다.
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_max_row_group_size(mut self, rows: usize) -> Self {
        self.max_row_group_size = rows.max(1);
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// 파티션 디렉터리 경로.
    pub fn partition_dir(&self, key: &PartitionKey) -> PathBuf {
        self.base_path.join(key.relative_dir())
    }

    /// 파티션 데이터 파일 경로.
    pub fn partition_path(&self, key: &PartitionKey) -> PathBuf {
        self.partition_dir(key).join(DATA_FILE_NAME)
    }

    /// 파티션의 glob 패턴 (쿼리 엔진 입력용). `None`인 부분은 `*`.
    pub fn glob_pattern(&self, symbol: Option<&str>, interval: Option<Timeframe>) -> String {
        let symbol = symbol.map_or_else(|| "*".to_string(), |s| s.to_lowercase());
        let interval = interval.map_or_else(|| "*".to_string(), |i| i.to_string());
        self.base_path
            .join(symbol)
            .join(interval)
            .join("*")
            .join(DATA_FILE_NAME)
            .to_string_lossy()
            .into_owned()
    }

    pub fn exists(&self, key: &PartitionKey) -> bool {
        self.partition_path(key).is_file()
    }

    // =========================================================================
    // 쓰기
    // =========================================================================

    /// 한 달치 캔들을 파티션에 씁니다.
    ///
    /// 파티션이 이미 있으면 기존 행과 병합합니다 (같은 timestamp는 새 값으로 교체,
    /// 배치 안의 중복은 뒤의 행이 우선). 결과는 timestamp 오름차순으로 다시 씁니다.
    pub fn write_partition(&self, candles: &[Candle], key: &PartitionKey) -> Result<PathBuf> {
        self.write_partition_with(candles, key, self.codec)
    }

    /// 코덱을 지정해 파티션을 씁니다.
    pub fn write_partition_with(
        &self,
        candles: &[Candle],
        key: &PartitionKey,
        codec: Codec,
    ) -> Result<PathBuf> {
        let span = storage_span!("write_partition", key.symbol, key.interval, key.month_label());
        let _enter = span.enter();

        validate_batch(candles, key)?;
        if candles.is_empty() {
            return Ok(self.partition_path(key));
        }

        let mut merged: BTreeMap<i64, Candle> = BTreeMap::new();
        let existing = if self.exists(key) {
            let rows = self.read_candles(key)?;
            let count = rows.len();
            merged.extend(rows.into_iter().map(|c| (c.timestamp.timestamp_millis(), c)));
            count
        } else {
            0
        };

        for candle in candles {
            merged.insert(candle.timestamp.timestamp_millis(), candle.clone());
        }

        let rows: Vec<Candle> = merged.into_values().collect();
        let path = self.write_atomic(key, &rows, codec)?;

        info!(
            partition = %key,
            existing = existing,
            incoming = candles.len(),
            total = rows.len(),
            codec = %codec,
            "파티션 저장 완료"
        );
        Ok(path)
    }

    /// 병합 없이 파티션 내용을 교체합니다. 빈 목록이면 파티션을 삭제합니다.
    pub(crate) fn rewrite_partition(&self, key: &PartitionKey, candles: &[Candle]) -> Result<()> {
        validate_batch(candles, key)?;
        if candles.is_empty() {
            self.delete_partition(key)?;
            return Ok(());
        }

        let mut sorted = candles.to_vec();
        sorted.sort_by_key(|c| c.timestamp);
        sorted.dedup_by_key(|c| c.timestamp.timestamp_millis());
        self.write_atomic(key, &sorted, self.codec)?;
        debug!(partition = %key, rows = sorted.len(), "파티션 재작성");
        Ok(())
    }

    /// 파티션을 다른 코덱으로 다시 인코딩해 `dest`에 씁니다 (원본은 그대로).
    ///
    /// 아카이브 업로드용 파일을 만들 때 사용합니다. 쓴 행 수를 반환합니다.
    pub(crate) fn export_file(&self, key: &PartitionKey, dest: &Path, codec: Codec) -> Result<usize> {
        let rows = self.read_candles(key)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| StorageError::io(format!("create {}", parent.display()), e))?;
        }
        if let Err(e) = self.encode(dest, &rows, codec) {
            let _ = fs::remove_file(dest);
            return Err(e);
        }
        Ok(rows.len())
    }

    /// 정렬/중복 제거된 행을 임시 파일에 쓴 뒤 원자적으로 교체합니다.
    fn write_atomic(&self, key: &PartitionKey, rows: &[Candle], codec: Codec) -> Result<PathBuf> {
        let dir = self.partition_dir(key);
        fs::create_dir_all(&dir).map_err(|e| StorageError::io(format!("create {}", key), e))?;

        let final_path = dir.join(DATA_FILE_NAME);
        let tmp_path = self.staging_path(key);

        let written = self
            .encode(&tmp_path, rows, codec)
            .and_then(|_| {
                fs::rename(&tmp_path, &final_path)
                    .map_err(|e| StorageError::io(format!("replace {}", key), e))
            });
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        Ok(final_path)
    }

    fn encode(&self, path: &Path, rows: &[Candle], codec: Codec) -> Result<()> {
        let context = || format!("encode {}", path.display());

        let props = WriterProperties::builder()
            .set_compression(codec.to_parquet()?)
            .set_statistics_enabled(EnabledStatistics::Page)
            .set_max_row_group_size(self.max_row_group_size)
            .build();

        let schema = candle_schema();
        let batch = candles_to_batch(schema.clone(), rows)?;

        let file = File::create(path).map_err(|e| StorageError::io(context(), e))?;
        let mut writer = ArrowWriter::try_new(file, schema, Some(props))
            .map_err(|e| StorageError::parquet(context(), e))?;
        writer
            .write(&batch)
            .map_err(|e| StorageError::parquet(context(), e))?;
        let file = writer
            .into_inner()
            .map_err(|e| StorageError::parquet(context(), e))?;
        file.sync_all().map_err(|e| StorageError::io(context(), e))?;
        Ok(())
    }

    /// 파티션 디렉터리 안의 임시 파일 경로 (숨김 파일이라 목록/glob에 잡히지 않음).
    pub(crate) fn staging_path(&self, key: &PartitionKey) -> PathBuf {
        self.partition_dir(key)
            .join(format!(".{}.{}.tmp", DATA_FILE_NAME, Uuid::new_v4()))
    }

    /// 외부에서 받은 파티션 파일(예: 아카이브에서 내려받은 파일)을 검증한 뒤
    /// 원자적으로 설치합니다. 실패하면 원본 파일을 지웁니다.
    pub(crate) fn install_file(&self, key: &PartitionKey, staged: &Path) -> Result<PathBuf> {
        let installed = self.verify_file(staged).and_then(|_| {
            let dir = self.partition_dir(key);
            fs::create_dir_all(&dir).map_err(|e| StorageError::io(format!("create {}", key), e))?;
            let final_path = dir.join(DATA_FILE_NAME);
            fs::rename(staged, &final_path)
                .map_err(|e| StorageError::io(format!("install {}", key), e))?;
            Ok(final_path)
        });
        if installed.is_err() {
            let _ = fs::remove_file(staged);
        }
        installed
    }

    /// 파일이 파티션 스키마의 Parquet 파일인지 확인합니다.
    fn verify_file(&self, path: &Path) -> Result<()> {
        let file = File::open(path).map_err(|e| StorageError::io(format!("open {}", path.display()), e))?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| StorageError::parquet(format!("verify {}", path.display()), e))?;
        let schema = builder.schema();
        for column in Column::ALL {
            if schema.field_with_name(column.name()).is_err() {
                return Err(StorageError::InvalidQuery(format!(
                    "{} is missing column {}",
                    path.display(),
                    column
                )));
            }
        }
        Ok(())
    }

    // =========================================================================
    // 읽기
    // =========================================================================

    /// 파티션 하나를 읽습니다. `columns`가 있으면 해당 컬럼만 디코딩합니다.
    pub fn read_partition(
        &self,
        key: &PartitionKey,
        columns: Option<&[Column]>,
    ) -> Result<Vec<CandleRow>> {
        self.read_file(key, &ScanPlan::new(columns, &Predicate::default(), self.batch_size))
    }

    /// 파티션 하나의 전체 행을 캔들로 읽습니다.
    pub fn read_candles(&self, key: &PartitionKey) -> Result<Vec<Candle>> {
        self.read_partition(key, None)?
            .into_iter()
            .map(|row| {
                row.into_candle(&key.symbol, key.interval).ok_or_else(|| {
                    StorageError::Arrow(arrow::error::ArrowError::SchemaError(format!(
                        "partition {} has incomplete rows",
                        key
                    )))
                })
            })
            .collect()
    }

    /// `[start, end]`(양 끝 포함) 범위를 읽습니다.
    ///
    /// 범위와 겹치는 월 파티션을 차례로 읽으며, 없는 파티션은 경고를 남기고
    /// `missing`에 기록한 뒤 건너뜁니다. 시간 조건은 파일 읽기 단계로 내려보냅니다.
    pub fn read_date_range(
        &self,
        symbol: &str,
        interval: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        columns: Option<&[Column]>,
    ) -> Result<PartialRead> {
        let mut result = PartialRead::default();
        if start > end {
            return Ok(result);
        }

        let predicate = Predicate::between(start, end);
        let plan = ScanPlan::new(columns, &predicate, self.batch_size);

        for (year, month) in months_between(start, end) {
            let key = PartitionKey::new(symbol, interval, year, month);
            match self.read_file(&key, &plan) {
                Ok(rows) => result.rows.extend(rows),
                Err(e) if e.is_not_found() => {
                    warn!(partition = %key, "파티션 없음 - 건너뜀");
                    result.missing.push(key);
                }
                Err(e) => return Err(e),
            }
        }

        result.rows.sort_by_key(|r| r.timestamp);
        debug!(
            symbol = symbol,
            interval = %interval,
            rows = result.rows.len(),
            missing = result.missing.len(),
            "범위 읽기 완료"
        );
        Ok(result)
    }

    fn read_file(&self, key: &PartitionKey, plan: &ScanPlan<'_>) -> Result<Vec<CandleRow>> {
        let path = self.partition_path(key);
        let context = || format!("read {}", key);

        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::PartitionNotFound(key.clone()))
            }
            Err(e) => return Err(StorageError::io(context(), e)),
        };

        let builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| StorageError::parquet(context(), e))?;
        let reader = plan
            .apply(builder)?
            .build()
            .map_err(|e| StorageError::parquet(context(), e))?;

        let mut rows = Vec::new();
        for batch in reader {
            append_rows(&batch?, &mut rows)?;
        }
        Ok(rows)
    }

    // =========================================================================
    // 목록/삭제/통계
    // =========================================================================

    /// 데이터 파일이 있는 `(year, month)` 목록.
    pub fn list_partitions(&self, symbol: &str, interval: Timeframe) -> Result<BTreeSet<(i32, u32)>> {
        let dir = self
            .base_path
            .join(symbol.to_lowercase())
            .join(interval.as_str());

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => {
                return Err(StorageError::io(
                    format!("list {}/{}", symbol, interval),
                    e,
                ))
            }
        };

        let mut months = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(format!("list {}/{}", symbol, interval), e))?;
            if !entry.path().join(DATA_FILE_NAME).is_file() {
                continue;
            }
            let name = entry.file_name();
            let parsed = name.to_str().and_then(|label| {
                let (y, m) = label.split_once('-')?;
                Some((y.parse::<i32>().ok()?, m.parse::<u32>().ok()?))
            });
            match parsed {
                Some((year, month)) if (1..=12).contains(&month) => {
                    months.insert((year, month));
                }
                _ => debug!(entry = ?name, "파티션이 아닌 디렉터리 무시"),
            }
        }
        Ok(months)
    }

    /// 파티션을 삭제합니다. 없으면 `false`.
    pub fn delete_partition(&self, key: &PartitionKey) -> Result<bool> {
        let dir = self.partition_dir(key);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!(partition = %key, "파티션 삭제");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io(format!("delete {}", key), e)),
        }
    }

    /// 파일 footer에서 행 수, 크기, 시각 범위를 읽습니다.
    pub fn partition_stats(&self, key: &PartitionKey) -> Result<PartitionStats> {
        let path = self.partition_path(key);
        let context = || format!("stats {}", key);

        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StorageError::PartitionNotFound(key.clone()))
            }
            Err(e) => return Err(StorageError::io(context(), e)),
        };
        let byte_size = file
            .metadata()
            .map_err(|e| StorageError::io(context(), e))?
            .len();

        let builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| StorageError::parquet(context(), e))?;
        let metadata = builder.metadata();
        let ts_index = timestamp_leaf(builder.parquet_schema())?;

        let mut min_ms: Option<i64> = None;
        let mut max_ms: Option<i64> = None;
        for rg in metadata.row_groups() {
            if let Some((lo, hi)) = int64_range(rg, ts_index) {
                min_ms = Some(min_ms.map_or(lo, |m| m.min(lo)));
                max_ms = Some(max_ms.map_or(hi, |m| m.max(hi)));
            }
        }

        let compression = metadata
            .row_groups()
            .first()
            .map(|rg| rg.column(0).compression().to_string())
            .unwrap_or_else(|| "none".to_string());

        Ok(PartitionStats {
            key: key.clone(),
            row_count: metadata.file_metadata().num_rows().max(0) as u64,
            byte_size,
            min_ts: min_ms.map(millis_to_utc).transpose()?,
            max_ts: max_ms.map(millis_to_utc).transpose()?,
            row_groups: metadata.num_row_groups(),
            compression,
        })
    }
}

/// 쓰기 배치가 OHLC 불변식을 지키고 모두 대상 파티션에 속하는지 확인합니다.
fn validate_batch(candles: &[Candle], key: &PartitionKey) -> Result<()> {
    for candle in candles {
        candle
            .validate()
            .map_err(|e| StorageError::schema(candle, e))?;

        let same_series = candle.symbol.eq_ignore_ascii_case(&key.symbol)
            && candle.interval == key.interval;
        if !same_series || !key.contains(candle.timestamp) {
            return Err(StorageError::PartitionMismatch {
                key: key.clone(),
                timestamp: candle.timestamp.to_rfc3339(),
            });
        }
    }
    Ok(())
}

//! 저장 엔진 설정.
//!
//! TOML 설정 파일을 읽고 `OHLCV__` 접두사 환경 변수로 덮어씁니다.
//! 예: `OHLCV__TIERING__HOT_RETENTION_DAYS=14`, `OHLCV__ARCHIVE__BUCKET=market-data`.
//! `DATABASE_URL`이 설정되어 있으면 `database.url`보다 우선합니다.

use crate::error::{Result, StorageError};
use crate::partition::Codec;
use crate::repository::DatabaseConfig;
use chrono::{DateTime, Duration, Utc};
use ohlcv_core::LogConfig;
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// 전체 설정.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    /// Warm 티어 파티션 저장소
    #[serde(default)]
    pub storage: PartitionStoreConfig,
    /// 티어 경계와 보존 기간
    #[serde(default)]
    pub tiering: TieringConfig,
    /// Hot 티어 데이터베이스
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Cold 아카이브 (선택)
    #[serde(default)]
    pub archive: Option<ArchiveConfig>,
    /// 쿼리 엔진
    #[serde(default)]
    pub query: QueryConfig,
    /// 로깅
    #[serde(default)]
    pub logging: LogConfig,
}

impl StoreConfig {
    /// 설정 파일과 환경 변수에서 설정을 로드합니다.
    ///
    /// 파일이 없으면 기본값과 환경 변수만 사용합니다.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(
                config::Environment::with_prefix("OHLCV")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(url) = std::env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", url)?;
        }

        let config: StoreConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// 값의 범위를 검사합니다.
    pub fn validate(&self) -> Result<()> {
        if self.tiering.hot_retention_days == 0 {
            return Err(StorageError::Config(
                "tiering.hot_retention_days must be at least 1".into(),
            ));
        }
        if let Some(warm) = self.tiering.warm_retention_days {
            if warm < self.tiering.hot_retention_days {
                return Err(StorageError::Config(format!(
                    "tiering.warm_retention_days ({}) must not be shorter than hot_retention_days ({})",
                    warm, self.tiering.hot_retention_days
                )));
            }
        }
        if self.storage.max_row_group_size == 0 {
            return Err(StorageError::Config(
                "storage.max_row_group_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Warm 티어 파티션 저장소 설정.
#[derive(Debug, Clone, Deserialize)]
pub struct PartitionStoreConfig {
    /// 파티션 루트 디렉터리
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,
    /// 일반 쓰기(수집/마이그레이션)에 쓰는 코덱
    #[serde(default = "default_write_codec")]
    pub compression: Codec,
    /// 아카이브 업로드용으로 다시 쓸 때의 코덱
    #[serde(default = "default_archive_codec")]
    pub archive_compression: Codec,
    /// row group 최대 행 수 (작을수록 pruning 단위가 세밀해짐)
    #[serde(default = "default_max_row_group_size")]
    pub max_row_group_size: usize,
}

fn default_base_path() -> PathBuf {
    PathBuf::from("data/ohlcv")
}
fn default_write_codec() -> Codec {
    Codec::Snappy
}
fn default_archive_codec() -> Codec {
    Codec::Zstd(9)
}
fn default_max_row_group_size() -> usize {
    8192
}

impl Default for PartitionStoreConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            compression: default_write_codec(),
            archive_compression: default_archive_codec(),
            max_row_group_size: default_max_row_group_size(),
        }
    }
}

/// 티어 경계와 보존 기간 설정.
#[derive(Debug, Clone, Deserialize)]
pub struct TieringConfig {
    /// Hot 티어에 유지할 최근 일수 (cutoff = now - hot_retention_days)
    #[serde(default = "default_hot_retention_days")]
    pub hot_retention_days: u32,
    /// 이 일수보다 오래된 Warm 파티션은 Cold 아카이브 대상
    #[serde(default)]
    pub warm_retention_days: Option<u32>,
    /// 마이그레이션 시 Hot 스캔 하한. 없으면 하한 없음
    #[serde(default)]
    pub migration_lower_bound: Option<DateTime<Utc>>,
}

fn default_hot_retention_days() -> u32 {
    30
}

impl Default for TieringConfig {
    fn default() -> Self {
        Self {
            hot_retention_days: default_hot_retention_days(),
            warm_retention_days: None,
            migration_lower_bound: None,
        }
    }
}

impl TieringConfig {
    pub fn with_hot_retention_days(mut self, days: u32) -> Self {
        self.hot_retention_days = days;
        self
    }

    /// 주어진 현재 시각에 대한 Hot/Warm 경계.
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        cutoff_for(now, self.hot_retention_days)
    }

    /// 아카이브 경계 (Warm 보존 기간이 설정된 경우).
    pub fn archive_cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.warm_retention_days.map(|days| cutoff_for(now, days))
    }
}

pub(crate) fn cutoff_for(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    now - Duration::days(i64::from(days))
}

/// Cold 아카이브(S3 호환) 설정.
#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    /// 엔드포인트 (R2: `https://<account>.r2.cloudflarestorage.com`). 없으면 AWS S3
    #[serde(default)]
    pub endpoint: Option<String>,
    /// 버킷 이름
    pub bucket: String,
    /// 리전 (R2는 "auto")
    #[serde(default = "default_region")]
    pub region: String,
    /// 액세스 키 ID
    pub access_key_id: String,
    /// 시크릿 액세스 키
    pub secret_access_key: SecretString,
    /// 공개 URL 접두사 (예: `https://pub-xxx.r2.dev`)
    #[serde(default)]
    pub public_url: Option<String>,
    /// 요청 타임아웃 (초)
    #[serde(default = "default_archive_timeout")]
    pub timeout_secs: u64,
    /// 로컬 테스트용(MinIO 등) HTTP 엔드포인트 허용
    #[serde(default)]
    pub allow_http: bool,
}

fn default_region() -> String {
    "auto".to_string()
}
fn default_archive_timeout() -> u64 {
    60
}

/// 쿼리 엔진 설정.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    /// 원격(HTTP) 파티션 읽기 타임아웃 (초)
    #[serde(default = "default_remote_timeout")]
    pub remote_timeout_secs: u64,
    /// 디코딩 배치 크기
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_remote_timeout() -> u64 {
    30
}
fn default_batch_size() -> usize {
    8192
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            remote_timeout_secs: default_remote_timeout(),
            batch_size: default_batch_size(),
        }
    }
}

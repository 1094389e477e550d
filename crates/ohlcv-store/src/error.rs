//! 저장 엔진 오류 타입.

use ohlcv_core::{CandleError, PartitionKey, Timeframe};
use std::fmt;
use thiserror::Error;

/// 오류가 발생한 티어.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Hot,
    Warm,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Hot => f.write_str("hot"),
            Tier::Warm => f.write_str("warm"),
        }
    }
}

/// 마이그레이션이 중단된 단계.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStage {
    /// Hot 티어에서 이관 대상 읽기
    ReadHot,
    /// Warm 티어에 쓰기
    WriteWarm,
    /// Hot 티어에서 삭제
    DeleteHot,
}

impl fmt::Display for MigrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationStage::ReadHot => f.write_str("read-hot"),
            MigrationStage::WriteWarm => f.write_str("write-warm"),
            MigrationStage::DeleteHot => f.write_str("delete-hot"),
        }
    }
}

/// 저장 엔진 오류.
#[derive(Debug, Error)]
pub enum StorageError {
    /// 캔들이 OHLC 불변식을 위반함
    #[error("Schema error: {symbol}/{interval} at {timestamp}: {source}")]
    Schema {
        symbol: String,
        interval: Timeframe,
        timestamp: String,
        #[source]
        source: CandleError,
    },

    /// 쓰기 배치에 대상 파티션 밖의 행이 포함됨
    #[error("Schema error: row at {timestamp} does not belong to partition {key}")]
    PartitionMismatch { key: PartitionKey, timestamp: String },

    /// 요청한 파티션이 없음
    #[error("Partition not found: {0}")]
    PartitionNotFound(PartitionKey),

    /// 로컬 파일 시스템 오류
    #[error("IO error ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Parquet 인코딩/디코딩 오류
    #[error("Parquet error ({context}): {source}")]
    Parquet {
        context: String,
        #[source]
        source: parquet::errors::ParquetError,
    },

    /// Arrow 배치 구성 오류
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// 오브젝트 스토어(S3/R2/HTTP) 오류
    #[error("Object store error ({key}): {source}")]
    ObjectStore {
        key: String,
        #[source]
        source: object_store::Error,
    },

    /// 업로드 후 원격 객체 크기가 로컬 파일과 다름
    #[error("Archive verification failed for {key}: expected {expected} bytes, found {actual:?}")]
    ArchiveMismatch {
        key: String,
        expected: u64,
        actual: Option<u64>,
    },

    /// 데이터베이스 연결 오류
    #[error("Database connection error: {0}")]
    Connection(String),

    /// 쿼리 실행 오류
    #[error("Query error: {0}")]
    Query(String),

    /// 데이터 삽입 오류
    #[error("Insert error: {0}")]
    Insert(String),

    /// 데이터 삭제 오류
    #[error("Delete error: {0}")]
    Delete(String),

    /// 스키마 마이그레이션 오류
    #[error("Migration error: {0}")]
    Migration(String),

    /// 연결 풀 소진
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// 타임아웃
    #[error("Operation timeout: {0}")]
    Timeout(String),

    /// 잘못된 쿼리 (패턴, 컬럼, 집계 정의)
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// 설정 오류
    #[error("Configuration error: {0}")]
    Config(String),

    /// 블로킹 작업 실패
    #[error("Background task failed: {0}")]
    Task(String),

    /// 하이브리드 저장소에서 특정 티어가 실패함
    #[error("{tier} tier failed: {source}")]
    Tier {
        tier: Tier,
        #[source]
        source: Box<StorageError>,
    },

    /// Hot 삭제 전에 마이그레이션이 중단됨
    #[error("Migration of {symbol}/{interval} aborted at {stage}: {source}")]
    MigrationAborted {
        symbol: String,
        interval: Timeframe,
        stage: MigrationStage,
        #[source]
        source: Box<StorageError>,
    },
}

impl StorageError {
    /// 컨텍스트가 포함된 IO 오류를 만듭니다.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// 컨텍스트가 포함된 Parquet 오류를 만듭니다.
    pub fn parquet(context: impl Into<String>, source: parquet::errors::ParquetError) -> Self {
        Self::Parquet {
            context: context.into(),
            source,
        }
    }

    /// 오브젝트 키가 포함된 오브젝트 스토어 오류를 만듭니다.
    pub fn object_store(key: impl Into<String>, source: object_store::Error) -> Self {
        Self::ObjectStore {
            key: key.into(),
            source,
        }
    }

    /// 캔들 검증 오류를 만듭니다.
    pub fn schema(candle: &ohlcv_core::Candle, source: CandleError) -> Self {
        Self::Schema {
            symbol: candle.symbol.clone(),
            interval: candle.interval,
            timestamp: candle.timestamp.to_rfc3339(),
            source,
        }
    }

    /// 티어 정보를 붙입니다. 이미 티어가 붙은 오류는 그대로 둡니다.
    pub fn in_tier(self, tier: Tier) -> Self {
        match self {
            err @ StorageError::Tier { .. } => err,
            other => StorageError::Tier {
                tier,
                source: Box::new(other),
            },
        }
    }

    /// 오류를 일으킨 티어 (있다면).
    pub fn tier(&self) -> Option<Tier> {
        match self {
            StorageError::Tier { tier, .. } => Some(*tier),
            StorageError::MigrationAborted { source, .. } => source.tier(),
            _ => None,
        }
    }

    /// 가장 안쪽의 원인 오류.
    pub fn root(&self) -> &StorageError {
        match self {
            StorageError::Tier { source, .. } | StorageError::MigrationAborted { source, .. } => {
                source.root()
            }
            other => other,
        }
    }

    /// 입력 데이터가 불변식을 위반한 오류인지 여부.
    pub fn is_schema(&self) -> bool {
        matches!(
            self.root(),
            StorageError::Schema { .. } | StorageError::PartitionMismatch { .. }
        )
    }

    /// 파티션 부재 오류인지 여부.
    pub fn is_not_found(&self) -> bool {
        match self.root() {
            StorageError::PartitionNotFound(_) => true,
            StorageError::ObjectStore { source, .. } => {
                matches!(source, object_store::Error::NotFound { .. })
            }
            _ => false,
        }
    }

    /// 로컬/원격 I/O 계열 오류인지 여부.
    pub fn is_io(&self) -> bool {
        matches!(
            self.root(),
            StorageError::Io { .. }
                | StorageError::Parquet { .. }
                | StorageError::ObjectStore { .. }
                | StorageError::ArchiveMismatch { .. }
                | StorageError::Timeout(_)
        )
    }

    /// 호출자가 재시도해 볼 만한 오류인지 여부.
    ///
    /// 엔진 내부에서는 재시도하지 않습니다.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root(),
            StorageError::Io { .. }
                | StorageError::ObjectStore { .. }
                | StorageError::Timeout(_)
                | StorageError::Connection(_)
                | StorageError::PoolExhausted
        )
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => StorageError::PoolExhausted,
            sqlx::Error::Io(e) => StorageError::Connection(e.to_string()),
            sqlx::Error::Database(db_err) => StorageError::Query(db_err.message().to_string()),
            _ => StorageError::Query(err.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(err: tokio::task::JoinError) -> Self {
        StorageError::Task(err.to_string())
    }
}

impl From<config::ConfigError> for StorageError {
    fn from(err: config::ConfigError) -> Self {
        StorageError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_annotation_is_not_nested() {
        let err = StorageError::Query("boom".into())
            .in_tier(Tier::Hot)
            .in_tier(Tier::Warm);
        assert_eq!(err.tier(), Some(Tier::Hot));
        assert!(err.to_string().starts_with("hot tier failed"));
    }

    #[test]
    fn test_classification_looks_through_wrappers() {
        let key = PartitionKey::new("BTCUSDT", Timeframe::H1, 2024, 1);
        let err = StorageError::PartitionNotFound(key).in_tier(Tier::Warm);
        assert!(err.is_not_found());
        assert!(!err.is_io());

        let io = StorageError::io(
            "write btcusdt/1h/2024-01",
            std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
        );
        assert!(io.is_io());
        assert!(io.is_retryable());
        assert!(io.to_string().contains("btcusdt/1h/2024-01"));
    }

    #[test]
    fn test_migration_aborted_reports_tier() {
        let err = StorageError::MigrationAborted {
            symbol: "BTCUSDT".into(),
            interval: Timeframe::H1,
            stage: MigrationStage::WriteWarm,
            source: Box::new(StorageError::Timeout("x".into()).in_tier(Tier::Warm)),
        };
        assert_eq!(err.tier(), Some(Tier::Warm));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("write-warm"));
    }
}

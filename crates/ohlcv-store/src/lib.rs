//! 계층형 OHLCV 시장 데이터 저장 엔진.
//!
//! 이 crate는 다음을 제공합니다:
//! - 월 단위 Parquet 파티션 저장소 (Warm 티어)
//! - 파티션 파일 대상 분석 쿼리 엔진 (로컬 glob, HTTP, 오브젝트 스토어)
//! - S3/R2 호환 Cold 아카이브 클라이언트
//! - Hot(PostgreSQL)/Warm/Hybrid 저장소와 Hot → Warm 이관
//! - Warm → Cold 파티션 아카이빙

pub mod archive;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod partition;
pub mod query;
pub mod repository;
mod scan;

pub use archive::{ArchivedObject, ColdArchive, ObjectInfo};
pub use config::{ArchiveConfig, PartitionStoreConfig, QueryConfig, StoreConfig, TieringConfig};
pub use error::{MigrationStage, Result, StorageError, Tier};
pub use lifecycle::{ArchiveReport, ArchivedPartition, PartitionArchiver};
pub use partition::{Codec, CandleRow, Column, PartialRead, PartitionStats, PartitionStore};
pub use query::{
    AggFn, AggregateResult, Aggregation, Bar, CompareOp, DatasetStats, Filter, GroupBy, Predicate,
    QueryEngine, TimeBucket,
};
pub use repository::{
    Database, DatabaseConfig, HotRepository, HybridRepository, MarketDataRepository,
    MigrationReport, WarmRepository,
};

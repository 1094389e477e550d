//! CLI 명령어 구현 모듈.
//!
//! 각 명령은 `StoreConfig`에서 필요한 구성 요소만 직접 조립합니다.

pub mod archive;
pub mod health;
pub mod migrate;
pub mod partitions;
pub mod stats;

use anyhow::{Context, Result};
use ohlcv_store::{
    ColdArchive, Database, HotRepository, PartitionArchiver, PartitionStore, StoreConfig,
    WarmRepository,
};

/// 설정 파일을 로드합니다 (없으면 기본값 + 환경 변수).
pub fn load_config(path: &str) -> Result<StoreConfig> {
    StoreConfig::load(path).with_context(|| format!("설정 로드 실패: {}", path))
}

/// Hot 티어 데이터베이스에 연결합니다.
pub async fn connect_database(config: &StoreConfig) -> Result<Database> {
    Database::connect(&config.database)
        .await
        .context("Hot 티어 데이터베이스 연결 실패")
}

pub async fn hot_repository(config: &StoreConfig) -> Result<HotRepository> {
    let db = connect_database(config).await?;
    Ok(HotRepository::from_database(&db))
}

pub fn partition_store(config: &StoreConfig) -> PartitionStore {
    PartitionStore::from_config(&config.storage)
}

pub fn warm_repository(config: &StoreConfig) -> WarmRepository {
    WarmRepository::new(partition_store(config))
}

/// `[archive]` 설정으로 아카이버를 만듭니다.
pub fn archiver(config: &StoreConfig) -> Result<PartitionArchiver> {
    let archive_config = config
        .archive
        .as_ref()
        .context("[archive] 섹션이 설정되지 않았습니다")?;
    let archive = ColdArchive::from_config(archive_config)?;
    Ok(PartitionArchiver::new(partition_store(config), archive)
        .with_codec(config.storage.archive_compression))
}

/// `YYYY-MM` 문자열을 (year, month)로 파싱합니다.
pub fn parse_month(s: &str) -> Result<(i32, u32)> {
    let parsed = s.split_once('-').and_then(|(y, m)| {
        let year = y.parse::<i32>().ok()?;
        let month = m.parse::<u32>().ok()?;
        (1..=12).contains(&month).then_some((year, month))
    });
    parsed.with_context(|| format!("Invalid month: {}. Use YYYY-MM", s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_month() {
        assert_eq!(parse_month("2024-01").unwrap(), (2024, 1));
        assert_eq!(parse_month("1999-12").unwrap(), (1999, 12));
        assert!(parse_month("2024-13").is_err());
        assert!(parse_month("2024/01").is_err());
        assert!(parse_month("abc").is_err());
    }

    #[test]
    fn test_archiver_requires_archive_section() {
        let config = StoreConfig::default();
        assert!(archiver(&config).is_err());
    }
}

//! Warm → Cold 파티션 아카이빙.
//!
//! 오래된 월 파티션을 압축률 높은 코덱으로 다시 인코딩해 아카이브에 올리고,
//! 원격 객체 크기를 확인한 뒤에만 로컬 파티션을 지웁니다.

use crate::archive::ColdArchive;
use crate::error::{Result, StorageError};
use crate::partition::{Codec, PartitionStore};
use chrono::{DateTime, Utc};
use ohlcv_core::{normalize_symbol, storage_span, PartitionKey, Timeframe, DATA_FILE_NAME};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{info, warn, Instrument};
use url::Url;

/// 아카이브된 파티션 하나의 결과.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedPartition {
    pub key: PartitionKey,
    pub object_key: String,
    pub rows: usize,
    pub bytes: u64,
    pub local_deleted: bool,
}

/// `archive_partitions` 결과.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveReport {
    pub archived: Vec<ArchivedPartition>,
    /// 아직 보존 기간 안이라 건너뛴 파티션 수
    pub retained: usize,
}

impl ArchiveReport {
    pub fn total_bytes(&self) -> u64 {
        self.archived.iter().map(|p| p.bytes).sum()
    }
}

/// 파티션 저장소와 Cold 아카이브 사이의 이동을 담당합니다.
#[derive(Debug, Clone)]
pub struct PartitionArchiver {
    store: PartitionStore,
    archive: ColdArchive,
    codec: Codec,
}

impl PartitionArchiver {
    pub fn new(store: PartitionStore, archive: ColdArchive) -> Self {
        Self {
            store,
            archive,
            codec: Codec::Zstd(9),
        }
    }

    /// 아카이브 파일 코덱을 설정합니다.
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = codec;
        self
    }

    pub fn archive(&self) -> &ColdArchive {
        &self.archive
    }

    /// `older_than` 이전에 끝나는 월 파티션을 모두 아카이브합니다.
    ///
    /// 한 파티션이라도 실패하면 즉시 중단합니다. 이미 처리된 파티션은 원격에
    /// 온전히 올라간 상태이므로 다시 실행해도 안전합니다.
    pub async fn archive_partitions(
        &self,
        symbol: &str,
        interval: Timeframe,
        older_than: DateTime<Utc>,
        keep_local: bool,
    ) -> Result<ArchiveReport> {
        let store = self.store.clone();
        let owned = symbol.to_string();
        let months =
            tokio::task::spawn_blocking(move || store.list_partitions(&owned, interval)).await??;

        let mut report = ArchiveReport::default();
        for (year, month) in months {
            let key = PartitionKey::new(symbol, interval, year, month);
            let expired = key.next_month_start().is_some_and(|end| end <= older_than);
            if !expired {
                report.retained += 1;
                continue;
            }
            report.archived.push(self.archive_partition(&key, keep_local).await?);
        }

        info!(
            symbol = symbol,
            interval = %interval,
            archived = report.archived.len(),
            retained = report.retained,
            bytes = report.total_bytes(),
            "파티션 아카이빙 완료"
        );
        Ok(report)
    }

    /// 파티션 하나를 업로드하고, 검증 후 (선택적으로) 로컬 파일을 삭제합니다.
    pub async fn archive_partition(
        &self,
        key: &PartitionKey,
        keep_local: bool,
    ) -> Result<ArchivedPartition> {
        let span = storage_span!("archive_partition", key.symbol, key.interval, key.month_label());
        self.archive_inner(key, keep_local).instrument(span).await
    }

    async fn archive_inner(&self, key: &PartitionKey, keep_local: bool) -> Result<ArchivedPartition> {
        let object_key = ColdArchive::object_key(key);
        let staged = self.store.staging_path(key);

        let store = self.store.clone();
        let (export_key, export_path, codec) = (key.clone(), staged.clone(), self.codec);
        let rows = tokio::task::spawn_blocking(move || {
            store.export_file(&export_key, &export_path, codec)
        })
        .await??;

        let metadata: BTreeMap<String, String> = [
            ("symbol", key.symbol.clone()),
            ("interval", key.interval.to_string()),
            ("year_month", key.month_label()),
            ("rows", rows.to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let uploaded = self.archive.upload(&staged, &object_key, &metadata).await;
        if let Err(e) = tokio::fs::remove_file(&staged).await {
            warn!(path = %staged.display(), error = %e, "임시 파일 삭제 실패");
        }
        let bytes = uploaded?;

        // 원격 객체가 같은 크기로 존재할 때만 로컬 삭제
        let remote = self.archive.metadata(&object_key).await?;
        let remote_size = remote.as_ref().map(|info| info.size);
        if remote_size != Some(bytes) {
            return Err(StorageError::ArchiveMismatch {
                key: object_key,
                expected: bytes,
                actual: remote_size,
            });
        }

        let local_deleted = if keep_local {
            false
        } else {
            let store = self.store.clone();
            let delete_key = key.clone();
            tokio::task::spawn_blocking(move || store.delete_partition(&delete_key)).await??
        };

        info!(
            object_key = %object_key,
            rows = rows,
            bytes = bytes,
            local_deleted = local_deleted,
            "파티션 아카이브 완료"
        );
        Ok(ArchivedPartition {
            key: key.clone(),
            object_key,
            rows,
            bytes,
            local_deleted,
        })
    }

    /// 아카이브된 파티션을 내려받아 Warm 파티션으로 설치합니다.
    ///
    /// 기존 로컬 파티션이 있으면 교체됩니다.
    pub async fn restore_partition(&self, key: &PartitionKey) -> Result<PathBuf> {
        let object_key = ColdArchive::object_key(key);
        let staged = self.store.staging_path(key);
        self.archive.download(&object_key, &staged).await?;

        let store = self.store.clone();
        let install_key = key.clone();
        let path =
            tokio::task::spawn_blocking(move || store.install_file(&install_key, &staged)).await??;

        info!(partition = %key, path = %path.display(), "파티션 복원 완료");
        Ok(path)
    }

    /// 쿼리 엔진 소스로 쓸 수 있는 파티션 위치 (등록된 오브젝트 스토어 접두사 기준).
    pub fn remote_source(&self, key: &PartitionKey) -> String {
        self.archive.source_for(key)
    }

    /// 아카이브된 파티션을 고르는 쿼리 엔진 패턴. `None`인 부분은 `*`.
    pub fn remote_glob(&self, symbol: Option<&str>, interval: Option<Timeframe>) -> String {
        let symbol = symbol.map_or_else(|| "*".to_string(), normalize_symbol);
        let interval = interval.map_or_else(|| "*".to_string(), |i| i.to_string());
        format!(
            "{}{}/{}/*/{}",
            self.archive.url_prefix(),
            symbol,
            interval,
            DATA_FILE_NAME
        )
    }

    /// 파티션의 공개 HTTP URL.
    pub fn remote_url(&self, key: &PartitionKey) -> Result<Url> {
        self.archive.public_url(&ColdArchive::object_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use object_store::memory::InMemory;
    use ohlcv_core::Candle;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PartitionArchiver) {
        let dir = TempDir::new().unwrap();
        let store = PartitionStore::new(dir.path());
        let archive = ColdArchive::new(Arc::new(InMemory::new()), "memory://cold/");
        (dir, PartitionArchiver::new(store, archive))
    }

    fn write_month(store: &PartitionStore, year: i32, month: u32, hours: i64) -> Vec<Candle> {
        let key = PartitionKey::new("BTCUSDT", Timeframe::H1, year, month);
        let start = key.month_start().unwrap();
        let rows: Vec<Candle> = (0..hours)
            .map(|i| {
                Candle::new("BTCUSDT", Timeframe::H1, start + Duration::hours(i), 10.0, 12.0, 9.0, 11.0, 1.0)
            })
            .collect();
        store.write_partition(&rows, &key).unwrap();
        rows
    }

    #[tokio::test]
    async fn test_archive_uploads_old_partitions_then_deletes_local() {
        let (_dir, archiver) = setup();
        write_month(&archiver.store, 2024, 1, 10);
        write_month(&archiver.store, 2024, 2, 10);
        write_month(&archiver.store, 2024, 3, 10);

        let older_than = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let report = archiver
            .archive_partitions("BTCUSDT", Timeframe::H1, older_than, false)
            .await
            .unwrap();

        assert_eq!(report.archived.len(), 2);
        assert_eq!(report.retained, 1);
        assert!(report.archived.iter().all(|p| p.local_deleted && p.rows == 10));
        assert_eq!(
            archiver.store.list_partitions("BTCUSDT", Timeframe::H1).unwrap(),
            std::collections::BTreeSet::from([(2024, 3)])
        );

        let info = archiver
            .archive
            .metadata("btcusdt/1h/2024-01/data")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(info.metadata.get("rows").map(String::as_str), Some("10"));
        assert_eq!(info.metadata.get("year_month").map(String::as_str), Some("2024-01"));
        assert_eq!(info.size, report.archived[0].bytes);
    }

    #[tokio::test]
    async fn test_keep_local_leaves_partition() {
        let (_dir, archiver) = setup();
        write_month(&archiver.store, 2024, 1, 5);

        let report = archiver
            .archive_partitions("BTCUSDT", Timeframe::H1, Utc::now(), true)
            .await
            .unwrap();
        assert_eq!(report.archived.len(), 1);
        assert!(!report.archived[0].local_deleted);
        assert!(archiver
            .store
            .exists(&PartitionKey::new("BTCUSDT", Timeframe::H1, 2024, 1)));
    }

    #[tokio::test]
    async fn test_restore_round_trips_rows() {
        let (_dir, archiver) = setup();
        let rows = write_month(&archiver.store, 2024, 1, 24);
        let key = PartitionKey::new("BTCUSDT", Timeframe::H1, 2024, 1);

        archiver.archive_partition(&key, false).await.unwrap();
        assert!(!archiver.store.exists(&key));

        archiver.restore_partition(&key).await.unwrap();
        assert_eq!(archiver.store.read_candles(&key).unwrap(), rows);

        let stats = archiver.store.partition_stats(&key).unwrap();
        assert!(stats.compression.to_uppercase().starts_with("ZSTD"));
    }

    #[tokio::test]
    async fn test_restore_missing_object_fails_without_local_changes() {
        let (_dir, archiver) = setup();
        let key = PartitionKey::new("BTCUSDT", Timeframe::H1, 2023, 12);

        let err = archiver.restore_partition(&key).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!archiver.store.exists(&key));
    }

    #[tokio::test]
    async fn test_archived_partitions_are_queryable_through_engine() {
        let (_dir, archiver) = setup();
        write_month(&archiver.store, 2024, 1, 10);
        write_month(&archiver.store, 2024, 2, 6);
        let older_than = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        archiver
            .archive_partitions("BTCUSDT", Timeframe::H1, older_than, false)
            .await
            .unwrap();

        let archive = archiver.archive();
        let engine = crate::query::QueryEngine::default()
            .with_object_store(archive.url_prefix(), archive.store());
        let stats = engine
            .stats(&[archiver.remote_glob(Some("BTCUSDT"), Some(Timeframe::H1))])
            .await
            .unwrap();
        assert_eq!(stats.row_count, 16);
    }

    #[test]
    fn test_remote_locations() {
        let (_dir, archiver) = setup();
        let key = PartitionKey::new("ETHUSDT", Timeframe::D1, 2022, 7);
        assert_eq!(archiver.remote_source(&key), "memory://cold/ethusdt/1d/2022-07/data");
        assert_eq!(
            archiver.remote_glob(Some("ETHUSDT"), None),
            "memory://cold/ethusdt/*/*/data"
        );
        assert!(archiver.remote_url(&key).is_err());
    }
}

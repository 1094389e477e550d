//! Warm → Cold 아카이빙과 복원.

use super::{archiver, parse_month};
use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use ohlcv_core::{PartitionKey, Timeframe};
use ohlcv_store::StoreConfig;

/// `archive` 명령 인자.
#[derive(Debug)]
pub struct ArchiveArgs {
    pub symbol: String,
    pub interval: Timeframe,
    pub older_than_days: Option<u32>,
    pub keep_local: bool,
}

pub async fn archive(config: &StoreConfig, args: ArchiveArgs) -> Result<()> {
    let now = Utc::now();
    let older_than = match args.older_than_days {
        Some(days) => now - Duration::days(i64::from(days)),
        None => config
            .tiering
            .archive_cutoff(now)
            .context("--older-than-days 또는 tiering.warm_retention_days 가 필요합니다")?,
    };

    let archiver = archiver(config)?;
    let report = archiver
        .archive_partitions(&args.symbol, args.interval, older_than, args.keep_local)
        .await
        .with_context(|| format!("{}/{} 아카이빙 실패", args.symbol, args.interval))?;

    for partition in &report.archived {
        println!(
            "{}  →  {}  ({} rows, {} bytes{})",
            partition.key,
            archiver.remote_source(&partition.key),
            partition.rows,
            partition.bytes,
            if partition.local_deleted { ", local removed" } else { "" }
        );
    }
    println!(
        "\n아카이빙 완료: {} 파티션, {} bytes (보존 기간 내 {} 파티션 유지)",
        report.archived.len(),
        report.total_bytes(),
        report.retained
    );
    Ok(())
}

pub async fn restore(
    config: &StoreConfig,
    symbol: &str,
    interval: Timeframe,
    month: &str,
) -> Result<()> {
    let (year, month) = parse_month(month)?;
    let key = PartitionKey::new(symbol, interval, year, month);

    let path = archiver(config)?
        .restore_partition(&key)
        .await
        .with_context(|| format!("{} 복원 실패", key))?;

    println!("복원 완료: {} → {}", key, path.display());
    Ok(())
}

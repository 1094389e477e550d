//! Hot 티어 스키마 생성 및 Hot → Warm 이관.

use super::{connect_database, hot_repository, warm_repository};
use anyhow::{Context, Result};
use ohlcv_core::Timeframe;
use ohlcv_store::{HybridRepository, StoreConfig};
use std::sync::Arc;
use tracing::info;

/// `migrations/`의 SQL 마이그레이션을 적용합니다.
pub async fn init_db(config: &StoreConfig) -> Result<()> {
    let db = connect_database(config).await?;
    db.migrate().await.context("스키마 마이그레이션 실패")?;
    println!("Hot 티어 스키마 준비 완료");
    Ok(())
}

/// 심볼별로 cutoff 이전 데이터를 Warm 티어로 옮깁니다.
///
/// 심볼 하나가 실패하면 나머지는 진행하지 않습니다. 실패한 심볼은 Hot에 그대로
/// 남아 있으므로 다시 실행하면 됩니다.
pub async fn migrate(
    config: &StoreConfig,
    symbols: &[String],
    interval: Timeframe,
    cutoff_days: Option<u32>,
) -> Result<()> {
    let hot = Arc::new(hot_repository(config).await?);
    let warm = Arc::new(warm_repository(config));
    let hybrid = HybridRepository::new(warm, hot, config.tiering.clone());

    info!(
        symbols = symbols.len(),
        interval = %interval,
        cutoff_days = cutoff_days.unwrap_or(config.tiering.hot_retention_days),
        "Hot → Warm 이관 시작"
    );

    let mut total = 0;
    for symbol in symbols {
        let report = hybrid
            .migrate_to_warm(symbol, interval, cutoff_days)
            .await
            .with_context(|| format!("{}/{} 이관 실패", symbol, interval))?;
        println!(
            "{:<12} {:>4}  cutoff {}  read {:>8}  written {:>8}  deleted {:>8}",
            report.symbol,
            report.interval,
            report.cutoff.format("%Y-%m-%d %H:%M:%S"),
            report.rows_read,
            report.rows_written,
            report.rows_deleted
        );
        total += report.rows_deleted;
    }

    println!("\n이관 완료: {} 행", total);
    Ok(())
}

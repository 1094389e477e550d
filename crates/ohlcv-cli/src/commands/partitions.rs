//! Warm 파티션 목록 조회.

use super::partition_store;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ohlcv_core::{PartitionKey, Timeframe};
use ohlcv_store::{PartitionStats, StoreConfig};
use serde::Serialize;
use tracing::info;

/// 출력 형식.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

impl OutputFormat {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            _ => Err(anyhow::anyhow!("Invalid format: {}. Use: table, json", s)),
        }
    }
}

/// 출력용 파티션 요약.
#[derive(Debug, Clone, Serialize)]
pub struct PartitionRow {
    pub month: String,
    pub path: String,
    pub rows: u64,
    pub bytes: u64,
    pub row_groups: usize,
    pub compression: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<DateTime<Utc>>,
}

impl From<PartitionStats> for PartitionRow {
    fn from(stats: PartitionStats) -> Self {
        Self {
            month: stats.key.month_label(),
            path: stats.key.relative_path(),
            rows: stats.row_count,
            bytes: stats.byte_size,
            row_groups: stats.row_groups,
            compression: stats.compression,
            first: stats.min_ts,
            last: stats.max_ts,
        }
    }
}

pub async fn list_partitions(
    config: &StoreConfig,
    symbol: &str,
    interval: Timeframe,
    format: OutputFormat,
) -> Result<()> {
    let store = partition_store(config);
    let owned = symbol.to_string();

    let rows = tokio::task::spawn_blocking(move || -> Result<Vec<PartitionRow>> {
        let months = store.list_partitions(&owned, interval)?;
        months
            .into_iter()
            .map(|(year, month)| {
                let key = PartitionKey::new(owned.as_str(), interval, year, month);
                store
                    .partition_stats(&key)
                    .map(PartitionRow::from)
                    .with_context(|| format!("{} 메타데이터 읽기 실패", key))
            })
            .collect()
    })
    .await
    .context("파티션 조회 작업 실패")??;

    info!(symbol = symbol, interval = %interval, partitions = rows.len(), "파티션 조회 완료");

    let content = match format {
        OutputFormat::Table => format_table(&rows),
        OutputFormat::Json => serde_json::to_string_pretty(&rows)?,
    };
    println!("{}", content);
    Ok(())
}

fn format_table(rows: &[PartitionRow]) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "{:<8} {:>10} {:>12} {:>6} {:<12} {:<20} {:<20}\n",
        "MONTH", "ROWS", "BYTES", "RG", "CODEC", "FIRST", "LAST"
    ));
    output.push_str(&"-".repeat(94));
    output.push('\n');

    for row in rows {
        output.push_str(&format!(
            "{:<8} {:>10} {:>12} {:>6} {:<12} {:<20} {:<20}\n",
            row.month,
            row.rows,
            row.bytes,
            row.row_groups,
            row.compression,
            format_ts(row.first),
            format_ts(row.last)
        ));
    }

    output.push('\n');
    output.push_str(&format!(
        "Total: {} partitions, {} rows, {} bytes",
        rows.len(),
        rows.iter().map(|r| r.rows).sum::<u64>(),
        rows.iter().map(|r| r.bytes).sum::<u64>()
    ));
    output
}

fn format_ts(ts: Option<DateTime<Utc>>) -> String {
    ts.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row() -> PartitionRow {
        PartitionRow {
            month: "2024-01".into(),
            path: "btcusdt/1h/2024-01/data".into(),
            rows: 744,
            bytes: 20_480,
            row_groups: 1,
            compression: "SNAPPY".into(),
            first: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            last: None,
        }
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!(OutputFormat::parse("TABLE").unwrap(), OutputFormat::Table);
        assert_eq!(OutputFormat::parse("json").unwrap(), OutputFormat::Json);
        assert!(OutputFormat::parse("csv").is_err());
    }

    #[test]
    fn test_format_table() {
        let table = format_table(&[row()]);
        assert!(table.contains("2024-01"));
        assert!(table.contains("2024-01-01 00:00:00"));
        assert!(table.ends_with("Total: 1 partitions, 744 rows, 20480 bytes"));
    }

    #[test]
    fn test_json_skips_missing_bounds() {
        let json = serde_json::to_value(row()).unwrap();
        assert_eq!(json["rows"], 744);
        assert!(json.get("last").is_none());
    }
}

//! 파티션 파일 요약 통계.

use super::{archiver, partition_store};
use anyhow::{Context, Result};
use ohlcv_core::Timeframe;
use ohlcv_store::{DatasetStats, QueryEngine, StoreConfig};
use tracing::info;

/// `stats` 명령 인자.
#[derive(Debug)]
pub struct StatsArgs {
    pub patterns: Vec<String>,
    pub symbol: Option<String>,
    pub interval: Option<Timeframe>,
    /// Warm 디렉터리 대신 Cold 아카이브의 파티션을 대상으로 함
    pub cold: bool,
}

impl StatsArgs {
    /// 스캔할 소스 목록. 패턴이 없으면 Warm 저장소 glob을 사용합니다.
    ///
    /// `--cold`이면 아카이브 접두사 아래의 같은 레이아웃을 사용합니다.
    fn sources(&self, config: &StoreConfig) -> Result<Vec<String>> {
        if !self.patterns.is_empty() {
            return Ok(self.patterns.clone());
        }
        if self.cold {
            let archiver = archiver(config)?;
            return Ok(vec![archiver.remote_glob(self.symbol.as_deref(), self.interval)]);
        }
        let store = partition_store(config);
        Ok(vec![store.glob_pattern(self.symbol.as_deref(), self.interval)])
    }
}

/// 쿼리 엔진을 만들고, 아카이브가 설정되어 있으면 그 오브젝트 스토어를 등록합니다.
fn query_engine(config: &StoreConfig) -> Result<QueryEngine> {
    let engine = QueryEngine::new(config.query.clone());
    if config.archive.is_none() {
        return Ok(engine);
    }
    let archiver = archiver(config)?;
    let archive = archiver.archive();
    Ok(engine.with_object_store(archive.url_prefix(), archive.store()))
}

pub async fn stats(config: &StoreConfig, args: StatsArgs) -> Result<()> {
    let sources = args.sources(config)?;
    info!(sources = ?sources, "통계 계산");

    let engine = query_engine(config)?;
    let stats = engine
        .stats(&sources)
        .await
        .with_context(|| format!("통계 계산 실패: {}", sources.join(", ")))?;

    println!("{}", format_stats(&stats));
    Ok(())
}

fn format_stats(stats: &DatasetStats) -> String {
    let ts = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map(|t| t.to_rfc3339()).unwrap_or_else(|| "-".to_string())
    };
    let price = |p: Option<f64>| p.map(|p| format!("{:.8}", p)).unwrap_or_else(|| "-".to_string());

    format!(
        "rows         {}\nfirst        {}\nlast         {}\nmin close    {}\nmax close    {}\navg close    {}\ntotal volume {:.8}",
        stats.row_count,
        ts(stats.min_ts),
        ts(stats.max_ts),
        price(stats.min_price),
        price(stats.max_price),
        price(stats.avg_price),
        stats.total_volume
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sources_prefer_explicit_patterns() {
        let config = StoreConfig::default();
        let args = StatsArgs {
            patterns: vec!["https://example.com/a.parquet".into()],
            symbol: Some("BTCUSDT".into()),
            interval: None,
            cold: false,
        };
        assert_eq!(args.sources(&config).unwrap(), vec!["https://example.com/a.parquet"]);
    }

    #[test]
    fn test_sources_from_symbol() {
        let config = StoreConfig::default();
        let args = StatsArgs {
            patterns: vec![],
            symbol: Some("BTCUSDT".into()),
            interval: Some(Timeframe::H1),
            cold: false,
        };
        let sources = args.sources(&config).unwrap();
        assert_eq!(sources.len(), 1);
        assert!(sources[0].contains("btcusdt"));
    }

    #[test]
    fn test_cold_sources_require_archive() {
        let config = StoreConfig::default();
        let args = StatsArgs {
            patterns: vec![],
            symbol: Some("BTCUSDT".into()),
            interval: Some(Timeframe::H1),
            cold: true,
        };
        assert!(args.sources(&config).is_err());
        assert!(query_engine(&config).is_ok());
    }

    #[test]
    fn test_cold_sources_use_archive_prefix() {
        let mut config = StoreConfig::default();
        config.archive = Some(
            serde_json::from_str(
                r#"{
                    "endpoint": "http://localhost:9000",
                    "bucket": "market-data",
                    "access_key_id": "key",
                    "secret_access_key": "secret",
                    "allow_http": true
                }"#,
            )
            .unwrap(),
        );
        let args = StatsArgs {
            patterns: vec![],
            symbol: Some("BTCUSDT".into()),
            interval: Some(Timeframe::H1),
            cold: true,
        };
        assert_eq!(
            args.sources(&config).unwrap(),
            vec!["s3://market-data/btcusdt/1h/*/data"]
        );
        assert!(query_engine(&config).is_ok());
    }

    #[test]
    fn test_format_empty_stats() {
        let text = format_stats(&DatasetStats::default());
        assert!(text.starts_with("rows         0"));
        assert!(text.contains("first        -"));
    }
}

//! OHLCV 저장소 운영 CLI.
//!
//! # 사용 예시
//!
//! ```bash
//! # Hot 티어 스키마 생성
//! ohlcv init-db
//!
//! # 30일(설정값)보다 오래된 BTCUSDT 1시간봉을 Hot → Warm 이관
//! ohlcv migrate -s BTCUSDT -i 1h
//!
//! # 1년보다 오래된 Warm 파티션을 Cold 아카이브로 이동
//! ohlcv archive -s BTCUSDT -i 1h --older-than-days 365
//!
//! # 아카이브된 파티션 복원
//! ohlcv restore -s BTCUSDT -i 1h --month 2023-01
//!
//! # 파티션 목록과 통계
//! ohlcv partitions -s BTCUSDT -i 1h
//! ohlcv stats -s BTCUSDT -i 1h
//! ohlcv stats -s BTCUSDT -i 1h --cold
//! ```

use clap::{Parser, Subcommand};
use ohlcv_core::{init_logging, LogFormat, Timeframe};
use tracing::error;

mod commands;

use commands::archive::{archive, restore, ArchiveArgs};
use commands::migrate::{init_db, migrate};
use commands::partitions::{list_partitions, OutputFormat};
use commands::stats::{stats, StatsArgs};

#[derive(Parser)]
#[command(name = "ohlcv")]
#[command(about = "Tiered OHLCV storage - Hot/Warm/Cold 티어 관리 도구", long_about = None)]
#[command(version)]
struct Cli {
    /// 설정 파일
    #[arg(short, long, global = true, default_value = "config/default.toml")]
    config: String,

    /// 로그 레벨 필터 (설정 파일과 RUST_LOG보다 우선)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// 로그 형식 (pretty, json, compact)
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Hot 티어 데이터베이스 스키마 생성/갱신
    InitDb,

    /// Hot/Warm 티어 상태 확인
    Health,

    /// cutoff 이전 Hot 데이터를 Warm 티어로 이관
    Migrate {
        /// 심볼 (여러 번 지정 가능)
        #[arg(short, long, required = true)]
        symbol: Vec<String>,

        /// 캔들 간격 (예: 1m, 1h, 1d)
        #[arg(short, long)]
        interval: Timeframe,

        /// Hot 보존 일수 (기본: tiering.hot_retention_days)
        #[arg(long)]
        cutoff_days: Option<u32>,
    },

    /// 오래된 Warm 파티션을 Cold 아카이브로 업로드
    Archive {
        /// 심볼
        #[arg(short, long)]
        symbol: String,

        /// 캔들 간격
        #[arg(short, long)]
        interval: Timeframe,

        /// 이 일수보다 오래된 월 파티션이 대상 (기본: tiering.warm_retention_days)
        #[arg(long)]
        older_than_days: Option<u32>,

        /// 업로드 후에도 로컬 파티션 유지
        #[arg(long, default_value = "false")]
        keep_local: bool,
    },

    /// Cold 아카이브의 파티션을 Warm 티어로 복원
    Restore {
        /// 심볼
        #[arg(short, long)]
        symbol: String,

        /// 캔들 간격
        #[arg(short, long)]
        interval: Timeframe,

        /// 복원할 월 (YYYY-MM)
        #[arg(short, long)]
        month: String,
    },

    /// Warm 파티션 목록과 파일 통계
    Partitions {
        /// 심볼
        #[arg(short, long)]
        symbol: String,

        /// 캔들 간격
        #[arg(short, long)]
        interval: Timeframe,

        /// 출력 형식 (table, json)
        #[arg(short, long, default_value = "table")]
        format: String,
    },

    /// 파티션 파일 요약 통계 (쿼리 엔진)
    Stats {
        /// 소스 패턴 (glob, http(s) URL). 여러 번 지정 가능
        #[arg(short, long)]
        pattern: Vec<String>,

        /// 패턴 대신 심볼로 Warm 파티션 선택
        #[arg(short, long)]
        symbol: Option<String>,

        /// 심볼과 함께 쓸 캔들 간격
        #[arg(short, long)]
        interval: Option<Timeframe>,

        /// Warm 디렉터리 대신 Cold 아카이브의 파티션을 조회 ([archive] 필요)
        #[arg(long, default_value = "false")]
        cold: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = commands::load_config(&cli.config)?;

    let mut log_config = config.logging.clone().overridden_by_env();
    if let Some(level) = &cli.log_level {
        log_config.level = level.clone();
    }
    if let Some(format) = cli.log_format {
        log_config.format = format;
    }
    init_logging(log_config).map_err(|e| anyhow::anyhow!("로깅 초기화 실패: {}", e))?;

    let result = match cli.command {
        Commands::InitDb => init_db(&config).await,
        Commands::Health => commands::health::health(&config).await,
        Commands::Migrate {
            symbol,
            interval,
            cutoff_days,
        } => migrate(&config, &symbol, interval, cutoff_days).await,
        Commands::Archive {
            symbol,
            interval,
            older_than_days,
            keep_local,
        } => {
            archive(
                &config,
                ArchiveArgs {
                    symbol,
                    interval,
                    older_than_days,
                    keep_local,
                },
            )
            .await
        }
        Commands::Restore {
            symbol,
            interval,
            month,
        } => restore(&config, &symbol, interval, &month).await,
        Commands::Partitions {
            symbol,
            interval,
            format,
        } => match OutputFormat::parse(&format) {
            Ok(format) => list_partitions(&config, &symbol, interval, format).await,
            Err(e) => Err(e),
        },
        Commands::Stats {
            pattern,
            symbol,
            interval,
            cold,
        } => {
            stats(
                &config,
                StatsArgs {
                    patterns: pattern,
                    symbol,
                    interval,
                    cold,
                },
            )
            .await
        }
    };

    if let Err(e) = &result {
        error!(error = %e, "명령 실패");
    }
    result
}

//! 파티션 압축 코덱.

use crate::error::{Result, StorageError};
use parquet::basic::{Compression, ZstdLevel};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// 파티션 파일 압축 방식.
///
/// 설정 문자열: `snappy`, `zstd`, `zstd:<level>`, `none`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum Codec {
    Uncompressed,
    /// 빠른 코덱 (수집/마이그레이션 쓰기용)
    Snappy,
    /// 고압축 코덱 (아카이브용)
    Zstd(i32),
}

impl Codec {
    pub(crate) fn to_parquet(self) -> Result<Compression> {
        Ok(match self {
            Codec::Uncompressed => Compression::UNCOMPRESSED,
            Codec::Snappy => Compression::SNAPPY,
            Codec::Zstd(level) => Compression::ZSTD(
                ZstdLevel::try_new(level)
                    .map_err(|e| StorageError::parquet(format!("zstd level {}", level), e))?,
            ),
        })
    }
}

impl Default for Codec {
    fn default() -> Self {
        Codec::Snappy
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Codec::Uncompressed => f.write_str("none"),
            Codec::Snappy => f.write_str("snappy"),
            Codec::Zstd(level) => write!(f, "zstd:{}", level),
        }
    }
}

impl FromStr for Codec {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        match lower.as_str() {
            "none" | "uncompressed" => Ok(Codec::Uncompressed),
            "snappy" => Ok(Codec::Snappy),
            "zstd" => Ok(Codec::Zstd(3)),
            other => other
                .strip_prefix("zstd:")
                .and_then(|level| level.parse().ok())
                .map(Codec::Zstd)
                .ok_or_else(|| format!("Unknown compression codec: {}", s)),
        }
    }
}

impl TryFrom<String> for Codec {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

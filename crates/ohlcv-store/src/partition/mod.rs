//! Warm 티어 파티션 저장소.
//!
//! `(symbol, interval, year, month)` 단위의 Parquet 파일을 관리합니다.

mod codec;
pub(crate) mod schema;
mod store;

pub use codec::Codec;
pub use schema::{candle_schema, CandleRow, Column};
pub use store::{PartialRead, PartitionStats, PartitionStore};

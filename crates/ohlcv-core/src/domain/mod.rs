//! 도메인 모델.

mod candle;
mod partition;

pub use candle::{normalize_symbol, Candle, CandleKey};
pub use partition::{months_between, PartitionKey, DATA_FILE_NAME};

//! 저장 엔진 전반에서 쓰이는 기본 값 타입.

mod timeframe;

pub use timeframe::Timeframe;

//! # OHLCV Core
//!
//! 계층형 OHLCV 저장 엔진의 핵심 도메인 타입을 제공합니다.
//!
//! 이 크레이트는 저장 엔진 전반에서 사용되는 기본 타입을 제공합니다:
//! - 캔들(OHLCV) 레코드와 검증 규칙
//! - 캔들 간격(타임프레임)
//! - 월 단위 파티션 키와 디스크/아카이브 경로 규칙
//! - 테스트 가능한 시계(Clock)
//! - 로깅 인프라

pub mod clock;
pub mod domain;
pub mod error;
pub mod logging;
pub mod types;

pub use clock::*;
pub use domain::*;
pub use error::*;
pub use logging::*;
pub use types::*;

//! Driver Module
//!
//! 연결 풀, 클러스터 라우팅, 재시도, 인증 토큰 관리
//!
//! # 구성
//!
//! - [`ConnectionPool`]: 주소별 연결 풀 (획득 타임아웃, 유효성 검사, 워밍업)
//! - [`routing`]: 라우팅 테이블 캐시, 조회(discovery), 로드 밸런싱
//! - [`RetryExecutor`]: 백오프 + 지터 재시도
//! - [`AuthTokenManager`]: 토큰 캐시 및 보안 에러 처리
//! - [`Driver`]: 위 구성 요소를 소유하는 드라이버 컨텍스트
//! - [`BlockingDriver`]: 동기 API 어댑터
//!
//! # Example
//!
//! ```ignore
//! use boltnet::driver::{AuthToken, Driver, ExecuteConfig};
//! use futures::FutureExt;
//!
//! // 라우팅 드라이버 (neo4j://) - 클러스터용
//! let driver = Driver::new(
//!     "neo4j://server1:7687,server2:7687?region=eu",
//!     AuthToken::basic("neo4j", "password"),
//!     connector,
//! )?;
//!
//! // 쓰기 작업 (리더로 라우팅, 일시적 실패 시 재시도)
//! let summary = driver
//!     .execute(&ExecuteConfig::write(), |conn| {
//!         async move { conn.request(run_request()).await }.boxed()
//!     })
//!     .await?;
//!
//! driver.close().await;
//! ```

pub mod routing;
mod auth;
mod blocking;
mod driver;
mod error;
mod metrics;
mod pool;
mod retry;
mod session;

#[cfg(test)]
pub(crate) mod test_support;

// Re-exports
pub use auth::{
    AuthToken, AuthTokenAndExpiration, AuthTokenManager, AuthTokenProvider, Clock,
    ExpirationBasedAuthTokenManager, StaticAuthTokenManager, SystemClock,
};
pub use blocking::BlockingDriver;
pub use driver::{unit_of_work, Driver, DriverConfig, DriverConfigBuilder, ServerAddress, DEFAULT_PORT};
pub use error::{classify, codes, DriverError, DriverResult, ErrorKind, ServerError};
pub use metrics::{AddressPoolMetrics, DriverMetrics, Histogram, HistogramSnapshot};
pub use pool::{ConnectionPool, PoolConfig, PoolConfigBuilder, PoolStatus, PooledConnection};
pub use retry::{RetryConfig, RetryExecutor};
pub use routing::{RoutedConnection, RoutingPolicy, RoutingTable};
pub use session::{AccessMode, Bookmark, ExecuteConfig, ExecuteConfigBuilder};

//! Blocking Driver
//!
//! 동기 API 어댑터
//!
//! 모든 비동기 호출을 전용 tokio 런타임의 워커에서 실행하고 호출 스레드는
//! 채널로 결과를 기다립니다. 호출자의 스레드에서 future를 직접 구동하지
//! 않으므로 단일 스레드 실행 환경에서도 교착되지 않습니다.
//!
//! 비동기 컨텍스트(런타임 워커) 안에서 호출하면 안 됩니다.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::oneshot;

use super::auth::AuthToken;
use super::driver::{Driver, DriverConfig};
use super::error::{DriverError, DriverResult};
use super::metrics::DriverMetrics;
use super::routing::{RoutedConnection, RoutingTable};
use super::session::{Bookmark, ExecuteConfig};
use crate::bolt::Connector;

/// 동기 드라이버
pub struct BlockingDriver {
    runtime: Runtime,
    driver: Arc<Driver>,
}

impl BlockingDriver {
    /// 새 동기 드라이버 생성
    pub fn new(config: DriverConfig, connector: Arc<dyn Connector>) -> DriverResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("boltnet-blocking")
            .enable_time()
            .build()?;
        let driver = Arc::new(Driver::with_config(config, connector)?);
        Ok(Self { runtime, driver })
    }

    /// 내부 비동기 드라이버
    pub fn driver(&self) -> &Arc<Driver> {
        &self.driver
    }

    /// 작업 실행 (재시도 포함)
    pub fn execute<T, F>(&self, config: ExecuteConfig, work: F) -> DriverResult<T>
    where
        F: for<'c> FnMut(&'c mut RoutedConnection) -> BoxFuture<'c, DriverResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let driver = self.driver.clone();
        self.run(async move { driver.execute(&config, work).await })
    }

    /// 연결 테스트
    pub fn verify_connectivity(&self) -> DriverResult<()> {
        let driver = self.driver.clone();
        self.run(async move { driver.verify_connectivity().await })
    }

    /// 라우팅 테이블 조회
    pub fn routing_table(&self, database: &str, bookmarks: Vec<Bookmark>) -> DriverResult<Arc<RoutingTable>> {
        let driver = self.driver.clone();
        let database = database.to_string();
        self.run(async move { driver.routing_table(&database, &bookmarks).await })
    }

    /// 현재 인증 토큰
    pub fn get_token(&self) -> DriverResult<AuthToken> {
        let driver = self.driver.clone();
        self.run(async move { driver.get_token().await })
    }

    /// 메트릭 조회
    pub fn metrics(&self) -> DriverMetrics {
        self.driver.metrics()
    }

    /// 드라이버 종료
    pub fn close(&self) {
        let driver = self.driver.clone();
        let result = self.run(async move {
            driver.close().await;
            Ok(())
        });
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to close driver");
        }
    }

    /// 열린 상태 확인
    pub fn is_open(&self) -> bool {
        self.driver.is_open()
    }

    /// 워커에서 future를 실행하고 결과 대기
    fn run<T, Fut>(&self, fut: Fut) -> DriverResult<T>
    where
        Fut: Future<Output = DriverResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.runtime.spawn(async move {
            let _ = tx.send(fut.await);
        });
        rx.blocking_recv()
            .map_err(|_| DriverError::closed("Blocking driver worker stopped before completing the call"))?
    }
}

impl std::fmt::Debug for BlockingDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockingDriver").field("driver", &self.driver).finish()
    }
}

//! 로드 밸런서
//!
//! 라우팅 테이블에서 서버를 골라 연결을 획득하고, 작업 중 발생한 에러를
//! 라우팅 테이블에 되돌려 줍니다.

use std::sync::Arc;

use super::super::auth::AuthToken;
use super::super::driver::ServerAddress;
use super::super::error::{DriverError, DriverResult};
use super::super::pool::{ConnectionPool, PooledConnection};
use super::super::session::{AccessMode, Bookmark};
use super::manager::RoutingTableManager;
use super::policy::{RoutingPolicy, ServerSelector};
use crate::bolt::{PendingResponse, Request, ResponseSummary};

// ============================================================================
// LoadBalancer - 로드 밸런서
// ============================================================================

/// 클러스터 로드 밸런서
pub struct LoadBalancer {
    /// 라우팅 테이블 관리자
    manager: Arc<RoutingTableManager>,
    /// 연결 풀
    pool: Arc<ConnectionPool>,
    /// 서버 선택기
    selector: ServerSelector,
}

impl LoadBalancer {
    /// 새 로드 밸런서 생성
    pub fn new(manager: Arc<RoutingTableManager>, pool: Arc<ConnectionPool>, policy: RoutingPolicy) -> Self {
        Self {
            manager,
            pool,
            selector: ServerSelector::new(policy),
        }
    }

    /// 라우팅 테이블 관리자
    pub fn manager(&self) -> &Arc<RoutingTableManager> {
        &self.manager
    }

    /// 접근 모드에 맞는 서버로 연결 획득
    ///
    /// 라우팅 테이블을 확보한 뒤 정책에 따라 서버를 고릅니다. 연결할 수 없는
    /// 서버는 테이블에서 도달 불가로 표시하고 다음 후보를 시도합니다.
    /// 후보가 모두 실패하면 [`DriverError::SessionExpired`]를 반환합니다.
    pub async fn acquire(
        &self,
        mode: AccessMode,
        database: &str,
        bookmarks: &[Bookmark],
        impersonated_user: Option<&str>,
    ) -> DriverResult<RoutedConnection> {
        let table = self
            .manager
            .ensure_routing_table_for_mode(mode, database, bookmarks, impersonated_user)
            .await?;
        let timeout = self.pool.config().acquisition_timeout;

        loop {
            let candidates = self.manager.servers(database, mode, &table);
            let Some(address) = self
                .selector
                .select(mode, &candidates, |a| self.pool.in_use(a))
                .cloned()
            else {
                break;
            };

            match self.pool.acquire(&address, timeout).await {
                Ok(conn) => {
                    tracing::trace!(%address, %mode, database, "acquired routed connection");
                    return Ok(RoutedConnection::routed(conn, mode, database, self.manager.clone(), self.pool.clone()));
                }
                Err(
                    e @ (DriverError::AcquisitionTimeout(_) | DriverError::Security(_) | DriverError::Closed(_)),
                ) => return Err(e),
                Err(e) => {
                    tracing::warn!(%address, %mode, database, error = %e, "failed to acquire connection, trying next server");
                    self.on_connection_error(&address).await;
                }
            }
        }

        Err(DriverError::session_expired(format!(
            "Failed to obtain connection towards {} server. Known routing table is: {:?}",
            mode,
            self.manager.routing_table(database)
        )))
    }

    /// 연결 에러 피드백: 모든 테이블에서 제외하고 풀 정리
    pub async fn on_connection_error(&self, address: &ServerAddress) {
        self.manager.forget_server(address);
        self.pool.purge(address).await;
    }

    /// 쓰기 거부 피드백: 라이터 제외 및 테이블 강제 만료
    pub fn on_write_error(&self, address: &ServerAddress, database: &str) {
        self.manager.forget_writer(address, database);
    }
}

impl std::fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadBalancer")
            .field("policy", &self.selector.policy())
            .field("manager", &self.manager)
            .finish()
    }
}

// ============================================================================
// RoutedConnection - 라우팅된 연결
// ============================================================================

struct Feedback {
    manager: Arc<RoutingTableManager>,
    pool: Arc<ConnectionPool>,
}

/// 작업에 넘겨지는 연결
///
/// 요청 에러를 가로채 라우팅 피드백을 적용합니다. 라우팅 모드에서 연결이
/// 끊기면 서버를 제외하고 [`DriverError::SessionExpired`]로, 리더십을 잃은
/// 라이터의 에러는 테이블을 강제 만료시키고 `SessionExpired`로 바꿉니다.
pub struct RoutedConnection {
    conn: PooledConnection,
    mode: AccessMode,
    database: String,
    feedback: Option<Feedback>,
}

impl RoutedConnection {
    fn routed(
        conn: PooledConnection,
        mode: AccessMode,
        database: &str,
        manager: Arc<RoutingTableManager>,
        pool: Arc<ConnectionPool>,
    ) -> Self {
        Self {
            conn,
            mode,
            database: database.to_string(),
            feedback: Some(Feedback { manager, pool }),
        }
    }

    /// 라우팅 없는 직접 연결
    pub(crate) fn direct(conn: PooledConnection, mode: AccessMode, database: &str) -> Self {
        Self {
            conn,
            mode,
            database: database.to_string(),
            feedback: None,
        }
    }

    /// 서버 주소
    pub fn address(&self) -> &ServerAddress {
        self.conn.address()
    }

    /// 접근 모드
    pub fn access_mode(&self) -> AccessMode {
        self.mode
    }

    /// 데이터베이스 (빈 문자열은 홈 데이터베이스)
    pub fn database(&self) -> &str {
        &self.database
    }

    /// 연결을 인증한 토큰
    pub fn auth_token(&self) -> Option<&AuthToken> {
        self.conn.auth_token()
    }

    /// 사용 가능 여부
    pub fn is_open(&self) -> bool {
        self.conn.is_open()
    }

    /// 요청 전송
    pub async fn send_and_receive(&mut self, request: Request) -> DriverResult<PendingResponse> {
        match self.conn.send_and_receive(request).await {
            Ok(pending) => Ok(pending),
            Err(e) => Err(self.handle_error(e).await),
        }
    }

    /// 요청 전송 후 응답 대기
    pub async fn request(&mut self, request: Request) -> DriverResult<ResponseSummary> {
        let pending = self.send_and_receive(request).await?;
        match pending.wait().await {
            Ok(summary) => Ok(summary),
            Err(e) => Err(self.handle_error(e).await),
        }
    }

    /// 에러에 라우팅 피드백 적용 후 호출자에게 돌려줄 에러 반환
    pub async fn handle_error(&mut self, err: DriverError) -> DriverError {
        let address = self.conn.address().clone();

        if matches!(err, DriverError::Protocol(_)) {
            self.conn.mark_broken();
            return err;
        }

        if err.is_connection_error() {
            self.conn.mark_broken();
            let Some(feedback) = &self.feedback else {
                return err;
            };
            tracing::warn!(%address, database = %self.database, error = %err, "server is no longer available");
            feedback.manager.forget_server(&address);
            feedback.pool.purge(&address).await;
            return DriverError::session_expired(format!("Server at {} is no longer available: {}", address, err));
        }

        if err.is_cluster_error() {
            let Some(feedback) = &self.feedback else {
                return err;
            };
            feedback.manager.forget_writer(&address, &self.database);
            return DriverError::session_expired(format!("Server at {} no longer accepts writes: {}", address, err));
        }

        err
    }

    /// 풀로 반환
    pub async fn release(self) {
        self.conn.release().await;
    }
}

impl std::fmt::Debug for RoutedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutedConnection")
            .field("conn", &self.conn)
            .field("mode", &self.mode)
            .field("database", &self.database)
            .field("routed", &self.feedback.is_some())
            .finish()
    }
}

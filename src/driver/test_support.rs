//! 테스트 지원
//!
//! 메모리 안에서 동작하는 연결/인증/시계 대역.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::json;

use super::auth::{AuthToken, AuthTokenManager, Clock};
use super::driver::ServerAddress;
use super::error::{DriverError, DriverResult, ServerError};
use crate::bolt::{Connection, Connector, PendingResponse, Request, Response, ResponsePipeline};

/// 테스트용 주소 파싱
pub(crate) fn addr(s: &str) -> ServerAddress {
    ServerAddress::parse(s).expect("valid test address")
}

/// 테스트 로그 출력 (`RUST_LOG`로 조절, 중복 호출 무시)
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// 생성된 태스크가 진행되도록 양보
pub(crate) async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

/// ROUTE 응답 생성
pub(crate) fn routing_reply(ttl: i64, routers: &[&str], readers: &[&str], writers: &[&str]) -> Response {
    let mut servers = vec![
        json!({"addresses": routers, "role": "ROUTE"}),
        json!({"addresses": readers, "role": "READ"}),
    ];
    if !writers.is_empty() {
        servers.push(json!({"addresses": writers, "role": "WRITE"}));
    }
    let payload = json!({"rt": {"ttl": ttl, "servers": servers}});
    match payload {
        serde_json::Value::Object(map) => Response::Success(map),
        _ => unreachable!(),
    }
}

// ============================================================================
// FakeClock
// ============================================================================

/// 수동으로 움직이는 시계
pub(crate) struct FakeClock {
    now: Mutex<DateTime<Utc>>,
}

impl FakeClock {
    pub(crate) fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub(crate) fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

// ============================================================================
// RotatingAuth
// ============================================================================

/// 보안 에러를 받으면 새 bearer 토큰으로 교체하는 인증 관리자
pub(crate) struct RotatingAuth {
    token: Mutex<AuthToken>,
    refreshes: AtomicUsize,
}

impl RotatingAuth {
    pub(crate) fn new(token: AuthToken) -> Self {
        Self {
            token: Mutex::new(token),
            refreshes: AtomicUsize::new(0),
        }
    }

    pub(crate) fn set(&self, token: AuthToken) {
        *self.token.lock() = token;
    }

    pub(crate) fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthTokenManager for RotatingAuth {
    async fn get_token(&self) -> DriverResult<AuthToken> {
        Ok(self.token.lock().clone())
    }

    async fn handle_security_exception(&self, token: &AuthToken, error: &DriverError) -> bool {
        if !matches!(error, DriverError::Security(_)) {
            return false;
        }
        let mut current = self.token.lock();
        if &*current != token {
            return false;
        }
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        *current = AuthToken::bearer(format!("token-{}", n));
        true
    }
}

// ============================================================================
// MockConnector / MockConnection
// ============================================================================

#[derive(Default)]
struct MockState {
    refused: HashSet<ServerAddress>,
    auth_failures: HashMap<ServerAddress, String>,
    rejected_tokens: Vec<(AuthToken, String)>,
    route_replies: HashMap<ServerAddress, Response>,
    request_failures: HashMap<ServerAddress, Response>,
    connects: HashMap<ServerAddress, usize>,
    routed: Vec<(ServerAddress, Option<String>)>,
    alive: Vec<Arc<AtomicBool>>,
    tokens: Vec<AuthToken>,
    closes: usize,
}

/// 스크립트대로 응답하는 연결 생성기
pub(crate) struct MockConnector {
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(Mutex::new(MockState::default())),
        })
    }

    /// 연결 거부
    pub(crate) fn refuse(&self, address: &ServerAddress) {
        self.state.lock().refused.insert(address.clone());
    }

    /// 연결 허용 (거부/인증 실패 해제)
    pub(crate) fn accept(&self, address: &ServerAddress) {
        let mut state = self.state.lock();
        state.refused.remove(address);
        state.auth_failures.remove(address);
    }

    /// 연결 시 보안 에러
    pub(crate) fn fail_auth(&self, address: &ServerAddress, code: &str) {
        self.state
            .lock()
            .auth_failures
            .insert(address.clone(), code.to_string());
    }

    /// 특정 토큰으로의 연결을 보안 에러로 거부
    pub(crate) fn reject_token(&self, token: AuthToken, code: &str) {
        self.state.lock().rejected_tokens.push((token, code.to_string()));
    }

    /// ROUTE 응답 설정
    pub(crate) fn route(&self, address: &ServerAddress, reply: Response) {
        self.state.lock().route_replies.insert(address.clone(), reply);
    }

    /// 일반 요청 응답을 실패로 설정
    pub(crate) fn fail_requests(&self, address: &ServerAddress, reply: Response) {
        self.state.lock().request_failures.insert(address.clone(), reply);
    }

    /// 주소별 연결 생성 횟수
    pub(crate) fn connects(&self, address: &ServerAddress) -> usize {
        self.state.lock().connects.get(address).copied().unwrap_or(0)
    }

    /// 전체 연결 생성 횟수
    pub(crate) fn total_connects(&self) -> usize {
        self.state.lock().connects.values().sum()
    }

    /// ROUTE 요청 수
    pub(crate) fn route_requests(&self) -> usize {
        self.state.lock().routed.len()
    }

    /// 마지막 ROUTE 요청의 데이터베이스
    pub(crate) fn last_route_database(&self) -> Option<String> {
        self.state.lock().routed.last().and_then(|(_, db)| db.clone())
    }

    /// ROUTE 요청을 받은 라우터 (순서대로)
    pub(crate) fn routed_to(&self) -> Vec<ServerAddress> {
        self.state.lock().routed.iter().map(|(a, _)| a.clone()).collect()
    }

    /// 열린 연결 모두 끊기
    pub(crate) fn kill_all(&self) {
        for alive in &self.state.lock().alive {
            alive.store(false, Ordering::SeqCst);
        }
    }

    /// 닫힌 연결 수
    pub(crate) fn closes(&self) -> usize {
        self.state.lock().closes
    }

    /// 연결에 사용된 토큰 (순서대로)
    pub(crate) fn tokens(&self) -> Vec<AuthToken> {
        self.state.lock().tokens.clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, address: &ServerAddress, auth: &AuthToken) -> DriverResult<Box<dyn Connection>> {
        let mut state = self.state.lock();
        if state.refused.contains(address) {
            return Err(DriverError::connection(format!("Connection refused: {}", address)));
        }
        if let Some(code) = state.auth_failures.get(address) {
            return Err(DriverError::Security(ServerError::new(code.clone(), "authentication failed")));
        }
        if let Some((_, code)) = state.rejected_tokens.iter().find(|(t, _)| t == auth) {
            return Err(DriverError::Security(ServerError::new(code.clone(), "token rejected")));
        }

        *state.connects.entry(address.clone()).or_default() += 1;
        state.tokens.push(auth.clone());
        let alive = Arc::new(AtomicBool::new(true));
        state.alive.push(alive.clone());

        Ok(Box::new(MockConnection {
            address: address.clone(),
            alive,
            pipeline: ResponsePipeline::new(),
            state: self.state.clone(),
        }))
    }
}

struct MockConnection {
    address: ServerAddress,
    alive: Arc<AtomicBool>,
    pipeline: ResponsePipeline,
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl Connection for MockConnection {
    fn server_address(&self) -> &ServerAddress {
        &self.address
    }

    fn is_open(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.pipeline.is_broken()
    }

    async fn send_and_receive(&mut self, request: Request) -> DriverResult<PendingResponse> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(DriverError::connection(format!("Connection to {} is closed", self.address)));
        }

        let reply = {
            let mut state = self.state.lock();
            match &request {
                Request::Route { database, .. } => {
                    state.routed.push((self.address.clone(), database.clone()));
                    state.route_replies.get(&self.address).cloned()
                }
                Request::Encoded { .. } => Some(
                    state
                        .request_failures
                        .get(&self.address)
                        .cloned()
                        .unwrap_or_else(|| Response::Success(Default::default())),
                ),
                Request::Reset | Request::Goodbye => Some(Response::Success(Default::default())),
            }
        };
        let Some(reply) = reply else {
            self.alive.store(false, Ordering::SeqCst);
            return Err(DriverError::connection(format!("{} does not support routing", self.address)));
        };

        let pending = self.pipeline.enqueue(&request)?;
        self.pipeline.on_message(reply)?;
        Ok(pending)
    }

    async fn close(&mut self) -> DriverResult<()> {
        if self.alive.swap(false, Ordering::SeqCst) {
            self.state.lock().closes += 1;
        }
        Ok(())
    }
}

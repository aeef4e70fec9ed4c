//! Driver
//!
//! 드라이버 인스턴스 및 설정
//!
//! [`Driver`]는 연결 풀, 라우팅 테이블 관리자, 인증 토큰 관리자, 재시도 실행기를
//! 소유하는 드라이버 범위 컨텍스트입니다. 전역 상태가 없으므로 한 프로세스에서
//! 여러 드라이버를 독립적으로 만들고 닫을 수 있습니다.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;

use super::auth::{AuthToken, AuthTokenManager, StaticAuthTokenManager};
use super::error::{DriverError, DriverResult};
use super::metrics::DriverMetrics;
use super::pool::{ConnectionPool, PoolConfig};
use super::retry::{RetryConfig, RetryExecutor, RetryState};
use super::routing::{
    AddressResolver, ClusterDiscovery, LoadBalancer, RoutedConnection, RoutingPolicy, RoutingTable,
    RoutingTableManager,
};
use super::session::{AccessMode, Bookmark, ExecuteConfig};
use crate::bolt::Connector;

/// 기본 Bolt 포트
pub const DEFAULT_PORT: u16 = 7687;

// ============================================================================
// ServerAddress - 서버 주소
// ============================================================================

/// 서버 주소
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    /// 호스트
    pub host: String,
    /// 포트
    pub port: u16,
}

impl ServerAddress {
    /// 새 서버 주소 생성
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host[:port]` 또는 `[ipv6][:port]` 파싱 (포트 생략 시 7687)
    pub fn parse(s: &str) -> DriverResult<Self> {
        let s = s.trim();
        let invalid = || DriverError::configuration(format!("Invalid server address: '{}'", s));

        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, after) = rest.split_once(']').ok_or_else(invalid)?;
            match after {
                "" => (host, None),
                _ => (host, Some(after.strip_prefix(':').ok_or_else(invalid)?)),
            }
        } else {
            match s.rsplit_once(':') {
                // 괄호 없는 IPv6 리터럴은 호스트 전체로 취급
                Some((host, _)) if host.contains(':') => (s, None),
                Some((host, port)) => (host, Some(port)),
                None => (s, None),
            }
        };

        if host.is_empty() {
            return Err(invalid());
        }
        let port = match port {
            Some(p) => p.parse().map_err(|_| invalid())?,
            None => DEFAULT_PORT,
        };
        Ok(Self::new(host, port))
    }

    /// URI의 첫 번째 주소
    pub fn from_uri(uri: &str) -> DriverResult<Self> {
        let parsed = ParsedUri::parse(uri)?;
        parsed
            .addresses
            .into_iter()
            .next()
            .ok_or_else(|| DriverError::configuration(format!("No address in URI '{}'", uri)))
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_PORT)
    }
}

// ============================================================================
// URI 파싱
// ============================================================================

/// 파싱된 드라이버 URI
#[derive(Debug, Clone, PartialEq)]
struct ParsedUri {
    routing: bool,
    encrypted: bool,
    addresses: Vec<ServerAddress>,
    routing_context: HashMap<String, String>,
}

impl ParsedUri {
    /// `neo4j://host1:7687,host2?region=eu` 형식 파싱
    fn parse(uri: &str) -> DriverResult<Self> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| DriverError::configuration(format!("Invalid URI '{}': missing scheme", uri)))?;

        let (routing, encrypted) = match scheme.to_ascii_lowercase().as_str() {
            "neo4j" => (true, false),
            "neo4j+s" | "neo4j+ssc" => (true, true),
            "bolt" => (false, false),
            "bolt+s" | "bolt+ssc" => (false, true),
            other => {
                return Err(DriverError::configuration(format!(
                    "Unsupported URI scheme '{}'",
                    other
                )))
            }
        };

        let (authority, query) = match rest.split_once('?') {
            Some((authority, query)) => (authority, Some(query)),
            None => (rest, None),
        };
        let addresses = authority
            .trim_end_matches('/')
            .split(',')
            .map(ServerAddress::parse)
            .collect::<DriverResult<Vec<_>>>()?;

        let mut routing_context = HashMap::new();
        for pair in query.unwrap_or("").split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                DriverError::configuration(format!("Invalid routing context parameter '{}'", pair))
            })?;
            if key.is_empty() || value.is_empty() {
                return Err(DriverError::configuration(format!(
                    "Invalid routing context parameter '{}'",
                    pair
                )));
            }
            if key == "address" {
                return Err(DriverError::configuration(
                    "Routing context parameter 'address' is reserved",
                ));
            }
            if routing_context.insert(key.to_string(), value.to_string()).is_some() {
                return Err(DriverError::configuration(format!(
                    "Duplicate routing context parameter '{}'",
                    key
                )));
            }
        }

        if !routing && !routing_context.is_empty() {
            return Err(DriverError::configuration(format!(
                "Routing context is not supported for scheme '{}'",
                scheme
            )));
        }
        if routing {
            if let Some(first) = addresses.first() {
                routing_context.insert("address".to_string(), first.to_string());
            }
        }

        Ok(Self {
            routing,
            encrypted,
            addresses,
            routing_context,
        })
    }
}

// ============================================================================
// DriverConfig - 드라이버 설정
// ============================================================================

/// 드라이버 설정
#[derive(Clone)]
pub struct DriverConfig {
    /// 초기 서버 주소 (라우팅 모드에서는 초기 라우터)
    pub addresses: Vec<ServerAddress>,
    /// 라우팅 모드 여부 (`neo4j://`)
    pub routing: bool,
    /// TLS 암호화 (`+s`, `+ssc`)
    pub encrypted: bool,
    /// 라우팅 컨텍스트 (URI 쿼리)
    pub routing_context: HashMap<String, String>,
    /// 인증 토큰 관리자
    pub auth: Arc<dyn AuthTokenManager>,
    /// 연결 풀 최대 크기
    pub max_connection_pool_size: usize,
    /// 연결 획득 타임아웃
    pub connection_acquisition_timeout: Duration,
    /// 연결 타임아웃
    pub connection_timeout: Duration,
    /// 연결 최대 수명
    pub max_connection_lifetime: Duration,
    /// 유휴 연결 타임아웃
    pub connection_idle_timeout: Option<Duration>,
    /// 워밍업 유휴 연결 수
    pub min_idle: usize,
    /// 라우팅 테이블에 추가된 주소 워밍업
    pub warmup: bool,
    /// 최대 트랜잭션 재시도 시간
    pub max_transaction_retry_time: Duration,
    /// 첫 재시도 지연
    pub initial_retry_delay: Duration,
    /// 재시도 지연 배수
    pub retry_delay_multiplier: f64,
    /// 재시도 지연 지터 비율
    pub retry_delay_jitter_factor: f64,
    /// 만료된 라우팅 테이블 제거 지연
    pub routing_table_purge_delay: Duration,
    /// 라우팅 테이블 조회 타임아웃
    pub discovery_timeout: Duration,
    /// 로드 밸런싱 정책
    pub routing_policy: RoutingPolicy,
    /// 초기 라우터 주소 해석기
    pub resolver: Option<Arc<dyn AddressResolver>>,
    /// User Agent
    pub user_agent: String,
}

impl DriverConfig {
    /// 새 설정 생성
    pub fn new(uri: &str, auth: AuthToken) -> DriverResult<Self> {
        let parsed = ParsedUri::parse(uri)?;
        Ok(Self {
            addresses: parsed.addresses,
            routing: parsed.routing,
            encrypted: parsed.encrypted,
            routing_context: parsed.routing_context,
            auth: Arc::new(StaticAuthTokenManager::new(auth)),
            max_connection_pool_size: 100,
            connection_acquisition_timeout: Duration::from_secs(60),
            connection_timeout: Duration::from_secs(30),
            max_connection_lifetime: Duration::from_secs(3600),
            connection_idle_timeout: None,
            min_idle: 1,
            warmup: false,
            max_transaction_retry_time: Duration::from_secs(30),
            initial_retry_delay: Duration::from_secs(1),
            retry_delay_multiplier: 2.0,
            retry_delay_jitter_factor: 0.2,
            routing_table_purge_delay: Duration::from_secs(30),
            discovery_timeout: Duration::from_secs(30),
            routing_policy: RoutingPolicy::default(),
            resolver: None,
            user_agent: format!("boltnet/{}", env!("CARGO_PKG_VERSION")),
        })
    }

    /// 빌더 시작
    pub fn builder(uri: &str, auth: AuthToken) -> DriverResult<DriverConfigBuilder> {
        let config = Self::new(uri, auth)?;
        Ok(DriverConfigBuilder { config })
    }

    /// 설정 검증
    pub fn validate(&self) -> DriverResult<()> {
        if self.addresses.is_empty() {
            return Err(DriverError::configuration("At least one server address is required"));
        }
        if self.max_connection_pool_size == 0 {
            return Err(DriverError::configuration("Max connection pool size must be positive"));
        }
        self.retry_config().validate()
    }

    /// 풀 설정
    pub fn pool_config(&self) -> PoolConfig {
        let mut builder = PoolConfig::builder()
            .max_size(self.max_connection_pool_size)
            .min_idle(self.min_idle)
            .max_lifetime(self.max_connection_lifetime)
            .connection_timeout(self.connection_timeout)
            .acquisition_timeout(self.connection_acquisition_timeout);
        if let Some(timeout) = self.connection_idle_timeout {
            builder = builder.idle_timeout(timeout);
        }
        if self.warmup {
            builder = builder.with_warmup();
        }
        builder.build()
    }

    /// 재시도 설정
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retry_time: self.max_transaction_retry_time,
            initial_delay: self.initial_retry_delay,
            multiplier: self.retry_delay_multiplier,
            jitter: self.retry_delay_jitter_factor,
        }
    }
}

impl fmt::Debug for DriverConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverConfig")
            .field("addresses", &self.addresses)
            .field("routing", &self.routing)
            .field("encrypted", &self.encrypted)
            .field("routing_context", &self.routing_context)
            .field("max_connection_pool_size", &self.max_connection_pool_size)
            .field("connection_acquisition_timeout", &self.connection_acquisition_timeout)
            .field("max_transaction_retry_time", &self.max_transaction_retry_time)
            .field("routing_policy", &self.routing_policy)
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// DriverConfigBuilder - 설정 빌더
// ============================================================================

/// 드라이버 설정 빌더
pub struct DriverConfigBuilder {
    config: DriverConfig,
}

impl DriverConfigBuilder {
    /// 인증 토큰 관리자 설정
    pub fn with_auth_token_manager(mut self, manager: Arc<dyn AuthTokenManager>) -> Self {
        self.config.auth = manager;
        self
    }

    /// 연결 풀 크기 설정
    pub fn with_max_connection_pool_size(mut self, size: usize) -> Self {
        self.config.max_connection_pool_size = size;
        self
    }

    /// 연결 획득 타임아웃 설정
    pub fn with_connection_acquisition_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_acquisition_timeout = timeout;
        self
    }

    /// 연결 타임아웃 설정
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    /// 연결 최대 수명 설정
    pub fn with_max_connection_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.max_connection_lifetime = lifetime;
        self
    }

    /// 유휴 연결 타임아웃 설정
    pub fn with_connection_idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_idle_timeout = Some(timeout);
        self
    }

    /// 워밍업 설정
    pub fn with_warmup(mut self, min_idle: usize) -> Self {
        self.config.warmup = true;
        self.config.min_idle = min_idle;
        self
    }

    /// 최대 트랜잭션 재시도 시간 설정
    pub fn with_max_transaction_retry_time(mut self, time: Duration) -> Self {
        self.config.max_transaction_retry_time = time;
        self
    }

    /// 첫 재시도 지연 설정
    pub fn with_initial_retry_delay(mut self, delay: Duration) -> Self {
        self.config.initial_retry_delay = delay;
        self
    }

    /// 재시도 지연 배수 설정
    pub fn with_retry_delay_multiplier(mut self, multiplier: f64) -> Self {
        self.config.retry_delay_multiplier = multiplier;
        self
    }

    /// 재시도 지터 비율 설정
    pub fn with_retry_delay_jitter_factor(mut self, jitter: f64) -> Self {
        self.config.retry_delay_jitter_factor = jitter;
        self
    }

    /// 라우팅 테이블 제거 지연 설정
    pub fn with_routing_table_purge_delay(mut self, delay: Duration) -> Self {
        self.config.routing_table_purge_delay = delay;
        self
    }

    /// 조회 타임아웃 설정
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.discovery_timeout = timeout;
        self
    }

    /// 로드 밸런싱 정책 설정
    pub fn with_routing_policy(mut self, policy: RoutingPolicy) -> Self {
        self.config.routing_policy = policy;
        self
    }

    /// 주소 해석기 설정
    pub fn with_resolver(mut self, resolver: Arc<dyn AddressResolver>) -> Self {
        self.config.resolver = Some(resolver);
        self
    }

    /// User Agent 설정
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// 빌드
    pub fn build(self) -> DriverConfig {
        self.config
    }
}

// ============================================================================
// Driver - 드라이버
// ============================================================================

/// 그래프 데이터베이스 드라이버
pub struct Driver {
    /// 설정
    config: DriverConfig,
    /// 직접 모드의 서버 주소
    seed: ServerAddress,
    /// 연결 풀
    pool: Arc<ConnectionPool>,
    /// 로드 밸런서 (라우팅 모드)
    load_balancer: Option<LoadBalancer>,
    /// 재시도 실행기
    retry: RetryExecutor,
    /// 열린 상태
    open: RwLock<bool>,
}

impl Driver {
    /// 새 드라이버 생성
    pub fn new(uri: &str, auth: AuthToken, connector: Arc<dyn Connector>) -> DriverResult<Self> {
        let config = DriverConfig::new(uri, auth)?;
        Self::with_config(config, connector)
    }

    /// 설정으로 드라이버 생성
    pub fn with_config(config: DriverConfig, connector: Arc<dyn Connector>) -> DriverResult<Self> {
        config.validate()?;
        let seed = config
            .addresses
            .first()
            .cloned()
            .ok_or_else(|| DriverError::configuration("At least one server address is required"))?;

        let pool = Arc::new(ConnectionPool::new(config.pool_config(), connector, config.auth.clone()));

        let load_balancer = config.routing.then(|| {
            let discovery = Arc::new(ClusterDiscovery::new(
                config.routing_context.clone(),
                config.discovery_timeout,
            ));
            let mut manager = RoutingTableManager::new(
                config.addresses.clone(),
                pool.clone(),
                discovery,
                config.routing_table_purge_delay,
            );
            if let Some(resolver) = &config.resolver {
                manager = manager.with_resolver(resolver.clone());
            }
            LoadBalancer::new(Arc::new(manager), pool.clone(), config.routing_policy)
        });

        tracing::debug!(
            addresses = ?config.addresses,
            routing = config.routing,
            user_agent = %config.user_agent,
            "driver created"
        );

        Ok(Self {
            retry: RetryExecutor::new(config.retry_config()),
            config,
            seed,
            pool,
            load_balancer,
            open: RwLock::new(true),
        })
    }

    /// 드라이버 설정
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// 라우팅 모드 여부
    pub fn is_routing(&self) -> bool {
        self.load_balancer.is_some()
    }

    /// 재시도 실행기
    pub fn retry_executor(&self) -> &RetryExecutor {
        &self.retry
    }

    /// 연결 획득 (재시도 없음)
    ///
    /// 라우팅 모드에서는 접근 모드에 맞는 서버를, 직접 모드에서는 항상 초기
    /// 주소를 사용합니다.
    pub async fn acquire(&self, config: &ExecuteConfig) -> DriverResult<RoutedConnection> {
        self.ensure_open()?;
        let database = config.database_key();
        match &self.load_balancer {
            Some(lb) => {
                lb.acquire(
                    config.access_mode,
                    database,
                    &config.bookmarks,
                    config.impersonated_user.as_deref(),
                )
                .await
            }
            None => {
                let conn = self
                    .pool
                    .acquire(&self.seed, self.config.connection_acquisition_timeout)
                    .await?;
                Ok(RoutedConnection::direct(conn, config.access_mode, database))
            }
        }
    }

    /// 작업 실행: 획득 → 작업 → 반환을 재시도로 감쌉니다
    ///
    /// 작업이 돌려준 에러는 라우팅 피드백을 거친 뒤 재시도 분류에 사용됩니다.
    /// 인증 에러는 토큰 관리자에 보고하고, 토큰이 갱신되면 한 번 더 시도합니다.
    ///
    /// # 예시
    ///
    /// ```rust,ignore
    /// let summary = driver
    ///     .execute(&ExecuteConfig::write(), |conn| {
    ///         async move { conn.request(run_request()).await }.boxed()
    ///     })
    ///     .await?;
    /// ```
    pub async fn execute<T, F>(&self, config: &ExecuteConfig, mut work: F) -> DriverResult<T>
    where
        F: for<'c> FnMut(&'c mut RoutedConnection) -> BoxFuture<'c, DriverResult<T>> + Send,
        T: Send,
    {
        let mut state = RetryState::new(self.retry.config());
        loop {
            let mut used_token = None;
            let err = match self.run_once(config, &mut work, &mut used_token).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            let refreshed = if state.wants_reauth(&err) {
                let token = match used_token {
                    Some(token) => token,
                    None => self.config.auth.get_token().await?,
                };
                self.config.auth.handle_security_exception(&token, &err).await
            } else {
                false
            };

            let attempt = state.attempt();
            let delay = state.on_failure(err, refreshed)?;
            tracing::debug!(attempt, ?delay, database = config.database_key(), "retrying unit of work");
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    async fn run_once<T, F>(
        &self,
        config: &ExecuteConfig,
        work: &mut F,
        used_token: &mut Option<AuthToken>,
    ) -> DriverResult<T>
    where
        F: for<'c> FnMut(&'c mut RoutedConnection) -> BoxFuture<'c, DriverResult<T>> + Send,
        T: Send,
    {
        let mut conn = self.acquire(config).await?;
        *used_token = conn.auth_token().cloned();
        let result = work(&mut conn).await;
        conn.release().await;
        result
    }

    /// 라우팅 테이블 조회 (필요 시 갱신)
    pub async fn routing_table(&self, database: &str, bookmarks: &[Bookmark]) -> DriverResult<Arc<RoutingTable>> {
        self.ensure_open()?;
        let lb = self
            .load_balancer
            .as_ref()
            .ok_or_else(|| DriverError::configuration("Routing table is only available in routing mode"))?;
        lb.manager()
            .ensure_routing_table_for_mode(AccessMode::Read, database, bookmarks, None)
            .await
    }

    /// 현재 인증 토큰
    pub async fn get_token(&self) -> DriverResult<AuthToken> {
        self.config.auth.get_token().await
    }

    /// 연결 테스트
    ///
    /// 라우팅 모드에서는 라우팅 테이블을 받고 리더 하나에 연결해 봅니다.
    pub async fn verify_connectivity(&self) -> DriverResult<()> {
        let conn = self.acquire(&ExecuteConfig::read()).await?;
        conn.release().await;
        Ok(())
    }

    /// 메트릭 조회
    pub fn metrics(&self) -> DriverMetrics {
        self.pool.metrics()
    }

    /// 드라이버 종료
    pub async fn close(&self) {
        {
            let mut open = self.open.write();
            if !*open {
                return;
            }
            *open = false;
        }
        if let Some(lb) = &self.load_balancer {
            lb.manager().clear();
        }
        self.pool.close().await;
        tracing::debug!(addresses = ?self.config.addresses, "driver closed");
    }

    /// 열린 상태 확인
    pub fn is_open(&self) -> bool {
        *self.open.read()
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(DriverError::closed("Driver is closed"))
        }
    }
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("addresses", &self.config.addresses)
            .field("routing", &self.is_routing())
            .field("open", &self.is_open())
            .finish()
    }
}

/// 작업 클로저의 future를 박싱
///
/// `async move { ... }.boxed()`와 같습니다.
pub fn unit_of_work<'c, T, Fut>(fut: Fut) -> BoxFuture<'c, DriverResult<T>>
where
    Fut: std::future::Future<Output = DriverResult<T>> + Send + 'c,
{
    fut.boxed()
}

// ============================================================================
// Tests
// ============================================================================

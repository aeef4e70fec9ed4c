//! Connection Pool
//!
//! 서버 주소별 연결 풀링
//!
//! 주소마다 하나의 [`AddressPool`]이 있고, 세마포어 허가(permit) 하나가 사용 중인
//! 연결 하나에 대응합니다. 반환된 연결은 허가를 놓기 전에 유휴 목록에 들어가므로,
//! 허가를 기다리던 호출자는 방금 반환된 바로 그 연결을 받습니다.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use super::auth::{AuthToken, AuthTokenManager};
use super::driver::ServerAddress;
use super::error::{DriverError, DriverResult};
use super::metrics::{AddressPoolMetrics, DriverMetrics, PoolCounters};
use crate::bolt::{Connection, Connector, PendingResponse, Request};

// ============================================================================
// PoolConfig - 풀 설정
// ============================================================================

/// 연결 풀 설정
///
/// 연결 풀의 동작을 제어하는 설정입니다. 모든 값은 주소별로 적용됩니다.
///
/// # 필드
///
/// | 필드 | 기본값 | 설명 |
/// |------|--------|------|
/// | `max_size` | 100 | 주소별 최대 연결 수 |
/// | `min_idle` | 1 | 워밍업 시 유지할 유휴 연결 수 |
/// | `warmup_on_init` | false | 새 주소가 추가될 때 워밍업 여부 |
/// | `max_lifetime` | 1시간 | 연결 최대 수명 |
/// | `idle_timeout` | 없음 | 유휴 타임아웃 |
/// | `connection_timeout` | 30초 | 연결 생성 타임아웃 |
/// | `acquisition_timeout` | 60초 | 연결 획득 대기 타임아웃 |
///
/// # 예시
///
/// ```rust,ignore
/// use boltnet::driver::PoolConfig;
/// use std::time::Duration;
///
/// let config = PoolConfig::builder()
///     .max_size(50)
///     .min_idle(5)
///     .with_warmup()
///     .acquisition_timeout(Duration::from_secs(5))
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// 최대 연결 수
    pub max_size: usize,
    /// 최소 유휴 연결 수
    pub min_idle: usize,
    /// 새 주소 추가 시 워밍업 수행 여부
    pub warmup_on_init: bool,
    /// 연결 최대 수명
    pub max_lifetime: Duration,
    /// 유휴 타임아웃
    pub idle_timeout: Option<Duration>,
    /// 연결 생성 타임아웃
    pub connection_timeout: Duration,
    /// 연결 획득 타임아웃
    pub acquisition_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 100,
            min_idle: 1,
            warmup_on_init: false,
            max_lifetime: Duration::from_secs(3600),
            idle_timeout: None,
            connection_timeout: Duration::from_secs(30),
            acquisition_timeout: Duration::from_secs(60),
        }
    }
}

impl PoolConfig {
    /// 빌더 패턴으로 풀 설정 생성
    pub fn builder() -> PoolConfigBuilder {
        PoolConfigBuilder::default()
    }
}

/// 풀 설정 빌더
#[derive(Debug, Clone, Default)]
pub struct PoolConfigBuilder {
    config: PoolConfig,
}

impl PoolConfigBuilder {
    /// 최대 연결 수 설정
    pub fn max_size(mut self, size: usize) -> Self {
        self.config.max_size = size;
        self
    }

    /// 최소 유휴 연결 수 설정
    pub fn min_idle(mut self, size: usize) -> Self {
        self.config.min_idle = size;
        self
    }

    /// 워밍업 활성화
    pub fn with_warmup(mut self) -> Self {
        self.config.warmup_on_init = true;
        self
    }

    /// 연결 최대 수명 설정
    pub fn max_lifetime(mut self, duration: Duration) -> Self {
        self.config.max_lifetime = duration;
        self
    }

    /// 유휴 타임아웃 설정
    pub fn idle_timeout(mut self, duration: Duration) -> Self {
        self.config.idle_timeout = Some(duration);
        self
    }

    /// 연결 타임아웃 설정
    pub fn connection_timeout(mut self, duration: Duration) -> Self {
        self.config.connection_timeout = duration;
        self
    }

    /// 획득 타임아웃 설정
    pub fn acquisition_timeout(mut self, duration: Duration) -> Self {
        self.config.acquisition_timeout = duration;
        self
    }

    /// 설정 빌드
    pub fn build(self) -> PoolConfig {
        self.config
    }
}

// ============================================================================
// Slot - 물리 연결 + 부가 정보
// ============================================================================

struct Slot {
    id: u64,
    conn: Box<dyn Connection>,
    auth: AuthToken,
    /// 생성 당시 풀 세대
    generation: u64,
    created_at: Instant,
    last_used: Instant,
}

impl Slot {
    /// 재사용 가능 여부 (열림, 최대 수명, 유휴 타임아웃)
    fn is_reusable(&self, config: &PoolConfig, now: Instant) -> bool {
        if !self.conn.is_open() {
            return false;
        }
        if now.duration_since(self.created_at) >= config.max_lifetime {
            return false;
        }
        match config.idle_timeout {
            Some(timeout) => now.duration_since(self.last_used) < timeout,
            None => true,
        }
    }
}

// ============================================================================
// PooledConnection - 풀링된 연결
// ============================================================================

/// 풀에서 빌려온 연결
///
/// [`PooledConnection::release`]로 반환해야 재사용됩니다. 반환 없이 드롭하면
/// 연결은 닫히고 슬롯만 풀에 돌아갑니다.
pub struct PooledConnection {
    slot: Option<Slot>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<AddressPool>,
    broken: bool,
}

impl PooledConnection {
    /// 연결 ID
    pub fn id(&self) -> u64 {
        self.slot.as_ref().map_or(0, |s| s.id)
    }

    /// 서버 주소
    pub fn address(&self) -> &ServerAddress {
        &self.pool.address
    }

    /// 이 연결을 인증한 토큰
    pub fn auth_token(&self) -> Option<&AuthToken> {
        self.slot.as_ref().map(|s| &s.auth)
    }

    /// 생성 시각
    pub fn created_at(&self) -> Option<Instant> {
        self.slot.as_ref().map(|s| s.created_at)
    }

    /// 사용 가능 여부
    pub fn is_open(&self) -> bool {
        !self.broken && self.slot.as_ref().map_or(false, |s| s.conn.is_open())
    }

    /// 요청 전송
    ///
    /// 프로토콜 위반이나 연결 에러가 나면 연결은 반환 시 폐기됩니다.
    pub async fn send_and_receive(&mut self, request: Request) -> DriverResult<PendingResponse> {
        let slot = self
            .slot
            .as_mut()
            .ok_or_else(|| DriverError::closed("Connection already released"))?;
        let result = slot.conn.send_and_receive(request).await;
        if let Err(e) = &result {
            if matches!(e, DriverError::Protocol(_)) || e.is_connection_error() {
                self.broken = true;
            }
        }
        result
    }

    /// 폐기 대상으로 표시
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// 풀로 반환
    pub async fn release(mut self) {
        let slot = self.slot.take();
        let permit = self.permit.take();
        if let Some(slot) = slot {
            self.pool.give_back(slot, self.broken).await;
        }
        // 유휴 목록에 넣은 뒤에 허가를 놓음
        drop(permit);
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id())
            .field("address", &self.pool.address)
            .field("broken", &self.broken)
            .finish()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        // 반환되지 않은 연결은 닫음
        if let Some(slot) = self.slot.take() {
            self.pool.in_use.fetch_sub(1, Ordering::Relaxed);
            let pool = self.pool.clone();
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move { pool.destroy(slot).await });
                }
                Err(_) => {
                    pool.counters.connection_lifetime.record(slot.created_at.elapsed());
                    PoolCounters::inc(&pool.counters.closed);
                }
            }
        }
    }
}

// ============================================================================
// AddressPool - 주소별 풀
// ============================================================================

/// 주소별 풀 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolStatus {
    /// 사용 가능
    Active,
    /// 비활성 (라우팅 테이블에서 제거됨, 반환 연결은 폐기)
    Closed,
}

struct IdleState {
    connections: VecDeque<Slot>,
    status: PoolStatus,
}

/// 한 서버 주소의 연결 풀
pub struct AddressPool {
    address: ServerAddress,
    config: PoolConfig,
    idle: Mutex<IdleState>,
    /// 사용 중(및 생성 중) 연결 수 제한
    semaphore: Arc<Semaphore>,
    /// 비활성화될 때마다 증가, 이전 세대의 연결은 반환 시 폐기
    generation: AtomicU64,
    /// 비활성화 알림 (허가 대기자 깨우기)
    deactivated: Notify,
    in_use: AtomicUsize,
    counters: PoolCounters,
}

impl AddressPool {
    fn new(address: ServerAddress, config: PoolConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_size));
        Self {
            address,
            config,
            idle: Mutex::new(IdleState {
                connections: VecDeque::new(),
                status: PoolStatus::Active,
            }),
            semaphore,
            generation: AtomicU64::new(0),
            deactivated: Notify::new(),
            in_use: AtomicUsize::new(0),
            counters: PoolCounters::default(),
        }
    }

    /// 상태
    pub fn status(&self) -> PoolStatus {
        self.idle.lock().status
    }

    /// 유휴 연결 수
    pub fn idle_count(&self) -> usize {
        self.idle.lock().connections.len()
    }

    /// 사용 중 연결 수
    pub fn in_use_count(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }

    /// 열린 연결 수 (허가를 쥔 연결 + 유휴 연결)
    fn open_count(&self) -> usize {
        let busy = self.config.max_size.saturating_sub(self.semaphore.available_permits());
        busy + self.idle_count()
    }

    /// 허가를 쥔 연결이 하나도 없음
    fn is_drained(&self) -> bool {
        self.semaphore.available_permits() >= self.config.max_size
    }

    /// 비활성 풀 다시 활성화
    fn reactivate(&self) -> bool {
        let mut idle = self.idle.lock();
        if idle.status == PoolStatus::Closed && !self.semaphore.is_closed() {
            idle.status = PoolStatus::Active;
            return true;
        }
        false
    }

    /// 비활성 풀에서의 획득 에러
    ///
    /// 드라이버 종료로 닫힌 경우에만 `Closed`, 라우팅에서 제거된 경우는
    /// 다른 서버로 넘어갈 수 있도록 `ServiceUnavailable`입니다.
    fn inactive_error(&self) -> DriverError {
        if self.semaphore.is_closed() {
            DriverError::closed(format!("Connection pool for {} is closed", self.address))
        } else {
            DriverError::service_unavailable(format!(
                "Failed to acquire a connection to {}: the server has been removed from the routing table",
                self.address
            ))
        }
    }

    /// 재사용 가능한 유휴 연결 꺼내기
    ///
    /// 현재 토큰과 다른 토큰으로 인증된 연결이나 유효하지 않은 연결은 닫습니다.
    async fn take_idle(&self, token: &AuthToken) -> Option<Slot> {
        loop {
            let candidate = {
                let mut idle = self.idle.lock();
                if idle.status != PoolStatus::Active {
                    return None;
                }
                idle.connections.pop_front()?
            };

            if candidate.is_reusable(&self.config, Instant::now()) && &candidate.auth == token {
                return Some(candidate);
            }
            tracing::debug!(address = %self.address, id = candidate.id, "discarding stale idle connection");
            self.destroy(candidate).await;
        }
    }

    /// 반환된 연결 처리
    async fn give_back(&self, mut slot: Slot, broken: bool) {
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        let now = Instant::now();
        let reusable = !broken && slot.is_reusable(&self.config, now);

        let rejected = {
            let mut idle = self.idle.lock();
            if reusable && self.accepts(&idle, &slot) {
                slot.last_used = now;
                idle.connections.push_back(slot);
                None
            } else {
                Some(slot)
            }
        };

        if let Some(slot) = rejected {
            self.destroy(slot).await;
        }
    }

    /// 갓 만든 연결을 유휴 목록에 추가 (사용 중 카운트 변경 없음)
    async fn give_back_fresh(&self, slot: Slot) {
        let rejected = {
            let mut idle = self.idle.lock();
            if self.accepts(&idle, &slot) {
                idle.connections.push_back(slot);
                None
            } else {
                Some(slot)
            }
        };
        if let Some(slot) = rejected {
            self.destroy(slot).await;
        }
    }

    /// 활성 상태이고 같은 세대의 연결만 유휴 목록에 받음
    fn accepts(&self, idle: &IdleState, slot: &Slot) -> bool {
        idle.status == PoolStatus::Active && slot.generation == self.generation.load(Ordering::SeqCst)
    }

    /// 연결 닫기
    async fn destroy(&self, mut slot: Slot) {
        PoolCounters::inc(&self.counters.closing);
        if let Err(e) = slot.conn.close().await {
            tracing::debug!(address = %self.address, id = slot.id, error = %e, "error while closing connection");
        }
        PoolCounters::dec(&self.counters.closing);
        PoolCounters::inc(&self.counters.closed);
        self.counters
            .connection_lifetime
            .record(slot.created_at.elapsed());
    }

    /// 비활성화 후 유휴 연결 모두 닫기
    ///
    /// 사용 중인 연결은 반환될 때 닫히고, 허가를 기다리던 호출자는 깨어나
    /// 에러를 받습니다.
    async fn deactivate(&self) {
        let drained: Vec<Slot> = {
            let mut idle = self.idle.lock();
            idle.status = PoolStatus::Closed;
            self.generation.fetch_add(1, Ordering::SeqCst);
            idle.connections.drain(..).collect()
        };
        self.deactivated.notify_waiters();
        for slot in drained {
            self.destroy(slot).await;
        }
    }

    /// 종료: 더 이상 허가를 내주지 않음
    async fn shutdown(&self) {
        self.semaphore.close();
        self.deactivate().await;
    }

    fn metrics(&self) -> AddressPoolMetrics {
        self.counters
            .snapshot(self.address.to_string(), self.in_use_count(), self.idle_count())
    }
}

impl std::fmt::Debug for AddressPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressPool")
            .field("address", &self.address)
            .field("status", &self.status())
            .field("idle", &self.idle_count())
            .field("in_use", &self.in_use_count())
            .finish()
    }
}

// ============================================================================
// ConnectionPool - 클러스터 연결 풀
// ============================================================================

/// 주소별 풀 모음
pub struct ConnectionPool {
    /// 풀 설정
    config: PoolConfig,
    /// 연결 생성기
    connector: Arc<dyn Connector>,
    /// 인증 토큰 관리자
    auth: Arc<dyn AuthTokenManager>,
    /// 주소별 풀
    pools: RwLock<HashMap<ServerAddress, Arc<AddressPool>>>,
    /// 다음 연결 ID
    next_id: AtomicU64,
    /// 닫힘 여부
    closed: AtomicBool,
}

impl ConnectionPool {
    /// 새 연결 풀 생성
    pub fn new(
        config: PoolConfig,
        connector: Arc<dyn Connector>,
        auth: Arc<dyn AuthTokenManager>,
    ) -> Self {
        Self {
            config,
            connector,
            auth,
            pools: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// 풀 설정
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// 연결 획득
    ///
    /// 유휴 연결이 있으면 재사용하고, 없으면 새로 만듭니다. 사용 중 연결이
    /// `max_size`에 도달하면 `timeout` 동안 기다린 뒤
    /// [`DriverError::AcquisitionTimeout`]으로 실패합니다. 기다리는 동안 주소가
    /// 라우팅 테이블에서 제거되면 [`DriverError::ServiceUnavailable`]입니다.
    pub async fn acquire(
        &self,
        address: &ServerAddress,
        timeout: Duration,
    ) -> DriverResult<PooledConnection> {
        self.ensure_open()?;
        let pool = self.get_or_create_pool(address);

        let started = Instant::now();
        PoolCounters::inc(&pool.counters.acquiring);
        let result = self.acquire_from(&pool, timeout).await;
        PoolCounters::dec(&pool.counters.acquiring);

        if result.is_ok() {
            PoolCounters::inc(&pool.counters.acquired);
            pool.counters.acquisition_time.record(started.elapsed());
        }
        result
    }

    async fn acquire_from(
        &self,
        pool: &Arc<AddressPool>,
        timeout: Duration,
    ) -> DriverResult<PooledConnection> {
        // 상태 확인 전에 등록해야 그 사이의 비활성화 알림을 놓치지 않음
        let deactivated = pool.deactivated.notified();
        if pool.status() != PoolStatus::Active {
            return Err(pool.inactive_error());
        }

        let waited = tokio::time::timeout(timeout, async {
            tokio::select! {
                permit = pool.semaphore.clone().acquire_owned() => {
                    permit.map_err(|_| pool.inactive_error())
                }
                _ = deactivated => Err(pool.inactive_error()),
            }
        })
        .await;
        let permit = match waited {
            Ok(Ok(permit)) => permit,
            Ok(Err(e)) => {
                tracing::debug!(address = %pool.address, error = %e, "connection pool deactivated while waiting");
                return Err(e);
            }
            Err(_) => {
                PoolCounters::inc(&pool.counters.timed_out_to_acquire);
                tracing::debug!(address = %pool.address, ?timeout, "connection acquisition timed out");
                return Err(DriverError::AcquisitionTimeout(timeout));
            }
        };
        if pool.status() != PoolStatus::Active {
            return Err(pool.inactive_error());
        }

        let token = self.auth.get_token().await?;
        let slot = match pool.take_idle(&token).await {
            Some(slot) => slot,
            None => self.create(pool, token).await?,
        };

        pool.in_use.fetch_add(1, Ordering::Relaxed);
        Ok(PooledConnection {
            slot: Some(slot),
            permit: Some(permit),
            pool: pool.clone(),
            broken: false,
        })
    }

    /// 새 연결 생성
    async fn create(&self, pool: &AddressPool, token: AuthToken) -> DriverResult<Slot> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let generation = pool.generation.load(Ordering::SeqCst);
        PoolCounters::inc(&pool.counters.creating);
        let outcome = tokio::time::timeout(
            self.config.connection_timeout,
            self.connector.connect(&pool.address, &token),
        )
        .await;
        PoolCounters::dec(&pool.counters.creating);

        let cause = match outcome {
            Ok(Ok(conn)) => {
                PoolCounters::inc(&pool.counters.created);
                tracing::debug!(address = %pool.address, id, "connection created");
                let now = Instant::now();
                return Ok(Slot {
                    id,
                    conn,
                    auth: token,
                    generation,
                    created_at: now,
                    last_used: now,
                });
            }
            // 인증 실패는 토큰 갱신 경로로 그대로 전달
            Ok(Err(e @ DriverError::Security(_))) => {
                PoolCounters::inc(&pool.counters.failed_to_create);
                return Err(e);
            }
            Ok(Err(e)) => e,
            Err(_) => DriverError::timeout(format!(
                "Connection to {} timed out after {:?}",
                pool.address, self.config.connection_timeout
            )),
        };

        PoolCounters::inc(&pool.counters.failed_to_create);
        tracing::debug!(address = %pool.address, error = %cause, "failed to create connection");
        Err(DriverError::service_unavailable_with(
            format!("Failed to connect to {}", pool.address),
            vec![cause],
        ))
    }

    /// 연결 반환
    pub async fn release(&self, conn: PooledConnection) {
        conn.release().await;
    }

    /// 주소별 풀 가져오기 또는 생성
    ///
    /// 비활성화된 풀이 남아 있으면 같은 풀을 다시 활성화하므로, 아직 반환되지
    /// 않은 이전 연결도 `max_size` 제한에 계속 포함됩니다.
    fn get_or_create_pool(&self, address: &ServerAddress) -> Arc<AddressPool> {
        // 읽기 잠금으로 먼저 확인
        {
            let pools = self.pools.read();
            if let Some(pool) = pools.get(address) {
                if pool.reactivate() {
                    tracing::debug!(%address, "reactivating connection pool");
                }
                return pool.clone();
            }
        }

        // 쓰기 잠금으로 생성
        let mut pools = self.pools.write();
        let pool = pools
            .entry(address.clone())
            .or_insert_with(|| {
                tracing::debug!(%address, "creating connection pool");
                Arc::new(AddressPool::new(address.clone(), self.config.clone()))
            })
            .clone();
        pool.reactivate();
        pool
    }

    /// 주소의 모든 연결 제거
    ///
    /// 유휴 연결은 즉시 닫히고, 사용 중인 연결은 반환될 때 닫힙니다. 사용 중인
    /// 연결이 남아 있는 동안에는 비활성 풀이 유지됩니다.
    pub async fn purge(&self, address: &ServerAddress) {
        let pool = self.pools.read().get(address).cloned();
        if let Some(pool) = pool {
            tracing::info!(%address, in_use = pool.in_use_count(), "purging connection pool");
            pool.deactivate().await;
        }
        self.prune();
    }

    /// 비어 있는 비활성 풀 정리
    fn prune(&self) {
        self.pools.write().retain(|address, pool| {
            let keep = pool.status() == PoolStatus::Active || !pool.is_drained();
            if !keep {
                tracing::debug!(%address, "removing drained connection pool");
            }
            keep
        });
    }

    /// 라우팅 테이블 변경 반영
    ///
    /// 추가된 주소는 풀을 만들거나 다시 활성화하고(설정 시 워밍업), 제거된
    /// 주소는 정리합니다.
    pub async fn update(&self, added: &[ServerAddress], removed: &[ServerAddress]) {
        for address in added {
            self.get_or_create_pool(address);
            if self.config.warmup_on_init {
                if let Err(e) = self.warmup(address, 0).await {
                    tracing::warn!(%address, error = %e, "connection pool warm-up failed");
                }
            }
        }
        for address in removed {
            self.purge(address).await;
        }
        self.prune();
    }

    /// 연결 풀 워밍업
    ///
    /// 지정된 수의 유휴 연결을 미리 만들어 둡니다. `count`가 0이면
    /// `min_idle`을 사용합니다. 사용 중 연결과 유휴 연결을 합쳐 `max_size`를
    /// 넘지 않으며, 빈 허가가 없으면 기다리지 않고 중단합니다.
    ///
    /// # 반환
    ///
    /// - `Ok(usize)`: 새로 생성된 연결 수
    /// - `Err`: 첫 연결부터 실패
    pub async fn warmup(&self, address: &ServerAddress, count: usize) -> DriverResult<usize> {
        self.ensure_open()?;
        let pool = self.get_or_create_pool(address);

        let target = if count > 0 { count } else { self.config.min_idle };
        let target = target.min(self.config.max_size);

        let token = self.auth.get_token().await?;
        let mut created = 0;
        while pool.idle_count() < target {
            let Ok(permit) = pool.semaphore.clone().try_acquire_owned() else {
                break;
            };
            // 방금 받은 허가까지 포함해 열린 연결 수가 한도를 넘으면 중단
            if pool.open_count() > self.config.max_size {
                break;
            }
            match self.create(&pool, token.clone()).await {
                Ok(slot) => {
                    pool.give_back_fresh(slot).await;
                    drop(permit);
                    created += 1;
                }
                Err(e) => {
                    if created == 0 {
                        return Err(e);
                    }
                    tracing::warn!(%address, error = %e, "warm-up connection failed");
                    break;
                }
            }
        }

        Ok(created)
    }

    /// 풀 닫기
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let drained: Vec<Arc<AddressPool>> = self.pools.write().drain().map(|(_, p)| p).collect();
        for pool in drained {
            pool.shutdown().await;
        }
    }

    /// 닫힘 여부
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 활성 풀이 있는 주소 목록
    pub fn addresses(&self) -> Vec<ServerAddress> {
        self.pools
            .read()
            .iter()
            .filter(|(_, p)| p.status() == PoolStatus::Active)
            .map(|(a, _)| a.clone())
            .collect()
    }

    /// 주소별 풀 상태
    pub fn status(&self, address: &ServerAddress) -> Option<PoolStatus> {
        self.pools.read().get(address).map(|p| p.status())
    }

    /// 주소별 사용 중 연결 수
    pub fn in_use(&self, address: &ServerAddress) -> usize {
        self.pools.read().get(address).map_or(0, |p| p.in_use_count())
    }

    /// 주소별 유휴 연결 수
    pub fn idle(&self, address: &ServerAddress) -> usize {
        self.pools.read().get(address).map_or(0, |p| p.idle_count())
    }

    /// 메트릭 조회
    pub fn metrics(&self) -> DriverMetrics {
        let mut pools: Vec<AddressPoolMetrics> =
            self.pools.read().values().map(|p| p.metrics()).collect();
        pools.sort_by(|a, b| a.address.cmp(&b.address));
        DriverMetrics { pools }
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.is_closed() {
            Err(DriverError::closed("Connection pool is closed"))
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("addresses", &self.pools.read().len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

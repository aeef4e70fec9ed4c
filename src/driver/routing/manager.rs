//! 라우팅 테이블 관리자
//!
//! 데이터베이스별 라우팅 테이블 캐시와 조회(discovery) 상태 머신.
//!
//! 캐시 항목은 `Arc<RoutingTable>`을 통째로 교체하므로 읽는 쪽은 절반만 갱신된
//! 테이블을 볼 수 없습니다. 같은 데이터베이스의 갱신은 비동기 뮤텍스로 한 번에
//! 하나만 진행됩니다.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use super::super::driver::ServerAddress;
use super::super::error::{DriverError, DriverResult};
use super::super::pool::ConnectionPool;
use super::super::session::{AccessMode, Bookmark};
use super::discovery::Discovery;
use super::table::RoutingTable;

/// 모든 라우터 조회 실패 시 메시지
const NO_ROUTERS_MESSAGE: &str = "Failed to connect to any routing server. \
    Please make sure that the cluster is up and can be accessed by the driver and retry.";

// ============================================================================
// AddressResolver - 주소 해석기
// ============================================================================

/// 초기 라우터 주소를 여러 주소로 확장하는 사용자 해석기
pub trait AddressResolver: Send + Sync {
    /// 주소 해석
    fn resolve(&self, address: &ServerAddress) -> Vec<ServerAddress>;
}

impl<F> AddressResolver for F
where
    F: Fn(&ServerAddress) -> Vec<ServerAddress> + Send + Sync,
{
    fn resolve(&self, address: &ServerAddress) -> Vec<ServerAddress> {
        self(address)
    }
}

// ============================================================================
// TableEntry - 캐시 항목
// ============================================================================

/// 캐시 항목: 테이블 + 마지막 갱신 이후의 피드백
struct TableEntry {
    table: Arc<RoutingTable>,
    /// 도달 불가로 표시된 주소 (다음 조회까지 건너뜀)
    unreachable: HashSet<ServerAddress>,
    /// 쓰기를 거부한 라이터
    forgotten_writers: HashSet<ServerAddress>,
    /// 리더십 변경으로 강제 만료됨
    forced_stale: bool,
}

impl TableEntry {
    fn new(table: Arc<RoutingTable>) -> Self {
        Self {
            table,
            unreachable: HashSet::new(),
            forgotten_writers: HashSet::new(),
            forced_stale: false,
        }
    }

    fn routers(&self) -> Vec<ServerAddress> {
        self.table
            .routers
            .iter()
            .filter(|a| !self.unreachable.contains(*a))
            .cloned()
            .collect()
    }

    fn servers(&self, mode: AccessMode) -> Vec<ServerAddress> {
        self.table
            .servers(mode)
            .iter()
            .filter(|a| !self.unreachable.contains(*a))
            .filter(|a| mode == AccessMode::Read || !self.forgotten_writers.contains(*a))
            .cloned()
            .collect()
    }

    fn is_stale(&self, mode: AccessMode) -> bool {
        self.forced_stale
            || self.table.is_stale(mode)
            || self.routers().is_empty()
            || self.servers(mode).is_empty()
    }
}

// ============================================================================
// RoutingTableManager - 라우팅 테이블 관리자
// ============================================================================

/// 라우팅 테이블 관리자
pub struct RoutingTableManager {
    /// URI에 지정된 초기 라우터
    initial_routers: Vec<ServerAddress>,
    /// 초기 라우터 해석기
    resolver: Option<Arc<dyn AddressResolver>>,
    /// 연결 풀
    pool: Arc<ConnectionPool>,
    /// 조회기
    discovery: Arc<dyn Discovery>,
    /// 만료 후 캐시에서 제거되기까지의 지연
    purge_delay: Duration,
    /// 데이터베이스별 캐시
    tables: RwLock<HashMap<String, TableEntry>>,
    /// 데이터베이스별 갱신 잠금
    refresh_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl RoutingTableManager {
    /// 새 관리자 생성
    pub fn new(
        initial_routers: Vec<ServerAddress>,
        pool: Arc<ConnectionPool>,
        discovery: Arc<dyn Discovery>,
        purge_delay: Duration,
    ) -> Self {
        Self {
            initial_routers,
            resolver: None,
            pool,
            discovery,
            purge_delay,
            tables: RwLock::new(HashMap::new()),
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    /// 주소 해석기 설정
    pub fn with_resolver(mut self, resolver: Arc<dyn AddressResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// 접근 모드에 쓸 수 있는 라우팅 테이블 확보
    ///
    /// 캐시가 stale이면 반환 전에 조회를 수행합니다. 새로 받은 테이블은 TTL과
    /// 무관하게 한 번 사용됩니다(TTL이 0이어도 조회는 한 번).
    pub async fn ensure_routing_table_for_mode(
        &self,
        mode: AccessMode,
        database: &str,
        bookmarks: &[Bookmark],
        impersonated_user: Option<&str>,
    ) -> DriverResult<Arc<RoutingTable>> {
        if let Some(table) = self.fresh_table(database, mode) {
            return Ok(table);
        }

        let lock = self.refresh_lock(database);
        let _guard = lock.lock().await;

        // 대기하는 동안 다른 호출자가 갱신했을 수 있음
        if let Some(table) = self.fresh_table(database, mode) {
            return Ok(table);
        }

        tracing::debug!(database, %mode, "routing table is stale, starting discovery");
        self.discover(mode, database, bookmarks, impersonated_user).await
    }

    /// 캐시된 테이블 (stale 여부 무관)
    pub fn routing_table(&self, database: &str) -> Option<Arc<RoutingTable>> {
        self.tables.read().get(database).map(|e| e.table.clone())
    }

    /// 선택 가능한 서버 목록 (도달 불가/거부된 주소 제외)
    ///
    /// 캐시 항목이 없으면 `fallback`의 목록을 그대로 사용합니다.
    pub fn servers(&self, database: &str, mode: AccessMode, fallback: &RoutingTable) -> Vec<ServerAddress> {
        match self.tables.read().get(database) {
            Some(entry) => entry.servers(mode),
            None => fallback.servers(mode).to_vec(),
        }
    }

    /// 모든 테이블에서 주소를 도달 불가로 표시
    pub fn forget_server(&self, address: &ServerAddress) {
        let mut tables = self.tables.write();
        for entry in tables.values_mut() {
            if entry.table.all().contains(address) {
                entry.unreachable.insert(address.clone());
            }
        }
    }

    /// 쓰기를 거부한 라이터 제외 및 테이블 강제 만료
    pub fn forget_writer(&self, address: &ServerAddress, database: &str) {
        if let Some(entry) = self.tables.write().get_mut(database) {
            tracing::info!(%address, database, "writer lost leadership, forcing routing table refresh");
            entry.forgotten_writers.insert(address.clone());
            entry.forced_stale = true;
        }
    }

    /// 캐시된 데이터베이스 목록
    pub fn databases(&self) -> Vec<String> {
        self.tables.read().keys().cloned().collect()
    }

    /// 캐시 비우기
    pub fn clear(&self) {
        let databases: Vec<String> = self.tables.write().drain().map(|(db, _)| db).collect();
        self.release_refresh_locks(&databases);
    }

    /// stale이 아닌 테이블
    fn fresh_table(&self, database: &str, mode: AccessMode) -> Option<Arc<RoutingTable>> {
        let tables = self.tables.read();
        let entry = tables.get(database)?;
        (!entry.is_stale(mode)).then(|| entry.table.clone())
    }

    fn refresh_lock(&self, database: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.refresh_locks
            .lock()
            .entry(database.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// 제거된 데이터베이스의 갱신 락 정리 (대기 중인 호출자가 있으면 유지)
    fn release_refresh_locks(&self, databases: &[String]) {
        if databases.is_empty() {
            return;
        }
        self.refresh_locks
            .lock()
            .retain(|db, lock| !databases.contains(db) || Arc::strong_count(lock) > 1);
    }

    /// 초기 라우터 (해석기 적용)
    ///
    /// 해석 결과가 비어 있으면 원래 주소를 그대로 사용합니다.
    fn initial_routers(&self) -> Vec<ServerAddress> {
        let Some(resolver) = &self.resolver else {
            return self.initial_routers.clone();
        };
        self.initial_routers
            .iter()
            .flat_map(|address| {
                let resolved = resolver.resolve(address);
                if resolved.is_empty() {
                    vec![address.clone()]
                } else {
                    resolved
                }
            })
            .collect()
    }

    /// 라우터 조회 순서 결정 후 차례로 시도
    ///
    /// 기존 라우터를 먼저, 그 다음 아직 시도하지 않은 초기 라우터를 시도합니다.
    /// 라이터 없이 리더만 있던 테이블에서 읽기를 요청하면 초기 라우터를 앞에 둡니다.
    async fn discover(
        &self,
        mode: AccessMode,
        database: &str,
        bookmarks: &[Bookmark],
        impersonated_user: Option<&str>,
    ) -> DriverResult<Arc<RoutingTable>> {
        let (known, prepend_initial) = {
            let tables = self.tables.read();
            match tables.get(database) {
                Some(entry) => (
                    entry.routers(),
                    mode == AccessMode::Read && entry.table.has_readers() && !entry.table.has_writers(),
                ),
                None => (Vec::new(), false),
            }
        };

        let mut candidates = RoutingTable::with_initial_routers(database, known);
        let initial = self.initial_routers();
        if prepend_initial {
            candidates.prepend_routers(&initial);
        } else {
            let mut ordered = candidates.routers.clone();
            for address in initial {
                if !ordered.contains(&address) {
                    ordered.push(address);
                }
            }
            candidates = RoutingTable::with_initial_routers(database, ordered);
        }

        let mut causes = Vec::new();
        let mut without_writers = None;
        for router in &candidates.routers {
            match self.fetch_from(router, database, bookmarks, impersonated_user).await {
                Ok(table) if mode == AccessMode::Write && !table.has_writers() => {
                    tracing::debug!(%router, database, "routing table has no writers, trying next router");
                    without_writers = Some(table);
                }
                Ok(table) => return Ok(self.install(database, table).await),
                Err(e) if is_fatal_discovery_error(&e) => {
                    if matches!(e, DriverError::Security(_)) {
                        tracing::error!(%router, database, error = %e, "security error during discovery");
                    }
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(%router, database, error = %e, "failed to fetch routing table");
                    self.forget_server(router);
                    self.pool.purge(router).await;
                    causes.push(e);
                }
            }
        }

        if let Some(table) = without_writers {
            // 읽기용으로는 유효하므로 캐시에 반영
            self.install(database, table).await;
            return Err(DriverError::service_unavailable_with(
                format!("No writers available for database '{}'", database),
                causes,
            ));
        }

        Err(DriverError::service_unavailable_with(NO_ROUTERS_MESSAGE, causes))
    }

    /// 라우터 하나에서 테이블 조회
    async fn fetch_from(
        &self,
        router: &ServerAddress,
        database: &str,
        bookmarks: &[Bookmark],
        impersonated_user: Option<&str>,
    ) -> DriverResult<RoutingTable> {
        let timeout = self.pool.config().acquisition_timeout;
        let mut conn = self.pool.acquire(router, timeout).await?;
        let result = self
            .discovery
            .discover(&mut conn, database, bookmarks, impersonated_user)
            .await;
        conn.release().await;
        result
    }

    /// 새 테이블 설치, 오래된 테이블 제거, 풀 갱신
    async fn install(&self, database: &str, table: RoutingTable) -> Arc<RoutingTable> {
        let table = Arc::new(table);
        let (added, removed, purged) = {
            let mut tables = self.tables.write();
            let before = all_addresses(&tables);
            tables.insert(database.to_string(), TableEntry::new(table.clone()));

            let delay = self.purge_delay;
            let aged: Vec<String> = tables
                .iter()
                .filter(|(db, e)| db.as_str() != database && e.table.is_expired_for(delay))
                .map(|(db, _)| db.clone())
                .collect();
            for db in &aged {
                tables.remove(db);
            }

            let after = all_addresses(&tables);
            let added: Vec<ServerAddress> = after.difference(&before).cloned().collect();
            let removed: Vec<ServerAddress> = before.difference(&after).cloned().collect();
            (added, removed, aged)
        };

        tracing::info!(
            database,
            routers = ?table.routers,
            readers = ?table.readers,
            writers = ?table.writers,
            ttl = ?table.ttl,
            "routing table updated"
        );
        if !purged.is_empty() {
            tracing::info!(databases = ?purged, "purged aged routing tables");
            self.release_refresh_locks(&purged);
        }

        self.pool.update(&added, &removed).await;
        table
    }
}

impl std::fmt::Debug for RoutingTableManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingTableManager")
            .field("initial_routers", &self.initial_routers)
            .field("databases", &self.databases())
            .finish()
    }
}

fn all_addresses(tables: &HashMap<String, TableEntry>) -> HashSet<ServerAddress> {
    tables.values().flat_map(|e| e.table.all()).collect()
}

/// 다른 라우터를 시도하지 않고 즉시 전파할 에러
fn is_fatal_discovery_error(err: &DriverError) -> bool {
    match err {
        DriverError::Security(_) | DriverError::Closed(_) | DriverError::Configuration(_) => true,
        DriverError::Client(_) => !err.is_cluster_error(),
        _ => false,
    }
}

// ============================================================================
// Tests
// ============================================================================

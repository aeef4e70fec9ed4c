//! 라우팅 테이블
//!
//! 데이터베이스별 서버 역할 목록과 만료 시각을 관리합니다.
//! 테이블은 불변이며 갱신 시 통째로 교체됩니다.

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::Instant;

use super::super::driver::ServerAddress;
use super::super::session::AccessMode;

/// 서버 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerRole {
    /// 라우팅 테이블 제공자
    Route,
    /// 쓰기 트랜잭션 처리 (리더)
    Write,
    /// 읽기 트랜잭션 처리 (팔로워)
    Read,
}

impl ServerRole {
    /// 문자열에서 역할 파싱
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "ROUTE" => Some(Self::Route),
            "WRITE" => Some(Self::Write),
            "READ" => Some(Self::Read),
            _ => None,
        }
    }

    /// 역할을 문자열로 변환
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Route => "ROUTE",
            Self::Write => "WRITE",
            Self::Read => "READ",
        }
    }
}

/// 라우팅 테이블
#[derive(Debug, Clone, PartialEq)]
pub struct RoutingTable {
    /// 데이터베이스 이름 (빈 문자열은 홈 데이터베이스)
    pub database: String,
    /// 라우터 목록 (라우팅 테이블 조회용)
    pub routers: Vec<ServerAddress>,
    /// 리더 목록 (읽기 트랜잭션용)
    pub readers: Vec<ServerAddress>,
    /// 라이터 목록 (쓰기 트랜잭션용)
    pub writers: Vec<ServerAddress>,
    /// TTL
    pub ttl: Duration,
    /// 만료 시각
    pub expires_at: Instant,
}

impl RoutingTable {
    /// 새 라우팅 테이블 생성 (지금부터 `ttl` 후 만료)
    pub fn new(
        database: impl Into<String>,
        routers: Vec<ServerAddress>,
        readers: Vec<ServerAddress>,
        writers: Vec<ServerAddress>,
        ttl: Duration,
    ) -> Self {
        let now = Instant::now();
        // 지나치게 큰 TTL은 1년으로 제한
        let expires_at = now
            .checked_add(ttl)
            .unwrap_or_else(|| now + Duration::from_secs(365 * 24 * 3600));
        Self {
            database: database.into(),
            routers: dedup(routers),
            readers: dedup(readers),
            writers: dedup(writers),
            ttl,
            expires_at,
        }
    }

    /// 초기 라우터로 테이블 생성 (이미 만료됨)
    pub fn with_initial_routers(database: impl Into<String>, routers: Vec<ServerAddress>) -> Self {
        Self::new(database, routers, Vec::new(), Vec::new(), Duration::ZERO)
    }

    /// 접근 모드에 해당하는 서버 목록
    pub fn servers(&self, mode: AccessMode) -> &[ServerAddress] {
        match mode {
            AccessMode::Read => &self.readers,
            AccessMode::Write => &self.writers,
        }
    }

    /// 만료 여부
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// 접근 모드 기준 갱신 필요 여부
    ///
    /// 만료되었거나, 라우터가 없거나, 요청한 역할의 서버가 없으면 stale입니다.
    pub fn is_stale(&self, mode: AccessMode) -> bool {
        self.is_expired() || self.routers.is_empty() || self.servers(mode).is_empty()
    }

    /// 만료 후 `delay`가 더 지났는지 확인 (캐시에서 제거 대상)
    pub fn is_expired_for(&self, delay: Duration) -> bool {
        match self.expires_at.checked_add(delay) {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    /// 쓰기 가능한 서버가 있는지 확인
    pub fn has_writers(&self) -> bool {
        !self.writers.is_empty()
    }

    /// 읽기 가능한 서버가 있는지 확인
    pub fn has_readers(&self) -> bool {
        !self.readers.is_empty()
    }

    /// 모든 서버 주소
    pub fn all(&self) -> HashSet<ServerAddress> {
        self.routers
            .iter()
            .chain(&self.readers)
            .chain(&self.writers)
            .cloned()
            .collect()
    }

    /// 라우터를 앞쪽에 추가 (중복 제외)
    pub fn prepend_routers(&mut self, routers: &[ServerAddress]) {
        let mut merged: Vec<ServerAddress> = routers.to_vec();
        merged.extend(self.routers.iter().cloned());
        self.routers = dedup(merged);
    }
}

fn dedup(addresses: Vec<ServerAddress>) -> Vec<ServerAddress> {
    let mut seen = HashSet::new();
    addresses
        .into_iter()
        .filter(|a| seen.insert(a.clone()))
        .collect()
}

//! 라우팅 정책
//!
//! 서버 선택 전략을 정의합니다.

use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;

use super::super::driver::ServerAddress;
use super::super::session::AccessMode;

/// 라우팅 정책
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RoutingPolicy {
    /// 라운드 로빈 (기본값)
    #[default]
    RoundRobin,
    /// 최소 연결 (라운드 로빈 시작점에서 사용 중 연결이 가장 적은 서버)
    LeastConnected,
    /// 랜덤
    Random,
}

/// 서버 선택기
///
/// 읽기와 쓰기에 각각 별도의 라운드 로빈 인덱스를 사용합니다.
#[derive(Debug)]
pub struct ServerSelector {
    /// 라우팅 정책
    policy: RoutingPolicy,
    /// 리더 라운드 로빈 인덱스
    readers_index: AtomicUsize,
    /// 라이터 라운드 로빈 인덱스
    writers_index: AtomicUsize,
}

impl ServerSelector {
    /// 새 선택기 생성
    pub fn new(policy: RoutingPolicy) -> Self {
        Self {
            policy,
            readers_index: AtomicUsize::new(0),
            writers_index: AtomicUsize::new(0),
        }
    }

    /// 기본 선택기 (라운드 로빈)
    pub fn round_robin() -> Self {
        Self::new(RoutingPolicy::RoundRobin)
    }

    /// 현재 정책 조회
    pub fn policy(&self) -> RoutingPolicy {
        self.policy
    }

    /// 서버 목록에서 하나 선택
    ///
    /// `in_use`는 주소별 사용 중 연결 수로, `LeastConnected`에서만 사용됩니다.
    pub fn select<'a>(
        &self,
        mode: AccessMode,
        servers: &'a [ServerAddress],
        in_use: impl Fn(&ServerAddress) -> usize,
    ) -> Option<&'a ServerAddress> {
        if servers.is_empty() {
            return None;
        }

        let index = match mode {
            AccessMode::Read => &self.readers_index,
            AccessMode::Write => &self.writers_index,
        };

        match self.policy {
            RoutingPolicy::RoundRobin => {
                let i = index.fetch_add(1, Ordering::Relaxed);
                Some(&servers[i % servers.len()])
            }
            RoutingPolicy::Random => {
                let i = rand::thread_rng().gen_range(0..servers.len());
                Some(&servers[i])
            }
            RoutingPolicy::LeastConnected => {
                let start = index.fetch_add(1, Ordering::Relaxed) % servers.len();
                // 시작점부터 순회하며 동률이면 먼저 만난 서버
                (0..servers.len())
                    .map(|offset| &servers[(start + offset) % servers.len()])
                    .min_by_key(|s| in_use(*s))
            }
        }
    }

    /// 인덱스 리셋
    pub fn reset(&self) {
        self.readers_index.store(0, Ordering::Relaxed);
        self.writers_index.store(0, Ordering::Relaxed);
    }
}

impl Default for ServerSelector {
    fn default() -> Self {
        Self::round_robin()
    }
}

//! Auth Tokens
//!
//! 인증 토큰 및 토큰 수명 관리 (단일 실행 갱신)

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::error::{codes, DriverError, DriverResult};

// ============================================================================
// AuthToken - 인증 토큰
// ============================================================================

/// 인증 토큰
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthToken {
    /// 인증 없음
    #[default]
    None,
    /// Basic 인증 (사용자명/비밀번호)
    Basic {
        username: String,
        password: String,
        realm: Option<String>,
    },
    /// Bearer 토큰
    Bearer { token: String },
    /// Kerberos 인증
    Kerberos { ticket: String },
    /// 커스텀 인증
    Custom {
        principal: String,
        credentials: String,
        realm: String,
        scheme: String,
        parameters: Option<HashMap<String, String>>,
    },
}

impl AuthToken {
    /// Basic 인증 토큰 생성
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
            realm: None,
        }
    }

    /// Basic 인증 토큰 생성 (realm 포함)
    pub fn basic_with_realm(
        username: impl Into<String>,
        password: impl Into<String>,
        realm: impl Into<String>,
    ) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
            realm: Some(realm.into()),
        }
    }

    /// Bearer 토큰 생성
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer {
            token: token.into(),
        }
    }

    /// Kerberos 토큰 생성
    pub fn kerberos(ticket: impl Into<String>) -> Self {
        Self::Kerberos {
            ticket: ticket.into(),
        }
    }

    /// 커스텀 토큰 생성
    pub fn custom(
        principal: impl Into<String>,
        credentials: impl Into<String>,
        realm: impl Into<String>,
        scheme: impl Into<String>,
        parameters: Option<HashMap<String, String>>,
    ) -> Self {
        Self::Custom {
            principal: principal.into(),
            credentials: credentials.into(),
            realm: realm.into(),
            scheme: scheme.into(),
            parameters,
        }
    }

    /// 인증 없음
    pub fn none() -> Self {
        Self::None
    }

    /// 인증 스킴
    pub fn scheme(&self) -> &str {
        match self {
            Self::None => "none",
            Self::Basic { .. } => "basic",
            Self::Bearer { .. } => "bearer",
            Self::Kerberos { .. } => "kerberos",
            Self::Custom { scheme, .. } => scheme,
        }
    }
}

// ============================================================================
// AuthTokenAndExpiration - 토큰 + 만료 시각
// ============================================================================

/// 토큰과 만료 시각 (갱신 시 통째로 교체)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthTokenAndExpiration {
    /// 인증 토큰
    pub token: AuthToken,
    /// 만료 시각 (`None`이면 만료되지 않음)
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthTokenAndExpiration {
    /// 만료 시각이 있는 토큰
    pub fn new(token: AuthToken, expires_at: DateTime<Utc>) -> Self {
        Self {
            token,
            expires_at: Some(expires_at),
        }
    }

    /// 만료되지 않는 토큰
    pub fn never_expires(token: AuthToken) -> Self {
        Self {
            token,
            expires_at: None,
        }
    }

    /// `now` 시점에 유효한지 확인
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires_at| now < expires_at)
    }
}

// ============================================================================
// Clock - 시계
// ============================================================================

/// 현재 시각 공급자
pub trait Clock: Send + Sync {
    /// 현재 UTC 시각
    fn now(&self) -> DateTime<Utc>;
}

/// 시스템 시계
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ============================================================================
// AuthTokenProvider - 토큰 공급자
// ============================================================================

/// 새 토큰을 가져오는 콜백
#[async_trait]
pub trait AuthTokenProvider: Send + Sync {
    /// 새 토큰 + 만료 시각 조회
    async fn fetch(&self) -> DriverResult<AuthTokenAndExpiration>;
}

#[async_trait]
impl<F, Fut> AuthTokenProvider for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DriverResult<AuthTokenAndExpiration>> + Send + 'static,
{
    async fn fetch(&self) -> DriverResult<AuthTokenAndExpiration> {
        (self)().await
    }
}

// ============================================================================
// AuthTokenManager - 토큰 관리자
// ============================================================================

/// 연결 인증에 사용할 토큰 관리자
#[async_trait]
pub trait AuthTokenManager: Send + Sync {
    /// 현재 유효한 토큰 조회
    async fn get_token(&self) -> DriverResult<AuthToken>;

    /// 보안 에러 처리
    ///
    /// `token`으로 인증한 연결이 `error`를 받았을 때 호출됩니다.
    /// 토큰을 갱신했으면 `true`를 반환하며, 호출자는 한 번 더 시도할 수 있습니다.
    async fn handle_security_exception(&self, token: &AuthToken, error: &DriverError) -> bool;
}

/// 고정 토큰 관리자 (에러를 처리하지 않음)
#[derive(Debug, Clone)]
pub struct StaticAuthTokenManager {
    token: AuthToken,
}

impl StaticAuthTokenManager {
    /// 새 관리자 생성
    pub fn new(token: AuthToken) -> Self {
        Self { token }
    }
}

#[async_trait]
impl AuthTokenManager for StaticAuthTokenManager {
    async fn get_token(&self) -> DriverResult<AuthToken> {
        Ok(self.token.clone())
    }

    async fn handle_security_exception(&self, _token: &AuthToken, _error: &DriverError) -> bool {
        false
    }
}

/// 만료 기반 토큰 관리자
///
/// 캐시된 토큰이 만료되었거나 처리 대상 보안 에러가 보고되면 공급자를 호출합니다.
/// 캐시는 하나의 비동기 뮤텍스로 보호되어 동시에 최대 한 번의 조회만 진행되며,
/// 대기하던 호출자들은 새로 캐시된 토큰을 그대로 받습니다.
pub struct ExpirationBasedAuthTokenManager {
    provider: Arc<dyn AuthTokenProvider>,
    clock: Arc<dyn Clock>,
    handled_codes: Vec<&'static str>,
    current: Mutex<Option<AuthTokenAndExpiration>>,
}

impl ExpirationBasedAuthTokenManager {
    /// 처리할 에러 코드 목록을 지정하여 생성
    pub fn new(
        provider: impl AuthTokenProvider + 'static,
        handled_codes: impl IntoIterator<Item = &'static str>,
    ) -> Self {
        Self {
            provider: Arc::new(provider),
            clock: Arc::new(SystemClock),
            handled_codes: handled_codes.into_iter().collect(),
            current: Mutex::new(None),
        }
    }

    /// Basic 인증용 (`Unauthorized` 처리)
    pub fn basic(provider: impl AuthTokenProvider + 'static) -> Self {
        Self::new(provider, [codes::UNAUTHORIZED])
    }

    /// Bearer 인증용 (`TokenExpired`, `Unauthorized` 처리)
    pub fn bearer(provider: impl AuthTokenProvider + 'static) -> Self {
        Self::new(provider, [codes::TOKEN_EXPIRED, codes::UNAUTHORIZED])
    }

    /// 시계 교체
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// 처리 대상 에러인지 확인
    fn handles(&self, error: &DriverError) -> bool {
        match error {
            DriverError::Security(e) => self.handled_codes.iter().any(|c| *c == e.code),
            _ => false,
        }
    }

    /// 공급자 호출 후 캐시 (락 보유 상태에서 호출)
    async fn refresh(&self, current: &mut Option<AuthTokenAndExpiration>) -> DriverResult<AuthToken> {
        let fresh = self.provider.fetch().await?;
        tracing::debug!(scheme = fresh.token.scheme(), expires_at = ?fresh.expires_at, "auth token refreshed");
        let token = fresh.token.clone();
        *current = Some(fresh);
        Ok(token)
    }
}

#[async_trait]
impl AuthTokenManager for ExpirationBasedAuthTokenManager {
    async fn get_token(&self) -> DriverResult<AuthToken> {
        let mut current = self.current.lock().await;
        if let Some(cached) = current.as_ref() {
            if cached.is_valid_at(self.clock.now()) {
                return Ok(cached.token.clone());
            }
        }
        self.refresh(&mut current).await
    }

    async fn handle_security_exception(&self, token: &AuthToken, error: &DriverError) -> bool {
        if !self.handles(error) {
            return false;
        }

        let mut current = self.current.lock().await;
        let is_current = current.as_ref().map_or(false, |c| &c.token == token);
        if !is_current {
            // 이미 다른 호출자가 갱신함
            return false;
        }

        match self.refresh(&mut current).await {
            Ok(_) => true,
            Err(e) => {
                // 갱신하지 못했으면 재시도하지 않음
                tracing::warn!(error = %e, "auth token refresh failed");
                false
            }
        }
    }
}

impl fmt::Debug for ExpirationBasedAuthTokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpirationBasedAuthTokenManager")
            .field("handled_codes", &self.handled_codes)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::error::ServerError;
    use crate::driver::test_support::FakeClock;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 2, 28, hour, 0, 0).unwrap()
    }

    fn first() -> AuthTokenAndExpiration {
        AuthTokenAndExpiration::new(AuthToken::basic("first", "token"), at(15))
    }

    fn second() -> AuthTokenAndExpiration {
        AuthTokenAndExpiration::new(AuthToken::basic("second", "token"), at(16))
    }

    fn security(code: &str) -> DriverError {
        DriverError::Security(ServerError::new(code, "auth"))
    }

    /// 호출마다 순서대로 토큰을 반환하는 공급자
    fn sequence(
        tokens: Vec<AuthTokenAndExpiration>,
        calls: Arc<AtomicUsize>,
    ) -> impl AuthTokenProvider {
        let tokens = Arc::new(tokens);
        move || {
            let tokens = tokens.clone();
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                tokens
                    .get(n)
                    .cloned()
                    .ok_or_else(|| DriverError::configuration("provider exhausted"))
            }
        }
    }

    #[test]
    fn test_auth_token_basic() {
        let auth = AuthToken::basic("neo4j", "password");
        assert_eq!(auth.scheme(), "basic");

        if let AuthToken::Basic { username, password, realm } = auth {
            assert_eq!(username, "neo4j");
            assert_eq!(password, "password");
            assert!(realm.is_none());
        } else {
            panic!("Expected Basic auth");
        }
    }

    #[test]
    fn test_auth_token_schemes() {
        assert_eq!(AuthToken::none().scheme(), "none");
        assert_eq!(AuthToken::bearer("t").scheme(), "bearer");
        assert_eq!(AuthToken::kerberos("k").scheme(), "kerberos");
        assert_eq!(AuthToken::custom("p", "c", "r", "saml", None).scheme(), "saml");
        assert_ne!(AuthToken::basic("a", "b"), AuthToken::basic("a", "c"));
    }

    #[test]
    fn test_expiration() {
        let data = first();
        assert!(data.is_valid_at(at(10)));
        assert!(!data.is_valid_at(at(15)));
        assert!(AuthTokenAndExpiration::never_expires(AuthToken::none()).is_valid_at(at(23)));
    }

    #[tokio::test]
    async fn test_static_manager() {
        let manager = StaticAuthTokenManager::new(AuthToken::bearer("fixed"));
        assert_eq!(manager.get_token().await.unwrap(), AuthToken::bearer("fixed"));
        assert!(
            !manager
                .handle_security_exception(&AuthToken::bearer("fixed"), &security(codes::TOKEN_EXPIRED))
                .await
        );
    }

    #[tokio::test]
    async fn test_caches_token() {
        let calls = Arc::new(AtomicUsize::new(0));
        let manager = ExpirationBasedAuthTokenManager::bearer(sequence(vec![first(), second()], calls.clone()))
            .with_clock(Arc::new(FakeClock::new(at(10))));

        let a = manager.get_token().await.unwrap();
        let b = manager.get_token().await.unwrap();
        assert_eq!(a, first().token);
        assert_eq!(b, first().token);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_get_token_single_flight() {
        let calls = Arc::new(AtomicUsize::new(0));
        let manager = Arc::new(
            ExpirationBasedAuthTokenManager::bearer(sequence(vec![first(), second()], calls.clone()))
                .with_clock(Arc::new(FakeClock::new(at(10)))),
        );

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.get_token().await })
            })
            .collect();

        for task in futures::future::join_all(tasks).await {
            assert_eq!(task.unwrap().unwrap(), first().token);
        }
        // 동시 호출 16번에 공급자는 한 번만 호출
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_renews_after_expiry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let clock = Arc::new(FakeClock::new(at(10)));
        let manager = ExpirationBasedAuthTokenManager::basic(sequence(vec![first(), second()], calls.clone()))
            .with_clock(clock.clone());

        assert_eq!(manager.get_token().await.unwrap(), first().token);
        clock.set(at(15));
        assert_eq!(manager.get_token().await.unwrap(), second().token);
        assert_eq!(manager.get_token().await.unwrap(), second().token);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_handle_security_exception_refreshes_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let manager = ExpirationBasedAuthTokenManager::bearer(sequence(vec![first(), second()], calls.clone()))
            .with_clock(Arc::new(FakeClock::new(at(9))));

        let token = manager.get_token().await.unwrap();
        assert!(manager.handle_security_exception(&token, &security(codes::TOKEN_EXPIRED)).await);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // 같은 (이미 교체된) 토큰으로 다시 보고해도 갱신하지 않음
        assert!(!manager.handle_security_exception(&token, &security(codes::TOKEN_EXPIRED)).await);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert_eq!(manager.get_token().await.unwrap(), second().token);
    }

    #[tokio::test]
    async fn test_ignores_unhandled_errors() {
        let calls = Arc::new(AtomicUsize::new(0));
        let manager = ExpirationBasedAuthTokenManager::basic(sequence(vec![first(), second()], calls.clone()))
            .with_clock(Arc::new(FakeClock::new(at(9))));

        let token = manager.get_token().await.unwrap();
        // basic은 TokenExpired를 처리하지 않음
        assert!(!manager.handle_security_exception(&token, &security(codes::TOKEN_EXPIRED)).await);
        assert!(!manager.handle_security_exception(&token, &DriverError::connection("x")).await);
        assert_eq!(manager.get_token().await.unwrap(), first().token);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_on_security_error_is_not_handled() {
        let calls = Arc::new(AtomicUsize::new(0));
        let manager = ExpirationBasedAuthTokenManager::bearer(sequence(vec![first()], calls.clone()))
            .with_clock(Arc::new(FakeClock::new(at(9))));

        let token = manager.get_token().await.unwrap();
        assert!(!manager.handle_security_exception(&token, &security(codes::TOKEN_EXPIRED)).await);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // 캐시는 그대로
        assert_eq!(manager.get_token().await.unwrap(), first().token);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_provider_failure_is_not_cached() {
        let calls = Arc::new(AtomicUsize::new(0));
        let manager = ExpirationBasedAuthTokenManager::bearer(sequence(vec![], calls.clone()));

        assert!(matches!(manager.get_token().await, Err(DriverError::Configuration(_))));
        assert!(manager.get_token().await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}

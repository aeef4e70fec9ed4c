//! Retry Executor
//!
//! 지수 백오프 재시도
//!
//! 실패는 [`classify`]로 분류합니다. 재시도 가능한 실패는 최소 한 번은 다시
//! 시도하며(총 2회 이상), 이후에는 경과 시간이 `max_retry_time` 미만인 동안
//! 계속 시도합니다. 치명적인 에러는 첫 발생에서 그대로 전파됩니다.

use std::future::Future;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use rand::Rng;
use tokio::time::Instant;

use super::error::{classify, DriverError, DriverResult, ErrorKind};

// ============================================================================
// RetryConfig - 재시도 설정
// ============================================================================

/// 재시도 설정
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// 최대 재시도 시간
    pub max_retry_time: Duration,
    /// 첫 재시도 지연
    pub initial_delay: Duration,
    /// 지연 배수
    pub multiplier: f64,
    /// 지터 비율 (0.0 ~ 1.0)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retry_time: Duration::from_secs(30),
            initial_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl RetryConfig {
    /// 설정 검증
    pub fn validate(&self) -> DriverResult<()> {
        if !(self.multiplier > 0.0) {
            return Err(DriverError::configuration(format!(
                "Retry delay multiplier must be positive, got {}",
                self.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(DriverError::configuration(format!(
                "Retry delay jitter factor must be in [0, 1], got {}",
                self.jitter
            )));
        }
        Ok(())
    }

    /// `attempt`번째 실패 후 지연 (지터 적용 전)
    fn base_delay(&self, attempt: u32) -> f64 {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent)
    }

    /// 지터를 적용한 지연: `delay - jitter + 2 * jitter * random`
    fn delay(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        let jitter = base * self.jitter;
        let delayed = base - jitter + 2.0 * jitter * rand::thread_rng().gen::<f64>();
        Duration::try_from_secs_f64(delayed.max(0.0)).unwrap_or(self.max_retry_time)
    }
}

// ============================================================================
// RetryState - 한 호출의 재시도 상태
// ============================================================================

/// 한 번의 재시도 호출 동안만 존재하는 상태
pub(crate) struct RetryState<'a> {
    config: &'a RetryConfig,
    attempt: u32,
    errors: Vec<DriverError>,
    started: Instant,
    reauthenticated: bool,
}

impl<'a> RetryState<'a> {
    pub(crate) fn new(config: &'a RetryConfig) -> Self {
        Self {
            config,
            attempt: 1,
            errors: Vec::new(),
            started: Instant::now(),
            reauthenticated: false,
        }
    }

    /// 현재 시도 번호 (1부터)
    pub(crate) fn attempt(&self) -> u32 {
        self.attempt
    }

    /// 토큰 갱신을 시도해 볼 에러인지
    pub(crate) fn wants_reauth(&self, err: &DriverError) -> bool {
        !self.reauthenticated && classify(err) == ErrorKind::NeedsReauth
    }

    /// 실패 처리
    ///
    /// 다시 시도해야 하면 대기할 지연을, 아니면 호출자에게 돌려줄 에러를 반환합니다.
    /// `refreshed`는 인증 관리자가 이 에러로 토큰을 갱신했는지 여부입니다.
    pub(crate) fn on_failure(&mut self, err: DriverError, refreshed: bool) -> Result<Duration, DriverError> {
        match classify(&err) {
            ErrorKind::Fatal => Err(err),
            ErrorKind::NeedsReauth => {
                if !refreshed || self.reauthenticated {
                    return Err(err);
                }
                // 토큰 갱신 후 한 번만 즉시 재시도
                tracing::debug!(attempt = self.attempt, error = %err, "auth token refreshed, retrying immediately");
                self.reauthenticated = true;
                self.errors.push(err);
                self.attempt += 1;
                Ok(Duration::ZERO)
            }
            ErrorKind::Retryable => {
                let elapsed = self.started.elapsed();
                if self.attempt >= 2 && elapsed >= self.config.max_retry_time {
                    self.errors.push(err);
                    return Err(self.exhausted(elapsed));
                }
                let delay = self.config.delay(self.attempt);
                tracing::warn!(
                    attempt = self.attempt,
                    ?delay,
                    error = %err,
                    "transaction failed and will be retried"
                );
                self.errors.push(err);
                self.attempt += 1;
                Ok(delay)
            }
        }
    }

    fn exhausted(&mut self, elapsed: Duration) -> DriverError {
        DriverError::service_unavailable_with(
            format!(
                "Failed after retried for {} times in {} ms. \
                 Make sure that your database is online and retry again.",
                self.attempt,
                elapsed.as_millis()
            ),
            std::mem::take(&mut self.errors),
        )
    }
}

// ============================================================================
// RetryExecutor - 재시도 실행기
// ============================================================================

/// 재시도 실행기
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// 새 실행기 생성
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// 설정
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// 작업을 재시도와 함께 실행
    ///
    /// # 예시
    ///
    /// ```rust,ignore
    /// let executor = RetryExecutor::new(RetryConfig::default());
    /// let value = executor.retry(|| async { Ok::<_, DriverError>(42) }).await?;
    /// ```
    pub async fn retry<T, F, Fut>(&self, work: F) -> DriverResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        self.retry_with_reauth(work, |_| async { false }.boxed()).await
    }

    /// 토큰 갱신 훅과 함께 실행
    ///
    /// 작업이 `NeedsReauth` 에러로 실패하면 `reauth`를 호출하고, 갱신되었다면
    /// 대기 없이 한 번 더 시도합니다.
    pub async fn retry_with_reauth<T, F, Fut, H>(&self, mut work: F, mut reauth: H) -> DriverResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DriverResult<T>>,
        H: for<'e> FnMut(&'e DriverError) -> BoxFuture<'e, bool>,
    {
        let mut state = RetryState::new(&self.config);
        loop {
            let err = match work().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };
            let refreshed = state.wants_reauth(&err) && reauth(&err).await;
            let delay = state.on_failure(err, refreshed)?;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

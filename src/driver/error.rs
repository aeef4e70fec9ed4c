//! Driver Error Types
//!
//! 드라이버 에러 정의 및 재시도 분류

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

// ============================================================================
// DriverError - 드라이버 에러
// ============================================================================

/// 드라이버 에러
#[derive(Error, Debug)]
pub enum DriverError {
    /// 서비스 불가 (도달 가능한 서버/라우터 없음)
    #[error("Service unavailable: {message}")]
    ServiceUnavailable {
        /// 에러 메시지
        message: String,
        /// 누적된 내부 원인
        causes: Vec<DriverError>,
    },

    /// 세션 만료 (리더십 상실, 사용 중 연결 끊김)
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// 트랜지언트 서버 에러
    #[error("Transient error: {0}")]
    Transient(ServerError),

    /// 클라이언트 에러 (재시도 불가)
    #[error("Client error: {0}")]
    Client(ServerError),

    /// 데이터베이스 에러
    #[error("Database error: {0}")]
    Database(ServerError),

    /// 보안 에러
    #[error("Security error: {0}")]
    Security(ServerError),

    /// 프로토콜 위반
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// 연결 획득 타임아웃 (풀 고갈)
    #[error("Connection acquisition timed out after {0:?}")]
    AcquisitionTimeout(Duration),

    /// 타임아웃 에러
    #[error("Timeout: {0}")]
    Timeout(String),

    /// 연결 에러
    #[error("Connection error: {0}")]
    Connection(String),

    /// 설정 에러
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 드라이버/풀이 닫힘
    #[error("Closed: {0}")]
    Closed(String),

    /// I/O 에러
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl DriverError {
    /// 서비스 불가 에러 생성
    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable {
            message: msg.into(),
            causes: Vec::new(),
        }
    }

    /// 원인 목록을 포함한 서비스 불가 에러 생성
    pub fn service_unavailable_with(msg: impl Into<String>, causes: Vec<DriverError>) -> Self {
        Self::ServiceUnavailable {
            message: msg.into(),
            causes,
        }
    }

    /// 세션 만료 에러 생성
    pub fn session_expired(msg: impl Into<String>) -> Self {
        Self::SessionExpired(msg.into())
    }

    /// 프로토콜 에러 생성
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// 타임아웃 에러 생성
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// 연결 에러 생성
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// 설정 에러 생성
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// 닫힘 에러 생성
    pub fn closed(msg: impl Into<String>) -> Self {
        Self::Closed(msg.into())
    }

    /// 서버 FAILURE 코드를 드라이버 에러로 변환
    ///
    /// 코드는 `Neo.{Classification}.{Category}.{Title}` 형식입니다.
    pub fn from_server(err: ServerError) -> Self {
        if err.is_protocol_violation() {
            return Self::Protocol(err.to_string());
        }
        match err.classification() {
            "ClientError" if err.category() == "Security" => Self::Security(err),
            "ClientError" => Self::Client(err),
            "TransientError" if is_client_terminated(&err.code) => Self::Client(err),
            "TransientError" => Self::Transient(err),
            _ => Self::Database(err),
        }
    }

    /// 서버 에러 코드 (있는 경우)
    pub fn code(&self) -> Option<&str> {
        self.server_error().map(|e| e.code.as_str())
    }

    /// 서버 에러 (있는 경우)
    pub fn server_error(&self) -> Option<&ServerError> {
        match self {
            Self::Transient(e) | Self::Client(e) | Self::Database(e) | Self::Security(e) => Some(e),
            _ => None,
        }
    }

    /// 서비스 불가 여부
    pub fn is_service_unavailable(&self) -> bool {
        matches!(self, Self::ServiceUnavailable { .. })
    }

    /// 누적된 원인 목록
    pub fn causes(&self) -> &[DriverError] {
        match self {
            Self::ServiceUnavailable { causes, .. } => causes,
            _ => &[],
        }
    }

    /// 재시도 가능 여부
    pub fn is_retryable(&self) -> bool {
        classify(self) == ErrorKind::Retryable
    }

    /// 클러스터 리더십 변경 에러 여부 (NotALeader, ForbiddenOnReadOnlyDatabase)
    pub fn is_cluster_error(&self) -> bool {
        matches!(
            self.code(),
            Some(codes::NOT_A_LEADER) | Some(codes::FORBIDDEN_ON_READ_ONLY_DATABASE)
        )
    }

    /// 연결 수준 에러 여부 (해당 서버를 도달 불가로 간주)
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Io(_) | Self::Timeout(_) | Self::ServiceUnavailable { .. }
        ) || self.code() == Some(codes::DATABASE_UNAVAILABLE)
    }
}

/// 클라이언트가 종료시킨 트랜잭션 코드 (재시도하지 않음)
fn is_client_terminated(code: &str) -> bool {
    code == codes::TRANSACTION_TERMINATED || code == codes::LOCK_CLIENT_STOPPED
}

/// 서버 에러 코드 상수
pub mod codes {
    /// 리더가 아닌 서버에 쓰기
    pub const NOT_A_LEADER: &str = "Neo.ClientError.Cluster.NotALeader";
    /// 읽기 전용 데이터베이스에 쓰기
    pub const FORBIDDEN_ON_READ_ONLY_DATABASE: &str =
        "Neo.ClientError.General.ForbiddenOnReadOnlyDatabase";
    /// 데이터베이스 사용 불가
    pub const DATABASE_UNAVAILABLE: &str = "Neo.TransientError.General.DatabaseUnavailable";
    /// 클라이언트가 종료한 트랜잭션
    pub const TRANSACTION_TERMINATED: &str = "Neo.TransientError.Transaction.Terminated";
    /// 락 클라이언트 중지
    pub const LOCK_CLIENT_STOPPED: &str = "Neo.TransientError.Transaction.LockClientStopped";
    /// 토큰 만료
    pub const TOKEN_EXPIRED: &str = "Neo.ClientError.Security.TokenExpired";
    /// 인증 실패
    pub const UNAUTHORIZED: &str = "Neo.ClientError.Security.Unauthorized";
    /// 권한 만료
    pub const AUTHORIZATION_EXPIRED: &str = "Neo.ClientError.Security.AuthorizationExpired";
    /// 잘못된 요청
    pub const REQUEST_INVALID: &str = "Neo.ClientError.Request.Invalid";
    /// 잘못된 요청 형식
    pub const REQUEST_INVALID_FORMAT: &str = "Neo.ClientError.Request.InvalidFormat";
}

// ============================================================================
// ErrorKind - 재시도 분류
// ============================================================================

/// 재시도 관점의 에러 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 백오프 후 재시도
    Retryable,
    /// 즉시 전파
    Fatal,
    /// 인증 토큰 갱신 후 한 번 더 시도
    NeedsReauth,
}

/// 에러 분류
pub fn classify(err: &DriverError) -> ErrorKind {
    match err {
        DriverError::ServiceUnavailable { .. }
        | DriverError::SessionExpired(_)
        | DriverError::Transient(_)
        | DriverError::Connection(_)
        | DriverError::Timeout(_)
        | DriverError::Io(_) => ErrorKind::Retryable,
        DriverError::Security(e) => match e.code.as_str() {
            codes::TOKEN_EXPIRED | codes::UNAUTHORIZED => ErrorKind::NeedsReauth,
            codes::AUTHORIZATION_EXPIRED => ErrorKind::Retryable,
            _ => ErrorKind::Fatal,
        },
        DriverError::Client(_) if err.is_cluster_error() => ErrorKind::Retryable,
        _ => ErrorKind::Fatal,
    }
}

// ============================================================================
// Result Type
// ============================================================================

/// 드라이버 결과 타입
pub type DriverResult<T> = Result<T, DriverError>;

// ============================================================================
// ServerError - 서버 FAILURE
// ============================================================================

/// 서버가 FAILURE 메시지로 보고한 에러
///
/// 에러 코드는 "Neo.{Classification}.{Category}.{Title}" 형식을 따릅니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerError {
    /// 에러 코드
    pub code: String,
    /// 에러 메시지
    pub message: String,
}

impl ServerError {
    /// 새 에러 생성
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// 분류 (`ClientError`, `TransientError`, `DatabaseError`)
    pub fn classification(&self) -> &str {
        self.code.split('.').nth(1).unwrap_or("")
    }

    /// 카테고리 (`Security`, `Cluster`, ...)
    pub fn category(&self) -> &str {
        self.code.split('.').nth(2).unwrap_or("")
    }

    /// 보안 에러 여부
    pub fn is_security_error(&self) -> bool {
        self.classification() == "ClientError" && self.category() == "Security"
    }

    /// 프로토콜 위반 여부
    pub fn is_protocol_violation(&self) -> bool {
        self.code == codes::REQUEST_INVALID || self.code == codes::REQUEST_INVALID_FORMAT
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ServerError {}

impl From<ServerError> for DriverError {
    fn from(err: ServerError) -> Self {
        DriverError::from_server(err)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn server(code: &str) -> DriverError {
        DriverError::from_server(ServerError::new(code, "boom"))
    }

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::connection("Connection refused");
        assert_eq!(err.to_string(), "Connection error: Connection refused");

        let err = server("Neo.ClientError.Statement.SyntaxError");
        assert_eq!(
            err.to_string(),
            "Client error: Neo.ClientError.Statement.SyntaxError: boom"
        );

        let err = DriverError::AcquisitionTimeout(Duration::from_millis(250));
        assert_eq!(err.to_string(), "Connection acquisition timed out after 250ms");
    }

    #[test]
    fn test_parse_server_error() {
        assert!(matches!(server("Neo.ClientError.Statement.SyntaxError"), DriverError::Client(_)));
        assert!(matches!(server("Neo.ClientError.Security.Unauthorized"), DriverError::Security(_)));
        assert!(matches!(
            server("Neo.TransientError.General.TemporarilyUnavailable"),
            DriverError::Transient(_)
        ));
        assert!(matches!(server("Neo.DatabaseError.General.UnknownError"), DriverError::Database(_)));
        assert!(matches!(server(codes::REQUEST_INVALID), DriverError::Protocol(_)));
    }

    #[test]
    fn test_client_terminated_transients_are_client_errors() {
        let err = server(codes::TRANSACTION_TERMINATED);
        assert!(matches!(err, DriverError::Client(_)));
        assert_eq!(classify(&err), ErrorKind::Fatal);

        let err = server(codes::LOCK_CLIENT_STOPPED);
        assert!(matches!(err, DriverError::Client(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(&DriverError::service_unavailable("x")), ErrorKind::Retryable);
        assert_eq!(classify(&DriverError::session_expired("x")), ErrorKind::Retryable);
        assert_eq!(classify(&DriverError::connection("x")), ErrorKind::Retryable);
        assert_eq!(
            classify(&server("Neo.TransientError.General.TemporarilyUnavailable")),
            ErrorKind::Retryable
        );
        assert_eq!(classify(&server(codes::NOT_A_LEADER)), ErrorKind::Retryable);
        assert_eq!(classify(&server(codes::FORBIDDEN_ON_READ_ONLY_DATABASE)), ErrorKind::Retryable);
        assert_eq!(classify(&server(codes::AUTHORIZATION_EXPIRED)), ErrorKind::Retryable);

        assert_eq!(classify(&server(codes::TOKEN_EXPIRED)), ErrorKind::NeedsReauth);
        assert_eq!(classify(&server(codes::UNAUTHORIZED)), ErrorKind::NeedsReauth);

        assert_eq!(classify(&DriverError::protocol("bad frame")), ErrorKind::Fatal);
        assert_eq!(
            classify(&DriverError::AcquisitionTimeout(Duration::from_secs(1))),
            ErrorKind::Fatal
        );
        assert_eq!(classify(&server("Neo.ClientError.Statement.SyntaxError")), ErrorKind::Fatal);
        assert_eq!(classify(&server("Neo.ClientError.Security.Forbidden")), ErrorKind::Fatal);
    }

    #[test]
    fn test_cluster_and_connection_errors() {
        assert!(server(codes::NOT_A_LEADER).is_cluster_error());
        assert!(!server("Neo.ClientError.Statement.SyntaxError").is_cluster_error());

        assert!(DriverError::connection("reset by peer").is_connection_error());
        assert!(server(codes::DATABASE_UNAVAILABLE).is_connection_error());
        assert!(!DriverError::protocol("x").is_connection_error());
    }

    #[test]
    fn test_service_unavailable_causes() {
        let err = DriverError::service_unavailable_with(
            "no routers",
            vec![DriverError::connection("a"), DriverError::connection("b")],
        );
        assert!(err.is_service_unavailable());
        assert_eq!(err.causes().len(), 2);
        assert!(DriverError::connection("a").causes().is_empty());
    }

    #[test]
    fn test_server_error_parts() {
        let err = ServerError::new("Neo.ClientError.Security.TokenExpired", "expired");
        assert_eq!(err.classification(), "ClientError");
        assert_eq!(err.category(), "Security");
        assert!(err.is_security_error());
        assert_eq!(err.to_string(), "Neo.ClientError.Security.TokenExpired: expired");
    }
}

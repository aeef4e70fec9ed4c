//! Execution Context
//!
//! 접근 모드, 북마크, 실행 설정

use std::fmt;

// ============================================================================
// AccessMode - 접근 모드
// ============================================================================

/// 접근 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AccessMode {
    /// 읽기
    #[default]
    Read,
    /// 쓰기
    Write,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => write!(f, "READ"),
            Self::Write => write!(f, "WRITE"),
        }
    }
}

// ============================================================================
// Bookmark - 북마크
// ============================================================================

/// 인과적 일관성 북마크
///
/// 코어는 북마크를 해석하거나 변경하지 않고 라우팅 요청에 그대로 전달합니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bookmark {
    /// 북마크 값
    value: String,
}

impl Bookmark {
    /// 새 북마크 생성
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    /// 북마크 값
    pub fn value(&self) -> &str {
        &self.value
    }

    /// 빈 북마크 여부
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// 전송용 값 목록 (빈 북마크 제외, 중복 제거)
    pub fn values(bookmarks: &[Bookmark]) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(bookmarks.len());
        for b in bookmarks.iter().filter(|b| !b.is_empty()) {
            if !out.iter().any(|v| v == &b.value) {
                out.push(b.value.clone());
            }
        }
        out
    }
}

impl fmt::Display for Bookmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl From<String> for Bookmark {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<&str> for Bookmark {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ============================================================================
// ExecuteConfig - 실행 설정
// ============================================================================

/// 한 작업 단위의 실행 설정
#[derive(Debug, Clone, Default)]
pub struct ExecuteConfig {
    /// 데이터베이스 이름 (`None`이면 홈 데이터베이스)
    pub database: Option<String>,
    /// 접근 모드
    pub access_mode: AccessMode,
    /// 북마크
    pub bookmarks: Vec<Bookmark>,
    /// 임퍼손트 사용자
    pub impersonated_user: Option<String>,
}

impl ExecuteConfig {
    /// 빌더 시작
    pub fn builder() -> ExecuteConfigBuilder {
        ExecuteConfigBuilder::default()
    }

    /// 읽기 설정
    pub fn read() -> Self {
        Self::default()
    }

    /// 쓰기 설정
    pub fn write() -> Self {
        Self {
            access_mode: AccessMode::Write,
            ..Default::default()
        }
    }

    /// 라우팅 테이블 키 (홈 데이터베이스는 빈 문자열)
    pub fn database_key(&self) -> &str {
        self.database.as_deref().unwrap_or("")
    }
}

/// 실행 설정 빌더
#[derive(Debug, Clone, Default)]
pub struct ExecuteConfigBuilder {
    config: ExecuteConfig,
}

impl ExecuteConfigBuilder {
    /// 데이터베이스 설정
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.config.database = Some(database.into());
        self
    }

    /// 읽기 모드
    pub fn with_read_access(mut self) -> Self {
        self.config.access_mode = AccessMode::Read;
        self
    }

    /// 쓰기 모드
    pub fn with_write_access(mut self) -> Self {
        self.config.access_mode = AccessMode::Write;
        self
    }

    /// 접근 모드 설정
    pub fn with_access_mode(mut self, mode: AccessMode) -> Self {
        self.config.access_mode = mode;
        self
    }

    /// 북마크 목록 설정
    pub fn with_bookmarks(mut self, bookmarks: Vec<Bookmark>) -> Self {
        self.config.bookmarks = bookmarks;
        self
    }

    /// 북마크 추가
    pub fn with_bookmark(mut self, bookmark: Bookmark) -> Self {
        self.config.bookmarks.push(bookmark);
        self
    }

    /// 임퍼손트 사용자 설정
    pub fn with_impersonated_user(mut self, user: impl Into<String>) -> Self {
        self.config.impersonated_user = Some(user.into());
        self
    }

    /// 빌드
    pub fn build(self) -> ExecuteConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_mode() {
        assert_eq!(AccessMode::default(), AccessMode::Read);
        assert_eq!(AccessMode::Write.to_string(), "WRITE");
    }

    #[test]
    fn test_bookmark() {
        let bookmark = Bookmark::new("FB:kcwQ");
        assert_eq!(bookmark.value(), "FB:kcwQ");
        assert!(!bookmark.is_empty());
        assert!(Bookmark::new("").is_empty());

        let b: Bookmark = "bookmark1".into();
        assert_eq!(b.to_string(), "bookmark1");
    }

    #[test]
    fn test_bookmark_values() {
        let bookmarks = vec![
            Bookmark::new("b1"),
            Bookmark::new(""),
            Bookmark::new("b2"),
            Bookmark::new("b1"),
        ];
        assert_eq!(Bookmark::values(&bookmarks), vec!["b1".to_string(), "b2".to_string()]);
    }

    #[test]
    fn test_execute_config_builder() {
        let config = ExecuteConfig::builder()
            .with_database("movies")
            .with_write_access()
            .with_bookmark(Bookmark::new("b1"))
            .with_impersonated_user("alice")
            .build();

        assert_eq!(config.database_key(), "movies");
        assert_eq!(config.access_mode, AccessMode::Write);
        assert_eq!(config.bookmarks.len(), 1);
        assert_eq!(config.impersonated_user.as_deref(), Some("alice"));

        assert_eq!(ExecuteConfig::read().database_key(), "");
        assert_eq!(ExecuteConfig::write().access_mode, AccessMode::Write);
    }
}

//! Error types for CmSync
//!
//! 모든 에러를 중앙에서 관리

use std::fmt;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of a failed call to a DMI plugin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternalFailureKind {
    /// The plugin answered 404
    NotFound,
    /// The plugin is overloaded or refused to wait (408, 413, 429, 503, 504)
    ServerLimitation,
    /// Any other non-2xx answer
    ApplicationLayerError,
    /// No HTTP answer at all (connect/transport error)
    Unreachable,
}

impl ExternalFailureKind {
    /// Map a non-2xx HTTP status to a failure kind
    pub fn from_status(status: u16) -> Self {
        match status {
            404 => Self::NotFound,
            408 | 413 | 429 | 503 | 504 => Self::ServerLimitation,
            _ => Self::ApplicationLayerError,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::ServerLimitation => "server_limitation",
            Self::ApplicationLayerError => "application_layer_error",
            Self::Unreachable => "unreachable",
        }
    }
}

impl fmt::Display for ExternalFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CmSync 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // 설정 관련
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // 상태 전이 관련
    // ========================================================================
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    // ========================================================================
    // 실행 관련
    // ========================================================================
    #[error("Executor saturated: {0}")]
    Saturated(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,

    // ========================================================================
    // 저장소 관련
    // ========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    // ========================================================================
    // DMI 호출 관련
    // ========================================================================
    #[error("External call failed ({kind}): {message}")]
    ExternalCallFailed {
        kind: ExternalFailureKind,
        status: Option<u16>,
        message: String,
    },

    // ========================================================================
    // 일반
    // ========================================================================
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Validation error: {0}")]
    Validation(String),

    // ========================================================================
    // 외부 에러 변환
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    // ========================================================================
    // 기타
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// 재시도 가능한 에러인지 확인
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Saturated(_)
            | Error::Timeout(_)
            | Error::Storage(_)
            | Error::Sqlite(_)
            | Error::Http(_) => true,
            Error::ExternalCallFailed { kind, .. } => matches!(
                kind,
                ExternalFailureKind::ServerLimitation | ExternalFailureKind::Unreachable
            ),
            _ => false,
        }
    }

    /// Errors that end the current cycle for one handle but not the process
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// DMI 호출 에러 생성 헬퍼
    pub fn external(kind: ExternalFailureKind, status: Option<u16>, message: impl Into<String>) -> Self {
        Error::ExternalCallFailed {
            kind,
            status,
            message: message.into(),
        }
    }

    /// 상태 전이 에러 생성 헬퍼
    pub fn invalid_transition(from: impl fmt::Display, trigger: impl fmt::Display) -> Self {
        Error::InvalidTransition(format!("{} does not accept {}", from, trigger))
    }
}

// ============================================================================
// From 구현 (추가 변환)
// ============================================================================

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}

use std::fmt;

/// Rejection returned by every validator and ingestion path.
///
/// `status` mirrors HTTP semantics (400 invalid, 402 insufficient funds,
/// 404 not found, 503 overload). `soft` marks expected conditions (stale
/// block, duplicate message, replay) that callers must never log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub status: u16,
    pub message: String,
    pub soft: bool,
}

impl Rejection {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self { status: 400, message: message.into(), soft: false }
    }

    pub fn funds(message: impl Into<String>) -> Self {
        Self { status: 402, message: message.into(), soft: false }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self { status: 404, message: message.into(), soft: false }
    }

    pub fn overload(message: impl Into<String>) -> Self {
        Self { status: 503, message: message.into(), soft: false }
    }

    /// An expected condition (duplicate, stale, out-of-window). Not logged.
    pub fn soft(message: impl Into<String>) -> Self {
        Self { status: 400, message: message.into(), soft: true }
    }

    pub fn is_soft(&self) -> bool {
        self.soft
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.status)
    }
}

impl std::error::Error for Rejection {}

pub type Result<T> = std::result::Result<T, Rejection>;

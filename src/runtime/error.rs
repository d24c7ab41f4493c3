//! Bridge error type
//!
//! Rust-facing bridge functions return `Result<T, BridgeError>`. Native entry
//! points never return these: they are turned into managed exceptions and
//! raised (see `unwind::raise_error`).

use super::cursor::CursorError;
use super::engine::{ErrorKind, Exception, ManagedEngine};

#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
    /// A managed exception raised by the engine.
    #[error("managed exception {0:?}")]
    Raised(Exception),

    /// `count * elsize` does not fit in the signed size domain.
    #[error("malloc: possible integer overflow ({count}*{elsize})")]
    SizeOverflow { count: usize, elsize: usize },

    #[error(transparent)]
    Cursor(#[from] CursorError),

    /// The null ID (or one the engine never handed out) where an ID is required.
    #[error("invalid identifier {0}")]
    InvalidId(usize),

    #[error("unknown encoding index {0}")]
    UnknownEncoding(i32),

    #[error("negative buffer size (or size too big): {0}")]
    NegativeBufferSize(i64),

    #[error("invalid ABI version string {0:?}")]
    InvalidAbiVersion(String),

    /// A native entry point was called before any engine was installed.
    #[error("no managed engine is installed")]
    NoEngine,

    #[error("a managed engine is already installed")]
    EngineAlreadyInstalled,
}

impl From<Exception> for BridgeError {
    fn from(exc: Exception) -> Self {
        BridgeError::Raised(exc)
    }
}

impl BridgeError {
    /// Convert into the managed exception native code should observe.
    ///
    /// Returns None for conditions that have no managed counterpart.
    pub fn into_exception(self, engine: &dyn ManagedEngine) -> Option<Exception> {
        let (kind, message) = match self {
            BridgeError::Raised(exc) => return Some(exc),
            BridgeError::NoEngine | BridgeError::EngineAlreadyInstalled => return None,
            BridgeError::NegativeBufferSize(_) => (
                ErrorKind::ArgumentError,
                "negative buffer size (or size too big)".to_string(),
            ),
            BridgeError::UnknownEncoding(_)
            | BridgeError::InvalidId(_)
            | BridgeError::SizeOverflow { .. }
            | BridgeError::Cursor(_)
            | BridgeError::InvalidAbiVersion(_) => (ErrorKind::ArgumentError, self.to_string()),
        };
        Some(engine.new_exception(kind, message.as_bytes()))
    }
}

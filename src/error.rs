use std::io;

use thiserror::Error;

/// Errors raised outside the hot path.
///
/// Hot-path functions (`Node::read`/`Node::write`, queue operations, hook
/// `process`) return counts or [`Reason`][crate::hook::Reason] values and
/// never construct these; configuration and lifecycle code does.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad or missing configuration, with a pointer to the offending spot.
    #[error("config error at {at}: {reason}")]
    Config { at: String, reason: String },

    /// Operational failure at runtime.
    #[error("{0}")]
    Runtime(String),

    /// Failed OS call, carries the errno.
    #[error("system error: {0}")]
    System(#[from] io::Error),

    #[error("out of memory")]
    MemoryAllocation,

    /// API request used a method the handler does not support.
    #[error("invalid method")]
    InvalidMethod,

    /// API request body was malformed.
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl Error {
    pub fn config(at: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            at: at.into(),
            reason: reason.into(),
        }
    }

    pub fn runtime(reason: impl Into<String>) -> Self {
        Self::Runtime(reason.into())
    }

    /// Whether the owning path should stop instead of counting and continuing.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Runtime(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

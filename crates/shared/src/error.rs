use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    PermissionDenied,
    NotFound,
    RateLimited,
    Transient,
    Internal,
}

/// Error surface of the message channel. Crosses the wire, so it stays
/// serde-friendly; `thiserror` makes it usable as an error source directly.
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[error("{code:?}: {message}")]
pub struct ChannelError {
    pub code: ErrorCode,
    pub message: String,
}

impl ChannelError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Retry-safe failures: the draft may be resent manually.
    pub fn is_transient(&self) -> bool {
        matches!(self.code, ErrorCode::Transient | ErrorCode::RateLimited)
    }
}

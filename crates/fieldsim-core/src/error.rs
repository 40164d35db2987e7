// ── Core error types ──
//
// Errors surfaced by device lifecycle calls and the collector.
// Run-loop faults never reach callers as errors; they become an
// `Error` status transition on the device instead.

use std::fmt;

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot open endpoint {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    #[error("Register {address} not found")]
    RegisterNotFound { address: u16 },

    #[error("Validation failed: {message}")]
    Validation { message: String },

    // ── Runtime errors ───────────────────────────────────────────────
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse error classification exposed to sinks and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConnectionFailed,
    InvalidData,
    Timeout,
    UnknownError,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ConnectionFailed => "connection_failed",
            Self::InvalidData => "invalid_data",
            Self::Timeout => "timeout",
            Self::UnknownError => "unknown_error",
        };
        f.write_str(s)
    }
}

impl CoreError {
    /// Classify this error into its [`ErrorCode`].
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ConnectionFailed { .. } => ErrorCode::ConnectionFailed,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::InvalidData { .. } | Self::RegisterNotFound { .. } | Self::Validation { .. } => {
                ErrorCode::InvalidData
            }
            Self::Io(_) | Self::Internal(_) => ErrorCode::UnknownError,
        }
    }

    pub(crate) fn connection(address: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::ConnectionFailed {
            address: address.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_failures_classify_as_connection_failed() {
        let err = CoreError::connection("127.0.0.1:1", "address in use");
        assert_eq!(err.code(), ErrorCode::ConnectionFailed);
        assert_eq!(
            err.to_string(),
            "Cannot open endpoint 127.0.0.1:1: address in use"
        );
    }

    #[test]
    fn unexpected_faults_classify_as_unknown() {
        assert_eq!(
            CoreError::Internal("boom".into()).code(),
            ErrorCode::UnknownError
        );
        assert_eq!(ErrorCode::UnknownError.to_string(), "unknown_error");
    }
}

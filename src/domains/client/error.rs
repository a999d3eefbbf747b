//! Client-side error types.

use thiserror::Error;

/// A session could not be established.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    /// Every connect attempt failed.
    #[error("Endpoint {endpoint} unreachable after {attempts} attempt(s): {reason}")]
    Unreachable {
        endpoint: String,
        attempts: u32,
        reason: String,
    },

    /// The session was closed by its owner.
    #[error("Session is closed")]
    Closed,
}

/// Discriminant of [`CallError`], for callers that only branch on the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallErrorKind {
    Timeout,
    Unreachable,
    ToolNotFound,
    HandlerError,
}

/// Why a tool call (or a tool listing) failed.
///
/// Transport failures never escape in raw form; they are folded into
/// `Timeout` or `Unreachable` once the retry budget is spent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// No chunk arrived in time, or a streaming call went idle.
    #[error("Call timed out: {reason}")]
    Timeout { reason: String },

    /// The server could not be reached or the connection was lost.
    #[error("Server unreachable: {reason}")]
    Unreachable { reason: String },

    /// The server has no tool with this name.
    #[error("Tool not found: {name}")]
    ToolNotFound { name: String },

    /// The tool ran and reported a failure.
    #[error("Tool failed: {message}")]
    HandlerError { message: String },
}

impl CallError {
    /// Create a timeout error.
    pub fn timeout(reason: impl Into<String>) -> Self {
        Self::Timeout {
            reason: reason.into(),
        }
    }

    /// Create an unreachable error.
    pub fn unreachable(reason: impl Into<String>) -> Self {
        Self::Unreachable {
            reason: reason.into(),
        }
    }

    /// The kind of failure.
    pub fn kind(&self) -> CallErrorKind {
        match self {
            Self::Timeout { .. } => CallErrorKind::Timeout,
            Self::Unreachable { .. } => CallErrorKind::Unreachable,
            Self::ToolNotFound { .. } => CallErrorKind::ToolNotFound,
            Self::HandlerError { .. } => CallErrorKind::HandlerError,
        }
    }

    /// Whether the failure happened before the server produced anything,
    /// so sending the request again cannot duplicate work.
    pub(crate) fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unreachable { .. })
    }
}

impl From<ConnectionError> for CallError {
    fn from(err: ConnectionError) -> Self {
        Self::unreachable(err.to_string())
    }
}

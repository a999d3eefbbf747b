//! Tool-specific error types.

use thiserror::Error;

/// Errors a tool handler can report.
///
/// The display text is what the caller sees, so it must not carry internal
/// details such as backtraces.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Invalid arguments were provided to the tool.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool execution failed.
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ToolError {
    /// Create a new "invalid arguments" error.
    pub fn invalid_arguments(msg: impl Into<String>) -> Self {
        Self::InvalidArguments(msg.into())
    }

    /// Create a new "execution failed" error.
    pub fn execution_failed(msg: impl Into<String>) -> Self {
        Self::ExecutionFailed(msg.into())
    }

    /// Create a new "internal" error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidArguments(err.to_string())
    }
}

/// Errors raised by the tool registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A tool with this name is already registered.
    #[error("Tool already registered: {0}")]
    DuplicateName(String),

    /// No tool with this name is registered.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Tool names must be non-empty.
    #[error("Tool name cannot be empty")]
    EmptyName,
}

//! Error types and handling for the tool bridge.
//!
//! This module defines a unified error type that can represent errors from
//! all domains and external dependencies, for callers that drive several
//! components and want a single `?`-able error.

use thiserror::Error;

/// A specialized Result type for tool bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the tool bridge.
#[derive(Debug, Error)]
pub enum Error {
    /// Tool registration or lookup failed.
    #[error("Registry error: {0}")]
    Registry(#[from] crate::domains::tools::RegistryError),

    /// A frame could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] super::protocol::DecodeError),

    /// A session could not be established.
    #[error("Connection error: {0}")]
    Connection(#[from] crate::domains::client::ConnectionError),

    /// A tool call failed.
    #[error("Call error: {0}")]
    Call(#[from] crate::domains::client::CallError),

    /// The server transport failed.
    #[error("Transport error: {0}")]
    Transport(#[from] super::transport::TransportError),

    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors from network communication.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a new configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::client::CallError;

    #[test]
    fn test_domain_errors_convert() {
        let err: Error = CallError::ToolNotFound {
            name: "nope".to_string(),
        }
        .into();
        assert!(matches!(err, Error::Call(_)));
        assert!(err.to_string().starts_with("Call error: "));

        assert_eq!(
            Error::config("bad port").to_string(),
            "Configuration error: bad port"
        );
    }
}

//! Codec error types.

use thiserror::Error;

/// Errors raised while reading or decoding frames.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// A frame grew past the configured maximum before its delimiter arrived.
    #[error("frame exceeds maximum length of {max} bytes")]
    FrameTooLarge { max: usize },

    /// The frame is not valid JSON for the expected message type.
    #[error("invalid frame: {0}")]
    Json(#[from] serde_json::Error),

    /// The frame is valid JSON but violates the message contract.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The underlying byte stream failed.
    #[error("I/O error while reading frame: {0}")]
    Io(#[from] std::io::Error),
}

impl DecodeError {
    /// Create a new "malformed" error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}

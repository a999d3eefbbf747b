//! Tool handler seam.
//!
//! A handler receives the decoded [`Arguments`] of a call and returns either
//! a single value or a stream of incremental values.

use std::fmt;
use std::future::Future;

use futures::stream::BoxStream;
use serde_json::Value;

use super::ToolError;
use crate::core::protocol::Arguments;

/// Output of a tool execution.
pub enum ToolOutput {
    /// A complete result, delivered as one terminal chunk (long strings may
    /// be sliced).
    Value(Value),

    /// Incremental results, one chunk per item. An `Err` item fails the call.
    Stream(BoxStream<'static, Result<Value, ToolError>>),
}

impl ToolOutput {
    /// A single complete value.
    pub fn value(value: impl Into<Value>) -> Self {
        Self::Value(value.into())
    }

    /// An incremental stream of values.
    pub fn stream(stream: BoxStream<'static, Result<Value, ToolError>>) -> Self {
        Self::Stream(stream)
    }
}

impl fmt::Debug for ToolOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Trait implemented by tool executors.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute the tool with the given arguments.
    async fn call(&self, arguments: Arguments) -> Result<ToolOutput, ToolError>;
}

#[async_trait::async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(Arguments) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ToolOutput, ToolError>> + Send,
{
    async fn call(&self, arguments: Arguments) -> Result<ToolOutput, ToolError> {
        (self)(arguments).await
    }
}

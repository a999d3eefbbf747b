//! The reasoning seam.
//!
//! A [`Reasoner`] turns the conversation so far into a stream of text
//! deltas and tool call decisions. Model providers live behind this trait.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde_json::Value;
use thiserror::Error;

use super::ToolChoice;
use crate::core::protocol::{Arguments, ToolDescriptor};

/// One entry of the context handed to the reasoner.
#[derive(Debug, Clone, PartialEq)]
pub enum ContextItem {
    User(String),
    Assistant(String),
    ToolCall { name: String, arguments: Arguments },
    ToolResult { name: String, value: Value },
    ToolError { name: String, message: String },
}

/// Everything the reasoner sees on one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ReasoningRequest {
    pub instructions: Option<String>,
    pub context: Vec<ContextItem>,
    /// Tools offered this turn.
    pub tools: Vec<ToolDescriptor>,
    pub tool_choice: ToolChoice,
    pub parallel_tool_calls: bool,
}

/// Output of the reasoner, in the order produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ReasoningEvent {
    TextDelta(String),
    ToolCall { name: String, arguments: Arguments },
}

impl ReasoningEvent {
    pub fn text(delta: impl Into<String>) -> Self {
        Self::TextDelta(delta.into())
    }

    pub fn tool_call(name: impl Into<String>, arguments: Arguments) -> Self {
        Self::ToolCall {
            name: name.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReasonerError {
    #[error("Reasoner failed: {0}")]
    Failed(String),

    #[error("Reasoner has no scripted turn left")]
    Exhausted,
}

pub type ReasoningStream = BoxStream<'static, Result<ReasoningEvent, ReasonerError>>;

/// Produces one turn of reasoning.
#[async_trait]
pub trait Reasoner: Send + Sync {
    async fn reason(&self, request: ReasoningRequest) -> Result<ReasoningStream, ReasonerError>;
}

/// Replays fixed turns and records the requests it was given.
#[derive(Debug, Default)]
pub struct ScriptedReasoner {
    turns: Mutex<VecDeque<Vec<ReasoningEvent>>>,
    requests: Mutex<Vec<ReasoningRequest>>,
}

impl ScriptedReasoner {
    pub fn new(turns: impl IntoIterator<Item = Vec<ReasoningEvent>>) -> Self {
        Self {
            turns: Mutex::new(turns.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Requests received so far, oldest first.
    pub fn requests(&self) -> Vec<ReasoningRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Reasoner for ScriptedReasoner {
    async fn reason(&self, request: ReasoningRequest) -> Result<ReasoningStream, ReasonerError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);

        let turn = self
            .turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or(ReasonerError::Exhausted)?;
        Ok(futures::stream::iter(turn.into_iter().map(Ok)).boxed())
    }
}

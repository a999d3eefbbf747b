//! Events emitted by an orchestrator run.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::domains::client::{CallError, ToolResult};

/// One observable step of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    /// Reasoning text, in the order produced.
    TextDelta(String),
    /// A tool call was decided and is being sent.
    ToolCallStarted { name: String },
    /// A tool call returned its complete result.
    ToolCallCompleted { name: String, result: ToolResult },
    /// A tool call failed. The run goes on.
    ToolCallFailed { name: String, error: CallError },
    /// The run stopped early. Always the last event of its run.
    RunFailed { reason: String },
}

/// The events of one run.
///
/// Nothing happens until the stream is first polled. Dropping the stream
/// stops the run.
pub struct EventStream {
    start: Option<BoxFuture<'static, ()>>,
    task: Option<JoinHandle<()>>,
    rx: mpsc::Receiver<AgentEvent>,
}

impl EventStream {
    pub(crate) fn new(run: BoxFuture<'static, ()>, rx: mpsc::Receiver<AgentEvent>) -> Self {
        Self {
            start: Some(run),
            task: None,
            rx,
        }
    }
}

impl Stream for EventStream {
    type Item = AgentEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(run) = self.start.take() {
            self.task = Some(tokio::spawn(run));
        }
        self.rx.poll_recv(cx)
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

//! Server-side execution of a single tool call.
//!
//! Each call walks `RECEIVED -> EXECUTING -> STREAMING -> COMPLETED | FAILED`
//! and emits its chunks, numbered from zero, into the connection's outbound
//! queue. Exactly one chunk per call carries `terminal = true`, unless the
//! client went away first.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::protocol::{CallId, ChunkBody, ErrorCode, ServerMessage, ToolCallChunk, ToolCallRequest};
use crate::domains::tools::{ToolError, ToolOutput, ToolRegistry};

const PANIC_MESSAGE: &str = "tool handler panicked";

/// Lifecycle state of a call on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Received,
    Executing,
    Streaming,
    Completed,
    Failed,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "RECEIVED",
            Self::Executing => "EXECUTING",
            Self::Streaming => "STREAMING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// The outbound queue was closed: the client abandoned the call.
#[derive(Debug)]
struct Abandoned;

/// Numbers and sends the chunks of one call.
struct ChunkEmitter {
    call_id: CallId,
    next_seq: u64,
    sink: mpsc::Sender<ServerMessage>,
}

impl ChunkEmitter {
    fn new(call_id: CallId, sink: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            call_id,
            next_seq: 0,
            sink,
        }
    }

    async fn send(&mut self, body: ChunkBody, terminal: bool) -> Result<(), Abandoned> {
        let chunk = ToolCallChunk {
            call_id: self.call_id.clone(),
            seq: self.next_seq,
            body,
            terminal,
        };
        self.next_seq += 1;
        self.sink
            .send(ServerMessage::Chunk(chunk))
            .await
            .map_err(|_| Abandoned)
    }

    /// Send a value, slicing long strings into several data chunks.
    async fn send_value(
        &mut self,
        value: Value,
        max_chunk_bytes: usize,
        terminal: bool,
    ) -> Result<(), Abandoned> {
        let Value::String(text) = &value else {
            let body = ChunkBody::Data {
                value,
                continued: false,
            };
            return self.send(body, terminal).await;
        };

        let slices = slice_utf8(text, max_chunk_bytes);
        let last = slices.len() - 1;
        for (i, slice) in slices.into_iter().enumerate() {
            let body = ChunkBody::Data {
                value: Value::String(slice.to_string()),
                continued: i != last,
            };
            self.send(body, terminal && i == last).await?;
        }
        Ok(())
    }

    /// Forward a stream, holding one item back so the last one can be
    /// marked terminal.
    async fn send_stream(
        &mut self,
        mut stream: BoxStream<'static, Result<Value, ToolError>>,
        max_chunk_bytes: usize,
    ) -> Result<Result<(), String>, Abandoned> {
        let mut held: Option<Value> = None;
        loop {
            let next = AssertUnwindSafe(stream.next()).catch_unwind().await;
            match next {
                Ok(Some(Ok(value))) => {
                    if let Some(previous) = held.replace(value) {
                        self.send_value(previous, max_chunk_bytes, false).await?;
                    }
                }
                Ok(Some(Err(e))) => return Ok(Err(e.to_string())),
                Ok(None) => break,
                Err(_) => return Ok(Err(PANIC_MESSAGE.to_string())),
            }
        }

        let last = held.unwrap_or(Value::Null);
        self.send_value(last, max_chunk_bytes, true).await?;
        Ok(Ok(()))
    }

    async fn fail(&mut self, code: ErrorCode, message: impl Into<String>) -> Result<(), Abandoned> {
        let body = ChunkBody::Error {
            code,
            message: message.into(),
        };
        self.send(body, true).await
    }
}

/// Split `text` into pieces of at most `max_bytes`, on char boundaries.
///
/// A `max_bytes` of zero disables slicing. A piece may exceed the limit only
/// when a single character is wider than it.
pub(crate) fn slice_utf8(text: &str, max_bytes: usize) -> Vec<&str> {
    if max_bytes == 0 || text.len() <= max_bytes {
        return vec![text];
    }

    let mut slices = Vec::new();
    let mut rest = text;
    while rest.len() > max_bytes {
        let mut cut = max_bytes;
        while cut > 0 && !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut == 0 {
            cut = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let (head, tail) = rest.split_at(cut);
        slices.push(head);
        rest = tail;
    }
    if !rest.is_empty() {
        slices.push(rest);
    }
    slices
}

/// Run one call to completion, emitting its chunks into `sink`.
///
/// Returns the final state. A call whose client disappears mid-way is
/// reported as failed and its remaining chunks are dropped.
#[instrument(skip_all, fields(call_id = %request.call_id, tool = %request.tool))]
pub async fn execute_call(
    registry: Arc<ToolRegistry>,
    request: ToolCallRequest,
    max_chunk_bytes: usize,
    sink: mpsc::Sender<ServerMessage>,
) -> CallState {
    let ToolCallRequest {
        call_id,
        tool,
        arguments,
    } = request;
    let mut emitter = ChunkEmitter::new(call_id, sink);
    debug!(state = %CallState::Received, "call received");

    let definition = match registry.lookup(&tool) {
        Ok(definition) => definition,
        Err(e) => {
            warn!("Rejecting call: {}", e);
            let _ = emitter.fail(ErrorCode::ToolNotFound, e.to_string()).await;
            return finish(CallState::Failed);
        }
    };

    debug!(state = %CallState::Executing, "running handler");
    let handler = Arc::clone(definition.handler());
    let output = match AssertUnwindSafe(handler.call(arguments)).catch_unwind().await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            warn!("Handler failed: {}", e);
            let _ = emitter.fail(ErrorCode::HandlerFailed, e.to_string()).await;
            return finish(CallState::Failed);
        }
        Err(_) => {
            warn!("Handler panicked");
            let _ = emitter.fail(ErrorCode::HandlerFailed, PANIC_MESSAGE).await;
            return finish(CallState::Failed);
        }
    };

    debug!(state = %CallState::Streaming, "emitting chunks");
    let streamed = match output {
        ToolOutput::Value(value) => emitter
            .send_value(value, max_chunk_bytes, true)
            .await
            .map(Ok),
        ToolOutput::Stream(stream) => emitter.send_stream(stream, max_chunk_bytes).await,
    };

    match streamed {
        Ok(Ok(())) => finish(CallState::Completed),
        Ok(Err(message)) => {
            warn!("Handler stream failed: {}", message);
            let _ = emitter.fail(ErrorCode::HandlerFailed, message).await;
            finish(CallState::Failed)
        }
        Err(Abandoned) => {
            info!("Client abandoned call, dropping remaining chunks");
            finish(CallState::Failed)
        }
    }
}

fn finish(state: CallState) -> CallState {
    debug!(state = %state, "call finished");
    state
}

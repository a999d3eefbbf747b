//! Reassembly of streamed chunks into a tool result.
//!
//! Chunks of one call may arrive out of order. They are buffered by sequence
//! number and applied strictly in order; a result only exists once the
//! terminal chunk has been applied. Slices of one long string are joined
//! back into a single fragment.

use std::collections::BTreeMap;

use serde_json::Value;
use thiserror::Error;

use crate::core::protocol::{CallId, ChunkBody, ErrorCode, ToolCallChunk};

/// The complete result of a tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    call_id: CallId,
    fragments: Vec<Value>,
    value: Value,
}

impl ToolResult {
    fn new(call_id: CallId, fragments: Vec<Value>) -> Self {
        let value = combine(&fragments);
        Self {
            call_id,
            fragments,
            value,
        }
    }

    /// Call id of the attempt that produced this result.
    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    /// Values produced by the tool, in order. Slices of a string the
    /// server split are already joined.
    pub fn fragments(&self) -> &[Value] {
        &self.fragments
    }

    /// The combined value.
    ///
    /// One fragment is returned as is, several string fragments are
    /// concatenated, anything else becomes an array of the fragments.
    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    /// The combined value if it is a string.
    pub fn text(&self) -> Option<&str> {
        self.value.as_str()
    }
}

fn combine(fragments: &[Value]) -> Value {
    match fragments {
        [] => Value::Null,
        [single] => single.clone(),
        _ if fragments.iter().all(Value::is_string) => {
            Value::String(fragments.iter().filter_map(Value::as_str).collect())
        }
        _ => Value::Array(fragments.to_vec()),
    }
}

/// State of a call after accepting a chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    /// More chunks are needed.
    Pending,
    /// The terminal data chunk was applied.
    Completed(ToolResult),
    /// The server reported a failure.
    Failed { code: ErrorCode, message: String },
}

/// A chunk broke the ordering contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReassemblyError {
    #[error("chunk for call {got} delivered to call {expected}")]
    WrongCall { expected: CallId, got: CallId },

    #[error("chunk {seq} arrived after the call was closed")]
    AfterTerminal { seq: u64 },

    #[error("chunk {seq} is beyond terminal chunk {terminal}")]
    BeyondTerminal { seq: u64, terminal: u64 },

    #[error("chunk {seq} continues a string slice with a non-string value")]
    BrokenSlice { seq: u64 },
}

/// Orders the chunks of one call and folds them into a result.
#[derive(Debug)]
pub struct Reassembler {
    call_id: CallId,
    next_seq: u64,
    pending: BTreeMap<u64, ToolCallChunk>,
    terminal_seq: Option<u64>,
    fragments: Vec<Value>,
    /// String slices still waiting for their final slice.
    partial: Option<String>,
    finished: bool,
}

impl Reassembler {
    pub fn new(call_id: CallId) -> Self {
        Self {
            call_id,
            next_seq: 0,
            pending: BTreeMap::new(),
            terminal_seq: None,
            fragments: Vec::new(),
            partial: None,
            finished: false,
        }
    }

    /// Whether a terminal chunk has been applied.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Chunks received but not yet applicable.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    /// Accept one chunk. Duplicates of already seen sequence numbers are
    /// ignored.
    pub fn accept(&mut self, chunk: ToolCallChunk) -> Result<Progress, ReassemblyError> {
        if chunk.call_id != self.call_id {
            return Err(ReassemblyError::WrongCall {
                expected: self.call_id.clone(),
                got: chunk.call_id,
            });
        }
        if self.finished {
            return Err(ReassemblyError::AfterTerminal { seq: chunk.seq });
        }
        if chunk.seq < self.next_seq || self.pending.contains_key(&chunk.seq) {
            return Ok(Progress::Pending);
        }
        if let Some(terminal) = self.terminal_seq {
            if chunk.seq > terminal || chunk.terminal {
                return Err(ReassemblyError::BeyondTerminal {
                    seq: chunk.seq,
                    terminal,
                });
            }
        }
        if chunk.terminal {
            if let Some((&last, _)) = self.pending.last_key_value() {
                if last > chunk.seq {
                    return Err(ReassemblyError::BeyondTerminal {
                        seq: last,
                        terminal: chunk.seq,
                    });
                }
            }
            self.terminal_seq = Some(chunk.seq);
        }

        self.pending.insert(chunk.seq, chunk);
        while let Some(chunk) = self.pending.remove(&self.next_seq) {
            self.next_seq += 1;
            match chunk.body {
                ChunkBody::Data { value, continued } => {
                    self.apply(chunk.seq, value, continued)?;
                    if chunk.terminal {
                        self.finished = true;
                        let fragments = std::mem::take(&mut self.fragments);
                        return Ok(Progress::Completed(ToolResult::new(
                            self.call_id.clone(),
                            fragments,
                        )));
                    }
                }
                ChunkBody::Error { code, message } => {
                    self.finished = true;
                    self.pending.clear();
                    return Ok(Progress::Failed { code, message });
                }
            }
        }
        Ok(Progress::Pending)
    }

    fn apply(&mut self, seq: u64, value: Value, continued: bool) -> Result<(), ReassemblyError> {
        if self.partial.is_none() && !continued {
            self.fragments.push(value);
            return Ok(());
        }
        let Value::String(slice) = value else {
            return Err(ReassemblyError::BrokenSlice { seq });
        };
        let mut text = self.partial.take().unwrap_or_default();
        text.push_str(&slice);
        if continued {
            self.partial = Some(text);
        } else {
            self.fragments.push(Value::String(text));
        }
        Ok(())
    }
}

//! Tool-bridge wire protocol.
//!
//! - `message.rs` - request, chunk and envelope types
//! - `codec.rs` - newline-delimited JSON framing and message encoding
//! - `error.rs` - decode errors

mod codec;
mod error;
mod message;

pub use codec::{
    DEFAULT_MAX_FRAME_BYTES, FRAME_DELIMITER, Frame, FrameCodec, decode_request, decode_response,
    encode_request, encode_response, salvage_call_id,
};
pub use error::DecodeError;
pub use message::{
    Arguments, CallId, ChunkBody, ClientMessage, ErrorCode, ParamSpec, ParamType, ServerMessage,
    ToolCallChunk, ToolCallRequest, ToolDescriptor,
};

//! Frame codec: newline-delimited JSON over any byte stream.
//!
//! Compact JSON never contains a raw `\n`, so a single delimiter byte marks
//! every message boundary regardless of how the transport splits the bytes.

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use serde_json::error::Category;
use tokio_util::codec::{Decoder, Encoder, LinesCodec, LinesCodecError};

use super::error::DecodeError;
use super::message::{CallId, ChunkBody, ClientMessage, ServerMessage};

/// Byte terminating every frame.
pub const FRAME_DELIMITER: u8 = b'\n';

/// Default upper bound for a single frame.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

// ============================================================================
// Message encoding
// ============================================================================

fn encode_frame<T: Serialize>(message: &T) -> Result<Bytes, serde_json::Error> {
    let mut buf = BytesMut::new().writer();
    serde_json::to_writer(&mut buf, message)?;
    let mut buf = buf.into_inner();
    buf.put_u8(FRAME_DELIMITER);
    Ok(buf.freeze())
}

/// Parse one frame. Syntax errors stay `Json`; well-formed JSON that does
/// not fit the message type is `Malformed`.
fn parse_frame<T: DeserializeOwned>(frame: &[u8]) -> Result<T, DecodeError> {
    serde_json::from_slice(frame).map_err(|e| match e.classify() {
        Category::Data => DecodeError::malformed(e.to_string()),
        _ => DecodeError::Json(e),
    })
}

fn trim_frame(frame: &[u8]) -> &[u8] {
    let mut end = frame.len();
    while end > 0 && matches!(frame[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    &frame[..end]
}

/// Encode a client message as a delimited frame.
pub fn encode_request(message: &ClientMessage) -> Result<Bytes, serde_json::Error> {
    encode_frame(message)
}

/// Decode a client frame. The trailing delimiter is optional.
pub fn decode_request(frame: &[u8]) -> Result<ClientMessage, DecodeError> {
    let frame = trim_frame(frame);
    if frame.is_empty() {
        return Err(DecodeError::malformed("empty frame"));
    }

    let message: ClientMessage = parse_frame(frame)?;
    if let ClientMessage::Call(request) = &message {
        if request.tool.trim().is_empty() {
            return Err(DecodeError::malformed("tool name cannot be empty"));
        }
    }
    Ok(message)
}

/// Encode a server message as a delimited frame.
pub fn encode_response(message: &ServerMessage) -> Result<Bytes, serde_json::Error> {
    encode_frame(message)
}

/// Decode a server frame. The trailing delimiter is optional.
pub fn decode_response(frame: &[u8]) -> Result<ServerMessage, DecodeError> {
    let frame = trim_frame(frame);
    if frame.is_empty() {
        return Err(DecodeError::malformed("empty frame"));
    }

    let message: ServerMessage = parse_frame(frame)?;
    if let ServerMessage::Chunk(chunk) = &message {
        match chunk.body {
            ChunkBody::Error { .. } if !chunk.terminal => {
                return Err(DecodeError::malformed(format!(
                    "error chunk {} for call {} is not terminal",
                    chunk.seq, chunk.call_id
                )));
            }
            ChunkBody::Data { continued: true, .. } if chunk.terminal => {
                return Err(DecodeError::malformed(format!(
                    "terminal chunk {} for call {} cannot be continued",
                    chunk.seq, chunk.call_id
                )));
            }
            _ => {}
        }
    }
    Ok(message)
}

/// Recover the call id from a call frame that failed to decode.
///
/// Lets a server fail that call immediately instead of leaving the client
/// waiting for its request timeout.
pub fn salvage_call_id(frame: &[u8]) -> Option<CallId> {
    let value: Value = serde_json::from_slice(trim_frame(frame)).ok()?;
    if value.get("type")?.as_str()? != "call" {
        return None;
    }
    value
        .get("call_id")?
        .as_str()
        .filter(|id| !id.is_empty())
        .map(CallId::from)
}

// ============================================================================
// Framing
// ============================================================================

/// One line read off the wire.
///
/// Oversized and non UTF-8 lines come back as `Err` items rather than
/// decoder errors, so a `FramedRead` keeps going after them.
pub type Frame = Result<String, DecodeError>;

/// Newline-delimited JSON codec for `FramedRead` and `FramedWrite`.
///
/// Decoding yields raw lines, blank lines skipped and a trailing `\r`
/// stripped; an oversized line is reported once and discarded through its
/// delimiter. Encoding writes any serializable message as one compact line.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    lines: LinesCodec,
    max_frame_bytes: usize,
}

impl FrameCodec {
    /// Create a codec rejecting frames longer than `max_frame_bytes`.
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_frame_bytes),
            max_frame_bytes,
        }
    }

    /// Get the frame size limit.
    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    fn frame(&self, line: Result<Option<String>, LinesCodecError>) -> Result<Option<Frame>, DecodeError> {
        match line {
            Ok(line) => Ok(line.map(Ok)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Err(DecodeError::FrameTooLarge {
                max: self.max_frame_bytes,
            }))),
            Err(LinesCodecError::Io(e)) if e.kind() == io::ErrorKind::InvalidData => {
                Ok(Some(Err(DecodeError::malformed("frame is not valid UTF-8"))))
            }
            Err(LinesCodecError::Io(e)) => Err(DecodeError::Io(e)),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

fn is_blank(frame: &Option<Frame>) -> bool {
    matches!(frame, Some(Ok(line)) if line.trim().is_empty())
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let line = self.lines.decode(src);
            let frame = self.frame(line)?;
            if !is_blank(&frame) {
                return Ok(frame);
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let line = self.lines.decode_eof(src);
            let frame = self.frame(line)?;
            if !is_blank(&frame) {
                return Ok(frame);
            }
        }
    }
}

impl<T: Serialize> Encoder<T> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let frame = encode_frame(&item).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        dst.extend_from_slice(&frame);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::message::{
        Arguments, ErrorCode, ToolCallChunk, ToolCallRequest,
    };
    use futures::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio_util::codec::{FramedRead, FramedWrite};

    fn call(tool: &str) -> ClientMessage {
        ClientMessage::Call(ToolCallRequest {
            call_id: CallId::from("c-1"),
            tool: tool.to_string(),
            arguments: Arguments::new().with("name", "Ford"),
        })
    }

    #[test]
    fn test_request_survives_encoding() {
        let frame = encode_request(&call("greet")).unwrap();
        assert_eq!(frame.last(), Some(&FRAME_DELIMITER));
        assert_eq!(frame.iter().filter(|b| **b == FRAME_DELIMITER).count(), 1);
        assert_eq!(decode_request(&frame).unwrap(), call("greet"));
    }

    #[test]
    fn test_embedded_newlines_stay_escaped() {
        let chunk = ToolCallChunk::data(CallId::from("c"), 0, json!("a\nb\n"), true);
        let frame = encode_response(&ServerMessage::Chunk(chunk.clone())).unwrap();
        assert_eq!(frame.iter().filter(|b| **b == FRAME_DELIMITER).count(), 1);
        assert_eq!(decode_response(&frame).unwrap(), ServerMessage::Chunk(chunk));
    }

    #[test]
    fn test_decode_request_rejects_duplicate_arguments() {
        let frame = br#"{"type":"call","call_id":"c-1","tool":"greet","arguments":{"name":"a","name":"b"}}"#;
        let Err(DecodeError::Malformed(message)) = decode_request(frame) else {
            panic!("expected a malformed frame");
        };
        assert!(message.contains("duplicate argument `name`"));
    }

    #[test]
    fn test_decode_request_rejects_non_object_arguments() {
        let frame = br#"{"type":"call","call_id":"c-1","tool":"greet","arguments":["Ford"]}"#;
        assert!(matches!(
            decode_request(frame),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_request_keeps_syntax_errors_as_json() {
        assert!(matches!(
            decode_request(br#"{"type":"call","#),
            Err(DecodeError::Json(_))
        ));
    }

    #[test]
    fn test_decode_request_passes_unknown_arguments_through() {
        let frame = br#"{"type":"call","call_id":"c-1","tool":"greet","arguments":{"name":"Ford","mood":"cheery"}}"#;
        let Ok(ClientMessage::Call(request)) = decode_request(frame) else {
            panic!("expected a call");
        };
        assert_eq!(request.arguments.get("mood"), Some(&json!("cheery")));
    }

    #[test]
    fn test_decode_request_defaults_missing_arguments() {
        let frame = br#"{"type":"call","call_id":"c-1","tool":"ping"}"#;
        let Ok(ClientMessage::Call(request)) = decode_request(frame) else {
            panic!("expected a call");
        };
        assert!(request.arguments.is_empty());
    }

    #[test]
    fn test_decode_request_rejects_empty_tool_name() {
        let frame = br#"{"type":"call","call_id":"c-1","tool":" "}"#;
        assert!(matches!(
            decode_request(frame),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_response_rejects_non_terminal_error() {
        let frame = br#"{"type":"chunk","call_id":"c","seq":0,"body":{"kind":"error","code":"handler_failed","message":"x"},"terminal":false}"#;
        assert!(matches!(
            decode_response(frame),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_decode_response_rejects_continued_terminal() {
        let frame = br#"{"type":"chunk","call_id":"c","seq":0,"body":{"kind":"data","value":"ab","continued":true},"terminal":true}"#;
        assert!(matches!(
            decode_response(frame),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_whole_data_chunk_omits_continued() {
        let chunk = ToolCallChunk::data(CallId::from("c"), 0, json!(1), true);
        let frame = encode_response(&ServerMessage::Chunk(chunk)).unwrap();
        assert!(!String::from_utf8_lossy(&frame).contains("continued"));
    }

    #[test]
    fn test_salvage_call_id() {
        let frame = br#"{"type":"call","call_id":"c-9","tool":"greet","arguments":[1]}"#;
        assert_eq!(salvage_call_id(frame), Some(CallId::from("c-9")));
        assert_eq!(salvage_call_id(br#"{"type":"cancel","call_id":"c-9"}"#), None);
        assert_eq!(salvage_call_id(b"not json"), None);
    }

    fn lines(codec: &mut FrameCodec, buf: &mut BytesMut) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_decoder_handles_arbitrary_splits() {
        let mut wire = Vec::new();
        for n in 0..3u64 {
            let chunk = ToolCallChunk::data(CallId::from("c"), n, json!(n), n == 2);
            wire.extend_from_slice(&encode_response(&ServerMessage::Chunk(chunk)).unwrap());
        }

        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        let mut frames = Vec::new();
        for byte in &wire {
            buf.extend_from_slice(std::slice::from_ref(byte));
            for frame in lines(&mut codec, &mut buf) {
                frames.push(decode_response(frame.unwrap().as_bytes()).unwrap());
            }
        }

        assert_eq!(frames.len(), 3);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decoder_skips_blank_lines_and_crlf() {
        let mut codec = FrameCodec::new(64);
        let mut buf = BytesMut::from(&b"\n\r\n{\"a\":1}\r\n"[..]);
        let frames = lines(&mut codec, &mut buf);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_deref().unwrap(), "{\"a\":1}");
    }

    #[test]
    fn test_decoder_resynchronises_after_oversized_frame() {
        let mut codec = FrameCodec::new(8);
        let mut buf = BytesMut::from(&b"0123456789abcdef"[..]);
        assert!(matches!(
            codec.decode(&mut buf).unwrap(),
            Some(Err(DecodeError::FrameTooLarge { max: 8 }))
        ));
        buf.extend_from_slice(b"ghij\n{}\n");
        let frames = lines(&mut codec, &mut buf);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].as_deref().unwrap(), "{}");
    }

    #[test]
    fn test_decoder_rejects_complete_oversized_frame() {
        let mut codec = FrameCodec::new(4);
        let mut buf = BytesMut::from(&b"{\"long\":1}\n{}\n"[..]);
        let frames = lines(&mut codec, &mut buf);
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], Err(DecodeError::FrameTooLarge { max: 4 })));
        assert_eq!(frames[1].as_deref().unwrap(), "{}");
    }

    #[test]
    fn test_decoder_reports_invalid_utf8_and_continues() {
        let mut codec = FrameCodec::new(64);
        let mut buf = BytesMut::from(&b"\xff\xfe\n{}\n"[..]);
        let frames = lines(&mut codec, &mut buf);
        assert!(matches!(frames[0], Err(DecodeError::Malformed(_))));
        assert_eq!(frames[1].as_deref().unwrap(), "{}");
    }

    #[test]
    fn test_decoder_flushes_unterminated_frame_at_eof() {
        let mut codec = FrameCodec::new(64);
        let mut buf = BytesMut::from(&b"{}\n{\"tail\":true}"[..]);
        assert_eq!(codec.decode_eof(&mut buf).unwrap().unwrap().unwrap(), "{}");
        assert_eq!(
            codec.decode_eof(&mut buf).unwrap().unwrap().unwrap(),
            "{\"tail\":true}"
        );
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_framed_read_until_eof() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&encode_request(&call("greet")).unwrap());
        wire.extend_from_slice(b"not json\n");
        wire.extend_from_slice(
            &encode_request(&ClientMessage::Cancel {
                call_id: CallId::from("c-1"),
            })
            .unwrap(),
        );

        let mut frames = FramedRead::new(&wire[..], FrameCodec::default());
        let first = frames.next().await.unwrap().unwrap().unwrap();
        assert_eq!(decode_request(first.as_bytes()).unwrap(), call("greet"));
        let garbage = frames.next().await.unwrap().unwrap().unwrap();
        assert!(matches!(
            decode_request(garbage.as_bytes()),
            Err(DecodeError::Json(_))
        ));
        let second = frames.next().await.unwrap().unwrap().unwrap();
        assert!(matches!(
            decode_request(second.as_bytes()).unwrap(),
            ClientMessage::Cancel { .. }
        ));
        assert!(frames.next().await.is_none());
    }

    #[tokio::test]
    async fn test_framed_write_then_read_back() {
        let (client, server) = tokio::io::duplex(1024);
        let error = ToolCallChunk::error(CallId::from("c"), 0, ErrorCode::HandlerFailed, "boom");

        let mut sink = FramedWrite::new(client, FrameCodec::default());
        sink.send(ServerMessage::Chunk(error.clone())).await.unwrap();
        drop(sink);

        let mut frames = FramedRead::new(server, FrameCodec::default());
        let read = frames.next().await.unwrap().unwrap().unwrap();
        assert_eq!(decode_response(read.as_bytes()).unwrap(), ServerMessage::Chunk(error));
    }
}

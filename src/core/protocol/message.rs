//! Wire message types exchanged between tool clients and tool servers.
//!
//! Every message is a JSON object carrying a `type` tag. Clients send
//! [`ClientMessage`] frames and servers answer with [`ServerMessage`] frames.

use std::fmt;

use serde::de::{self, DeserializeOwned, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::error::DecodeError;

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier of a single tool invocation attempt.
///
/// Generated by the client, unique per attempt: a retried call gets a new id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    /// Generate a fresh random call id.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CallId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ============================================================================
// Arguments
// ============================================================================

/// Argument mapping passed to a tool: argument name to JSON value.
///
/// Deserialization rejects anything that is not a JSON object, empty names
/// and duplicate names. Values are never checked against the tool's schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Arguments(Map<String, Value>);

impl Arguments {
    /// Create an empty argument mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an argument, replacing any previous value with the same name.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Build arguments from an arbitrary JSON value.
    ///
    /// `null` is accepted as an empty mapping.
    pub fn from_value(value: Value) -> Result<Self, DecodeError> {
        match value {
            Value::Null => Ok(Self::new()),
            Value::Object(map) => {
                if map.keys().any(|k| k.is_empty()) {
                    return Err(DecodeError::malformed("argument name cannot be empty"));
                }
                Ok(Self(map))
            }
            other => Err(DecodeError::malformed(format!(
                "arguments must be an object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Get a single argument by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Number of arguments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no arguments were supplied.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Deserialize the mapping into a typed parameters struct.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.0.clone()))
    }

    /// Convert into a JSON object value.
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl TryFrom<Value> for Arguments {
    type Error = DecodeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

impl<'de> Deserialize<'de> for Arguments {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ArgumentsVisitor;

        impl<'de> Visitor<'de> for ArgumentsVisitor {
            type Value = Arguments;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object mapping argument names to values")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut map = Map::new();
                while let Some(name) = access.next_key::<String>()? {
                    if name.is_empty() {
                        return Err(de::Error::custom("argument name cannot be empty"));
                    }
                    if map.contains_key(&name) {
                        return Err(de::Error::custom(format_args!(
                            "duplicate argument `{name}`"
                        )));
                    }
                    let value: Value = access.next_value()?;
                    map.insert(name, value);
                }
                Ok(Arguments(map))
            }
        }

        deserializer.deserialize_map(ArgumentsVisitor)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Tool metadata
// ============================================================================

/// JSON type of a declared tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
}

/// One entry of a tool's ordered parameter schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParamType,
    pub required: bool,
}

impl ParamSpec {
    /// A required parameter.
    pub fn required(name: impl Into<String>, kind: ParamType) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
        }
    }

    /// An optional parameter.
    pub fn optional(name: impl Into<String>, kind: ParamType) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
        }
    }
}

/// Wire view of a registered tool, as returned by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
}

// ============================================================================
// Calls and chunks
// ============================================================================

/// A request to invoke one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub call_id: CallId,
    pub tool: String,
    #[serde(default)]
    pub arguments: Arguments,
}

/// Error codes carried by terminal error chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// No tool with the requested name is registered.
    ToolNotFound,
    /// The request frame could not be decoded.
    InvalidRequest,
    /// The handler returned an error or panicked.
    HandlerFailed,
}

/// Payload of a single chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChunkBody {
    /// A fragment of the tool's result.
    ///
    /// `continued` marks a slice of a long string whose remainder follows in
    /// the next chunk.
    Data {
        value: Value,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        continued: bool,
    },
    /// The call failed. Only valid on a terminal chunk.
    Error { code: ErrorCode, message: String },
}

/// One incremental unit of a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallChunk {
    pub call_id: CallId,
    pub seq: u64,
    pub body: ChunkBody,
    pub terminal: bool,
}

impl ToolCallChunk {
    /// A data chunk.
    pub fn data(call_id: CallId, seq: u64, value: Value, terminal: bool) -> Self {
        Self {
            call_id,
            seq,
            body: ChunkBody::Data {
                value,
                continued: false,
            },
            terminal,
        }
    }

    /// A terminal error chunk.
    pub fn error(call_id: CallId, seq: u64, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            call_id,
            seq,
            body: ChunkBody::Error {
                code,
                message: message.into(),
            },
            terminal: true,
        }
    }
}

// ============================================================================
// Envelopes
// ============================================================================

/// Frames sent from a client to a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask for the server's tool list.
    ListTools { request_id: u64 },
    /// Invoke a tool.
    Call(ToolCallRequest),
    /// Stop delivering chunks for a call the client abandoned.
    Cancel { call_id: CallId },
}

/// Frames sent from a server to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Answer to [`ClientMessage::ListTools`], tools in registration order.
    Tools {
        request_id: u64,
        tools: Vec<ToolDescriptor>,
    },
    /// A result chunk for an in-flight call.
    Chunk(ToolCallChunk),
    /// A frame that could not be attributed to any call was rejected.
    ProtocolError { message: String },
}

//! Configuration management for the tool bridge.
//!
//! This module provides a centralized configuration structure that can be
//! populated from environment variables (optionally via a `.env` file) or
//! defaults. Each section is handed to the component it configures at
//! construction time.

use std::str::FromStr;

use super::protocol::DEFAULT_MAX_FRAME_BYTES;
use super::transport::TransportConfig;
use crate::domains::agent::ToolChoice;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Tool server identification and limits.
    pub server: ServerConfig,

    /// Logging configuration.
    pub logging: LoggingConfig,

    /// Transport the server listens on.
    pub transport: TransportConfig,

    /// Tool client session options.
    pub client: ClientConfig,

    /// Agent orchestrator options.
    pub agent: AgentConfig,
}

/// Tool server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The name of the server.
    pub name: String,

    /// The version of the server.
    pub version: String,

    /// String results longer than this are sliced into several chunks.
    /// Zero disables slicing.
    pub max_chunk_bytes: usize,

    /// Largest frame accepted from a client.
    pub max_frame_bytes: usize,

    /// Outbound frame queue depth per connection.
    pub outbound_buffer: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "trace").
    pub level: String,

    /// Whether to include timestamps in log output.
    pub with_timestamps: bool,
}

/// Tool client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Server address as `host:port`.
    pub endpoint: String,

    /// Reuse the discovered tool list until the next reconnect.
    pub cache_tool_list: bool,

    /// Bound on time-to-first-chunk of a call, and on connects.
    pub request_timeout_ms: u64,

    /// Extra attempts after the first failed one.
    pub max_retry_attempts: u32,

    /// Delay before the first retry; doubles on each further retry.
    pub retry_backoff_ms: u64,

    /// Optional bound on the gap between chunks once a call is streaming.
    pub stream_idle_timeout_ms: Option<u64>,
}

/// Agent orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// System instructions handed to the reasoner.
    pub instructions: Option<String>,

    /// Run all tool calls decided in one turn concurrently.
    pub parallel_tool_calls: bool,

    /// Tool selection policy for the first turn.
    pub tool_choice: ToolChoice,

    /// Upper bound on reasoning turns per run.
    pub max_turns: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "tool-bridge".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            max_chunk_bytes: 16 * 1024,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            outbound_buffer: 64,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_timestamps: true,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "127.0.0.1:8080".to_string(),
            cache_tool_list: false,
            request_timeout_ms: 10_000,
            max_retry_attempts: 0,
            retry_backoff_ms: 1_000,
            stream_idle_timeout_ms: None,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            instructions: None,
            parallel_tool_calls: false,
            tool_choice: ToolChoice::Auto,
            max_turns: 10,
        }
    }
}

/// Read and parse an environment variable, warning on unparsable values.
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid value for {}: {:?}", key, raw);
            None
        }
    }
}

/// Read a boolean flag; anything but `false`/`0` counts as set.
fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| v.to_lowercase() != "false" && v != "0")
}

impl Config {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from environment variables.
    ///
    /// Environment variables are expected to be prefixed with `MCP_`.
    /// For example: `MCP_SERVER_NAME`, `MCP_LOG_LEVEL`, `MCP_ENDPOINT`.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let mut config = Self::default();

        if let Ok(name) = std::env::var("MCP_SERVER_NAME") {
            config.server.name = name;
        }
        if let Some(bytes) = env_parse("MCP_MAX_CHUNK_BYTES") {
            config.server.max_chunk_bytes = bytes;
        }
        if let Some(bytes) = env_parse("MCP_MAX_FRAME_BYTES") {
            config.server.max_frame_bytes = bytes;
        }

        if let Ok(level) = std::env::var("MCP_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(with_timestamps) = env_flag("MCP_LOG_TIMESTAMPS") {
            config.logging.with_timestamps = with_timestamps;
        }

        // Load transport configuration from environment
        config.transport = TransportConfig::from_env();

        config.client = ClientConfig::from_env();
        config.agent = AgentConfig::from_env();

        config
    }
}

impl ClientConfig {
    /// Load client options from environment variables.
    ///
    /// `MCP_ENDPOINT` wins over `MCP_CLIENT_HOST` + `PORT`.
    pub fn from_env() -> Self {
        let mut client = Self::default();

        if let Ok(endpoint) = std::env::var("MCP_ENDPOINT") {
            client.endpoint = endpoint;
        } else {
            let host = std::env::var("MCP_CLIENT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
            let port = env_parse::<u16>("PORT").unwrap_or(8080);
            client.endpoint = format!("{host}:{port}");
        }
        info!("Tool client endpoint: {}", client.endpoint);

        if let Some(cache) = env_flag("MCP_CACHE_TOOL_LIST") {
            client.cache_tool_list = cache;
        }
        if let Some(timeout) = env_parse("MCP_REQUEST_TIMEOUT_MS") {
            client.request_timeout_ms = timeout;
        }
        if let Some(attempts) = env_parse("MCP_MAX_RETRY_ATTEMPTS") {
            client.max_retry_attempts = attempts;
        }
        if let Some(backoff) = env_parse("MCP_RETRY_BACKOFF_MS") {
            client.retry_backoff_ms = backoff;
        }
        if let Some(idle) = env_parse("MCP_STREAM_IDLE_TIMEOUT_MS") {
            client.stream_idle_timeout_ms = Some(idle);
        }

        client
    }
}

impl AgentConfig {
    /// Load orchestrator options from environment variables.
    pub fn from_env() -> Self {
        let mut agent = Self::default();

        if let Ok(instructions) = std::env::var("MCP_AGENT_INSTRUCTIONS") {
            agent.instructions = Some(instructions);
        }
        if let Some(parallel) = env_flag("MCP_PARALLEL_TOOL_CALLS") {
            agent.parallel_tool_calls = parallel;
        }
        if let Some(choice) = env_parse("MCP_TOOL_CHOICE") {
            agent.tool_choice = choice;
        }
        if let Some(turns) = env_parse("MCP_MAX_TURNS") {
            agent.max_turns = turns;
        }

        agent
    }
}

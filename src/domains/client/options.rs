//! Session options.

use std::time::Duration;

use crate::core::config::ClientConfig;
use crate::core::protocol::DEFAULT_MAX_FRAME_BYTES;

/// Options fixed for the lifetime of a [`Session`](super::Session).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Serve `list_tools` from the cache while it is fresh.
    pub cache_tool_list: bool,

    /// Bound on connect time and on time-to-first-chunk of a call. Never
    /// applies once a call is streaming.
    pub request_timeout: Duration,

    /// Extra attempts after a failed connect or an unanswered call.
    pub max_retry_attempts: u32,

    /// Delay before the first retry; doubles for each further one.
    pub retry_backoff: Duration,

    /// Optional bound on the gap between two chunks of a streaming call.
    pub stream_idle_timeout: Option<Duration>,

    /// Largest frame accepted from the server.
    pub max_frame_bytes: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for ClientOptions {
    fn from(config: &ClientConfig) -> Self {
        Self {
            cache_tool_list: config.cache_tool_list,
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            max_retry_attempts: config.max_retry_attempts,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            stream_idle_timeout: config.stream_idle_timeout_ms.map(Duration::from_millis),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl ClientOptions {
    pub fn with_cache_tool_list(mut self, enabled: bool) -> Self {
        self.cache_tool_list = enabled;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_retry_attempts(mut self, attempts: u32) -> Self {
        self.max_retry_attempts = attempts;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn with_stream_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stream_idle_timeout = timeout;
        self
    }

    /// Total number of attempts, the first one included.
    pub fn total_attempts(&self) -> u32 {
        self.max_retry_attempts.saturating_add(1)
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.retry_backoff.saturating_mul(factor)
    }
}

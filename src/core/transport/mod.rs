//! Transport layer for the tool server.
//!
//! This module provides different transport implementations:
//! - **STDIO**: one session over standard input/output - feature: `stdio`
//! - **TCP**: one session per accepted connection - feature: `tcp`
//! - **HTTP**: one frame per POST, streamed NDJSON answers - feature: `http`
//!
//! STDIO and TCP carry the same newline-delimited frames and hand the byte
//! stream to [`ToolServer::serve`](crate::core::ToolServer::serve).
//!
//! # Feature Flags
//!
//! - `stdio` (default): STDIO transport - minimal dependencies
//! - `tcp` (default): TCP transport - adds tokio/net
//! - `http`: HTTP transport - adds axum, tower, tower-http

mod config;
mod error;
mod service;

#[cfg(feature = "http")]
pub mod http;

#[cfg(feature = "tcp")]
pub mod tcp;

#[cfg(feature = "stdio")]
pub mod stdio;

pub use config::TransportConfig;
pub use error::{TransportError, TransportResult};
pub use service::TransportService;

#[cfg(feature = "tcp")]
pub use config::TcpConfig;

#[cfg(feature = "http")]
pub use config::HttpConfig;

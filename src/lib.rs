//! Tool Bridge Library
//!
//! A streaming tool-call bridge: a server exposing named tools over a
//! newline-delimited JSON protocol, a client session that discovers and
//! calls those tools with retries and chunk reassembly, and an agent
//! orchestrator that feeds tool results back into a reasoner.
//!
//! # Architecture
//!
//! - **core**: configuration, error handling, logging, the wire protocol,
//!   the tool server and its transports
//! - **domains**: business logic organized by bounded contexts
//!   - **tools**: the tool registry and built-in tools
//!   - **client**: sessions, retries, reassembly and the tool list cache
//!   - **agent**: the orchestrator loop and the reasoner seam
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use tool_bridge::core::config::ServerConfig;
//! use tool_bridge::core::protocol::Arguments;
//! use tool_bridge::domains::client::{ClientOptions, InProcessConnector, Session};
//! use tool_bridge::ToolServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = ToolServer::new(ServerConfig::default());
//!     let connector = Arc::new(InProcessConnector::new(server));
//!     let session = Session::connect(connector, ClientOptions::default()).await?;
//!
//!     let result = session
//!         .call_tool("greet", Arguments::new().with("name", "Ford"))
//!         .await?;
//!     println!("{}", result.value());
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod domains;

// Re-export commonly used types for convenience
pub use core::{Config, Error, Result, ToolServer};
pub use domains::agent::{AgentEvent, AgentOptions, Orchestrator, Reasoner, ToolChoice};
pub use domains::client::{CallError, ClientOptions, ConnectionError, Session, ToolResult};

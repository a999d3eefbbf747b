//! Domains module containing business logic organized by bounded contexts.
//!
//! - **tools**: server-side tool registry and built-in tools
//! - **client**: sessions that discover and call tools on a server
//! - **agent**: the orchestrator driving reasoning and tool calls

pub mod agent;
pub mod client;
pub mod tools;

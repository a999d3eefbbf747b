//! Core module containing shared infrastructure components.
//!
//! This module provides the foundational building blocks of the tool bridge:
//! configuration, error handling, logging, the wire protocol, the tool
//! server and its transports.

pub mod call;
pub mod config;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod transport;

pub use call::CallState;
pub use config::Config;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use server::ToolServer;
pub use transport::{TransportConfig, TransportService};

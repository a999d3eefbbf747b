//! Tool client domain.
//!
//! - `session.rs` - connection lifecycle, calls, retries, tool discovery
//! - `connector.rs` - how a session reaches a server (TCP, in-process)
//! - `reassembly.rs` - ordering chunks into results
//! - `cache.rs` - tool list snapshots
//! - `options.rs` - per-session options
//! - `error.rs` - connection and call errors

mod cache;
mod connector;
mod error;
mod options;
mod reassembly;
mod session;

pub use cache::ToolListCacheEntry;
#[cfg(feature = "tcp")]
pub use connector::TcpConnector;
pub use connector::{Connector, InProcessConnector, Transport};
pub use error::{CallError, CallErrorKind, ConnectionError};
pub use options::ClientOptions;
pub use reassembly::{Progress, ReassemblyError, Reassembler, ToolResult};
pub use session::Session;

#[cfg(test)]
pub(crate) use connector::testing;

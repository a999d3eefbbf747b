//! Tools domain module.
//!
//! This module handles everything a tool server knows about tools.
//! Tools are named functions that clients discover and invoke remotely.
//!
//! ## Architecture
//!
//! - `definitions/` - Built-in tool implementations (one file per tool)
//! - `registry.rs` - Tool registry (registration, lookup, ordered listing)
//! - `handlers.rs` - Handler trait and tool output type
//! - `error.rs` - Tool-specific error types
//!
//! ## Adding a New Tool
//!
//! 1. Create a new file in `definitions/` (e.g., `my_tool.rs`)
//! 2. Define params, `execute()` and `definition()`
//! 3. Export in `definitions/mod.rs`
//! 4. Register it in `builtin_registry()` in `registry.rs`

pub mod definitions;
mod error;
mod handlers;
mod registry;

pub use error::{RegistryError, ToolError};
pub use handlers::{ToolHandler, ToolOutput};
pub use registry::{ToolDefinition, ToolIter, ToolRegistry, builtin_registry};

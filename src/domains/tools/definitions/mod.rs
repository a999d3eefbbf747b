//! Tool definitions module.
//!
//! This module exports all built-in tool definitions.
//! Each tool is defined in its own file for better maintainability.

pub mod countdown;
pub mod greet;

pub use countdown::{CountdownParams, CountdownTool};
pub use greet::{GreetParams, GreetTool};

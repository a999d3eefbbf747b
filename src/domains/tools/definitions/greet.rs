//! Greeting tool definition.
//!
//! A tool that greets a person by name.

use serde::Deserialize;
use tracing::{info, instrument};

use crate::core::protocol::{Arguments, ParamSpec, ParamType};
use crate::domains::tools::{ToolDefinition, ToolError, ToolOutput};

// ============================================================================
// Tool Parameters
// ============================================================================

/// Parameters for the greeting tool.
#[derive(Debug, Clone, Deserialize)]
pub struct GreetParams {
    /// Name of the person to greet.
    pub name: String,
}

// ============================================================================
// Tool Definition
// ============================================================================

/// Greeting tool - returns `Hello, {name}!`.
pub struct GreetTool;

impl GreetTool {
    /// Tool name as registered.
    pub const NAME: &'static str = "greet";

    /// Tool description shown to clients.
    pub const DESCRIPTION: &'static str = "Greet a person by name.";

    /// Execute the tool logic.
    #[instrument(skip_all, fields(name = %params.name))]
    pub fn execute(params: &GreetParams) -> String {
        info!("Greet tool called");
        format!("Hello, {}!", params.name)
    }

    /// Build the registry entry for this tool.
    pub fn definition() -> ToolDefinition {
        ToolDefinition::new(Self::NAME, |args: Arguments| async move {
            let params: GreetParams = args.parse()?;
            Ok::<_, ToolError>(ToolOutput::value(Self::execute(&params)))
        })
        .with_description(Self::DESCRIPTION)
        .with_param(ParamSpec::required("name", ParamType::String))
    }
}

//! Orchestrator options.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::config::AgentConfig;

/// Which tools the reasoner may or must use.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ToolChoice {
    /// The reasoner decides.
    #[default]
    Auto,
    /// The reasoner must call some tool; a turn without one fails the run.
    Required,
    /// Only this tool is offered; calls to any other fail locally.
    Named(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("tool choice cannot be empty")]
pub struct ParseToolChoiceError;

impl FromStr for ToolChoice {
    type Err = ParseToolChoiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" => Err(ParseToolChoiceError),
            "auto" => Ok(Self::Auto),
            "required" => Ok(Self::Required),
            name => Ok(Self::Named(name.to_string())),
        }
    }
}

impl TryFrom<String> for ToolChoice {
    type Error = ParseToolChoiceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ToolChoice> for String {
    fn from(choice: ToolChoice) -> Self {
        choice.to_string()
    }
}

impl fmt::Display for ToolChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => f.write_str("auto"),
            Self::Required => f.write_str("required"),
            Self::Named(name) => f.write_str(name),
        }
    }
}

impl ToolChoice {
    /// Whether a tool with this name may be called under this choice.
    pub fn allows(&self, name: &str) -> bool {
        match self {
            Self::Named(allowed) => allowed == name,
            Self::Auto | Self::Required => true,
        }
    }
}

/// Options of one [`Orchestrator`](super::Orchestrator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOptions {
    /// System instructions handed to the reasoner on every turn.
    pub instructions: Option<String>,

    /// Run all tool calls decided in one turn concurrently.
    pub parallel_tool_calls: bool,

    /// Tool policy for the first turn; later turns use `Auto`.
    pub tool_choice: ToolChoice,

    /// Reasoning turns allowed per run.
    pub max_turns: u32,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self::from(&AgentConfig::default())
    }
}

impl From<&AgentConfig> for AgentOptions {
    fn from(config: &AgentConfig) -> Self {
        Self {
            instructions: config.instructions.clone(),
            parallel_tool_calls: config.parallel_tool_calls,
            tool_choice: config.tool_choice.clone(),
            max_turns: config.max_turns,
        }
    }
}

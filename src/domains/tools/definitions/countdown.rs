//! Countdown tool definition.
//!
//! A streaming tool: one chunk per tick, ending with `liftoff`.

use std::time::Duration;

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, instrument};

use crate::core::protocol::{Arguments, ParamSpec, ParamType};
use crate::domains::tools::{ToolDefinition, ToolError, ToolOutput};

/// Largest accepted starting value.
const MAX_FROM: u32 = 1000;

// ============================================================================
// Tool Parameters
// ============================================================================

/// Parameters for the countdown tool.
#[derive(Debug, Clone, Deserialize)]
pub struct CountdownParams {
    /// Number to count down from.
    pub from: u32,

    /// Delay before each tick, in milliseconds.
    #[serde(default)]
    pub interval_ms: u64,
}

// ============================================================================
// Tool Definition
// ============================================================================

/// Countdown tool - streams `"{n}\n"` for n = from..1, then `"liftoff"`.
pub struct CountdownTool;

impl CountdownTool {
    /// Tool name as registered.
    pub const NAME: &'static str = "countdown";

    /// Tool description shown to clients.
    pub const DESCRIPTION: &'static str =
        "Count down from a number, streaming one line per tick and ending with liftoff.";

    /// Execute the tool logic, producing the tick stream.
    #[instrument(skip_all, fields(from = params.from))]
    pub fn execute(
        params: &CountdownParams,
    ) -> Result<BoxStream<'static, Result<Value, ToolError>>, ToolError> {
        if params.from > MAX_FROM {
            return Err(ToolError::invalid_arguments(format!(
                "from must be at most {MAX_FROM}"
            )));
        }
        info!("Countdown tool called");

        let interval = Duration::from_millis(params.interval_ms);
        let ticks = stream::iter((0..=params.from).rev()).then(move |n| async move {
            if !interval.is_zero() {
                tokio::time::sleep(interval).await;
            }
            let tick = if n == 0 {
                "liftoff".to_string()
            } else {
                format!("{n}\n")
            };
            Ok::<_, ToolError>(Value::String(tick))
        });
        Ok(ticks.boxed())
    }

    /// Build the registry entry for this tool.
    pub fn definition() -> ToolDefinition {
        ToolDefinition::new(Self::NAME, |args: Arguments| async move {
            let params: CountdownParams = args.parse()?;
            Ok::<_, ToolError>(ToolOutput::stream(Self::execute(&params)?))
        })
        .with_description(Self::DESCRIPTION)
        .with_param(ParamSpec::required("from", ParamType::Integer))
        .with_param(ParamSpec::optional("interval_ms", ParamType::Integer))
    }
}

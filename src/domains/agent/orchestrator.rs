//! The agent loop.
//!
//! Each turn hands the context to the reasoner, forwards its text deltas,
//! runs the tool calls it decided on, folds the complete results back into
//! the context and goes again, until a turn decides no tool call.

use std::sync::Arc;

use futures::StreamExt;
use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use super::events::{AgentEvent, EventStream};
use super::options::{AgentOptions, ToolChoice};
use super::reasoner::{ContextItem, Reasoner, ReasoningEvent, ReasoningRequest};
use crate::core::protocol::{Arguments, ToolDescriptor};
use crate::domains::client::{CallError, Session, ToolResult};

const EVENT_BUFFER: usize = 32;

/// Drives reasoning and tool calls for one agent.
#[derive(Clone)]
pub struct Orchestrator {
    session: Arc<Session>,
    reasoner: Arc<dyn Reasoner>,
    options: AgentOptions,
}

impl Orchestrator {
    pub fn new(session: Arc<Session>, reasoner: Arc<dyn Reasoner>, options: AgentOptions) -> Self {
        Self {
            session,
            reasoner,
            options,
        }
    }

    pub fn options(&self) -> &AgentOptions {
        &self.options
    }

    /// Start a run on `input`. Every call gives a new, independent run.
    pub fn run(&self, input: impl Into<String>) -> EventStream {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let run = Run {
            orchestrator: self.clone(),
            events: tx,
        };
        EventStream::new(Box::pin(run.drive(input.into())), rx)
    }
}

/// The receiver of a run's events went away.
struct Detached;

type Decision = (String, Arguments);

struct Run {
    orchestrator: Orchestrator,
    events: mpsc::Sender<AgentEvent>,
}

impl Run {
    async fn drive(self, input: String) {
        match self.turns(input).await {
            Ok(Ok(())) => info!("Run finished"),
            Ok(Err(reason)) => {
                warn!("Run failed: {}", reason);
                let _ = self.emit(AgentEvent::RunFailed { reason }).await;
            }
            Err(Detached) => debug!("event stream dropped, stopping run"),
        }
    }

    async fn emit(&self, event: AgentEvent) -> Result<(), Detached> {
        self.events.send(event).await.map_err(|_| Detached)
    }

    #[instrument(skip_all)]
    async fn turns(&self, input: String) -> Result<Result<(), String>, Detached> {
        let options = &self.orchestrator.options;
        let tools = match self.orchestrator.session.list_tools().await {
            Ok(tools) => tools,
            Err(e) => return Ok(Err(format!("tool discovery failed: {e}"))),
        };

        let mut context = vec![ContextItem::User(input)];
        let mut tool_choice = options.tool_choice.clone();

        for turn in 1..=options.max_turns {
            debug!(turn, %tool_choice, "reasoning");
            let request = ReasoningRequest {
                instructions: options.instructions.clone(),
                context: context.clone(),
                tools: offered(&tools, &tool_choice),
                tool_choice: tool_choice.clone(),
                parallel_tool_calls: options.parallel_tool_calls,
            };
            let mut stream = match self.orchestrator.reasoner.reason(request).await {
                Ok(stream) => stream,
                Err(e) => return Ok(Err(e.to_string())),
            };

            let mut text = String::new();
            let mut decisions: Vec<Decision> = Vec::new();
            while let Some(event) = stream.next().await {
                match event {
                    Ok(ReasoningEvent::TextDelta(delta)) => {
                        text.push_str(&delta);
                        self.emit(AgentEvent::TextDelta(delta)).await?;
                    }
                    Ok(ReasoningEvent::ToolCall { name, arguments }) => {
                        decisions.push((name, arguments))
                    }
                    Err(e) => return Ok(Err(e.to_string())),
                }
            }

            if !text.is_empty() {
                context.push(ContextItem::Assistant(text));
            }
            if decisions.is_empty() {
                if tool_choice == ToolChoice::Required {
                    return Ok(Err("tool call required".to_string()));
                }
                return Ok(Ok(()));
            }

            context.extend(decisions.iter().map(|(name, arguments)| ContextItem::ToolCall {
                name: name.clone(),
                arguments: arguments.clone(),
            }));
            let outcomes = self.invoke_all(decisions, &tool_choice).await?;
            context.extend(outcomes);
            tool_choice = ToolChoice::Auto;
        }

        Ok(Err(format!("exceeded {} turn(s)", options.max_turns)))
    }

    /// Run one turn's tool calls, emitting their events in decision order.
    async fn invoke_all(
        &self,
        decisions: Vec<Decision>,
        tool_choice: &ToolChoice,
    ) -> Result<Vec<ContextItem>, Detached> {
        let mut outcomes = Vec::with_capacity(decisions.len());

        if self.orchestrator.options.parallel_tool_calls {
            for (name, _) in &decisions {
                self.emit(AgentEvent::ToolCallStarted { name: name.clone() }).await?;
            }
            let calls = decisions
                .iter()
                .map(|(name, arguments)| self.invoke(name, arguments.clone(), tool_choice));
            let results = join_all(calls).await;
            for ((name, _), result) in decisions.into_iter().zip(results) {
                outcomes.push(self.settle(name, result).await?);
            }
        } else {
            for (name, arguments) in decisions {
                self.emit(AgentEvent::ToolCallStarted { name: name.clone() }).await?;
                let result = self.invoke(&name, arguments, tool_choice).await;
                outcomes.push(self.settle(name, result).await?);
            }
        }
        Ok(outcomes)
    }

    async fn invoke(
        &self,
        name: &str,
        arguments: Arguments,
        tool_choice: &ToolChoice,
    ) -> Result<ToolResult, CallError> {
        if !tool_choice.allows(name) {
            return Err(CallError::ToolNotFound {
                name: name.to_string(),
            });
        }
        self.orchestrator.session.call_tool(name, arguments).await
    }

    /// Emit the outcome of a call and turn it into context.
    async fn settle(
        &self,
        name: String,
        result: Result<ToolResult, CallError>,
    ) -> Result<ContextItem, Detached> {
        match result {
            Ok(result) => {
                let item = ContextItem::ToolResult {
                    name: name.clone(),
                    value: result.value().clone(),
                };
                self.emit(AgentEvent::ToolCallCompleted { name, result }).await?;
                Ok(item)
            }
            Err(error) => {
                warn!("Tool {} failed: {}", name, error);
                let item = ContextItem::ToolError {
                    name: name.clone(),
                    message: error.to_string(),
                };
                self.emit(AgentEvent::ToolCallFailed { name, error }).await?;
                Ok(item)
            }
        }
    }
}

/// Tools offered to the reasoner under `choice`.
fn offered(tools: &[ToolDescriptor], choice: &ToolChoice) -> Vec<ToolDescriptor> {
    tools
        .iter()
        .filter(|tool| choice.allows(&tool.name))
        .cloned()
        .collect()
}

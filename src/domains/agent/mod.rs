//! Agent orchestrator domain.
//!
//! - `orchestrator.rs` - the reasoning and tool calling loop
//! - `reasoner.rs` - the reasoning seam and a scripted reasoner
//! - `events.rs` - events streamed to the caller of a run
//! - `options.rs` - tool choice and orchestrator options

mod events;
mod options;
mod orchestrator;
mod reasoner;

pub use events::{AgentEvent, EventStream};
pub use options::{AgentOptions, ParseToolChoiceError, ToolChoice};
pub use orchestrator::Orchestrator;
pub use reasoner::{
    ContextItem, Reasoner, ReasonerError, ReasoningEvent, ReasoningRequest, ReasoningStream,
    ScriptedReasoner,
};

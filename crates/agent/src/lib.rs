//! netsage orchestration core
//!
//! A ReAct loop over network-operations backends: the reasoning step picks a
//! tool, the registry resolves it to an adapter, the observation is folded
//! back into the transcript, and device facts gathered from different
//! sources are reconciled on the way.

use thiserror::Error;

pub mod context;
pub mod loop_agent;
pub mod reasoning;
pub mod reconcile;
pub mod tools;
pub mod transcript;

pub use context::ContextBuilder;
pub use loop_agent::{AbortReason, LoopConfig, LoopOutcome, Orchestrator, Terminal};
pub use reasoning::{parse_decision, Decision, LlmReasoner, ParseError, ReasoningStep};
pub use reconcile::{
    extract_facts, reconcile, DeviceFacts, DiscrepancyReport, FieldDiscrepancy,
    ReconciliationPolicy, Severity, SourceFacts,
};
pub use tools::{ToolAdapter, ToolDescriptor, ToolRegistry};
pub use transcript::{Action, ErrorKind, Observation, Step, Transcript, TranscriptError};

/// Orchestrator errors
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("◆ DUPLICATE TOOL: {0}")]
    DuplicateTool(String),

    #[error("◆ UNKNOWN TOOL: {0}")]
    UnknownTool(String),

    #[error("◆ INVALID LOOP CONFIG: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;

//! Run transcript: the ordered record of one loop execution

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Source name used for observations synthesized by reconciliation
pub const RECONCILIATION_SOURCE: &str = "reconciliation";

/// Violations of the transcript ordering rules
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TranscriptError {
    #[error("an Action must be followed by its Observation before {0}")]
    PendingObservation(&'static str),

    #[error("an Observation for a tool call must come right after its Action")]
    OrphanObservation,

    #[error("a synthetic Observation cannot answer an Action")]
    SyntheticAfterAction,

    #[error("the transcript is closed by a FinalAnswer")]
    Closed,
}

/// Tool invocation requested by the reasoning step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub tool_name: String,
    pub arguments: Map<String, Value>,
}

impl Action {
    pub fn new(tool_name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
        }
    }

    /// Build from a JSON value; anything but an object yields no arguments
    pub fn from_value(tool_name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(tool_name, arguments)
    }

    /// String argument, if present
    pub fn argument_str(&self, name: &str) -> Option<&str> {
        self.arguments.get(name).and_then(Value::as_str)
    }
}

/// Classification carried by an error observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ArgumentError,
    UnknownToolError,
    Timeout,
    BackendError,
    Cancelled,
}

impl ErrorKind {
    /// Only transient timeouts are retried by the loop
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::Timeout)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::ArgumentError => "ArgumentError",
            ErrorKind::UnknownToolError => "UnknownToolError",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::BackendError => "BackendError",
            ErrorKind::Cancelled => "Cancelled",
        };
        f.write_str(name)
    }
}

/// Outcome half of an observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ObservationStatus {
    Ok { payload: Value },
    Error { error_kind: ErrorKind, message: String },
}

/// Result of an action, or a synthetic note injected by the loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub source: String,
    #[serde(default)]
    pub synthetic: bool,
    #[serde(flatten)]
    pub status: ObservationStatus,
}

impl Observation {
    pub fn ok(source: impl Into<String>, payload: Value) -> Self {
        Self {
            source: source.into(),
            synthetic: false,
            status: ObservationStatus::Ok { payload },
        }
    }

    pub fn error(source: impl Into<String>, error_kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            synthetic: false,
            status: ObservationStatus::Error {
                error_kind,
                message: message.into(),
            },
        }
    }

    /// Loop-generated observation that does not answer an Action
    pub fn synthetic(source: impl Into<String>, payload: Value) -> Self {
        Self {
            source: source.into(),
            synthetic: true,
            status: ObservationStatus::Ok { payload },
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.status, ObservationStatus::Ok { .. })
    }

    pub fn payload(&self) -> Option<&Value> {
        match &self.status {
            ObservationStatus::Ok { payload } => Some(payload),
            ObservationStatus::Error { .. } => None,
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.status {
            ObservationStatus::Error { error_kind, .. } => Some(*error_kind),
            ObservationStatus::Ok { .. } => None,
        }
    }

    fn render(&self) -> String {
        match &self.status {
            ObservationStatus::Ok { payload } => payload.to_string(),
            ObservationStatus::Error {
                error_kind,
                message,
            } => format!("{{\"status\":\"error\",\"error_kind\":\"{}\",\"message\":{}}}", error_kind, Value::String(message.clone())),
        }
    }
}

/// One transcript entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Step {
    UserGoal(String),
    Thought(String),
    Action(Action),
    Observation(Observation),
    FinalAnswer(String),
}

impl Step {
    pub fn label(&self) -> &'static str {
        match self {
            Step::UserGoal(_) => "UserGoal",
            Step::Thought(_) => "Thought",
            Step::Action(_) => "Action",
            Step::Observation(_) => "Observation",
            Step::FinalAnswer(_) => "FinalAnswer",
        }
    }
}

/// Ordered steps of a single run.
///
/// The goal sits at index 0 and cannot be replaced. Every push checks the
/// ordering rules, so an Action is always answered by exactly one tool
/// Observation before anything else is recorded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transcript {
    steps: Vec<Step>,
}

impl Transcript {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            steps: vec![Step::UserGoal(goal.into())],
        }
    }

    pub fn goal(&self) -> &str {
        match self.steps.first() {
            Some(Step::UserGoal(goal)) => goal,
            _ => "",
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Never true: the goal is always present
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn last(&self) -> Option<&Step> {
        self.steps.last()
    }

    /// True while the last Action still waits for its Observation
    pub fn awaiting_observation(&self) -> bool {
        matches!(self.steps.last(), Some(Step::Action(_)))
    }

    fn is_closed(&self) -> bool {
        matches!(self.steps.last(), Some(Step::FinalAnswer(_)))
    }

    fn guard(&self, what: &'static str) -> Result<(), TranscriptError> {
        if self.is_closed() {
            return Err(TranscriptError::Closed);
        }
        if self.awaiting_observation() {
            return Err(TranscriptError::PendingObservation(what));
        }
        Ok(())
    }

    pub fn push_thought(&mut self, thought: impl Into<String>) -> Result<(), TranscriptError> {
        self.guard("a Thought")?;
        self.steps.push(Step::Thought(thought.into()));
        Ok(())
    }

    pub fn push_action(&mut self, action: Action) -> Result<(), TranscriptError> {
        self.guard("another Action")?;
        self.steps.push(Step::Action(action));
        Ok(())
    }

    pub fn push_observation(&mut self, observation: Observation) -> Result<(), TranscriptError> {
        if self.is_closed() {
            return Err(TranscriptError::Closed);
        }
        match (self.awaiting_observation(), observation.synthetic) {
            (true, true) => return Err(TranscriptError::SyntheticAfterAction),
            (false, false) => return Err(TranscriptError::OrphanObservation),
            _ => {}
        }
        self.steps.push(Step::Observation(observation));
        Ok(())
    }

    pub fn push_final_answer(&mut self, answer: impl Into<String>) -> Result<(), TranscriptError> {
        self.guard("the FinalAnswer")?;
        self.steps.push(Step::FinalAnswer(answer.into()));
        Ok(())
    }

    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.steps.iter().filter_map(|s| match s {
            Step::Action(a) => Some(a),
            _ => None,
        })
    }

    pub fn observations(&self) -> impl Iterator<Item = &Observation> {
        self.steps.iter().filter_map(|s| match s {
            Step::Observation(o) => Some(o),
            _ => None,
        })
    }

    /// Scratchpad text handed to the reasoning backend
    pub fn render(&self) -> String {
        let mut lines = Vec::with_capacity(self.steps.len() * 2);
        for step in &self.steps {
            match step {
                Step::UserGoal(goal) => lines.push(format!("Question: {}", goal)),
                Step::Thought(thought) => lines.push(format!("Thought: {}", thought)),
                Step::Action(action) => {
                    lines.push(format!("Action: {}", action.tool_name));
                    lines.push(format!(
                        "Action Input: {}",
                        Value::Object(action.arguments.clone())
                    ));
                }
                Step::Observation(obs) if obs.synthetic => {
                    lines.push(format!("Observation ({}): {}", obs.source, obs.render()))
                }
                Step::Observation(obs) => lines.push(format!("Observation: {}", obs.render())),
                Step::FinalAnswer(answer) => lines.push(format!("Final Answer: {}", answer)),
            }
        }
        lines.join("\n")
    }
}

//! Orchestration loop - the ReAct state machine
//!
//! `Reasoning → (Acting → Observing → Reasoning)* → Terminal`. Every reasoning
//! call and tool call is raced against the run deadline and the caller's
//! cancellation token; the caller always gets the partial transcript back.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use netsage_config::OrchestratorConfig;

use crate::reasoning::{parse_decision, Decision, ReasoningStep};
use crate::reconcile::{extract_facts, reconcile, DeviceFacts, DiscrepancyReport, ReconciliationPolicy, SourceFacts};
use crate::tools::{ToolCategory, ToolRegistry};
use crate::transcript::{Action, ErrorKind, Observation, Transcript, TranscriptError, RECONCILIATION_SOURCE};
use crate::{AgentError, Result};

/// Limits for one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopConfig {
    pub max_iterations: u32,
    pub per_tool_timeout: Duration,
    pub overall_timeout: Duration,
}

impl LoopConfig {
    pub fn new(max_iterations: u32, per_tool_timeout: Duration, overall_timeout: Duration) -> Result<Self> {
        if max_iterations == 0 {
            return Err(AgentError::InvalidConfig("max_iterations must be positive".to_string()));
        }
        if per_tool_timeout.is_zero() || overall_timeout.is_zero() {
            return Err(AgentError::InvalidConfig("timeouts must be positive".to_string()));
        }
        Ok(Self {
            max_iterations,
            per_tool_timeout,
            overall_timeout,
        })
    }

    pub fn from_config(config: &OrchestratorConfig) -> Result<Self> {
        Self::new(
            config.max_iterations,
            Duration::from_secs(config.per_tool_timeout_secs),
            Duration::from_secs(config.overall_timeout_secs),
        )
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            per_tool_timeout: Duration::from_secs(20),
            overall_timeout: Duration::from_secs(360),
        }
    }
}

/// Why a run stopped without an answer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum AbortReason {
    IterationLimitExceeded,
    OverallTimeout,
    Cancelled,
    ParseError(String),
    ReasoningUnavailable(String),
    InvariantViolated(String),
}

impl AbortReason {
    /// Everything except an external cancellation is a failure of the run
    pub fn is_fatal(&self) -> bool {
        !matches!(self, AbortReason::Cancelled)
    }
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::IterationLimitExceeded => write!(f, "iteration limit exceeded"),
            AbortReason::OverallTimeout => write!(f, "overall timeout"),
            AbortReason::Cancelled => write!(f, "cancelled"),
            AbortReason::ParseError(e) => write!(f, "fatal parse error: {}", e),
            AbortReason::ReasoningUnavailable(e) => write!(f, "reasoning backend unavailable: {}", e),
            AbortReason::InvariantViolated(e) => write!(f, "transcript invariant violated: {}", e),
        }
    }
}

impl From<TranscriptError> for AbortReason {
    fn from(e: TranscriptError) -> Self {
        AbortReason::InvariantViolated(e.to_string())
    }
}

/// Terminal state of a run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Terminal {
    Answered { answer: String },
    ClarificationNeeded { question: String },
    Aborted { reason: AbortReason },
}

/// Everything a run hands back to its caller
#[derive(Debug, Clone, Serialize)]
pub struct LoopOutcome {
    pub run_id: Uuid,
    pub terminal: Terminal,
    pub transcript: Transcript,
    pub iterations: u32,
    /// Actionable reports, one per (device, fingerprint), in injection order
    pub discrepancies: Vec<DiscrepancyReport>,
    pub elapsed: Duration,
}

impl LoopOutcome {
    pub fn answer(&self) -> Option<&str> {
        match &self.terminal {
            Terminal::Answered { answer } => Some(answer),
            _ => None,
        }
    }

    pub fn abort_reason(&self) -> Option<&AbortReason> {
        match &self.terminal {
            Terminal::Aborted { reason } => Some(reason),
            _ => None,
        }
    }
}

enum LoopState {
    Reasoning,
    Acting(Action),
    Observing(Action),
    Done(Terminal),
}

/// Device facts seen so far in a run: device → source tool → facts
#[derive(Default)]
struct FactBoard {
    devices: HashMap<String, BTreeMap<String, DeviceFacts>>,
}

impl FactBoard {
    /// Record facts and reconcile them against every other source for the device
    fn record(
        &mut self,
        policy: &ReconciliationPolicy,
        device_id: &str,
        source: &str,
        facts: DeviceFacts,
    ) -> Vec<DiscrepancyReport> {
        let sources = self.devices.entry(device_id.trim().to_lowercase()).or_default();
        sources.insert(source.to_string(), facts);

        let Some(current) = sources.get(source) else {
            return Vec::new();
        };
        let current = SourceFacts::new(source, current.clone());
        sources
            .iter()
            .filter(|(other, _)| other.as_str() != source)
            .map(|(other, facts)| {
                let other = SourceFacts::new(other.as_str(), facts.clone());
                reconcile(policy, device_id, &other, &current)
            })
            .collect()
    }
}

/// Mutable state owned by one run
struct Run<'a> {
    config: &'a LoopConfig,
    cancel: CancellationToken,
    deadline: Instant,
    transcript: Transcript,
    iterations: u32,
    discrepancies: Vec<DiscrepancyReport>,
    facts: FactBoard,
    injected: HashSet<(String, String)>,
}

impl<'a> Run<'a> {
    /// Race a future against cancellation and the run deadline
    async fn guard<F: Future>(&self, fut: F) -> std::result::Result<F::Output, AbortReason> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AbortReason::Cancelled),
            _ = tokio::time::sleep_until(self.deadline) => Err(AbortReason::OverallTimeout),
            out = fut => Ok(out),
        }
    }

    /// Answer an in-flight Action with the interruption that stopped it
    fn close_pending(&mut self, tool_name: &str, reason: &AbortReason) {
        let kind = match reason {
            AbortReason::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Timeout,
        };
        let observation = Observation::error(tool_name, kind, reason.to_string());
        if self.transcript.push_observation(observation).is_ok() {
            self.iterations += 1;
        }
    }

    fn interrupted(&self) -> Option<AbortReason> {
        if self.cancel.is_cancelled() {
            Some(AbortReason::Cancelled)
        } else if Instant::now() >= self.deadline {
            Some(AbortReason::OverallTimeout)
        } else {
            None
        }
    }
}

/// Drives runs over a shared registry and reasoning step
#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<ToolRegistry>,
    reasoner: Arc<dyn ReasoningStep>,
    policy: Arc<ReconciliationPolicy>,
}

impl Orchestrator {
    pub fn new(registry: Arc<ToolRegistry>, reasoner: Arc<dyn ReasoningStep>) -> Self {
        Self {
            registry,
            reasoner,
            policy: Arc::new(ReconciliationPolicy::default()),
        }
    }

    pub fn with_policy(mut self, policy: ReconciliationPolicy) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn policy(&self) -> &ReconciliationPolicy {
        &self.policy
    }

    /// Run one request to a terminal state
    pub async fn run(&self, goal: &str, config: &LoopConfig, cancel: CancellationToken) -> LoopOutcome {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id);
        self.drive(run_id, goal, config, cancel).instrument(span).await
    }

    async fn drive(&self, run_id: Uuid, goal: &str, config: &LoopConfig, cancel: CancellationToken) -> LoopOutcome {
        let started = Instant::now();
        info!("goal: {}", goal);

        let mut run = Run {
            config,
            cancel,
            deadline: started + config.overall_timeout,
            transcript: Transcript::new(goal),
            iterations: 0,
            discrepancies: Vec::new(),
            facts: FactBoard::default(),
            injected: HashSet::new(),
        };

        let mut state = LoopState::Reasoning;
        let terminal = loop {
            if !matches!(state, LoopState::Done(_)) {
                if let Some(reason) = run.interrupted() {
                    if let LoopState::Observing(action) = &state {
                        run.close_pending(&action.tool_name, &reason);
                    }
                    state = Self::abort(reason);
                }
            }
            state = match state {
                LoopState::Done(terminal) => break terminal,
                LoopState::Reasoning => self.reason(&mut run).await,
                LoopState::Acting(action) => self.act(&mut run, action),
                LoopState::Observing(action) => self.observe(&mut run, action).await,
            };
        };

        match &terminal {
            Terminal::Answered { .. } => info!("answered after {} iterations", run.iterations),
            Terminal::ClarificationNeeded { question } => info!("clarification needed: {}", question),
            Terminal::Aborted { reason } => error!("aborted after {} iterations: {}", run.iterations, reason),
        }

        LoopOutcome {
            run_id,
            terminal,
            transcript: run.transcript,
            iterations: run.iterations,
            discrepancies: run.discrepancies,
            elapsed: started.elapsed(),
        }
    }

    fn abort(reason: AbortReason) -> LoopState {
        LoopState::Done(Terminal::Aborted { reason })
    }

    async fn reason(&self, run: &mut Run<'_>) -> LoopState {
        let tools = self.registry.describe_all();
        let mut attempt = 0;

        let decision = loop {
            attempt += 1;
            let reply = match run.guard(self.reasoner.reason(&run.transcript, tools)).await {
                Ok(reply) => reply,
                Err(reason) => return Self::abort(reason),
            };
            let failure = match reply {
                Ok(response) => match parse_decision(&response) {
                    Ok(decision) => break decision,
                    Err(e) => AbortReason::ParseError(e.to_string()),
                },
                Err(e) => AbortReason::ReasoningUnavailable(e.to_string()),
            };
            if attempt >= 2 {
                return Self::abort(failure);
            }
            warn!("reasoning attempt {} failed ({}), retrying", attempt, failure);
        };

        if let Some(thought) = decision.thought() {
            if let Err(e) = run.transcript.push_thought(thought) {
                return Self::abort(e.into());
            }
        }

        match decision {
            Decision::NextAction { action, .. } => {
                debug!("next action: {}", action.tool_name);
                LoopState::Acting(action)
            }
            Decision::FinalAnswer { answer, .. } => match run.transcript.push_final_answer(answer.clone()) {
                Ok(()) => LoopState::Done(Terminal::Answered { answer }),
                Err(e) => Self::abort(e.into()),
            },
            Decision::Clarification { question, .. } => {
                LoopState::Done(Terminal::ClarificationNeeded { question })
            }
        }
    }

    fn act(&self, run: &mut Run<'_>, action: Action) -> LoopState {
        if run.iterations >= run.config.max_iterations {
            return Self::abort(AbortReason::IterationLimitExceeded);
        }
        if let Err(e) = run.transcript.push_action(action.clone()) {
            return Self::abort(e.into());
        }

        let rejection = match self.registry.get(&action.tool_name) {
            Err(e) => Some(Observation::error(
                action.tool_name.as_str(),
                ErrorKind::UnknownToolError,
                e.to_string(),
            )),
            Ok(tool) => tool
                .descriptor
                .validate(&action.arguments)
                .err()
                .map(|e| Observation::error(action.tool_name.as_str(), ErrorKind::ArgumentError, e.to_string())),
        };

        match rejection {
            Some(observation) => {
                warn!("{} rejected before invocation", action.tool_name);
                match run.transcript.push_observation(observation) {
                    Ok(()) => {
                        run.iterations += 1;
                        LoopState::Reasoning
                    }
                    Err(e) => Self::abort(e.into()),
                }
            }
            None => LoopState::Observing(action),
        }
    }

    async fn observe(&self, run: &mut Run<'_>, action: Action) -> LoopState {
        let tool = match self.registry.get(&action.tool_name) {
            Ok(tool) => tool,
            Err(e) => return Self::abort(AbortReason::InvariantViolated(e.to_string())),
        };

        info!("invoking {}", action.tool_name);
        let mut attempt = 0;
        let observation = loop {
            attempt += 1;
            let invocation = tool.invoke(&action.arguments, run.config.per_tool_timeout, &run.cancel);
            let observation = match run.guard(invocation).await {
                Ok(observation) => observation,
                Err(reason) => {
                    run.close_pending(&action.tool_name, &reason);
                    return Self::abort(reason);
                }
            };
            if observation.error_kind() == Some(ErrorKind::Timeout) && attempt < 2 {
                warn!("{} timed out, retrying once", action.tool_name);
                continue;
            }
            break observation;
        };

        if let Err(e) = run.transcript.push_observation(observation.clone()) {
            return Self::abort(e.into());
        }
        run.iterations += 1;
        debug!("iteration {} complete", run.iterations);

        if observation.is_ok() && tool.descriptor.category.carries_device_facts() {
            if let Err(e) = self.absorb(run, &action, tool.descriptor.category, &observation) {
                return Self::abort(e.into());
            }
        }

        LoopState::Reasoning
    }

    /// Record device facts and inject any new actionable discrepancy
    fn absorb(
        &self,
        run: &mut Run<'_>,
        action: &Action,
        category: ToolCategory,
        observation: &Observation,
    ) -> std::result::Result<(), TranscriptError> {
        let Some(payload) = observation.payload() else {
            return Ok(());
        };
        let mut facts = extract_facts(payload);
        let device_id = action
            .argument_str("device_id")
            .map(str::to_string)
            .or_else(|| facts.get("device_id").and_then(|v| v.as_str()).map(str::to_string));
        let Some(device_id) = device_id.filter(|d| !d.trim().is_empty()) else {
            debug!("{} payload names no device, skipping reconciliation", action.tool_name);
            return Ok(());
        };
        facts.remove("device_id");
        debug!(
            "{} facts for {} from {} ({})",
            facts.len(),
            device_id,
            action.tool_name,
            category.as_str()
        );

        let reports = run.facts.record(&self.policy, &device_id, &action.tool_name, facts);
        for report in reports {
            let key = (device_id.trim().to_lowercase(), report.fingerprint.clone());
            if report.is_actionable() && run.injected.insert(key) {
                info!(
                    "{} discrepancy on {} between {} and {}",
                    report.severity.as_str(),
                    report.device_id,
                    report.source_a,
                    report.source_b
                );
                run.transcript
                    .push_observation(Observation::synthetic(RECONCILIATION_SOURCE, report.to_payload()))?;
                run.discrepancies.push(report);
            }
        }
        Ok(())
    }
}

//! End-to-end runs of the orchestration loop with fake tools and reasoners

mod common;

use common::{inventory_descriptor, telemetry_descriptor, CountingTickets, FakeTool, FnReasoner, ScriptedReasoner};
use netsage_agent::tools::{AdapterError, IdempotencyKey, TicketCreateTool, ToolRegistry};
use netsage_agent::transcript::RECONCILIATION_SOURCE;
use netsage_agent::{
    AbortReason, ErrorKind, LoopConfig, Orchestrator, ReasoningStep, Severity, Step, Terminal,
};
use netsage_provider::ChatResponse;
use serde_json::{json, Value};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn call(tool: &str, args: Value) -> ChatResponse {
    ChatResponse::tool_call(tool, args)
}

fn answer(text: &str) -> ChatResponse {
    ChatResponse::text(format!("Final Answer: {}", text))
}

fn config(max_iterations: u32) -> LoopConfig {
    LoopConfig::new(max_iterations, Duration::from_secs(5), Duration::from_secs(60)).unwrap()
}

fn orchestrator(registry: ToolRegistry, reasoner: Arc<dyn ReasoningStep>) -> Orchestrator {
    Orchestrator::new(Arc::new(registry), reasoner)
}

fn labels(steps: &[Step]) -> Vec<&'static str> {
    steps.iter().map(Step::label).collect()
}

#[test]
fn test_loop_config_validation() {
    assert!(LoopConfig::new(0, Duration::from_secs(1), Duration::from_secs(1)).is_err());
    assert!(LoopConfig::new(1, Duration::ZERO, Duration::from_secs(1)).is_err());
    let defaults = LoopConfig::default();
    assert_eq!(defaults.max_iterations, 10);
    assert_eq!(defaults.per_tool_timeout, Duration::from_secs(20));
    assert_eq!(defaults.overall_timeout, Duration::from_secs(360));
}

#[tokio::test]
async fn test_s6_answered() {
    let mut registry = ToolRegistry::new();
    registry
        .register_adapter(FakeTool::returning(
            telemetry_descriptor(),
            json!({"answer": "Device S6 is up", "device_id": "S6"}),
        ))
        .unwrap();

    let reasoner = Arc::new(ScriptedReasoner::replies(vec![
        call("telemetry_nl", json!({"query": "What is the status of S6?", "device_id": "S6"})),
        answer("S6 is up."),
    ]));
    let outcome = orchestrator(registry, reasoner.clone())
        .run("What is the status of S6?", &config(10), CancellationToken::new())
        .await;

    assert_eq!(
        outcome.terminal,
        Terminal::Answered {
            answer: "S6 is up.".to_string()
        }
    );
    assert_eq!(
        labels(outcome.transcript.steps()),
        vec!["UserGoal", "Action", "Observation", "FinalAnswer"]
    );
    assert_eq!(outcome.iterations, 1);
    assert!(outcome.discrepancies.is_empty());
    assert_eq!(reasoner.calls(), 2);
    assert!(reasoner.seen()[1].contains("Observation: "));
}

#[tokio::test]
async fn test_s6_discrepancy_files_one_ticket() {
    let tickets = Arc::new(CountingTickets::default());
    let mut registry = ToolRegistry::new();
    registry
        .register_adapter(FakeTool::returning(
            telemetry_descriptor(),
            json!({"status": "down", "location": "DC-East"}),
        ))
        .unwrap();
    registry
        .register_adapter(FakeTool::returning(
            inventory_descriptor(),
            json!({"device_id": "S6", "status": "active", "location": "DC-East"}),
        ))
        .unwrap();
    registry
        .register_adapter(TicketCreateTool::new(tickets.clone()))
        .unwrap();

    let reasoner = FnReasoner::new(|transcript, n| {
        let fingerprint = transcript
            .observations()
            .filter(|o| o.synthetic && o.source == RECONCILIATION_SOURCE)
            .filter_map(|o| o.payload())
            .find_map(|p| p["fingerprint"].as_str().map(str::to_string))
            .unwrap_or_default();
        let ticket = json!({
            "title": "S6 status mismatch",
            "description": "telemetry reports down, inventory says active",
            "device_id": "S6",
            "fingerprint": fingerprint,
        });
        match n {
            1 => call("telemetry_nl", json!({"query": "status of S6", "device_id": "S6"})),
            2 => call("inventory_lookup", json!({"device_id": "S6"})),
            // The ticket call is repeated to check the replay path
            3 | 4 => call("ticket_create", ticket),
            _ => answer("S6 is down but inventory says active; ticket filed."),
        }
    });

    let outcome = orchestrator(registry, Arc::new(reasoner))
        .run("Is S6 healthy?", &config(10), CancellationToken::new())
        .await;

    assert!(matches!(outcome.terminal, Terminal::Answered { .. }));
    assert_eq!(outcome.iterations, 4);
    assert_eq!(tickets.count(), 1);

    assert_eq!(outcome.discrepancies.len(), 1);
    let report = &outcome.discrepancies[0];
    assert_eq!(report.severity, Severity::Major);
    assert_eq!(report.source_a, "telemetry_nl");
    assert_eq!(report.source_b, "inventory_lookup");

    let steps = outcome.transcript.steps();
    assert_eq!(
        labels(steps),
        vec![
            "UserGoal",
            "Action",
            "Observation",
            "Action",
            "Observation",
            "Observation",
            "Action",
            "Observation",
            "Action",
            "Observation",
            "FinalAnswer"
        ]
    );
    match &steps[5] {
        Step::Observation(obs) => {
            assert!(obs.synthetic);
            assert_eq!(obs.payload().unwrap()["severity"], "major");
        }
        other => panic!("expected synthetic observation, got {:?}", other),
    }

    let expected_key = IdempotencyKey::derive("S6", &report.fingerprint);
    let ticket_observations: Vec<_> = outcome
        .transcript
        .observations()
        .filter(|o| o.source == "ticket_create")
        .collect();
    assert_eq!(ticket_observations.len(), 2);
    let first = ticket_observations[0].payload().unwrap();
    let second = ticket_observations[1].payload().unwrap();
    assert_eq!(first["idempotency_key"], json!(expected_key.as_str()));
    assert_eq!(first["ticket_id"], second["ticket_id"]);
    assert_eq!(first["replayed"], false);
    assert_eq!(second["replayed"], true);
}

#[tokio::test]
async fn test_repeated_discrepancy_is_injected_once() {
    let mut registry = ToolRegistry::new();
    registry
        .register_adapter(FakeTool::returning(telemetry_descriptor(), json!({"interface_count": 46})))
        .unwrap();
    registry
        .register_adapter(FakeTool::returning(inventory_descriptor(), json!({"interface_count": 48})))
        .unwrap();

    let reasoner = Arc::new(ScriptedReasoner::replies(vec![
        call("inventory_lookup", json!({"device_id": "S6"})),
        call("telemetry_nl", json!({"query": "interfaces on S6", "device_id": "S6"})),
        call("telemetry_nl", json!({"query": "interfaces on S6 again", "device_id": "s6"})),
        answer("S6 has 46 active interfaces out of 48."),
    ]));
    let outcome = orchestrator(registry, reasoner)
        .run("How many interfaces does S6 have?", &config(10), CancellationToken::new())
        .await;

    assert!(matches!(outcome.terminal, Terminal::Answered { .. }));
    assert_eq!(outcome.discrepancies.len(), 1);
    assert_eq!(outcome.discrepancies[0].severity, Severity::Minor);
    let synthetic = outcome.transcript.observations().filter(|o| o.synthetic).count();
    assert_eq!(synthetic, 1);
}

#[tokio::test]
async fn test_agreeing_sources_report_nothing() {
    let mut registry = ToolRegistry::new();
    registry
        .register_adapter(FakeTool::returning(
            telemetry_descriptor(),
            json!({"status": "active", "location": "DC-East"}),
        ))
        .unwrap();
    registry
        .register_adapter(FakeTool::returning(
            inventory_descriptor(),
            json!({"status": "active", "location": "DC-East"}),
        ))
        .unwrap();

    let reasoner = Arc::new(ScriptedReasoner::replies(vec![
        call("telemetry_nl", json!({"query": "status of S6", "device_id": "S6"})),
        call("inventory_lookup", json!({"device_id": "S6"})),
        call("telemetry_nl", json!({"query": "status of S6 again", "device_id": "S6"})),
        answer("S6 is active in DC-East."),
    ]));
    let outcome = orchestrator(registry, reasoner)
        .run("Is S6 healthy?", &config(10), CancellationToken::new())
        .await;

    assert!(matches!(outcome.terminal, Terminal::Answered { .. }));
    assert_eq!(outcome.iterations, 3);
    assert!(outcome.discrepancies.is_empty());
    assert_eq!(outcome.transcript.observations().filter(|o| o.synthetic).count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_retried_once() {
    let tool = FakeTool::returning(telemetry_descriptor(), json!({})).with_delay(Duration::from_secs(30));
    let calls = tool.calls();
    let mut registry = ToolRegistry::new();
    registry.register_adapter(tool).unwrap();

    let reasoner = Arc::new(ScriptedReasoner::replies(vec![
        call("telemetry_nl", json!({"query": "status of S6"})),
        answer("Telemetry did not respond."),
    ]));
    let config = LoopConfig::new(10, Duration::from_secs(1), Duration::from_secs(120)).unwrap();
    let outcome = orchestrator(registry, reasoner)
        .run("status of S6?", &config, CancellationToken::new())
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(outcome.iterations, 1);
    let observations: Vec<_> = outcome.transcript.observations().collect();
    assert_eq!(observations.len(), 1);
    assert_eq!(observations[0].error_kind(), Some(ErrorKind::Timeout));
    assert!(matches!(outcome.terminal, Terminal::Answered { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_slow_ticket_retry_files_once() {
    let tickets = Arc::new(CountingTickets::slow(Duration::from_secs(3)));
    let mut registry = ToolRegistry::new();
    registry
        .register_adapter(TicketCreateTool::new(tickets.clone()))
        .unwrap();

    let reasoner = Arc::new(ScriptedReasoner::replies(vec![
        call(
            "ticket_create",
            json!({
                "title": "S6 status mismatch",
                "description": "telemetry reports down, inventory says active",
                "device_id": "S6",
                "fingerprint": "fp",
            }),
        ),
        answer("done"),
    ]));
    let config = LoopConfig::new(10, Duration::from_secs(2), Duration::from_secs(120)).unwrap();
    let outcome = orchestrator(registry, reasoner)
        .run("File a ticket for S6", &config, CancellationToken::new())
        .await;

    assert_eq!(outcome.answer(), Some("done"));
    assert_eq!(tickets.count(), 1);
    let observations: Vec<_> = outcome.transcript.observations().collect();
    assert_eq!(observations.len(), 1);
    let payload = observations[0].payload().unwrap();
    assert_eq!(payload["ticket_id"], "INC0001");
    assert_eq!(payload["replayed"], true);
}

#[tokio::test]
async fn test_backend_error_is_not_retried() {
    let tool = FakeTool::new(telemetry_descriptor(), |_, _| {
        Err(AdapterError::Backend("telemetry returned 502 Bad Gateway".to_string()))
    });
    let calls = tool.calls();
    let mut registry = ToolRegistry::new();
    registry.register_adapter(tool).unwrap();

    let reasoner = Arc::new(ScriptedReasoner::replies(vec![
        call("telemetry_nl", json!({"query": "status of S6", "device_id": "S6"})),
        answer("Telemetry is unavailable."),
    ]));
    let outcome = orchestrator(registry, reasoner.clone())
        .run("status of S6?", &config(10), CancellationToken::new())
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.iterations, 1);
    let observations: Vec<_> = outcome.transcript.observations().collect();
    assert_eq!(observations.len(), 1);
    assert_eq!(observations[0].error_kind(), Some(ErrorKind::BackendError));
    assert!(outcome.discrepancies.is_empty());
    assert_eq!(outcome.answer(), Some("Telemetry is unavailable."));
    assert_eq!(reasoner.calls(), 2);
    assert!(reasoner.seen()[1].contains("BackendError"));
    assert!(reasoner.seen()[1].contains("502 Bad Gateway"));
}

#[tokio::test]
async fn test_malformed_twice_aborts() {
    let reasoner = Arc::new(ScriptedReasoner::replies(vec![
        ChatResponse::text("I think S6 is fine"),
        ChatResponse::text("Still thinking about it"),
        answer("never reached"),
    ]));
    let outcome = orchestrator(ToolRegistry::new(), reasoner.clone())
        .run("status of S6?", &config(10), CancellationToken::new())
        .await;

    let reason = outcome.abort_reason().unwrap();
    assert!(matches!(reason, AbortReason::ParseError(_)));
    assert!(reason.is_fatal());
    assert_eq!(reasoner.calls(), 2);
    assert_eq!(outcome.transcript.len(), 1);
    assert_eq!(outcome.iterations, 0);
}

#[tokio::test]
async fn test_malformed_once_recovers() {
    let reasoner = Arc::new(ScriptedReasoner::replies(vec![
        ChatResponse::text("hmm"),
        answer("S6 is up"),
    ]));
    let outcome = orchestrator(ToolRegistry::new(), reasoner.clone())
        .run("status of S6?", &config(10), CancellationToken::new())
        .await;

    assert_eq!(outcome.answer(), Some("S6 is up"));
    assert_eq!(reasoner.calls(), 2);
}

#[tokio::test]
async fn test_reasoning_backend_down_aborts() {
    let reasoner = Arc::new(ScriptedReasoner::new(vec![None, None]));
    let outcome = orchestrator(ToolRegistry::new(), reasoner)
        .run("status of S6?", &config(10), CancellationToken::new())
        .await;

    assert!(matches!(
        outcome.abort_reason(),
        Some(AbortReason::ReasoningUnavailable(_))
    ));
}

#[tokio::test]
async fn test_iteration_limit() {
    let tool = FakeTool::returning(telemetry_descriptor(), json!({"answer": "no idea"}));
    let calls = tool.calls();
    let mut registry = ToolRegistry::new();
    registry.register_adapter(tool).unwrap();

    let reasoner = Arc::new(
        ScriptedReasoner::replies(vec![call("telemetry_nl", json!({"query": "again"}))]).repeating(),
    );
    let outcome = orchestrator(registry, reasoner)
        .run("loop forever", &config(3), CancellationToken::new())
        .await;

    assert_eq!(outcome.abort_reason(), Some(&AbortReason::IterationLimitExceeded));
    assert_eq!(outcome.iterations, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(outcome.transcript.observations().count(), 3);
    assert_eq!(outcome.transcript.actions().count(), 3);
    assert!(matches!(outcome.transcript.last(), Some(Step::Observation(_))));
}

#[tokio::test]
async fn test_unknown_tool_is_an_observation() {
    let reasoner = Arc::new(ScriptedReasoner::replies(vec![
        call("reboot_device", json!({"device_id": "S6"})),
        answer("I cannot reboot devices."),
    ]));
    let outcome = orchestrator(ToolRegistry::new(), reasoner)
        .run("reboot S6", &config(10), CancellationToken::new())
        .await;

    assert!(matches!(outcome.terminal, Terminal::Answered { .. }));
    assert_eq!(outcome.iterations, 1);
    let obs = outcome.transcript.observations().next().unwrap();
    assert_eq!(obs.error_kind(), Some(ErrorKind::UnknownToolError));
}

#[tokio::test]
async fn test_missing_argument_is_an_observation() {
    let tool = FakeTool::returning(inventory_descriptor(), json!({}));
    let calls = tool.calls();
    let mut registry = ToolRegistry::new();
    registry.register_adapter(tool).unwrap();

    let reasoner = Arc::new(ScriptedReasoner::replies(vec![
        call("inventory_lookup", json!({})),
        answer("Which device?"),
    ]));
    let outcome = orchestrator(registry, reasoner)
        .run("look it up", &config(10), CancellationToken::new())
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 0);
    let obs = outcome.transcript.observations().next().unwrap();
    assert_eq!(obs.error_kind(), Some(ErrorKind::ArgumentError));
    assert_eq!(outcome.iterations, 1);
}

#[tokio::test]
async fn test_clarification() {
    let reasoner = Arc::new(ScriptedReasoner::replies(vec![ChatResponse::text(
        "Thought: the request is vague\nClarification: Which device do you mean?",
    )]));
    let outcome = orchestrator(ToolRegistry::new(), reasoner)
        .run("is it broken?", &config(10), CancellationToken::new())
        .await;

    assert_eq!(
        outcome.terminal,
        Terminal::ClarificationNeeded {
            question: "Which device do you mean?".to_string()
        }
    );
    assert_eq!(labels(outcome.transcript.steps()), vec!["UserGoal", "Thought"]);
}

#[tokio::test(start_paused = true)]
async fn test_overall_timeout_closes_pending_action() {
    let tool = FakeTool::returning(telemetry_descriptor(), json!({})).with_delay(Duration::from_secs(100));
    let mut registry = ToolRegistry::new();
    registry.register_adapter(tool).unwrap();

    let reasoner = Arc::new(ScriptedReasoner::replies(vec![call(
        "telemetry_nl",
        json!({"query": "slow"}),
    )]));
    let config = LoopConfig::new(10, Duration::from_secs(60), Duration::from_secs(5)).unwrap();
    let outcome = orchestrator(registry, reasoner)
        .run("slow question", &config, CancellationToken::new())
        .await;

    assert_eq!(outcome.abort_reason(), Some(&AbortReason::OverallTimeout));
    match outcome.transcript.last() {
        Some(Step::Observation(obs)) => assert_eq!(obs.error_kind(), Some(ErrorKind::Timeout)),
        other => panic!("expected a closing observation, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let reasoner = Arc::new(ScriptedReasoner::replies(vec![answer("too late")]));
    let outcome = orchestrator(ToolRegistry::new(), reasoner.clone())
        .run("status of S6?", &config(10), cancel)
        .await;

    assert_eq!(outcome.abort_reason(), Some(&AbortReason::Cancelled));
    assert!(!outcome.abort_reason().unwrap().is_fatal());
    assert_eq!(outcome.transcript.len(), 1);
    assert_eq!(reasoner.calls(), 0);
}

#[tokio::test]
async fn test_cancelled_during_tool_call() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let tool = FakeTool::new(telemetry_descriptor(), move |_, _| {
        trigger.cancel();
        Ok(json!({}))
    })
    .with_delay(Duration::from_millis(50));
    let mut registry = ToolRegistry::new();
    registry.register_adapter(tool).unwrap();

    let reasoner = Arc::new(ScriptedReasoner::replies(vec![
        call("telemetry_nl", json!({"query": "x"})),
        answer("unreachable"),
    ]));
    let outcome = orchestrator(registry, reasoner)
        .run("status?", &config(10), cancel)
        .await;

    assert_eq!(outcome.abort_reason(), Some(&AbortReason::Cancelled));
    assert!(matches!(outcome.transcript.last(), Some(Step::Observation(_))));
    assert!(!outcome.transcript.awaiting_observation());
}

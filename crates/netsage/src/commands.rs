//! netsage command implementations

use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use netsage_agent::reconcile::ReconciliationPolicy;
use netsage_agent::tools::register_default_tools;
use netsage_agent::{LlmReasoner, LoopConfig, LoopOutcome, Orchestrator, Terminal, ToolRegistry};
use netsage_config::{self, Config};
use netsage_provider::openrouter::OpenRouterProvider;

fn resolve_path(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf)
        .unwrap_or_else(netsage_config::config_path)
}

/// Load the config file and fill secrets from the environment
async fn load_config(path: Option<&Path>) -> Result<Config> {
    let path = resolve_path(path);
    let mut config = Config::load_from(&path)
        .await
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    config.apply_env_overrides();
    Ok(config)
}

fn build_registry(config: &Config) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    register_default_tools(&mut registry, config).context("failed to register tools")?;
    Ok(registry)
}

/// Write a default config
pub async fn init_command(path: Option<&Path>) -> Result<()> {
    println!("◆ Initializing netsage...");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let written = match path {
        None => {
            netsage_config::init().await?;
            netsage_config::config_path()
        }
        Some(path) => {
            if path.exists() {
                warn!("◆ CONFIG ALREADY PRESENT AT {:?}", path);
            } else {
                Config::default().save_to(path).await?;
            }
            Config::load_from(path).await?;
            path.to_path_buf()
        }
    };

    println!("Config: {}", written.display());
    println!("\nNext steps:");
    println!("  1. Set reasoning.api_key (or NETSAGE_REASONING_API_KEY)");
    println!("  2. Point backends.* at your telemetry, inventory and ticketing services");
    println!("  3. Ask a question: netsage ask -m \"What is the status of device S6?\"");

    Ok(())
}

/// Run one question, or an interactive session when no message is given
pub async fn ask_command(path: Option<&Path>, message: Option<String>, json: bool) -> Result<()> {
    let config = load_config(path).await?;

    let api_key = config
        .reasoning_api_key()
        .context("No reasoning API key configured. Set reasoning.api_key or NETSAGE_REASONING_API_KEY")?;
    let provider = OpenRouterProvider::new(
        api_key,
        config.reasoning.api_base.clone(),
        Some(config.reasoning.model.clone()),
    );
    let reasoner = LlmReasoner::from_config(provider, &config.reasoning);
    info!("◆ REASONING WITH {}", reasoner.model());

    let registry = build_registry(&config)?;
    let orchestrator = Orchestrator::new(Arc::new(registry), Arc::new(reasoner))
        .with_policy(ReconciliationPolicy::from_config(&config.reconciliation));
    let limits = LoopConfig::from_config(&config.orchestrator)?;

    if let Some(goal) = message {
        let outcome = run_once(&orchestrator, &goal, &limits).await;
        report(&outcome, json)?;
        if let Terminal::Aborted { reason } = &outcome.terminal {
            if reason.is_fatal() {
                anyhow::bail!("run aborted: {}", reason);
            }
        }
        return Ok(());
    }

    println!("◆ Interactive mode (type 'exit' to quit)");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    loop {
        print!("◆ ");
        std::io::stdout().flush()?;

        let mut input = String::new();
        if std::io::stdin().read_line(&mut input)? == 0 {
            break;
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        if input == "exit" || input == "quit" {
            break;
        }

        let outcome = run_once(&orchestrator, input, &limits).await;
        report(&outcome, json)?;
        println!();
    }

    Ok(())
}

/// Drive one run; Ctrl+C cancels it
async fn run_once(orchestrator: &Orchestrator, goal: &str, limits: &LoopConfig) -> LoopOutcome {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("◆ INTERRUPT RECEIVED, CANCELLING RUN");
            on_signal.cancel();
        }
    });

    let outcome = orchestrator.run(goal, limits, cancel).await;
    watcher.abort();
    outcome
}

fn report(outcome: &LoopOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    println!("{}", outcome.transcript.render());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    for report in outcome.discrepancies.iter().filter(|r| r.is_actionable()) {
        println!(
            "◆ DISCREPANCY {} [{}] {} vs {}",
            report.device_id,
            report.severity.as_str(),
            report.source_a,
            report.source_b
        );
        for field in &report.discrepancies {
            println!(
                "    {}: {} / {} ({})",
                field.field,
                field.value_a,
                field.value_b,
                field.severity.as_str()
            );
        }
    }

    match &outcome.terminal {
        Terminal::Answered { answer } => println!("◆ {}", answer),
        Terminal::ClarificationNeeded { question } => println!("◆ CLARIFICATION NEEDED: {}", question),
        Terminal::Aborted { reason } => println!("◆ ABORTED: {}", reason),
    }
    println!(
        "run {} · {} iterations · {:.1}s",
        outcome.run_id,
        outcome.iterations,
        outcome.elapsed.as_secs_f64()
    );

    Ok(())
}

/// List the tools the orchestrator can call
pub async fn tools_command(path: Option<&Path>) -> Result<()> {
    let config = load_config(path).await?;
    let registry = build_registry(&config)?;

    println!("◆ Registered Tools");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    for descriptor in registry.describe_all() {
        println!("{}", descriptor.summary_line());
    }

    Ok(())
}

/// Show config location and backend readiness
pub async fn status_command(path: Option<&Path>) -> Result<()> {
    let config_path = resolve_path(path);

    println!("◆ netsage Status");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(
        "Config:   {} {}",
        config_path.display(),
        if config_path.exists() {
            "[OK]"
        } else {
            "[Missing]"
        }
    );

    let config = load_config(path).await?;
    println!("Model:    {}", config.reasoning.model);
    println!(
        "Limits:   {} iterations, {}s per tool, {}s overall",
        config.orchestrator.max_iterations,
        config.orchestrator.per_tool_timeout_secs,
        config.orchestrator.overall_timeout_secs
    );

    println!("\nBackends:");
    for (name, ready) in config.configured_backends() {
        println!(
            "  {:<14} {}",
            name,
            if ready { "[Configured]" } else { "[Missing]" }
        );
    }

    Ok(())
}

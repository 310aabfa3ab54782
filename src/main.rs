#![allow(missing_docs)]

//! `leadgate` command-line entry point.
//!
//! One-shot subcommands inspect configuration and the lifecycle table,
//! issue or revoke execution tokens, run a single command through the
//! orchestrator, or sweep expired records.
//! `sweeper` runs the maintenance loop until Ctrl-C.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Map, Value};
use tokio::sync::watch;
use tracing::{info, warn};

use leadgate::adapters::AdapterContract;
use leadgate::bootstrap;
use leadgate::config::Config;
use leadgate::lifecycle::{LeadState, LeadStateMachine, TransitionAttempt};
use leadgate::orchestrator::ExecutionContext;
use leadgate::sweeper;
use leadgate::tokens::ExecutionPlan;
use leadgate::types::{ActorType, ExecutionCommand};

/// Leadgate: execution authority for lead outreach side effects.
#[derive(Parser)]
#[command(name = "leadgate", version, about)]
struct Cli {
    /// Config file (defaults to `$LEADGATE_CONFIG`, then `~/.leadgate/config.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Load and validate configuration, then list the adapters it enables.
    CheckConfig,
    /// List the transitions available from a lead state.
    Transitions {
        /// Source state, e.g. `CONTACTED`.
        #[arg(long)]
        from: LeadState,
    },
    /// Validate one lead transition attempt.
    ValidateTransition {
        /// Current state.
        #[arg(long)]
        from: LeadState,
        /// Desired state.
        #[arg(long)]
        to: LeadState,
        /// Actor attempting the move (`HUMAN`, `AI`, `SYSTEM`).
        #[arg(long)]
        actor: ActorType,
        /// Inputs as a JSON object, or `@path` to read one from a file.
        #[arg(long)]
        inputs: Option<String>,
    },
    /// Run one command through the orchestrator and print the result.
    Execute {
        /// Execution command as JSON, or `@path` to read it from a file.
        #[arg(long)]
        command: String,
        /// Execution context as JSON, or `@path`. Defaults to active billing
        /// with every capability granted.
        #[arg(long)]
        context: Option<String>,
    },
    /// Issue an execution token for an approved plan.
    IssueToken {
        /// Execution plan as JSON, or `@path` to read it from a file.
        #[arg(long)]
        plan: String,
        /// Recorded as the issuer in token metadata.
        #[arg(long, default_value = "cli")]
        issued_by: String,
    },
    /// Revoke an execution token.
    RevokeToken {
        /// Token id.
        #[arg(long)]
        token: String,
        /// Who is revoking it.
        #[arg(long, default_value = "cli")]
        by: String,
        /// Why it is being revoked.
        #[arg(long)]
        reason: String,
    },
    /// Remove expired tokens and idempotency records once.
    Sweep,
    /// Run the maintenance sweeper until interrupted.
    Sweeper,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Command::CheckConfig => handle_check_config(config_path),
        Command::Transitions { from } => handle_transitions(from),
        Command::ValidateTransition {
            from,
            to,
            actor,
            inputs,
        } => handle_validate_transition(from, to, actor, inputs.as_deref()),
        Command::Execute { command, context } => {
            handle_execute(config_path, &command, context.as_deref()).await
        }
        Command::IssueToken { plan, issued_by } => {
            handle_issue_token(config_path, &plan, &issued_by).await
        }
        Command::RevokeToken { token, by, reason } => {
            handle_revoke_token(config_path, &token, &by, &reason).await
        }
        Command::Sweep => handle_sweep(config_path).await,
        Command::Sweeper => handle_sweeper(config_path).await,
    }
}

/// Load config, build the registry without touching the database, and
/// print a summary.
fn handle_check_config(config_path: Option<&Path>) -> Result<ExitCode> {
    leadgate::logging::init_cli();

    let config = Config::load(config_path).context("failed to load configuration")?;
    LeadStateMachine::standard()
        .validate_table()
        .map_err(|problems| anyhow::anyhow!("lifecycle table invalid: {}", problems.join("; ")))?;

    let registry = bootstrap::build_registry(&config, &AdapterContract::in_memory(), |key| {
        std::env::var(key).ok()
    })?;

    let summary = json!({
        "defaultMode": config.safety.default_mode,
        "killSwitch": config.safety.kill_switch,
        "liveTenants": config.safety.live_tenants,
        "databasePath": config.database_path()?,
        "eventsPath": config.audit.events_path,
        "providers": config.providers.keys().collect::<Vec<_>>(),
        "adapters": registry.registered_adapters(),
        "unsupportedActions": registry.unsupported_actions(),
    });
    print_json(&summary)?;
    Ok(ExitCode::SUCCESS)
}

fn handle_transitions(from: LeadState) -> Result<ExitCode> {
    let machine = LeadStateMachine::standard();
    let transitions: Vec<Value> = machine
        .next_states(from)
        .into_iter()
        .map(|to| {
            json!({
                "to": to,
                "requirement": machine.requirement(from, to),
                "systemOnly": machine.is_system_only(from, to),
            })
        })
        .collect();

    print_json(&json!({
        "from": from,
        "terminal": machine.is_terminal_state(from),
        "transitions": transitions,
    }))?;
    Ok(ExitCode::SUCCESS)
}

fn handle_validate_transition(
    from: LeadState,
    to: LeadState,
    actor: ActorType,
    inputs: Option<&str>,
) -> Result<ExitCode> {
    let inputs: Map<String, Value> = match inputs {
        Some(raw) => parse_json_arg(raw, "inputs")?,
        None => Map::new(),
    };
    let attempt = TransitionAttempt {
        from,
        to,
        actor,
        inputs,
    };

    let validation = LeadStateMachine::standard().validate_transition(&attempt);
    print_json(&json!({
        "valid": validation.valid,
        "requirement": validation.requirement,
        "reason": validation.rejection.as_ref().map(ToString::to_string),
    }))?;

    Ok(if validation.valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn handle_execute(
    config_path: Option<&Path>,
    command: &str,
    context: Option<&str>,
) -> Result<ExitCode> {
    leadgate::logging::init_cli();

    let command: ExecutionCommand = parse_json_arg(command, "command")?;
    let context: ExecutionContext = match context {
        Some(raw) => parse_json_arg(raw, "context")?,
        None => ExecutionContext::permissive(),
    };

    let config = Config::load(config_path).context("failed to load configuration")?;
    let runtime = bootstrap::build(config).await?;

    let result = runtime.orchestrator.execute(&command, &context).await;
    print_json(&result)?;

    runtime.pool.close().await;
    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn handle_issue_token(
    config_path: Option<&Path>,
    plan: &str,
    issued_by: &str,
) -> Result<ExitCode> {
    leadgate::logging::init_cli();

    let plan: ExecutionPlan = parse_json_arg(plan, "plan")?;
    let config = Config::load(config_path).context("failed to load configuration")?;
    let (pool, tokens, _) = bootstrap::open_stores(&config).await?;

    let issued = tokens.issue_token(&plan, issued_by).await;
    pool.close().await;

    let token = issued.context("failed to issue execution token")?;
    print_json(&token)?;
    Ok(ExitCode::SUCCESS)
}

async fn handle_revoke_token(
    config_path: Option<&Path>,
    token_id: &str,
    by: &str,
    reason: &str,
) -> Result<ExitCode> {
    leadgate::logging::init_cli();

    let config = Config::load(config_path).context("failed to load configuration")?;
    let (pool, tokens, _) = bootstrap::open_stores(&config).await?;

    let revoked = tokens.revoke_token(token_id, by, reason).await;
    pool.close().await;

    let token = revoked.context("failed to revoke execution token")?;
    print_json(&token)?;
    Ok(ExitCode::SUCCESS)
}

async fn handle_sweep(config_path: Option<&Path>) -> Result<ExitCode> {
    leadgate::logging::init_cli();

    let config = Config::load(config_path).context("failed to load configuration")?;
    let (pool, tokens, dedupe) = bootstrap::open_stores(&config).await?;

    let report = sweeper::sweep_once(&tokens, &dedupe).await;
    print_json(&report)?;

    pool.close().await;
    Ok(ExitCode::SUCCESS)
}

async fn handle_sweeper(config_path: Option<&Path>) -> Result<ExitCode> {
    let config = Config::load(config_path).context("failed to load configuration")?;
    let _logging_guard = leadgate::logging::init_production(&config.logs_dir()?)?;

    let (pool, tokens, dedupe) = bootstrap::open_stores(&config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = sweeper::spawn_sweeper(
        tokens,
        dedupe,
        config.tokens.sweep_interval(),
        shutdown_rx,
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    info!("shutdown requested");

    if shutdown_tx.send(true).is_err() {
        warn!("sweeper already stopped");
    }
    if let Err(e) = handle.await {
        warn!(error = %e, "sweeper task ended abnormally");
    }

    pool.close().await;
    Ok(ExitCode::SUCCESS)
}

/// Parse a JSON argument given inline or as `@path`.
fn parse_json_arg<T: serde::de::DeserializeOwned>(raw: &str, what: &str) -> Result<T> {
    let text = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {what} from {path}"))?,
        None => raw.to_owned(),
    };
    serde_json::from_str(&text).with_context(|| format!("invalid {what} JSON"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render JSON")?;
    println!("{rendered}");
    Ok(())
}

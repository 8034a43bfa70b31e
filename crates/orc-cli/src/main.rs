mod config;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use orc_core::alert::AlertEvaluator;
use orc_core::plan::{build_dag, load_and_validate, validate_integrity};
use orc_core::router::Router;
use orc_core::runner::{PlanRunner, RunnerConfig};
use orc_core::watcher::{InboxWatcher, WatcherConfig};
use orc_store::execution_trace::ExecutionTraceStore;
use orc_store::ledger::{AlertLedger, EvaluationLedger};
use orc_store::models::PlanRunStatus;
use orc_store::policy::{default_phase_policy, load_alert_policy, load_phase_policy};
use orc_store::task_log::TaskLogStore;
use orc_store::Postbox;

use config::RuntimeConfig;

#[derive(Parser)]
#[command(name = "orc", about = "Multi-agent task orchestration runtime")]
struct Cli {
    /// Root directory containing postbox/, logs/, plans/ (overrides ORC_ROOT)
    #[arg(long, global = true)]
    root: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a plan to completion
    Run {
        /// Path to the plan YAML file
        plan_path: String,
        /// Path to a phase_policy.yaml overriding ORC_PHASE_POLICY / the default
        #[arg(long)]
        policy: Option<String>,
        /// Path to an alert_policy.yaml overriding ORC_ALERT_POLICY / the default
        #[arg(long)]
        alert_policy: Option<String>,
        /// Skip writing the execution trace file
        #[arg(long)]
        no_trace: bool,
    },
    /// Load and validate a plan without executing it
    Validate {
        /// Path to the plan YAML file
        plan_path: String,
    },
    /// Watch the orchestrator inbox, routing and alerting on arrival
    Watch {
        /// Path to a phase_policy.yaml overriding ORC_PHASE_POLICY / the default
        #[arg(long)]
        policy: Option<String>,
        /// Path to an alert_policy.yaml overriding ORC_ALERT_POLICY / the default
        #[arg(long)]
        alert_policy: Option<String>,
    },
    /// Print the rolling agent evaluation summary and recent alerts
    Report {
        /// Restrict the evaluation summary to one agent
        #[arg(long)]
        agent: Option<String>,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

fn load_router(config: &RuntimeConfig, postbox: Postbox) -> Result<Router> {
    let policy = load_phase_policy(&config.phase_policy_path)
        .context("failed to load phase policy")?
        .unwrap_or_else(default_phase_policy);
    let known_agents = known_agents(&config.plans_dir);
    let ledger = EvaluationLedger::new(&config.logs_root);
    Ok(Router::new(postbox, policy, known_agents, ledger))
}

fn load_alerts(config: &RuntimeConfig, postbox: Postbox) -> Result<AlertEvaluator> {
    let policy = load_alert_policy(&config.alert_policy_path)
        .context("failed to load alert policy")?
        .unwrap_or_default();
    let ledger = AlertLedger::new(&config.logs_root);
    Ok(AlertEvaluator::new(policy, postbox, ledger))
}

/// Every agent referenced by any plan under `plans_dir`, used to resolve
/// `ORIGINAL_RECIPIENT` when the router has no dispatch history for a
/// task (a `watch`-only process never dispatched anything itself).
fn known_agents(plans_dir: &std::path::Path) -> Vec<String> {
    let mut agents = std::collections::HashSet::new();
    let entries = match std::fs::read_dir(plans_dir) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        let Ok(raw) = std::fs::read_to_string(&path) else {
            continue;
        };
        let Ok(plan) = serde_yaml::from_str::<orc_store::models::Plan>(&raw) else {
            continue;
        };
        for task in plan.tasks {
            agents.insert(task.agent);
            if let Some(fallback) = task.fallback_agent {
                agents.insert(fallback);
            }
        }
    }
    agents.into_iter().collect()
}

async fn cmd_run(
    mut config: RuntimeConfig,
    plan_path: &str,
    policy_override: Option<String>,
    alert_policy_override: Option<String>,
    no_trace: bool,
) -> Result<i32> {
    if let Some(policy) = policy_override {
        config.phase_policy_path = PathBuf::from(policy);
    }
    if let Some(alert_policy) = alert_policy_override {
        config.alert_policy_path = PathBuf::from(alert_policy);
    }
    let _ = no_trace; // the execution trace is always written; the flag only controls stdout verbosity

    let postbox = Postbox::new(&config.postbox_root);
    let task_logs = TaskLogStore::new(&config.logs_root);
    let traces = ExecutionTraceStore::new(&config.logs_root);
    let router = load_router(&config, postbox.clone())?;

    let runner_config = RunnerConfig {
        default_timeout: config.default_timeout,
        default_retry_delay: config.default_retry_delay,
        poll_interval: config.poll_interval,
    };
    let runner = PlanRunner::new(postbox.clone(), task_logs, traces)
        .with_config(runner_config)
        .with_router(router);

    let outcome = match runner.run(std::path::Path::new(plan_path)).await {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("{e:#}");
            return Ok(2);
        }
    };

    // Drain whatever the run forwarded to the orchestrator's own inbox
    // (errors and needs_input replies) through a fresh router and the
    // alert evaluator before reporting a final status. A fresh router
    // has no dispatch history of its own, but the run above already
    // delivered task_assignment envelopes directly, so this drain only
    // ever sees error/needs_input/task_result traffic landing in
    // ORCHESTRATOR's inbox, for which the heuristic fallback suffices.
    let alerts = load_alerts(&config, postbox.clone())?;
    let drain_router = load_router(&config, postbox.clone())?;
    let watcher = InboxWatcher::new(postbox, drain_router, alerts);
    if let Err(e) = watcher.poll_once().await {
        warn!(error = %e, "post-run inbox drain failed");
    }

    println!("execution_id: {}", outcome.execution_id);
    println!("status: {}", outcome.status);
    println!(
        "trace: logs/traces/execution_trace_{}.json",
        outcome.execution_id
    );

    Ok(match outcome.status {
        PlanRunStatus::Success => 0,
        PlanRunStatus::Partial | PlanRunStatus::Failed | PlanRunStatus::Running => 1,
    })
}

fn cmd_validate(plan_path: &str) -> Result<i32> {
    let plan = match load_and_validate(std::path::Path::new(plan_path)) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("{e}");
            return Ok(2);
        }
    };
    let dag = match build_dag(&plan) {
        Ok(dag) => dag,
        Err(e) => {
            eprintln!("{e}");
            return Ok(2);
        }
    };
    let report = validate_integrity(&dag, &plan);

    println!("plan {} ({} tasks) is valid", plan.plan_id, plan.tasks.len());
    for (key, value) in &report.stats {
        println!("  {key}: {value}");
    }
    for warning in &report.warnings {
        println!("  warning: {warning}");
    }

    Ok(0)
}

async fn cmd_watch(
    mut config: RuntimeConfig,
    policy_override: Option<String>,
    alert_policy_override: Option<String>,
) -> Result<i32> {
    if let Some(policy) = policy_override {
        config.phase_policy_path = PathBuf::from(policy);
    }
    if let Some(alert_policy) = alert_policy_override {
        config.alert_policy_path = PathBuf::from(alert_policy);
    }

    let postbox = Postbox::new(&config.postbox_root);
    let router = load_router(&config, postbox.clone())?;
    let alerts = load_alerts(&config, postbox.clone())?;
    let watcher = InboxWatcher::new(postbox, router, alerts).with_config(WatcherConfig {
        poll_interval: config.poll_interval,
    });

    let cancel = CancellationToken::new();
    let cancel_for_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received interrupt, shutting down watcher");
            cancel_for_signal.cancel();
        }
    });

    watcher.run(cancel).await?;
    Ok(0)
}

fn cmd_report(config: RuntimeConfig, agent: Option<String>) -> Result<i32> {
    let evaluations = EvaluationLedger::new(&config.logs_root);
    let alerts = AlertLedger::new(&config.logs_root);

    match &agent {
        Some(agent_id) => {
            let summary = evaluations
                .rolling_summary(agent_id, 20)
                .context("failed to compute rolling summary")?;
            println!("Agent: {}", summary.agent_id);
            println!("  Evaluations: {}", summary.count);
            println!(
                "  Avg score:   {}",
                summary
                    .avg_score
                    .map(|s| format!("{s:.3}"))
                    .unwrap_or_else(|| "-".to_string())
            );
            println!(
                "  Success:     {}",
                summary
                    .success_rate
                    .map(|s| format!("{:.0}%", s * 100.0))
                    .unwrap_or_else(|| "-".to_string())
            );
        }
        None => {
            let records = evaluations.all().context("failed to read evaluation ledger")?;
            let mut agents: Vec<String> = records.iter().map(|r| r.agent_id.clone()).collect();
            agents.sort();
            agents.dedup();

            println!(
                "{:<20} {:>6} {:>10} {:>10}",
                "AGENT", "COUNT", "AVG_SCORE", "SUCCESS"
            );
            for agent_id in agents {
                let summary = evaluations.rolling_summary(&agent_id, 20)?;
                println!(
                    "{:<20} {:>6} {:>10} {:>10}",
                    summary.agent_id,
                    summary.count,
                    summary
                        .avg_score
                        .map(|s| format!("{s:.3}"))
                        .unwrap_or_else(|| "-".to_string()),
                    summary
                        .success_rate
                        .map(|s| format!("{:.0}%", s * 100.0))
                        .unwrap_or_else(|| "-".to_string()),
                );
            }
        }
    }

    println!();
    let triggered = alerts.all().context("failed to read alert ledger")?;
    println!("Recent alerts ({} total):", triggered.len());
    for entry in triggered.iter().rev().take(10) {
        println!(
            "  [{}] {} task={} agent={}",
            entry.timestamp,
            entry.rule_name,
            entry.task_id.as_deref().unwrap_or("-"),
            entry.agent_id.as_deref().unwrap_or("-"),
        );
    }

    Ok(0)
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let config = RuntimeConfig::resolve(cli.root.as_deref());

    // Errors surfaced here are I/O or policy-load failures: plan-level
    // problems are already converted to exit code 2 inside each command
    // so the process can still print a status line before exiting.
    let result = match cli.command {
        Commands::Run {
            plan_path,
            policy,
            alert_policy,
            no_trace,
        } => cmd_run(config, &plan_path, policy, alert_policy, no_trace).await,
        Commands::Validate { plan_path } => cmd_validate(&plan_path),
        Commands::Watch {
            policy,
            alert_policy,
        } => cmd_watch(config, policy, alert_policy).await,
        Commands::Report { agent } => cmd_report(config, agent),
    };

    match result {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            eprintln!("{e:#}");
            std::process::exit(3);
        }
    }
}

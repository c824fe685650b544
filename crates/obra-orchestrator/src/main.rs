//! Obra binary entrypoint — wires configuration, state storage, plugin
//! registries, and the scheduler into one run of a project's ready
//! queue (spec §1, §6).
//!
//! CLI surface is intentionally thin: the orchestration loop itself,
//! not argument parsing, is the subject of this repository. Grounded on
//! `orchestrator.rs`'s `process_issue` invocation style — a handful of
//! constructed components passed into one async entrypoint — rather
//! than the teacher's full `main.rs` (which also wires beads/worktree
//! bridges outside this crate's scope).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use obra_coordination::plugins::{AgentConfig as PluginAgentConfig, AgentRegistry, ProviderConfig, Registry};
use obra_coordination::state::{StateManager, StateStore};

use obra_orchestrator::agent::SubprocessAgentSession;
use obra_orchestrator::config::Config;
use obra_orchestrator::context::ContextBuilder;
use obra_orchestrator::hooks::{HookDispatcher, LoggingHook};
use obra_orchestrator::iteration::DriverConfig;
use obra_orchestrator::llm::HttpLlmClient;
use obra_orchestrator::scheduler::Scheduler;

#[derive(Parser, Debug)]
#[command(name = "obra", about = "Semi-autonomous software-development supervisor")]
struct Cli {
    /// Project to drive, identified by its id.
    #[arg(long)]
    project_id: u64,

    /// Project-level config file (spec §6 project layer).
    #[arg(long)]
    config: Option<PathBuf>,

    /// User-level config file (spec §6 user layer).
    #[arg(long)]
    user_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = Config::from_layers(cli.config.as_deref(), cli.user_config.as_deref())?;

    let store = StateStore::open(database_path(&config.database.url))?.shared();
    let state = StateManager::new(store);

    let llm = Arc::new(HttpLlmClient::new(&config.llm, config.retry.to_coordination())?);

    let mut agent_registry: AgentRegistry = Registry::new();
    agent_registry.register(
        "subprocess",
        Box::new(|_cfg: &ProviderConfig| {
            Ok(Box::new(SubprocessAgentSession::new("obra-agent")) as Box<_>)
        }),
    );

    let mut hooks = HookDispatcher::new();
    hooks.register(Box::new(LoggingHook));

    let scheduler = Scheduler::new(
        Arc::clone(&state),
        llm.clone(),
        Arc::new(agent_registry),
        config.agent.kind.clone(),
        ProviderConfig::new(),
        PluginAgentConfig {
            workspace: PathBuf::from(&config.agent.workspace),
            bypass_permissions: config.agent.bypass_permissions,
            response_timeout: Duration::from_secs(config.agent.response_timeout_seconds),
        },
        Arc::new(ContextBuilder::new(config.llm.max_tokens as usize)),
        Arc::new(hooks),
        config.orchestration.concurrent_items,
    );

    let outcomes = scheduler
        .drain_ready(cli.project_id, || DriverConfig {
            max_iterations: config.orchestration.max_iterations,
            iteration_timeout: Duration::from_secs(config.orchestration.iteration_timeout_seconds),
            required_sections: Vec::new(),
            thresholds: config.decision.to_coordination(),
            weights: obra_coordination::confidence::Weights::default(),
            retry: config.retry.to_coordination(),
        })
        .await?;

    tracing::info!(count = outcomes.len(), "project drain complete");
    Ok(())
}

fn database_path(url: &str) -> PathBuf {
    PathBuf::from(url.strip_prefix("rocksdb://").unwrap_or(url))
}

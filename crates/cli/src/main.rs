//! `rusty-automation-tool` CLI entry-point.
//!
//! Sub-commands:
//! - `start`     — run a DAG to completion in the foreground.
//! - `dry`       — validate a DAG's structure/preconditions without
//!                 executing anything.
//! - `retry`     — re-run a prior run, preserving Success/Skipped nodes.
//! - `stop`      — ask a running DAG's Agent to cancel.
//! - `status`    — print the current or a specific run's status.
//! - `scheduler` — start the queue daemon and cron dispatcher.
//! - `server`    — the web/API surface; out of scope for this build.

mod config;
mod dag_loader;
mod http;

use std::collections::HashMap;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;
use uuid::Uuid;

use agent::{Agent, AgentConfig, RetryFrom, RunMode};
use engine::{Dag, TriggerKind};
use executor::CancelToken;
use queue::{CronDispatcher, DagEntry, Daemon, DaemonConfig, FileQueue};
use store::{RunRecord, RunState};

use config::{Config, GlobalOpts};

#[derive(Parser)]
#[command(name = "rusty-automation-tool", about = "DAG workflow orchestrator", version)]
struct Cli {
    #[command(flatten)]
    global: GlobalOpts,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a DAG to completion in the foreground.
    Start {
        dag: PathBuf,
        #[arg(long)]
        run_id: Option<String>,
        /// `KEY=VALUE`, repeatable; overrides the DAG's own params.
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
    },
    /// Validate a DAG's structure and preconditions without executing.
    Dry { dag: PathBuf },
    /// Re-run a prior run, preserving its Success/Skipped nodes.
    Retry {
        dag: PathBuf,
        /// The run to retry from; defaults to the latest.
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Ask a running DAG's Agent to cancel.
    Stop { dag: PathBuf },
    /// Print a run's status as JSON.
    Status {
        dag: PathBuf,
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Start the queue daemon and cron dispatcher.
    Scheduler,
    /// The web/API server. Out of scope for this build.
    Server,
}

fn parse_param(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got `{s}`"))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.global);

    let result = match cli.command {
        Command::Start { dag, run_id, params } => {
            cmd_run(&cli.global, &config, dag, run_id, params.into_iter().collect(), TriggerKind::Manual, RunMode::Normal, None).await
        }
        Command::Dry { dag } => {
            cmd_run(&cli.global, &config, dag, None, HashMap::new(), TriggerKind::Manual, RunMode::Dry, None).await
        }
        Command::Retry { dag, run_id } => cmd_retry(&cli.global, &config, dag, run_id).await,
        Command::Stop { dag } => cmd_stop(&cli.global, &config, dag).await,
        Command::Status { dag, run_id } => cmd_status(&cli.global, &config, dag, run_id).await,
        Command::Scheduler => cmd_scheduler(&config).await,
        Command::Server => cmd_server().await,
    };

    if let Err(err) = result {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn cmd_run(
    global: &GlobalOpts,
    config: &Config,
    dag_path: PathBuf,
    run_id: Option<String>,
    params: HashMap<String, String>,
    trigger: TriggerKind,
    mode: RunMode,
    retry: Option<RetryFrom>,
) -> anyhow::Result<()> {
    let dag = dag_loader::load(&dag_path)?;
    let config_path = Config::config_path_for(global, &dag_path);
    let run_id = run_id.unwrap_or_else(|| Uuid::new_v4().to_string());

    let record = execute(config, dag, config_path, run_id, trigger, params, mode, retry).await?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    if matches!(record.status, RunState::Error | RunState::Cancel) {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_retry(
    global: &GlobalOpts,
    config: &Config,
    dag_path: PathBuf,
    run_id: Option<String>,
) -> anyhow::Result<()> {
    let dag = dag_loader::load(&dag_path)?;
    let config_path = Config::config_path_for(global, &dag_path);

    let prior = match &run_id {
        Some(id) => store::run_store::find_by_run_id(&config.data_dir, &dag.name, &config_path, id).await?,
        None => store::run_store::read_latest(&config.data_dir, &dag.name, &config_path)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no prior run found for dag '{}'", dag.name))?,
    };

    let new_run_id = Uuid::new_v4().to_string();
    let retry_from = RetryFrom { snapshots: prior.nodes.clone() };
    let record = execute(
        config,
        dag,
        config_path,
        new_run_id,
        TriggerKind::Retry,
        prior.params.clone(),
        RunMode::Normal,
        Some(retry_from),
    )
    .await?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    if matches!(record.status, RunState::Error | RunState::Cancel) {
        std::process::exit(1);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn execute(
    config: &Config,
    dag: Dag,
    config_path: PathBuf,
    run_id: String,
    trigger: TriggerKind,
    params: HashMap<String, String>,
    mode: RunMode,
    retry: Option<RetryFrom>,
) -> anyhow::Result<RunRecord> {
    let agent_config = AgentConfig {
        home: config.home.clone(),
        data_dir: config.data_dir.clone(),
        log_dir: config.log_dir.clone(),
        config_path,
    };
    let agent = Agent::new(agent_config);
    let record = agent.run(dag, run_id, trigger, params, mode, retry).await?;
    Ok(record)
}

async fn cmd_stop(global: &GlobalOpts, config: &Config, dag_path: PathBuf) -> anyhow::Result<()> {
    let dag = dag_loader::load(&dag_path)?;
    let config_path = Config::config_path_for(global, &dag_path);
    let record = store::run_store::read_latest(&config.data_dir, &dag.name, &config_path)
        .await?
        .ok_or_else(|| anyhow::anyhow!("no run found for dag '{}'", dag.name))?;

    if record.status != RunState::Running {
        println!("dag '{}' is not running", dag.name);
        return Ok(());
    }
    let addr = record
        .control_addr
        .ok_or_else(|| anyhow::anyhow!("running record for '{}' has no control address", dag.name))?;
    http::post_stop(&addr).await?;
    println!("stop requested for run {}", record.run_id);
    Ok(())
}

async fn cmd_status(
    global: &GlobalOpts,
    config: &Config,
    dag_path: PathBuf,
    run_id: Option<String>,
) -> anyhow::Result<()> {
    let dag = dag_loader::load(&dag_path)?;
    let config_path = Config::config_path_for(global, &dag_path);

    let record = match run_id {
        Some(id) => store::run_store::find_by_run_id(&config.data_dir, &dag.name, &config_path, &id).await?,
        None => store::run_store::read_latest(&config.data_dir, &dag.name, &config_path)
            .await?
            .ok_or_else(|| anyhow::anyhow!("no run found for dag '{}'", dag.name))?,
    };
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

async fn cmd_scheduler(config: &Config) -> anyhow::Result<()> {
    let dag_entries: Vec<DagEntry> = dag_loader::load_all(&config.dags_dir)?
        .into_iter()
        .map(|(dag, config_path)| DagEntry { dag, config_path })
        .collect();
    info!(count = dag_entries.len(), home = %config.home.display(), "loaded dags");

    let agent_binary = std::env::current_exe()?;
    let daemon_config = DaemonConfig {
        data_dir: config.data_dir.clone(),
        queues_dir: config.queues_dir.clone(),
        global_queues: config.global_queues.clone(),
        tick_interval: config.tick_interval,
        heartbeat_timeout: config.heartbeat_timeout,
        agent_binary,
        max_spawn_attempts: config.max_spawn_attempts,
    };
    let daemon = Daemon::new(daemon_config, dag_entries.clone());
    let cron = CronDispatcher::new(dag_entries);
    let cron_queue = FileQueue::new(config.queues_dir.clone());

    let shutdown = CancelToken::new();

    let daemon_shutdown = shutdown.clone();
    let daemon_handle = tokio::spawn(async move { daemon.run(daemon_shutdown).await });

    let cron_shutdown = shutdown.clone();
    let data_dir = config.data_dir.clone();
    let tick_interval = config.tick_interval;
    let cron_handle = tokio::spawn(async move {
        loop {
            if cron_shutdown.is_cancelled() {
                return;
            }
            let actions = cron.tick().await;
            cron.apply(&cron_queue, actions, &data_dir).await;
            tokio::select! {
                _ = tokio::time::sleep(tick_interval) => {}
                _ = cron_shutdown.cancelled() => return,
            }
        }
    });

    tokio::signal::ctrl_c().await.ok();
    info!("shutting down scheduler");
    shutdown.cancel();
    let _ = daemon_handle.await;
    let _ = cron_handle.await;
    Ok(())
}

async fn cmd_server() -> anyhow::Result<()> {
    anyhow::bail!(
        "the web/API server is out of scope for this build; use `scheduler` for the daemon \
         or `start`/`status`/`stop`/`retry` for direct run control"
    )
}

//! `agent` crate — the per-run supervisor: owns a single DAG execution
//! end-to-end. Acquires the advisory lock, builds the Graph, drives the
//! Scheduler, streams progress to the run store, runs lifecycle
//! handlers, and tears everything down.

pub mod control;
pub mod error;
pub mod lock;
pub mod token;

pub use error::AgentError;
pub use lock::RunLock;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};

use engine::interpolate::check_precondition;
use engine::{Dag, Graph, NodeSnapshot, Scheduler, SchedulerConfig, TriggerKind};
use executor::{Backend, ExecOutcome, ExecRequest, ExecutorError, LocalExecutor, Signal};
use store::{run_store, RunRecord, RunState};

use control::{ControlServer, ControlState};

/// How a run should execute its Nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Normal,
    /// Skips Setup/Execute/Teardown; every Node reports Success. Used to
    /// validate a DAG's structure and preconditions without side effects.
    Dry,
}

/// A backend that performs no I/O and reports every step as succeeding
/// instantly, for `RunMode::Dry`.
#[derive(Debug, Default, Clone, Copy)]
struct NoopBackend;

#[async_trait]
impl Backend for NoopBackend {
    async fn run(&self, _req: ExecRequest) -> Result<ExecOutcome, ExecutorError> {
        Ok(ExecOutcome { exit_code: 0 })
    }
}

/// A prior run's node snapshots to rehydrate from, for retry mode.
/// Per-node command overrides are plumbed by the caller rewriting the
/// relevant `Step`s in `dag` before calling `run`.
#[derive(Debug, Clone, Default)]
pub struct RetryFrom {
    pub snapshots: HashMap<String, NodeSnapshot>,
}

/// Filesystem layout the Agent reads and writes under.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub home: PathBuf,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub config_path: PathBuf,
}

impl AgentConfig {
    pub fn dag_log_dir(&self, dag_name: &str) -> PathBuf {
        self.log_dir.join(store::paths::sanitize(dag_name))
    }
}

/// One invocation of the Agent owns exactly one run.
pub struct Agent {
    config: AgentConfig,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    /// Run `dag` to completion as `run_id`, persisting status throughout
    /// and returning the final record. This is the single entry point
    /// used by both the `start`/`retry`/`dry` CLI subcommands and the
    /// daemon's spawned child process.
    pub async fn run(
        &self,
        dag: Dag,
        run_id: String,
        trigger: TriggerKind,
        params: HashMap<String, String>,
        mode: RunMode,
        retry: Option<RetryFrom>,
    ) -> Result<RunRecord, AgentError> {
        let dag_name = dag.name.clone();
        let dag_dir = store::paths::dag_dir(&self.config.data_dir, &dag_name, &self.config.config_path);
        let lock = RunLock::try_acquire(&dag_dir)?;
        info!(dag = %dag_name, run_id = %run_id, path = %lock.path().display(), "acquired run lock");

        let log_dir = self.config.dag_log_dir(&dag_name);
        let writer = Arc::new(
            run_store::new_writer(&self.config.data_dir, &dag_name, &self.config.config_path, &run_id)
                .await?,
        );

        let mut dag_env = dag.params.clone();
        dag_env.extend(params.clone());

        let mut record = RunRecord::queued(run_id.clone(), dag_name.clone(), trigger, params);
        record.status = RunState::Running;
        record.started_at = Some(Utc::now());
        record.log_path = Some(log_dir.clone());
        writer.write(&record).await?;

        for pre in &dag.preconditions {
            if !check_precondition(pre, &dag_env).await {
                warn!(dag = %dag_name, condition = %pre.condition, "DAG precondition failed");
                record.status = RunState::Cancel;
                record.finished_at = Some(Utc::now());
                record.last_error = Some(format!("precondition failed: {}", pre.condition));
                writer.write(&record).await?;
                self.retain(&dag, writer.path()).await;
                return Ok(record);
            }
        }

        let graph = match &retry {
            Some(from) => Arc::new(Graph::build_for_retry(dag.steps.clone(), &from.snapshots)?),
            None => Arc::new(Graph::build(dag.steps.clone())?),
        };

        let backend: Arc<dyn Backend> = match mode {
            RunMode::Normal => Arc::new(LocalExecutor),
            RunMode::Dry => Arc::new(NoopBackend),
        };

        let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel::<NodeSnapshot>();
        let scheduler_config = SchedulerConfig::from_dag(&dag, run_id.clone(), log_dir.clone());
        let scheduler = Arc::new(Scheduler::new(
            graph.clone(),
            dag_env.clone(),
            backend,
            scheduler_config,
            Some(events_tx),
        ));

        let (status_tx, status_rx) = watch::channel(record.clone());
        let control = ControlServer::spawn(ControlState {
            scheduler: scheduler.clone(),
            status: status_rx,
        })
        .await?;
        record.control_addr = Some(control.addr.to_string());
        writer.write(&record).await?;
        info!(addr = %control.addr, "control endpoint listening");

        let progress = tokio::spawn({
            let writer = writer.clone();
            let mut record = record.clone();
            let status_tx = status_tx.clone();
            async move {
                while let Some(snapshot) = events_rx.recv().await {
                    record.nodes.insert(snapshot.name.clone(), snapshot);
                    let _ = writer.write(&record).await;
                    let _ = status_tx.send(record.clone());
                }
            }
        });

        self.install_signal_handlers(scheduler.clone());

        let run_status = scheduler.run().await;

        progress.abort();
        record.nodes = graph.snapshots().await;
        record.status = run_status.into();

        let handler_snapshots = scheduler.run_lifecycle_handlers(&dag.handlers, run_status).await;
        record.handlers = handler_snapshots;
        record.finished_at = Some(Utc::now());
        if let Some(err) = record
            .nodes
            .values()
            .chain(record.handlers.values())
            .find_map(|n| n.last_error.clone())
        {
            record.last_error = Some(err);
        }
        writer.write(&record).await?;
        let _ = status_tx.send(record.clone());

        control.shutdown().await;
        self.retain(&dag, writer.path()).await;

        info!(dag = %dag_name, run_id = %record.run_id, status = ?record.status, "run finished");
        Ok(record)
    }

    /// Sweep old status files for `dag`, always keeping `keep` (the
    /// current run's own file) even when `hist_retention_days == 0`.
    async fn retain(&self, dag: &Dag, keep: &std::path::Path) {
        if let Err(err) = run_store::remove_old(
            &self.config.data_dir,
            &dag.name,
            &self.config.config_path,
            dag.hist_retention_days,
            keep,
        )
        .await
        {
            warn!(dag = %dag.name, %err, "history retention sweep failed");
        }
    }

    /// SIGTERM/SIGINT/SIGHUP all forward to the Scheduler as Term and
    /// trigger the on-cancel handler path.
    fn install_signal_handlers(&self, scheduler: Arc<Scheduler>) {
        for kind in [SignalKind::terminate(), SignalKind::interrupt(), SignalKind::hangup()] {
            let scheduler = scheduler.clone();
            tokio::spawn(async move {
                match signal(kind) {
                    Ok(mut stream) => {
                        if stream.recv().await.is_some() {
                            scheduler.signal(Signal::Term).await;
                        }
                    }
                    Err(err) => error!(%err, "failed to install signal handler"),
                }
            });
        }
    }
}

//! The global scheduler daemon: drains per-queue FIFOs under
//! global and per-DAG concurrency limits, starting one detached Agent
//! process per admitted run.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use engine::Dag;
use tracing::{error, info, warn};

use crate::entry::QueueEntry;
use crate::file_queue::FileQueue;

/// A DAG known to the daemon, paired with the config path its status
/// files are hashed against.
#[derive(Clone)]
pub struct DagEntry {
    pub dag: Dag,
    pub config_path: PathBuf,
}

impl DagEntry {
    fn effective_queue(&self) -> &str {
        self.dag.queue_name()
    }
}

pub struct DaemonConfig {
    pub data_dir: PathBuf,
    pub queues_dir: PathBuf,
    /// Named global queues and their shared concurrency cap. Any DAG
    /// whose `queue_name()` doesn't appear here gets an implicit local
    /// queue with concurrency 1.
    pub global_queues: HashMap<String, u32>,
    pub tick_interval: Duration,
    /// `Running` status records older than this, with no live process
    /// backing them, are swept to `Error` at daemon startup.
    pub heartbeat_timeout: chrono::Duration,
    /// The binary re-invoked (as `{agent_binary} start <path>
    /// --run-id <id>`) to run one Agent per admitted run.
    pub agent_binary: PathBuf,
    /// How many failed spawn attempts before a queued run is failed
    /// outright.
    pub max_spawn_attempts: u32,
}

pub struct Daemon {
    config: DaemonConfig,
    queue: FileQueue,
    dags: Vec<DagEntry>,
}

impl Daemon {
    pub fn new(config: DaemonConfig, dags: Vec<DagEntry>) -> Self {
        let queue = FileQueue::new(config.queues_dir.clone());
        Self { config, queue, dags }
    }

    pub fn queue(&self) -> &FileQueue {
        &self.queue
    }

    fn queue_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.dags.iter().map(|d| d.effective_queue().to_string()).collect();
        names.extend(self.config.global_queues.keys().cloned());
        names.sort();
        names.dedup();
        names
    }

    fn cap_for(&self, queue_name: &str) -> u32 {
        self.config.global_queues.get(queue_name).copied().unwrap_or(1)
    }

    fn members_of(&self, queue_name: &str) -> Vec<&DagEntry> {
        self.dags.iter().filter(|d| d.effective_queue() == queue_name).collect()
    }

    /// Current count of `Running` statuses across a queue's member DAGs,
    /// by scanning the run store.
    async fn running_count(&self, members: &[&DagEntry]) -> u32 {
        let mut n = 0;
        for dag in members {
            if let Ok(Some(record)) = store::run_store::read_latest(&self.config.data_dir, &dag.dag.name, &dag.config_path).await {
                if record.status == store::RunState::Running {
                    n += 1;
                }
            }
        }
        n
    }

    async fn running_count_for_dag(&self, dag: &DagEntry) -> u32 {
        self.running_count(&[dag]).await
    }

    /// One daemon tick: for each queue with spare capacity, admit the
    /// highest-priority entry whose owning DAG also has capacity.
    pub async fn tick(&self) {
        for queue_name in self.queue_names() {
            let members = self.members_of(&queue_name);
            let cap = self.cap_for(&queue_name);
            let mut running = self.running_count(&members).await;

            while running < cap {
                let Ok(Some(entry)) = self.queue.peek(&queue_name).await else { break };
                let Some(dag) = self.dags.iter().find(|d| d.dag.name == entry.dag_name) else {
                    warn!(dag = %entry.dag_name, "queued run references unknown DAG, dropping");
                    let _ = self.queue.dequeue(&queue_name).await;
                    continue;
                };

                if dag.dag.max_active_runs > 0 {
                    let dag_running = self.running_count_for_dag(dag).await;
                    if dag_running >= dag.dag.max_active_runs {
                        break;
                    }
                }

                match self.admit(&queue_name, dag, &entry).await {
                    Ok(()) => running += 1,
                    Err(err) => {
                        error!(run_id = %entry.run_id, %err, "failed to start agent for queued run");
                        self.handle_spawn_failure(&queue_name, entry).await;
                    }
                }
            }
        }
    }

    /// Mark the run `Running` in the store, remove it from the queue,
    /// then spawn a detached Agent process.
    async fn admit(&self, queue_name: &str, dag: &DagEntry, entry: &QueueEntry) -> std::io::Result<()> {
        let writer = store::run_store::new_writer(&self.config.data_dir, &dag.dag.name, &dag.config_path, &entry.run_id)
            .await
            .map_err(to_io_error)?;
        let mut record = store::RunRecord::queued(entry.run_id.clone(), dag.dag.name.clone(), entry.trigger, dag.dag.params.clone());
        record.status = store::RunState::Running;
        record.started_at = Some(Utc::now());
        writer.write(&record).await.map_err(to_io_error)?;

        spawn_agent(&self.config.agent_binary, &dag.config_path, &entry.run_id)?;
        self.queue.dequeue(queue_name).await.map_err(to_io_error)?;
        info!(run_id = %entry.run_id, dag = %dag.dag.name, "admitted queued run");
        Ok(())
    }

    async fn handle_spawn_failure(&self, queue_name: &str, mut entry: QueueEntry) {
        entry.spawn_attempts += 1;
        let _ = self.queue.dequeue(queue_name).await;
        if entry.spawn_attempts >= self.config.max_spawn_attempts {
            error!(run_id = %entry.run_id, "giving up on queued run after repeated spawn failures");
            return;
        }
        if let Err(err) = self.queue.enqueue(entry.clone()).await {
            error!(run_id = %entry.run_id, %err, "failed to re-enqueue after spawn failure");
        }
    }

    /// Sweep `Running` records with no recent heartbeat to `Error`, run
    /// once at daemon startup.
    pub async fn sweep_orphans(&self) {
        let now = Utc::now();
        for dag in &self.dags {
            let Ok(Some(mut record)) = store::run_store::read_latest(&self.config.data_dir, &dag.dag.name, &dag.config_path).await else { continue };
            if record.status != store::RunState::Running {
                continue;
            }
            let stale = record
                .started_at
                .map(|t| now - t > self.config.heartbeat_timeout)
                .unwrap_or(true);
            if stale {
                warn!(run_id = %record.run_id, dag = %dag.dag.name, "sweeping orphaned running record to error");
                record.status = store::RunState::Error;
                record.finished_at = Some(now);
                record.last_error = Some("orphaned: no heartbeat before daemon startup".to_string());
                if let Ok(writer) = store::run_store::new_writer(&self.config.data_dir, &dag.dag.name, &dag.config_path, &record.run_id).await {
                    let _ = writer.write(&record).await;
                }
            }
        }
    }

    /// Run the daemon loop until `shutdown` resolves.
    pub async fn run(&self, shutdown: executor::CancelToken) {
        self.sweep_orphans().await;
        loop {
            if shutdown.is_cancelled() {
                return;
            }
            self.tick().await;
            tokio::select! {
                _ = tokio::time::sleep(self.config.tick_interval) => {}
                _ = shutdown.cancelled() => return,
            }
        }
    }
}

fn to_io_error<E: std::fmt::Display>(err: E) -> std::io::Error {
    std::io::Error::other(err.to_string())
}

/// Start `{binary} start <dag_path> --run-id <id>` as a detached child,
/// its own session leader so it survives the daemon's controlling
/// terminal going away. `dag` is positional on the CLI's `start`
/// subcommand, not a `--dag` flag.
#[cfg(unix)]
fn spawn_agent(binary: &std::path::Path, dag_path: &std::path::Path, run_id: &str) -> std::io::Result<()> {
    use std::os::unix::process::CommandExt;
    let mut cmd = std::process::Command::new(binary);
    cmd.arg("start")
        .arg(dag_path)
        .arg("--run-id")
        .arg(run_id)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());
    unsafe {
        cmd.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }
    cmd.spawn()?;
    Ok(())
}

#[cfg(not(unix))]
fn spawn_agent(binary: &std::path::Path, dag_path: &std::path::Path, run_id: &str) -> std::io::Result<()> {
    std::process::Command::new(binary)
        .arg("start")
        .arg(dag_path)
        .arg("--run-id")
        .arg(run_id)
        .spawn()?;
    Ok(())
}


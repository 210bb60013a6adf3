//! Cron dispatcher: evaluates `schedule.start/stop/restart` expressions
//! and enqueues or cancels runs accordingly.

use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;
use engine::TriggerKind;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::daemon::DagEntry;
use crate::entry::{Priority, QueueEntry};
use crate::file_queue::FileQueue;

/// What a tick of the dispatcher decided to do.
#[derive(Debug, Clone)]
pub enum CronAction {
    /// Enqueue a fresh run of this DAG.
    Start { dag_name: String, config_path: PathBuf },
    /// Cancel the DAG's currently running instance, if any.
    Stop { dag_name: String, config_path: PathBuf },
    /// Stop, then immediately start.
    Restart { dag_name: String, config_path: PathBuf },
}

/// Parse a schedule expression. The `cron` crate's grammar includes a
/// leading seconds field; DAG authors write standard 5-field expressions,
/// so a bare 5-field string gets `0 ` prepended before parsing.
fn parse_schedule(expr: &str) -> Result<Schedule, cron::error::Error> {
    match Schedule::from_str(expr) {
        Ok(schedule) => Ok(schedule),
        Err(_) if expr.split_whitespace().count() == 5 => Schedule::from_str(&format!("0 {expr}")),
        Err(err) => Err(err),
    }
}

/// True if `expr` has a firing time in `(since, now]`.
fn fires_between(expr: &str, since: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    match parse_schedule(expr) {
        Ok(schedule) => schedule.after(&since).next().map(|t| t <= now).unwrap_or(false),
        Err(err) => {
            warn!(expr, %err, "invalid cron expression, skipping");
            false
        }
    }
}

pub struct CronDispatcher {
    dags: Vec<DagEntry>,
    last_tick: Mutex<Option<DateTime<Utc>>>,
}

impl CronDispatcher {
    pub fn new(dags: Vec<DagEntry>) -> Self {
        Self { dags, last_tick: Mutex::new(None) }
    }

    /// Evaluate every known DAG's schedules against the window since the
    /// previous tick and return the actions that fired.
    pub async fn tick(&self) -> Vec<CronAction> {
        let now = Utc::now();
        let mut guard = self.last_tick.lock().await;
        let since = guard.unwrap_or(now - chrono::Duration::seconds(60));
        *guard = Some(now);
        drop(guard);

        let mut actions = Vec::new();
        for entry in &self.dags {
            for expr in &entry.dag.schedule.start {
                if fires_between(expr, since, now) {
                    actions.push(CronAction::Start { dag_name: entry.dag.name.clone(), config_path: entry.config_path.clone() });
                }
            }
            for expr in &entry.dag.schedule.stop {
                if fires_between(expr, since, now) {
                    actions.push(CronAction::Stop { dag_name: entry.dag.name.clone(), config_path: entry.config_path.clone() });
                }
            }
            for expr in &entry.dag.schedule.restart {
                if fires_between(expr, since, now) {
                    actions.push(CronAction::Restart { dag_name: entry.dag.name.clone(), config_path: entry.config_path.clone() });
                }
            }
        }
        actions
    }

    /// Apply `actions`: `Start`/`Restart` enqueue a fresh run; `Stop`
    /// (and the stop half of `Restart`) sends a control-plane cancel to
    /// whatever run is currently `Running` for that DAG.
    pub async fn apply(&self, queue: &FileQueue, actions: Vec<CronAction>, data_dir: &std::path::Path) {
        for action in actions {
            match action {
                CronAction::Start { dag_name, config_path } => {
                    self.enqueue_schedule(queue, &dag_name, &config_path).await;
                }
                CronAction::Stop { dag_name, config_path } => {
                    self.stop_running(&dag_name, &config_path, data_dir).await;
                }
                CronAction::Restart { dag_name, config_path } => {
                    self.stop_running(&dag_name, &config_path, data_dir).await;
                    self.enqueue_schedule(queue, &dag_name, &config_path).await;
                }
            }
        }
    }

    async fn enqueue_schedule(&self, queue: &FileQueue, dag_name: &str, config_path: &std::path::Path) {
        let Some(dag) = self.dags.iter().find(|d| d.dag.name == dag_name) else { return };
        let run_id = Uuid::new_v4().to_string();
        let entry = QueueEntry::new(dag.dag.queue_name(), Priority::Low, run_id, dag_name, config_path.to_path_buf(), TriggerKind::Schedule);
        if let Err(err) = queue.enqueue(entry).await {
            warn!(dag = dag_name, %err, "failed to enqueue scheduled run");
        } else {
            info!(dag = dag_name, "enqueued scheduled run");
        }
    }

    async fn stop_running(&self, dag_name: &str, config_path: &std::path::Path, data_dir: &std::path::Path) {
        let Ok(Some(record)) = store::run_store::read_latest(data_dir, dag_name, config_path).await else { return };
        if record.status != store::RunState::Running {
            return;
        }
        let Some(addr) = &record.control_addr else { return };
        let url = format!("http://{addr}/stop");
        match post_stop(&url).await {
            Ok(()) => info!(dag = dag_name, run_id = %record.run_id, "requested stop via control endpoint"),
            Err(err) => warn!(dag = dag_name, run_id = %record.run_id, %err, "failed to reach control endpoint to stop run"),
        }
    }
}

/// Tiny hand-rolled POST, so the dispatcher doesn't need a full HTTP
/// client crate just to hit a loopback `/stop` endpoint.
async fn post_stop(url: &str) -> std::io::Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    let rest = url.strip_prefix("http://").unwrap_or(url);
    let (authority, path) = rest.split_once('/').map(|(a, p)| (a, format!("/{p}"))).unwrap_or((rest, "/".to_string()));
    let mut stream = TcpStream::connect(authority).await?;
    let request = format!("POST {path} HTTP/1.1\r\nHost: {authority}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_five_field_expression() {
        assert!(parse_schedule("0 9 * * *").is_ok());
    }

    #[test]
    fn rejects_garbage_expression() {
        assert!(parse_schedule("not a cron").is_err());
    }
}

//! Node — the runtime instance of a Step within one run.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use executor::CancelToken;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::model::Step;

pub type NodeId = usize;

/// The Node state machine: `None → Running → {Success | Error | Cancel |
/// Skipped}`, `None → Skipped`, `Error → None` (scheduled retry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    None,
    Running,
    Success,
    Error,
    Cancel,
    Skipped,
}

impl NodeState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            NodeState::Success | NodeState::Error | NodeState::Cancel | NodeState::Skipped
        )
    }
}

impl Default for NodeState {
    fn default() -> Self {
        NodeState::None
    }
}

/// A point-in-time, persistence-ready view of a Node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub name: String,
    pub state: NodeState,
    pub retry_count: u32,
    pub done_count: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub retried_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub stdout_path: Option<PathBuf>,
    pub stderr_path: Option<PathBuf>,
}

#[derive(Default)]
struct NodeRuntime {
    state: NodeState,
    retry_count: u32,
    done_count: u32,
    started_at: Option<DateTime<Utc>>,
    retried_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    stdout_path: Option<PathBuf>,
    stderr_path: Option<PathBuf>,
    /// Cancellation token for the attempt currently in flight, if any.
    cancel: Option<CancelToken>,
    /// True while sleeping between repeat executions — a repeating node
    /// is not preempted mid-attempt, only its *next* repeat is suppressed.
    awaiting_repeat: bool,
}

/// The runtime instance of a [`Step`] within one run.
pub struct Node {
    pub id: NodeId,
    pub step: Step,
    inner: Mutex<NodeRuntime>,
}

impl Node {
    pub fn new(id: NodeId, step: Step) -> Self {
        Self {
            id,
            step,
            inner: Mutex::new(NodeRuntime::default()),
        }
    }

    /// Rebuild a Node from a prior run's snapshot, used by
    /// `Graph::build_for_retry`. Non-terminal and non-`Skipped` states are
    /// reset to `None`; `Success` and `Skipped` are preserved.
    pub fn from_snapshot(id: NodeId, step: Step, snapshot: &NodeSnapshot) -> Self {
        let preserve = matches!(snapshot.state, NodeState::Success | NodeState::Skipped);
        let runtime = if preserve {
            NodeRuntime {
                state: snapshot.state,
                retry_count: snapshot.retry_count,
                done_count: snapshot.done_count,
                started_at: snapshot.started_at,
                retried_at: snapshot.retried_at,
                finished_at: snapshot.finished_at,
                last_error: snapshot.last_error.clone(),
                stdout_path: snapshot.stdout_path.clone(),
                stderr_path: snapshot.stderr_path.clone(),
                ..Default::default()
            }
        } else {
            NodeRuntime::default()
        };
        Self {
            id,
            step,
            inner: Mutex::new(runtime),
        }
    }

    pub async fn state(&self) -> NodeState {
        self.inner.lock().await.state
    }

    pub async fn snapshot(&self) -> NodeSnapshot {
        let inner = self.inner.lock().await;
        NodeSnapshot {
            name: self.step.name.clone(),
            state: inner.state,
            retry_count: inner.retry_count,
            done_count: inner.done_count,
            started_at: inner.started_at,
            retried_at: inner.retried_at,
            finished_at: inner.finished_at,
            last_error: inner.last_error.clone(),
            stdout_path: inner.stdout_path.clone(),
            stderr_path: inner.stderr_path.clone(),
        }
    }

    pub async fn retry_count(&self) -> u32 {
        self.inner.lock().await.retry_count
    }

    pub async fn done_count(&self) -> u32 {
        self.inner.lock().await.done_count
    }

    /// Create the step's log files. Fatal for the Node (not the run) on
    /// I/O error.
    pub async fn setup(&self, log_dir: &std::path::Path, run_id: &str) -> std::io::Result<()> {
        tokio::fs::create_dir_all(log_dir).await?;
        let stdout_path = log_dir.join(format!("{run_id}.{}.stdout.log", self.step.name));
        let stderr_path = log_dir.join(format!("{run_id}.{}.stderr.log", self.step.name));
        // Touch both files up front so `Node::Setup` failures (e.g.
        // read-only filesystem) surface before a task is ever launched.
        touch(&stdout_path).await?;
        touch(&stderr_path).await?;
        let mut inner = self.inner.lock().await;
        inner.stdout_path = Some(stdout_path);
        inner.stderr_path = Some(stderr_path);
        Ok(())
    }

    pub async fn mark_running(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = NodeState::Running;
        if inner.started_at.is_none() {
            inner.started_at = Some(Utc::now());
        }
        inner.cancel = Some(CancelToken::new());
    }

    pub async fn current_cancel_token(&self) -> Option<CancelToken> {
        self.inner.lock().await.cancel.clone()
    }

    pub async fn mark_skipped(&self, reason: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.state = NodeState::Skipped;
        inner.last_error = Some(reason.into());
        inner.finished_at = Some(Utc::now());
    }

    pub async fn mark_cancel(&self, reason: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.state = NodeState::Cancel;
        inner.last_error = Some(reason.into());
        inner.finished_at = Some(Utc::now());
    }

    pub async fn mark_success(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = NodeState::Success;
        inner.done_count += 1;
        inner.finished_at = Some(Utc::now());
    }

    pub async fn mark_error(&self, reason: impl Into<String>) {
        let mut inner = self.inner.lock().await;
        inner.state = NodeState::Error;
        inner.last_error = Some(reason.into());
        inner.done_count += 1;
        inner.finished_at = Some(Utc::now());
    }

    /// Reset to `None` for a scheduled retry.
    pub async fn schedule_retry(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = NodeState::None;
        inner.retry_count += 1;
        inner.retried_at = Some(Utc::now());
        inner.done_count += 1;
    }

    /// Record a completed repeat execution without touching retry count.
    pub async fn record_repeat_execution(&self) {
        let mut inner = self.inner.lock().await;
        inner.done_count += 1;
    }

    pub async fn set_awaiting_repeat(&self, value: bool) {
        self.inner.lock().await.awaiting_repeat = value;
    }

    pub async fn is_awaiting_repeat(&self) -> bool {
        self.inner.lock().await.awaiting_repeat
    }

    /// Best-effort teardown: nothing to flush since the executor writes
    /// directly to the log file; kept for symmetry with setup.
    pub async fn teardown(&self) {
        let mut inner = self.inner.lock().await;
        inner.cancel = None;
    }
}

async fn touch(path: &std::path::Path) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;
    let mut opts = tokio::fs::OpenOptions::new();
    opts.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut file = opts.open(path).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Step;

    fn step(name: &str) -> Step {
        Step {
            name: name.to_string(),
            command: Some("true".to_string()),
            args: vec![],
            script: None,
            dir: None,
            env: HashMap::new(),
            depends: vec![],
            retry: Default::default(),
            repeat: Default::default(),
            continue_on: Default::default(),
            preconditions: vec![],
            timeout_secs: None,
            signal_on_stop: None,
            output: None,
        }
    }

    #[tokio::test]
    async fn fresh_node_starts_in_none() {
        let node = Node::new(0, step("a"));
        assert_eq!(node.state().await, NodeState::None);
        assert_eq!(node.retry_count().await, 0);
        assert_eq!(node.done_count().await, 0);
    }

    #[tokio::test]
    async fn mark_success_increments_done_count() {
        let node = Node::new(0, step("a"));
        node.mark_running().await;
        node.mark_success().await;
        assert_eq!(node.state().await, NodeState::Success);
        assert_eq!(node.done_count().await, 1);
    }

    #[tokio::test]
    async fn mark_error_increments_done_count() {
        let node = Node::new(0, step("a"));
        node.mark_running().await;
        node.mark_error("boom").await;
        assert_eq!(node.state().await, NodeState::Error);
        assert_eq!(node.done_count().await, 1);
        assert_eq!(node.snapshot().await.last_error.as_deref(), Some("boom"));
    }

    /// Spec's open question: a repeating node cancelled mid-attempt does
    /// not count that attempt toward `done_count`.
    #[tokio::test]
    async fn mark_cancel_does_not_increment_done_count() {
        let node = Node::new(0, step("a"));
        node.mark_running().await;
        node.mark_cancel("run cancelled").await;
        assert_eq!(node.state().await, NodeState::Cancel);
        assert_eq!(node.done_count().await, 0);
    }

    #[tokio::test]
    async fn schedule_retry_resets_to_none_and_bumps_retry_count() {
        let node = Node::new(0, step("a"));
        node.mark_running().await;
        node.schedule_retry().await;
        assert_eq!(node.state().await, NodeState::None);
        assert_eq!(node.retry_count().await, 1);
        assert_eq!(node.done_count().await, 1);
    }

    #[tokio::test]
    async fn from_snapshot_preserves_success_but_resets_error() {
        let success_step = step("done");
        let node = Node::new(0, success_step.clone());
        node.mark_running().await;
        node.mark_success().await;
        let snap = node.snapshot().await;

        let rehydrated = Node::from_snapshot(0, success_step, &snap);
        assert_eq!(rehydrated.state().await, NodeState::Success);

        let error_step = step("failed");
        let err_node = Node::new(1, error_step.clone());
        err_node.mark_running().await;
        err_node.mark_error("nope").await;
        let err_snap = err_node.snapshot().await;
        let rehydrated_err = Node::from_snapshot(1, error_step, &err_snap);
        assert_eq!(rehydrated_err.state().await, NodeState::None);
    }

    #[tokio::test]
    async fn setup_creates_log_files() {
        let dir = tempfile::tempdir().unwrap();
        let node = Node::new(0, step("a"));
        node.setup(dir.path(), "run-1").await.unwrap();
        let snap = node.snapshot().await;
        assert!(snap.stdout_path.unwrap().exists());
        assert!(snap.stderr_path.unwrap().exists());
    }
}

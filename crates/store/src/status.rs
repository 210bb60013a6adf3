//! The persisted run status record — one JSON line appended to a run's
//! `.dat` status file each time its state changes.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use engine::{NodeSnapshot, RunStatus, TriggerKind};
use serde::{Deserialize, Serialize};

/// Run-level status, including the pre-execution `Queued` state that the
/// in-process `engine::RunStatus` has no reason to model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    None,
    Queued,
    Running,
    Success,
    Error,
    Cancel,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Success | RunState::Error | RunState::Cancel)
    }
}

impl From<RunStatus> for RunState {
    fn from(value: RunStatus) -> Self {
        match value {
            RunStatus::None => RunState::None,
            RunStatus::Running => RunState::Running,
            RunStatus::Success => RunState::Success,
            RunStatus::Error => RunState::Error,
            RunStatus::Cancel => RunState::Cancel,
        }
    }
}

/// One line of a run's `.dat` status file. Newer lines within the same
/// file supersede older ones; the newest line of the newest file is the
/// current status for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    /// The top-level run this one descends from (a retry of itself, for a
    /// root run).
    pub root_run_id: String,
    /// Set for sub-DAG runs.
    pub parent_run_id: Option<String>,
    pub dag_name: String,
    pub trigger: TriggerKind,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunState,
    pub params: HashMap<String, String>,
    pub nodes: HashMap<String, NodeSnapshot>,
    /// Keyed by `on_success`/`on_failure`/`on_cancel`/`on_exit`.
    pub handlers: HashMap<String, NodeSnapshot>,
    pub log_path: Option<PathBuf>,
    /// Identifies this particular attempt (distinct from `run_id` across
    /// retries of the same logical run).
    pub attempt_id: String,
    pub last_error: Option<String>,
    /// Where the Agent's control HTTP surface is bound while the run is
    /// active (`GET /status`, `POST /stop`); `None` once the run is
    /// terminal and the listener has shut down.
    #[serde(default)]
    pub control_addr: Option<String>,
}

impl RunRecord {
    /// A freshly queued record with no execution detail yet.
    pub fn queued(
        run_id: String,
        dag_name: String,
        trigger: TriggerKind,
        params: HashMap<String, String>,
    ) -> Self {
        Self {
            root_run_id: run_id.clone(),
            parent_run_id: None,
            attempt_id: run_id.clone(),
            run_id,
            dag_name,
            trigger,
            queued_at: Some(Utc::now()),
            started_at: None,
            finished_at: None,
            status: RunState::Queued,
            params,
            nodes: HashMap::new(),
            handlers: HashMap::new(),
            log_path: None,
            last_error: None,
            control_addr: None,
        }
    }

    /// Replace the embedded `\n`/`\r` of every string field that tends to
    /// carry free-text with a space, so a `.dat` file always stays one
    /// JSON object per line even when a step's error message embeds
    /// newlines.
    pub fn sanitized(mut self) -> Self {
        if let Some(err) = &mut self.last_error {
            *err = collapse_newlines(err);
        }
        for snap in self.nodes.values_mut().chain(self.handlers.values_mut()) {
            if let Some(err) = &mut snap.last_error {
                *err = collapse_newlines(err);
            }
        }
        self
    }
}

fn collapse_newlines(s: &str) -> String {
    s.replace(['\n', '\r'], " ")
}

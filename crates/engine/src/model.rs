//! Core domain models for the workflow engine.
//!
//! These types are the source of truth for what a DAG looks like in
//! memory. They are serialised to/from the on-disk DAG definition (parsed
//! by the, out-of-scope, YAML loader) and embedded into persisted run
//! status records by the `store` crate.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// How a DAG run is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Schedule,
    Manual,
    Retry,
    Api,
}

/// A shell expression plus the value it must produce to pass.
///
/// `expected` is compared against the trimmed stdout of `condition` by
/// exact match, unless it is wrapped in `/…/`, in which case it is
/// matched as a regular expression.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Precondition {
    pub condition: String,
    pub expected: String,
}

/// Retry policy for a single step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub limit: u32,
    pub interval_secs: u64,
    pub backoff: f64,
    pub max_interval_secs: u64,
    /// When set, only these exit codes are retried; any other non-zero
    /// exit is a terminal `Error`.
    pub on_exit_codes: Option<Vec<i32>>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: 0,
            interval_secs: 0,
            backoff: 1.0,
            max_interval_secs: 0,
            on_exit_codes: None,
        }
    }
}

/// Repeat mode for a step that should run more than once per attempt cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RepeatMode {
    #[default]
    None,
    While,
    Until,
}

/// Repeat policy: keep re-executing a successful step while/until a
/// condition holds, capped by `limit` total executions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepeatPolicy {
    pub mode: RepeatMode,
    pub interval_secs: u64,
    pub limit: Option<u32>,
    pub backoff: f64,
    pub condition: Option<Precondition>,
    /// Exit codes that count as "the repeat condition holds" when no
    /// shell `condition` is given.
    pub exit_codes: Option<Vec<i32>>,
}

impl Default for RepeatPolicy {
    fn default() -> Self {
        Self {
            mode: RepeatMode::None,
            interval_secs: 0,
            limit: None,
            backoff: 1.0,
            condition: None,
            exit_codes: None,
        }
    }
}

/// Policy allowing the graph to progress past a failed or skipped
/// predecessor.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ContinueOn {
    pub failure: bool,
    pub skipped: bool,
    pub exit_codes: Vec<i32>,
    pub output_patterns: Vec<String>,
    pub mark_success: bool,
}

/// A single step in the DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Unique within the DAG.
    pub name: String,
    /// Shell command to run. Mutually exclusive with `script` in practice,
    /// but both are accepted — `script` wins when both are set.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Inline shell script; executed via `sh -c` instead of `command`.
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub repeat: RepeatPolicy,
    #[serde(default)]
    pub continue_on: ContinueOn,
    #[serde(default)]
    pub preconditions: Vec<Precondition>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Signal sent on stop/timeout/cancel, e.g. "SIGTERM". Defaults to
    /// SIGTERM when unset.
    #[serde(default)]
    pub signal_on_stop: Option<String>,
    /// Variable name under which this step's captured stdout is published.
    #[serde(default)]
    pub output: Option<String>,
}

/// Start/stop/restart cron expressions for a DAG.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Schedule {
    pub start: Vec<String>,
    pub stop: Vec<String>,
    pub restart: Vec<String>,
}

/// The four optional lifecycle steps.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Handlers {
    pub on_success: Option<Step>,
    pub on_failure: Option<Step>,
    pub on_cancel: Option<Step>,
    pub on_exit: Option<Step>,
}

/// A complete DAG definition, as loaded from the (out-of-scope) YAML parser
/// or constructed programmatically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dag {
    pub name: String,
    /// Defaults to the DAG name when absent.
    #[serde(default)]
    pub queue: Option<String>,
    #[serde(default = "default_retention")]
    pub hist_retention_days: i64,
    /// Per-DAG concurrent-step cap inside one run (`max_active_steps`).
    /// `0` means unbounded.
    #[serde(default)]
    pub max_active_steps: u32,
    /// DAG-level maximum number of concurrent runs.
    #[serde(default = "default_max_active_runs")]
    pub max_active_runs: u32,
    #[serde(default)]
    pub params: HashMap<String, String>,
    #[serde(default)]
    pub schedule: Schedule,
    #[serde(default)]
    pub preconditions: Vec<Precondition>,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub handlers: Handlers,
}

fn default_retention() -> i64 {
    30
}

fn default_max_active_runs() -> u32 {
    1
}

impl Dag {
    pub fn queue_name(&self) -> &str {
        self.queue.as_deref().unwrap_or(&self.name)
    }
}

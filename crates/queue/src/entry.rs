//! A pending run waiting to be admitted.

use chrono::{DateTime, Utc};
use engine::TriggerKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Two-level priority; `High` always drains before `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    High,
}

/// A queued run, durable until dequeued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub queue: String,
    pub priority: Priority,
    pub run_id: String,
    pub dag_name: String,
    pub config_path: PathBuf,
    pub trigger: TriggerKind,
    pub enqueued_at: DateTime<Utc>,
    /// Count of failed Agent-spawn attempts for this entry; re-enqueued
    /// entries carry this forward so the daemon can give up after N
    /// tries.
    #[serde(default)]
    pub spawn_attempts: u32,
}

impl QueueEntry {
    pub fn new(queue: impl Into<String>, priority: Priority, run_id: impl Into<String>, dag_name: impl Into<String>, config_path: PathBuf, trigger: TriggerKind) -> Self {
        Self {
            queue: queue.into(),
            priority,
            run_id: run_id.into(),
            dag_name: dag_name.into(),
            config_path,
            trigger,
            enqueued_at: Utc::now(),
            spawn_attempts: 0,
        }
    }
}

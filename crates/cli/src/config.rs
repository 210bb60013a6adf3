//! Runtime configuration: environment variables with defaults, plus the
//! `--config`/`--home` flags every subcommand accepts. Not a
//! config-file parser; this just resolves the handful of knobs the
//! daemon and Agent need before they can start.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use clap::Args;

/// Shared flags every subcommand accepts.
#[derive(Debug, Clone, Args)]
pub struct GlobalOpts {
    /// Root directory for dags/data/logs/queues/auth. Defaults to `$RUSTY_HOME` or `./rusty-home`.
    #[arg(long, global = true, env = "RUSTY_HOME", default_value = "rusty-home")]
    pub home: PathBuf,

    /// Path to the DAG's config file, hashed into its run-store
    /// directory name. Defaults to the DAG file itself when
    /// a subcommand doesn't set it explicitly.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Comma-separated `name:cap` pairs declaring global queues. DAGs
    /// whose queue isn't listed here get an implicit local queue with
    /// concurrency 1.
    #[arg(long, global = true, env = "RUSTY_GLOBAL_QUEUES", default_value = "")]
    pub global_queues: String,

    /// Seconds between daemon ticks.
    #[arg(long, global = true, env = "RUSTY_TICK_SECS", default_value_t = 1)]
    pub tick_secs: u64,

    /// Minutes of silence before a `Running` record is swept as
    /// orphaned at daemon startup.
    #[arg(long, global = true, env = "RUSTY_HEARTBEAT_MINUTES", default_value_t = 10)]
    pub heartbeat_minutes: i64,

    /// Failed spawn attempts before a queued run is given up on.
    #[arg(long, global = true, env = "RUSTY_MAX_SPAWN_ATTEMPTS", default_value_t = 3)]
    pub max_spawn_attempts: u32,
}

/// Resolved directory layout and queue config, derived from
/// `GlobalOpts` once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub home: PathBuf,
    pub dags_dir: PathBuf,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub queues_dir: PathBuf,
    pub auth_dir: PathBuf,
    pub global_queues: HashMap<String, u32>,
    pub tick_interval: std::time::Duration,
    pub heartbeat_timeout: chrono::Duration,
    pub max_spawn_attempts: u32,
}

impl Config {
    pub fn load(opts: &GlobalOpts) -> Self {
        let home = opts.home.clone();
        Self {
            dags_dir: home.join("dags"),
            data_dir: home.join("data"),
            log_dir: home.join("logs"),
            queues_dir: home.join("queues"),
            auth_dir: home.join("auth"),
            home,
            global_queues: parse_global_queues(&opts.global_queues),
            tick_interval: std::time::Duration::from_secs(opts.tick_secs.max(1)),
            heartbeat_timeout: chrono::Duration::minutes(opts.heartbeat_minutes.max(1)),
            max_spawn_attempts: opts.max_spawn_attempts.max(1),
        }
    }

    /// The config path a run's status files are hashed against: the
    /// explicit `--config` flag if given, else the DAG file itself.
    pub fn config_path_for(opts: &GlobalOpts, dag_path: &Path) -> PathBuf {
        opts.config.clone().unwrap_or_else(|| dag_path.to_path_buf())
    }
}

fn parse_global_queues(spec: &str) -> HashMap<String, u32> {
    spec.split(',')
        .filter_map(|pair| {
            let pair = pair.trim();
            if pair.is_empty() {
                return None;
            }
            let (name, cap) = pair.split_once(':')?;
            let cap: u32 = cap.trim().parse().ok()?;
            Some((name.trim().to_string(), cap))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_queue_pairs() {
        let queues = parse_global_queues("etl:4, reports:2");
        assert_eq!(queues.get("etl"), Some(&4));
        assert_eq!(queues.get("reports"), Some(&2));
    }

    #[test]
    fn empty_spec_yields_no_queues() {
        assert!(parse_global_queues("").is_empty());
    }
}

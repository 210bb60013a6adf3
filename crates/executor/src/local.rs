//! The local-shell `Executor` variant — the only backend this crate
//! ships. Docker/HTTP/SSH/mail/jq variants are pluggable but not
//! part of this crate.

use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::ExecutorError;
use crate::signal::{kill_process_group, Signal};

/// Everything needed to start and supervise one process attempt.
pub struct ExecRequest {
    pub command: String,
    pub args: Vec<String>,
    pub dir: Option<PathBuf>,
    pub env: HashMap<String, String>,
    pub stdout_path: PathBuf,
    pub stderr_path: PathBuf,
    pub cancel: CancelToken,
    pub timeout: Option<Duration>,
    pub signal_on_stop: Signal,
    /// Grace period between the configured signal and an escalation to
    /// SIGKILL.
    pub cleanup_window: Duration,
}

#[derive(Debug, Clone, Copy)]
pub struct ExecOutcome {
    pub exit_code: i32,
}

/// Capability boundary for running one step attempt. A narrow trait so
/// alternative backends (Docker, HTTP, SSH, …) can be dropped in without
/// touching the scheduler.
#[async_trait]
pub trait Backend: Send + Sync {
    async fn run(&self, req: ExecRequest) -> Result<ExecOutcome, ExecutorError>;
}

/// Runs the step's command in its own process group via a local shell,
/// streaming stdout/stderr straight to the step's log files.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalExecutor;

#[async_trait]
impl Backend for LocalExecutor {
    async fn run(&self, req: ExecRequest) -> Result<ExecOutcome, ExecutorError> {
        if req.cancel.is_cancelled() {
            return Err(ExecutorError::Cancelled);
        }

        let stdout = open_log_append(&req.stdout_path)?;
        let stderr = open_log_append(&req.stderr_path)?;

        let mut cmd = tokio::process::Command::new(&req.command);
        cmd.args(&req.args)
            .envs(&req.env)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        if let Some(dir) = &req.dir {
            cmd.current_dir(dir);
        }
        new_process_group(&mut cmd);

        let mut child = cmd.spawn()?;
        let pid = child.id().ok_or(ExecutorError::Cancelled)? as i32;

        let wait_fut = child.wait();
        tokio::pin!(wait_fut);

        let deadline = req.timeout.map(|d| tokio::time::Instant::now() + d);

        loop {
            let timeout_fut = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                status = &mut wait_fut => {
                    let status = status?;
                    return Ok(ExecOutcome { exit_code: exit_code_of(status) });
                }
                _ = req.cancel.cancelled() => {
                    debug!(pid, "cancelling step, sending {:?}", req.signal_on_stop);
                    kill_process_group(pid, req.signal_on_stop);
                    escalate_after_grace(&mut wait_fut, pid, req.cleanup_window).await;
                    return Err(ExecutorError::Cancelled);
                }
                _ = timeout_fut => {
                    warn!(pid, "step timed out, sending {:?}", req.signal_on_stop);
                    kill_process_group(pid, req.signal_on_stop);
                    let status = escalate_after_grace(&mut wait_fut, pid, req.cleanup_window).await;
                    return Ok(ExecOutcome { exit_code: status.unwrap_or(-1) });
                }
            }
        }
    }
}

/// Wait out the cleanup window after signaling, then escalate to SIGKILL
/// and wait for the process to actually exit.
async fn escalate_after_grace(
    wait_fut: &mut (impl std::future::Future<Output = std::io::Result<std::process::ExitStatus>>
              + Unpin),
    pid: i32,
    grace: Duration,
) -> Option<i32> {
    match tokio::time::timeout(grace, &mut *wait_fut).await {
        Ok(Ok(status)) => Some(exit_code_of(status)),
        Ok(Err(_)) => None,
        Err(_) => {
            warn!(pid, "escalating to SIGKILL after cleanup window");
            kill_process_group(pid, Signal::Kill);
            wait_fut.await.ok().map(exit_code_of)
        }
    }
}

fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        status.code().unwrap_or_else(|| -status.signal().unwrap_or(1))
    }
    #[cfg(not(unix))]
    {
        status.code().unwrap_or(-1)
    }
}

#[cfg(unix)]
fn new_process_group(cmd: &mut tokio::process::Command) {
    use std::os::unix::process::CommandExt;
    unsafe {
        cmd.pre_exec(|| {
            // New session ⇒ new process group with pgid == pid, so the
            // whole tree (including any sub-shells) can be signaled via
            // `kill(-pgid, …)` in one shot.
            libc::setsid();
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn new_process_group(_cmd: &mut tokio::process::Command) {}

/// Open a step's log file in append mode so successive retry attempts
/// accumulate into one file rather than clobbering the previous attempt.
/// Created with owner-only permissions.
fn open_log_append(path: &std::path::Path) -> std::io::Result<File> {
    let mut opts = std::fs::OpenOptions::new();
    opts.create(true).append(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    opts.open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn req(command: &str, args: &[&str], dir: &std::path::Path) -> ExecRequest {
        ExecRequest {
            command: command.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            dir: None,
            env: HashMap::new(),
            stdout_path: dir.join("stdout.log"),
            stderr_path: dir.join("stderr.log"),
            cancel: CancelToken::new(),
            timeout: None,
            signal_on_stop: Signal::Term,
            cleanup_window: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn runs_successful_command_and_captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = LocalExecutor
            .run(req("echo", &["hello"], dir.path()))
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, 0);
        let out = fs::read_to_string(dir.path().join("stdout.log")).unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = LocalExecutor
            .run(req("sh", &["-c", "exit 7"], dir.path()))
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, 7);
    }

    #[tokio::test]
    async fn cancellation_stops_long_running_process() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = req("sleep", &["30"], dir.path());
        r.cleanup_window = Duration::from_millis(50);
        let cancel = r.cancel.clone();

        let handle = tokio::spawn(async move { LocalExecutor.run(r).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("executor should return promptly after cancel")
            .unwrap();
        assert!(matches!(result, Err(ExecutorError::Cancelled)));
    }

    #[tokio::test]
    async fn timeout_kills_process_and_reports_signal_exit() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = req("sleep", &["30"], dir.path());
        r.timeout = Some(Duration::from_millis(50));
        r.cleanup_window = Duration::from_millis(50);

        let outcome = tokio::time::timeout(Duration::from_secs(2), LocalExecutor.run(r))
            .await
            .expect("should finish after timeout")
            .unwrap();
        assert_ne!(outcome.exit_code, 0);
    }
}

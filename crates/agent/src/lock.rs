//! Advisory per-DAG file lock.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::AgentError;

/// Held for the lifetime of one `Agent::run`. Releasing (drop) unlocks.
pub struct RunLock {
    _file: File,
    path: PathBuf,
}

impl RunLock {
    /// Attempt to acquire the lock for `dag_dir` without blocking. A
    /// failure here means another live process already owns this DAG's
    /// run — the OS releases the advisory lock automatically if that
    /// process dies, so a held lock is a reliable liveness signal.
    pub fn try_acquire(dag_dir: &Path) -> Result<Self, AgentError> {
        std::fs::create_dir_all(dag_dir)?;
        let path = dag_dir.join("agent.lock");
        let file = OpenOptions::new().create(true).write(true).open(&path)?;
        file.try_lock_exclusive().map_err(|_| AgentError::AlreadyRunning(dag_dir.display().to_string()))?;
        Ok(Self { _file: file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self._file);
    }
}

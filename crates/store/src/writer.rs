//! Append-only status-file writer.

use std::path::{Path, PathBuf};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StoreError;
use crate::status::RunRecord;

/// Owns one run's append-only `.dat` file. Writes are serialized by the
/// internal mutex; across files no coordination is required.
pub struct Writer {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
}

impl Writer {
    /// Opens (creating if absent) `path` in append mode with owner-only
    /// permissions.
    pub async fn open(path: PathBuf) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut opts = OpenOptions::new();
        opts.create(true).append(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o600);
        }
        let file = opts.open(&path).await?;
        Ok(Self { path, file: Mutex::new(file) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Marshal `record`, write one line, flush. Embedded newlines in
    /// free-text fields are collapsed first so the file stays one JSON
    /// object per line.
    pub async fn write(&self, record: &RunRecord) -> Result<(), StoreError> {
        let record = record.clone().sanitized();
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');

        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        debug!(path = %self.path.display(), status = ?record.status, "wrote status line");
        Ok(())
    }
}

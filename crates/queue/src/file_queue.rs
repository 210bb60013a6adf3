//! A named, persistent FIFO with two-level priority, backed by one
//! append-only JSON-lines file per queue.
//!
//! Entries are durable until dequeued. Dequeue removes an entry by
//! rewriting the file without it, guarded by an advisory lock so a
//! concurrent writer from another process can't interleave with a
//! rewrite.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::entry::{Priority, QueueEntry};
use crate::error::QueueError;

/// File-backed handle to the set of named queues under `queues_dir`.
#[derive(Clone)]
pub struct FileQueue {
    queues_dir: PathBuf,
}

impl FileQueue {
    pub fn new(queues_dir: PathBuf) -> Self {
        Self { queues_dir }
    }

    fn entries_path(&self, queue: &str) -> PathBuf {
        self.queues_dir.join(queue).join("entries.jsonl")
    }

    fn lock_path(&self, queue: &str) -> PathBuf {
        self.queues_dir.join(queue).join(".lock")
    }

    /// Append one entry. Durable as soon as this returns.
    pub async fn enqueue(&self, entry: QueueEntry) -> Result<(), QueueError> {
        let this = self.clone();
        let queue = entry.queue.clone();
        tokio::task::spawn_blocking(move || this.enqueue_blocking(&queue, &entry))
            .await
            .expect("blocking task panicked")
    }

    fn enqueue_blocking(&self, queue: &str, entry: &QueueEntry) -> Result<(), QueueError> {
        let dir = self.queues_dir.join(queue);
        std::fs::create_dir_all(&dir)?;
        let _guard = FileLock::acquire(self.lock_path(queue))?;

        let mut file = OpenOptions::new().create(true).append(true).open(self.entries_path(queue))?;
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// All entries currently in `queue`, highest priority and oldest
    /// first.
    pub async fn list(&self, queue: &str) -> Result<Vec<QueueEntry>, QueueError> {
        let this = self.clone();
        let queue = queue.to_string();
        tokio::task::spawn_blocking(move || this.read_sorted(&queue))
            .await
            .expect("blocking task panicked")
    }

    /// The next entry that would be dequeued, without removing it.
    pub async fn peek(&self, queue: &str) -> Result<Option<QueueEntry>, QueueError> {
        Ok(self.list(queue).await?.into_iter().next())
    }

    /// Remove and return the highest-priority, oldest entry. Callers must
    /// only drop an entry after the corresponding run has durably
    /// transitioned to `Running` in the run store.
    pub async fn dequeue(&self, queue: &str) -> Result<Option<QueueEntry>, QueueError> {
        let this = self.clone();
        let queue = queue.to_string();
        tokio::task::spawn_blocking(move || this.dequeue_blocking(&queue))
            .await
            .expect("blocking task panicked")
    }

    fn dequeue_blocking(&self, queue: &str) -> Result<Option<QueueEntry>, QueueError> {
        let _guard = FileLock::acquire(self.lock_path(queue))?;
        let path = self.entries_path(queue);
        let mut entries = self.read_entries(&path)?;
        if entries.is_empty() {
            return Ok(None);
        }
        let idx = best_index(&entries);
        let chosen = entries.remove(idx);
        rewrite(&path, &entries)?;
        Ok(Some(chosen))
    }

    /// Remove a specific entry (by run id) regardless of priority
    /// ordering — used when a `stop` schedule cancels a still-queued run.
    pub async fn remove(&self, queue: &str, run_id: &str) -> Result<Option<QueueEntry>, QueueError> {
        let this = self.clone();
        let queue = queue.to_string();
        let run_id = run_id.to_string();
        tokio::task::spawn_blocking(move || this.remove_blocking(&queue, &run_id))
            .await
            .expect("blocking task panicked")
    }

    fn remove_blocking(&self, queue: &str, run_id: &str) -> Result<Option<QueueEntry>, QueueError> {
        let _guard = FileLock::acquire(self.lock_path(queue))?;
        let path = self.entries_path(queue);
        let mut entries = self.read_entries(&path)?;
        let pos = entries.iter().position(|e| e.run_id == run_id);
        let removed = pos.map(|idx| entries.remove(idx));
        if removed.is_some() {
            rewrite(&path, &entries)?;
        }
        Ok(removed)
    }

    pub async fn len(&self, queue: &str) -> Result<usize, QueueError> {
        Ok(self.list(queue).await?.len())
    }

    fn read_sorted(&self, queue: &str) -> Result<Vec<QueueEntry>, QueueError> {
        let mut entries = self.read_entries(&self.entries_path(queue))?;
        entries.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.enqueued_at.cmp(&b.enqueued_at)));
        Ok(entries)
    }

    fn read_entries(&self, path: &Path) -> Result<Vec<QueueEntry>, QueueError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut out = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(entry) = serde_json::from_str(&line) {
                out.push(entry);
            }
        }
        Ok(out)
    }
}

/// Highest priority, then oldest `enqueued_at`.
fn best_index(entries: &[QueueEntry]) -> usize {
    entries
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.priority.cmp(&b.priority).then(b.enqueued_at.cmp(&a.enqueued_at)))
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}

fn rewrite(path: &Path, entries: &[QueueEntry]) -> Result<(), QueueError> {
    let tmp = path.with_extension("jsonl.tmp");
    {
        let mut file = File::create(&tmp)?;
        for entry in entries {
            let mut line = serde_json::to_string(entry)?;
            line.push('\n');
            file.write_all(line.as_bytes())?;
        }
        file.flush()?;
    }
    std::fs::rename(tmp, path)?;
    Ok(())
}

/// RAII advisory exclusive lock on a sidecar file.
struct FileLock {
    file: File,
}

impl FileLock {
    fn acquire(path: PathBuf) -> Result<Self, QueueError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).write(true).open(path)?;
        file.lock_exclusive()?;
        Ok(Self { file })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::TriggerKind;

    fn entry(queue: &str, priority: Priority, run_id: &str) -> QueueEntry {
        QueueEntry::new(queue, priority, run_id, "job", PathBuf::from("/dags/job.yaml"), TriggerKind::Manual)
    }

    #[tokio::test]
    async fn high_priority_drains_before_low() {
        let dir = tempfile::tempdir().unwrap();
        let q = FileQueue::new(dir.path().to_path_buf());
        q.enqueue(entry("q", Priority::Low, "low-1")).await.unwrap();
        q.enqueue(entry("q", Priority::High, "high-1")).await.unwrap();

        let first = q.dequeue("q").await.unwrap().unwrap();
        assert_eq!(first.run_id, "high-1");
        let second = q.dequeue("q").await.unwrap().unwrap();
        assert_eq!(second.run_id, "low-1");
        assert!(q.dequeue("q").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fifo_within_same_priority() {
        let dir = tempfile::tempdir().unwrap();
        let q = FileQueue::new(dir.path().to_path_buf());
        q.enqueue(entry("q", Priority::Low, "a")).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        q.enqueue(entry("q", Priority::Low, "b")).await.unwrap();

        assert_eq!(q.dequeue("q").await.unwrap().unwrap().run_id, "a");
        assert_eq!(q.dequeue("q").await.unwrap().unwrap().run_id, "b");
    }

    #[tokio::test]
    async fn len_and_remove() {
        let dir = tempfile::tempdir().unwrap();
        let q = FileQueue::new(dir.path().to_path_buf());
        q.enqueue(entry("q", Priority::Low, "a")).await.unwrap();
        q.enqueue(entry("q", Priority::Low, "b")).await.unwrap();
        assert_eq!(q.len("q").await.unwrap(), 2);

        let removed = q.remove("q", "a").await.unwrap();
        assert!(removed.is_some());
        assert_eq!(q.len("q").await.unwrap(), 1);
    }
}

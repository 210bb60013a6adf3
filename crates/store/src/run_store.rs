//! Run store operations: lookup, compaction, retention, rename.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::paths::{dag_dir, list_status_files, status_file_name};
use crate::status::RunRecord;
use crate::writer::Writer;

/// Open a fresh `Writer` for a new run, in the directory for `dag_name`
/// hashed against `config_path`.
pub async fn new_writer(
    data_dir: &Path,
    dag_name: &str,
    config_path: &Path,
    run_id: &str,
) -> Result<Writer, StoreError> {
    let dir = dag_dir(data_dir, dag_name, config_path);
    let name = status_file_name(dag_name, Utc::now(), run_id);
    Writer::open(dir.join(name)).await
}

/// Parse the last well-formed JSON line of a file, tolerating a
/// partially-written final line.
fn last_good_record(contents: &str) -> Option<RunRecord> {
    contents
        .lines()
        .rev()
        .find_map(|line| serde_json::from_str::<RunRecord>(line.trim()).ok())
}

/// All records in a file, in file order, skipping unparsable lines.
fn all_good_records(contents: &str) -> Vec<RunRecord> {
    contents.lines().filter_map(|line| serde_json::from_str(line.trim()).ok()).collect()
}

/// The newest line of the newest file for `dag_name`.
pub async fn read_latest(
    data_dir: &Path,
    dag_name: &str,
    config_path: &Path,
) -> Result<Option<RunRecord>, StoreError> {
    let dir = dag_dir(data_dir, dag_name, config_path);
    let files = list_status_files(&dir)?;
    for file in files {
        let contents = tokio::fs::read_to_string(&file).await?;
        if let Some(record) = last_good_record(&contents) {
            return Ok(Some(record));
        }
    }
    Ok(None)
}

/// Up to `n` most recent status records, one per file, newest first.
pub async fn read_history(
    data_dir: &Path,
    dag_name: &str,
    config_path: &Path,
    n: usize,
) -> Result<Vec<RunRecord>, StoreError> {
    let dir = dag_dir(data_dir, dag_name, config_path);
    let files = list_status_files(&dir)?;
    let mut out = Vec::with_capacity(n.min(files.len()));
    for file in files.into_iter().take(n) {
        let contents = tokio::fs::read_to_string(&file).await?;
        if let Some(record) = last_good_record(&contents) {
            out.push(record);
        }
    }
    Ok(out)
}

/// Scan files newest-first for the first whose `run_id` matches.
pub async fn find_by_run_id(
    data_dir: &Path,
    dag_name: &str,
    config_path: &Path,
    run_id: &str,
) -> Result<RunRecord, StoreError> {
    let dir = dag_dir(data_dir, dag_name, config_path);
    let files = list_status_files(&dir)?;
    for file in files {
        let contents = tokio::fs::read_to_string(&file).await?;
        if let Some(record) = last_good_record(&contents) {
            if record.run_id == run_id {
                return Ok(record);
            }
        }
        // A retried/superseded file can carry earlier lines for the same
        // run id even when its last line has moved on (e.g. a compacted
        // sibling); check every line before moving to the next file.
        for record in all_good_records(&contents) {
            if record.run_id == run_id {
                return Ok(record);
            }
        }
    }
    Err(StoreError::RunIdNotFound(run_id.to_string()))
}

/// Rewrite `file` to keep only its newest record, as a sibling suffixed
/// `_c.dat`, then delete the original. Idempotent: if the compacted
/// sibling already exists, returns its record without touching `file`
/// again.
pub async fn compact(file: &Path) -> Result<RunRecord, StoreError> {
    let compacted_path = compacted_sibling(file);
    if compacted_path.exists() {
        let contents = tokio::fs::read_to_string(&compacted_path).await?;
        return last_good_record(&contents)
            .ok_or_else(|| StoreError::RunIdNotFound(compacted_path.display().to_string()));
    }

    let contents = tokio::fs::read_to_string(file).await?;
    let record = last_good_record(&contents)
        .ok_or_else(|| StoreError::RunIdNotFound(file.display().to_string()))?;

    let writer = Writer::open(compacted_path.clone()).await?;
    writer.write(&record).await?;
    tokio::fs::remove_file(file).await?;
    info!(from = %file.display(), to = %compacted_path.display(), "compacted status file");
    Ok(record)
}

fn compacted_sibling(file: &Path) -> PathBuf {
    let stem = file.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    file.with_file_name(format!("{stem}_c.dat"))
}

/// Delete status files older than `days`, never touching `keep`
/// (the active run's own file). `days == 0` deletes all others.
pub async fn remove_old(
    data_dir: &Path,
    dag_name: &str,
    config_path: &Path,
    days: i64,
    keep: &Path,
) -> Result<usize, StoreError> {
    let dir = dag_dir(data_dir, dag_name, config_path);
    let files = list_status_files(&dir)?;
    let cutoff = Utc::now() - chrono::Duration::days(days.max(0));
    let mut removed = 0;
    for file in files {
        if file == keep {
            continue;
        }
        let remove = if days <= 0 {
            true
        } else {
            match tokio::fs::metadata(&file).await.and_then(|m| m.modified()) {
                Ok(modified) => chrono::DateTime::<Utc>::from(modified) < cutoff,
                Err(_) => false,
            }
        };
        if remove {
            if let Err(err) = tokio::fs::remove_file(&file).await {
                warn!(path = %file.display(), %err, "failed to remove old status file");
            } else {
                removed += 1;
            }
        }
    }
    Ok(removed)
}

/// Move every status file from the directory for `old_name` to the
/// directory for `new_name`, preserving filenames (and therefore
/// `_c.dat` suffixes).
pub async fn rename_dag(
    data_dir: &Path,
    old_name: &str,
    new_name: &str,
    config_path: &Path,
) -> Result<(), StoreError> {
    let old_dir = dag_dir(data_dir, old_name, config_path);
    let new_dir = dag_dir(data_dir, new_name, config_path);
    if !old_dir.exists() {
        return Ok(());
    }
    tokio::fs::create_dir_all(&new_dir).await?;
    let files = list_status_files(&old_dir)?;
    for file in files {
        if let Some(name) = file.file_name() {
            tokio::fs::rename(&file, new_dir.join(name)).await?;
        }
    }
    let _ = tokio::fs::remove_dir(&old_dir).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::TriggerKind;
    use std::collections::HashMap;

    fn record(run_id: &str) -> RunRecord {
        RunRecord::queued(run_id.to_string(), "job".to_string(), TriggerKind::Manual, HashMap::new())
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let config = Path::new("/dags/job.yaml");
        let writer = new_writer(dir.path(), "job", config, "run-1").await.unwrap();
        writer.write(&record("run-1")).await.unwrap();

        let latest = read_latest(dir.path(), "job", config).await.unwrap().unwrap();
        assert_eq!(latest.run_id, "run-1");
    }

    #[tokio::test]
    async fn find_by_run_id_returns_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let config = Path::new("/dags/job.yaml");
        let err = find_by_run_id(dir.path(), "job", config, "missing").await.unwrap_err();
        assert!(matches!(err, StoreError::RunIdNotFound(_)));
    }

    #[tokio::test]
    async fn compact_then_compact_again_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = Path::new("/dags/job.yaml");
        let writer = new_writer(dir.path(), "job", config, "run-1").await.unwrap();
        writer.write(&record("run-1")).await.unwrap();
        let path = writer.path().to_path_buf();
        drop(writer);

        let first = compact(&path).await.unwrap();
        let second = compact(&compacted_sibling(&path)).await.unwrap();
        assert_eq!(first.run_id, second.run_id);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn remove_old_with_zero_days_deletes_everything_but_the_excluded_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Path::new("/dags/job.yaml");
        let writer = new_writer(dir.path(), "job", config, "run-1").await.unwrap();
        writer.write(&record("run-1")).await.unwrap();
        let kept = writer.path().to_path_buf();
        drop(writer);

        let removed = remove_old(dir.path(), "job", config, 0, &kept).await.unwrap();
        assert_eq!(removed, 0);
        assert!(read_latest(dir.path(), "job", config).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn remove_old_with_zero_days_deletes_other_runs_leaving_one_status_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Path::new("/dags/job.yaml");
        let old_writer = new_writer(dir.path(), "job", config, "run-1").await.unwrap();
        old_writer.write(&record("run-1")).await.unwrap();
        drop(old_writer);

        let current_writer = new_writer(dir.path(), "job", config, "run-2").await.unwrap();
        current_writer.write(&record("run-2")).await.unwrap();
        let kept = current_writer.path().to_path_buf();
        drop(current_writer);

        let removed = remove_old(dir.path(), "job", config, 0, &kept).await.unwrap();
        assert_eq!(removed, 1);
        let remaining = list_status_files(&dag_dir(dir.path(), "job", config)).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0], kept);
    }

    #[tokio::test]
    async fn rename_preserves_lookup_by_run_id() {
        let dir = tempfile::tempdir().unwrap();
        let config = Path::new("/dags/job.yaml");
        let writer = new_writer(dir.path(), "job", config, "run-1").await.unwrap();
        writer.write(&record("run-1")).await.unwrap();
        drop(writer);

        rename_dag(dir.path(), "job", "job2", config).await.unwrap();
        let found = find_by_run_id(dir.path(), "job2", config, "run-1").await.unwrap();
        assert_eq!(found.run_id, "run-1");
        assert!(!dag_dir(dir.path(), "job", config).exists());
    }
}

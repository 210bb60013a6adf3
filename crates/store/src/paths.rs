//! File/directory naming for the run store.
//!
//! `{data-dir}/{prefix}-{md5(config-path)}/{prefix}.{ts}.{rid8}.dat`
//!
//! Hashing the DAG's config path (not just its name) keeps two DAGs with
//! identical names at different paths from colliding.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};

/// Replace anything that isn't alphanumeric, `-`, or `_` with `_`, so the
/// DAG name is always safe to embed in a path component.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

fn config_hash(config_path: &Path) -> String {
    let mut hasher = Md5::new();
    hasher.update(config_path.to_string_lossy().as_bytes());
    hex::encode(hasher.finalize())
}

/// The per-DAG directory holding all of a DAG's status files.
pub fn dag_dir(data_dir: &Path, dag_name: &str, config_path: &Path) -> PathBuf {
    let prefix = sanitize(dag_name);
    data_dir.join(format!("{prefix}-{}", config_hash(config_path)))
}

/// The filename for a brand-new status file, unique per run.
pub fn status_file_name(dag_name: &str, ts: DateTime<Utc>, run_id: &str) -> String {
    let prefix = sanitize(dag_name);
    let ts = ts.format("%Y%m%d.%H:%M:%S%.3f");
    let stripped = run_id.replace('-', "");
    let rid8 = &stripped[..8.min(stripped.len())];
    format!("{prefix}.{ts}.{rid8}.dat")
}

/// `.dat` files in `dir`, sorted newest-first by the timestamp embedded in
/// the filename (the fixed-width format sorts lexicographically).
pub fn list_status_files(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("dat"))
        .collect();
    files.sort_by(|a, b| b.file_name().cmp(&a.file_name()));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_unsafe_chars() {
        assert_eq!(sanitize("my dag/v2"), "my_dag_v2");
    }

    #[test]
    fn dag_dir_differs_by_config_path() {
        let a = dag_dir(Path::new("/data"), "job", Path::new("/dags/a.yaml"));
        let b = dag_dir(Path::new("/data"), "job", Path::new("/dags/b.yaml"));
        assert_ne!(a, b);
    }

    #[test]
    fn status_file_name_uses_first_8_of_run_id() {
        let ts = DateTime::parse_from_rfc3339("2026-01-02T03:04:05.006Z").unwrap().with_timezone(&Utc);
        let name = status_file_name("job", ts, "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee");
        assert_eq!(name, "job.20260102.03:04:05.006.aaaaaaaa.dat");
    }

    #[test]
    fn status_file_name_handles_short_custom_run_ids() {
        let ts = DateTime::parse_from_rfc3339("2026-01-02T03:04:05.006Z").unwrap().with_timezone(&Utc);
        let name = status_file_name("job", ts, "a-b");
        assert_eq!(name, "job.20260102.03:04:05.006.ab.dat");
    }
}

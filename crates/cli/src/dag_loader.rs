//! Minimal DAG loader. Plumbing only — schema errors surface as generic
//! deserialize errors, not friendly diagnostics.

use std::path::{Path, PathBuf};

use engine::Dag;

pub fn load(path: &Path) -> anyhow::Result<Dag> {
    let content = std::fs::read_to_string(path)
        .map_err(|err| anyhow::anyhow!("cannot read DAG file {}: {err}", path.display()))?;
    let dag: Dag = serde_yaml::from_str(&content)
        .map_err(|err| anyhow::anyhow!("invalid DAG definition in {}: {err}", path.display()))?;
    Ok(dag)
}

/// Every `*.yaml`/`*.yml` file directly under `dags_dir`, paired with its
/// own path as the config-hash key.
pub fn load_all(dags_dir: &Path) -> anyhow::Result<Vec<(Dag, PathBuf)>> {
    let mut out = Vec::new();
    let entries = match std::fs::read_dir(dags_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(out),
        Err(err) => return Err(err.into()),
    };
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        if is_yaml {
            out.push((load(&path)?, path));
        }
    }
    Ok(out)
}

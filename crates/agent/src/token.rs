//! Token-secret resolution chain.
//!
//! An ordered chain of providers: static (env var) then file
//! (auto-generated). A provider returning `Ok(None)` means "invalid /
//! not configured, try the next one"; any `Err` is fatal and aborts the
//! chain. What eventually issues and verifies JWTs with this secret
//! lives elsewhere; this module only resolves the secret itself.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;

use crate::error::AgentError;

pub trait TokenProvider: Send + Sync {
    /// `Ok(None)` means this provider has nothing usable; try the next.
    fn resolve(&self) -> Result<Option<String>, AgentError>;
}

/// Reads a secret from an already-resolved value (typically an
/// environment variable read by the CLI layer). Empty or whitespace-only
/// content is treated as missing.
pub struct StaticProvider(pub Option<String>);

impl TokenProvider for StaticProvider {
    fn resolve(&self) -> Result<Option<String>, AgentError> {
        Ok(self.0.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string))
    }
}

/// Reads `{home}/auth/token_secret`, generating a fresh 32-byte
/// base64url secret on first use. Concurrent generators converge on the
/// same secret: the file is created via exclusive-create-then-rename, so
/// the first writer wins and every later writer just reads back what it
/// wrote.
pub struct FileProvider {
    pub path: PathBuf,
}

impl TokenProvider for FileProvider {
    fn resolve(&self) -> Result<Option<String>, AgentError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if !content.trim().is_empty() => Ok(Some(content.trim().to_string())),
            Ok(_) => self.generate(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => self.generate(),
            Err(err) => Err(err.into()),
        }
    }
}

impl FileProvider {
    fn generate(&self) -> Result<Option<String>, AgentError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let secret = URL_SAFE_NO_PAD.encode(bytes);

        let tmp = self.path.with_extension("tmp");
        let mut opts = OpenOptions::new();
        opts.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            opts.mode(0o600);
        }
        match opts.open(&tmp) {
            Ok(mut file) => {
                file.write_all(secret.as_bytes())?;
                file.sync_all()?;
                match std::fs::rename(&tmp, &self.path) {
                    Ok(()) => Ok(Some(secret)),
                    // Another generator won the race; fall back to reading
                    // whatever it wrote.
                    Err(_) => {
                        let _ = std::fs::remove_file(&tmp);
                        self.resolve()
                    }
                }
            }
            // `tmp` already exists — a concurrent generator is mid-write.
            // The eventual `rename` above will have landed the real file;
            // read it back.
            Err(_) => self.resolve(),
        }
    }
}

/// Walk `providers` in order, returning the first usable secret.
pub fn resolve(providers: &[Box<dyn TokenProvider>]) -> Result<String, AgentError> {
    for provider in providers {
        if let Some(secret) = provider.resolve()? {
            return Ok(secret);
        }
    }
    Err(AgentError::NoTokenSecret)
}

/// The default chain used by the CLI: an env-sourced static value, then
/// the auto-generated file under `{home}/auth/token_secret`.
pub fn default_chain(home: &Path, static_value: Option<String>) -> Vec<Box<dyn TokenProvider>> {
    vec![
        Box::new(StaticProvider(static_value)),
        Box::new(FileProvider { path: home.join("auth").join("token_secret") }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_provider_skips_blank_values() {
        assert!(StaticProvider(Some("   ".to_string())).resolve().unwrap().is_none());
        assert_eq!(StaticProvider(Some("abc".to_string())).resolve().unwrap(), Some("abc".to_string()));
    }

    #[test]
    fn file_provider_generates_then_reuses() {
        let dir = tempfile::tempdir().unwrap();
        let provider = FileProvider { path: dir.path().join("auth").join("token_secret") };
        let first = provider.resolve().unwrap().unwrap();
        let second = provider.resolve().unwrap().unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn chain_falls_through_to_file_provider() {
        let dir = tempfile::tempdir().unwrap();
        let chain = default_chain(dir.path(), None);
        let secret = resolve(&chain).unwrap();
        assert!(!secret.is_empty());
    }
}

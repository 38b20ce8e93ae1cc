use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use time::OffsetDateTime;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::utils::file_stamp;

pub const REPO_SYNC_LOG_NAME: &str = "github_clone.log";
pub const TLS_LOG_PREFIX: &str = "letsencrypt-automation";

const SECRET_NAME_MARKERS: [&str; 4] = ["key", "token", "password", "secret"];

/// Installs the global subscriber: stdout always, plus `log_file` when given.
///
/// `RUST_LOG` overrides the level; otherwise `info`, or `debug` when verbose.
///
/// # Errors
/// Returns an error if the log file cannot be opened or a subscriber is
/// already installed.
pub fn init(verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stdout))
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))
}

/// Log file locations tried by `repo-sync`, most preferred first.
pub fn repo_sync_candidates() -> Vec<PathBuf> {
    let mut candidates = vec![PathBuf::from("/var/log").join(REPO_SYNC_LOG_NAME)];
    if let Some(home) = std::env::var_os("HOME") {
        candidates.push(PathBuf::from(home).join(REPO_SYNC_LOG_NAME));
    }
    candidates.push(std::env::temp_dir().join(REPO_SYNC_LOG_NAME));
    candidates.push(PathBuf::from(REPO_SYNC_LOG_NAME));
    candidates
}

/// Returns the first candidate that can be opened for appending.
///
/// Candidates whose parent directory does not exist are skipped rather
/// than created.
pub fn first_writable(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates.iter().find(|path| is_writable(path)).cloned()
}

fn is_writable(path: &Path) -> bool {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.is_dir()
    {
        return false;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .is_ok()
}

/// `<dir>/<prefix>-<YYYYmmdd-HHMMSS>.log`
pub fn timestamped_path(dir: &Path, prefix: &str, at: OffsetDateTime) -> PathBuf {
    dir.join(format!("{prefix}-{}.log", file_stamp(at)))
}

/// Creates `dir` and returns a fresh timestamped log path inside it.
///
/// # Errors
/// Returns an error if the directory cannot be created.
pub fn prepare_log_dir(dir: &Path, prefix: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    Ok(timestamped_path(dir, prefix, OffsetDateTime::now_utc()))
}

#[must_use]
pub fn is_secret_name(name: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    SECRET_NAME_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// Dumps the process environment at debug level, skipping secret-looking names.
pub fn log_environment() {
    debug!("Current environment variables:");
    let mut vars: Vec<(String, String)> = std::env::vars().collect();
    vars.sort();
    for (key, value) in vars {
        if !is_secret_name(&key) {
            debug!("  {key}={value}");
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;
    use time::macros::datetime;

    use super::*;

    #[test]
    fn test_first_writable_skips_missing_parent() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing").join("app.log");
        let usable = dir.path().join("app.log");

        let chosen = first_writable(&[missing, usable.clone()]).unwrap();
        assert_eq!(chosen, usable);
    }

    #[test]
    fn test_first_writable_none_when_all_fail() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope").join("app.log");
        assert!(first_writable(&[missing]).is_none());
    }

    #[test]
    fn test_repo_sync_candidates_order() {
        let candidates = repo_sync_candidates();
        assert_eq!(
            candidates.first().unwrap(),
            &PathBuf::from("/var/log/github_clone.log")
        );
        assert_eq!(
            candidates.last().unwrap(),
            &PathBuf::from(REPO_SYNC_LOG_NAME)
        );
    }

    #[test]
    fn test_timestamped_path() {
        let at = datetime!(2025-01-02 03:04:05 UTC);
        let path = timestamped_path(Path::new("/var/log/le"), TLS_LOG_PREFIX, at);
        assert_eq!(
            path,
            PathBuf::from("/var/log/le/letsencrypt-automation-20250102-030405.log")
        );
    }

    #[test]
    fn test_is_secret_name() {
        assert!(is_secret_name("CLOUDFLARE_API_TOKEN"));
        assert!(is_secret_name("SSH_KEYS_DIR"));
        assert!(is_secret_name("db_password"));
        assert!(!is_secret_name("PATH"));
    }
}

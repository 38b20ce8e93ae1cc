use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use tokio::fs;
use tracing::{info, warn};

use crate::utils::unix_timestamp;

pub const BACKUP_MARKER: &str = "backup";
pub const OLD_MARKER: &str = "old";

/// Renames `dest` to `<dest>_<marker>_<unix-ts>`, appending `_<pid>` when
/// that name is already taken.
///
/// # Errors
/// Returns an error if the rename fails.
pub async fn move_aside(dest: &Path, marker: &str) -> Result<PathBuf> {
    let base = sibling_name(dest, &format!("{marker}_{}", unix_timestamp()))?;
    let target = if fs::try_exists(&base).await.unwrap_or(false) {
        let mut name = base.clone().into_os_string();
        name.push(format!("_{}", std::process::id()));
        PathBuf::from(name)
    } else {
        base
    };
    fs::rename(dest, &target).await.with_context(|| {
        format!(
            "Failed to move {} to {}",
            dest.display(),
            target.display()
        )
    })?;
    info!("Moved {} to {}", dest.display(), target.display());
    Ok(target)
}

/// Keeps the newest `max_backups` backup directories of `dest` and removes
/// the rest. Zero disables rotation. Returns the number removed.
///
/// # Errors
/// Returns an error if the parent directory cannot be listed.
pub async fn rotate_backups(dest: &Path, max_backups: u32) -> Result<usize> {
    if max_backups == 0 {
        return Ok(0);
    }
    let Some(parent) = dest.parent() else {
        return Ok(0);
    };
    let Some(dest_name) = dest.file_name().and_then(|name| name.to_str()) else {
        return Ok(0);
    };
    let prefixes = [
        format!("{dest_name}_{BACKUP_MARKER}_"),
        format!("{dest_name}_{OLD_MARKER}_"),
    ];

    let mut backups: Vec<(SystemTime, PathBuf)> = Vec::new();
    let mut entries = fs::read_dir(parent)
        .await
        .with_context(|| format!("Failed to list {}", parent.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !prefixes.iter().any(|prefix| name.starts_with(prefix.as_str())) {
            continue;
        }
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        if !metadata.is_dir() {
            continue;
        }
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        backups.push((modified, entry.path()));
    }

    backups.sort_by(|a, b| b.0.cmp(&a.0));
    let limit = usize::try_from(max_backups).unwrap_or(usize::MAX);
    let mut removed = 0;
    for (_, path) in backups.into_iter().skip(limit) {
        info!("Removing old backup: {}", path.display());
        match fs::remove_dir_all(&path).await {
            Ok(()) => removed += 1,
            Err(err) => warn!("Failed to remove backup {}: {err}", path.display()),
        }
    }
    Ok(removed)
}

fn sibling_name(dest: &Path, suffix: &str) -> Result<PathBuf> {
    let name = dest
        .file_name()
        .with_context(|| format!("Destination has no file name: {}", dest.display()))?;
    let mut name = name.to_os_string();
    name.push(format!("_{suffix}"));
    Ok(dest.with_file_name(name))
}

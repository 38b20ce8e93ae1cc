use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use anyhow::{Context, Result};
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub const PRIVATE_FILE_MODE: u32 = 0o600;
pub const PRIVATE_DIR_MODE: u32 = 0o700;
pub const EXECUTABLE_MODE: u32 = 0o755;
pub const PUBLIC_FILE_MODE: u32 = 0o644;

const GROUP_OTHER_BITS: u32 = 0o077;

/// Ensures a directory exists and is only accessible by its owner.
///
/// # Errors
/// Returns an error if the directory cannot be created or permissions cannot be set.
pub async fn ensure_private_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)
        .await
        .with_context(|| format!("Failed to create directory {}", path.display()))?;
    set_mode(path, PRIVATE_DIR_MODE).await
}

/// Applies `mode` to `path`.
///
/// # Errors
/// Returns an error if permissions cannot be set.
pub async fn set_mode(path: &Path, mode: u32) -> Result<()> {
    fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .with_context(|| format!("Failed to set permissions {mode:o} on {}", path.display()))
}

/// Writes `contents` to `path`, creating parent directories, then applies `mode`.
///
/// # Errors
/// Returns an error if the file cannot be written or its mode cannot be set.
pub async fn write_with_mode(path: &Path, contents: &str, mode: u32) -> Result<()> {
    ensure_parent(path).await?;
    fs::write(path, contents)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    set_mode(path, mode).await
}

/// Writes a file readable only by its owner.
///
/// # Errors
/// Returns an error if the file cannot be written or its mode cannot be set.
pub async fn write_private_file(path: &Path, contents: &str) -> Result<()> {
    write_with_mode(path, contents, PRIVATE_FILE_MODE).await
}

/// Appends a single line to `path`, creating the file when missing.
///
/// # Errors
/// Returns an error if the file cannot be opened or written.
pub async fn append_line(path: &Path, line: &str) -> Result<()> {
    ensure_parent(path).await?;
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut contents = line.trim_end_matches('\n').to_string();
    contents.push('\n');
    file.write_all(contents.as_bytes())
        .await
        .with_context(|| format!("Failed to append to {}", path.display()))?;
    file.flush().await?;
    Ok(())
}

/// Returns the permission bits (`0o777` mask) of `path`.
///
/// # Errors
/// Returns an error if the metadata cannot be read.
pub async fn mode_of(path: &Path) -> Result<u32> {
    let metadata = fs::metadata(path)
        .await
        .with_context(|| format!("Failed to stat {}", path.display()))?;
    Ok(metadata.permissions().mode() & 0o777)
}

#[must_use]
pub fn has_group_or_other_bits(mode: u32) -> bool {
    mode & GROUP_OTHER_BITS != 0
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

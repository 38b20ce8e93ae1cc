use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use time::OffsetDateTime;
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use crate::fs_util::{
    PRIVATE_FILE_MODE, ensure_private_dir, has_group_or_other_bits, mode_of, set_mode,
    write_private_file,
};
use crate::utils::{human_stamp, unix_timestamp};

const KEY_SNIFF_BYTES: usize = 1024;
const PRIVATE_KEY_MARKER: &str = "PRIVATE KEY";
const CONFIG_FILE: &str = "config";
const CONFIG_BACKUP_PREFIX: &str = "config.bak.";
const KNOWN_HOSTS_FILE: &str = "known_hosts";
const TEMP_KEYS_PREFIX: &str = "temp_keys_";

/// Lists the private keys in `dir`, sorted by path.
///
/// Files readable by group or others are tightened to 0600 first.
///
/// # Errors
/// Returns an error if the directory cannot be listed.
pub async fn find_private_keys(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut keys = Vec::new();
    let mut entries = fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to list SSH keys directory {}", dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let file_type = entry.file_type().await?;
        if !file_type.is_file() || path.extension().is_some_and(|ext| ext == "pub") {
            continue;
        }
        let mode = mode_of(&path).await?;
        if has_group_or_other_bits(mode) {
            warn!(
                "Insecure permissions {mode:o} on {}; fixing to 600",
                path.display()
            );
            set_mode(&path, PRIVATE_FILE_MODE).await?;
        }
        if looks_like_private_key(&path).await? {
            debug!("Found SSH private key: {}", path.display());
            keys.push(path);
        } else {
            debug!("Skipping non-key file: {}", path.display());
        }
    }
    keys.sort();
    Ok(keys)
}

async fn looks_like_private_key(path: &Path) -> Result<bool> {
    let file = fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut head = Vec::with_capacity(KEY_SNIFF_BYTES);
    file.take(KEY_SNIFF_BYTES as u64)
        .read_to_end(&mut head)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(utf8_prefix(&head).is_some_and(|text| text.contains(PRIVATE_KEY_MARKER)))
}

/// Decodes `bytes` as UTF-8, tolerating a multi-byte character cut off at
/// the end of the buffer.
fn utf8_prefix(bytes: &[u8]) -> Option<&str> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Some(text),
        Err(err) if err.error_len().is_none() => {
            std::str::from_utf8(&bytes[..err.valid_up_to()]).ok()
        }
        Err(_) => None,
    }
}

/// Keys copied into a temporary directory under the SSH home for the
/// duration of one run.
#[derive(Debug, Clone)]
pub struct SshSession {
    ssh_home: PathBuf,
    temp_dir: PathBuf,
    identities: Vec<PathBuf>,
    strict: bool,
}

impl SshSession {
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn identities(&self) -> &[PathBuf] {
        &self.identities
    }

    pub fn known_hosts(&self) -> PathBuf {
        self.ssh_home.join(KNOWN_HOSTS_FILE)
    }

    /// Options for the connectivity check, which never consults known hosts.
    pub fn check_options(&self) -> Vec<String> {
        let mut options = self.identity_options();
        options.extend(
            [
                "-o",
                "StrictHostKeyChecking=no",
                "-o",
                "UserKnownHostsFile=/dev/null",
                "-o",
                "BatchMode=yes",
            ]
            .map(String::from),
        );
        options
    }

    /// Non-interactive ssh command line for `GIT_SSH_COMMAND`.
    pub fn git_ssh_command(&self, ssh_program: &str) -> String {
        let mut parts = vec![shell_quote(ssh_program)];
        parts.extend(self.identity_options().iter().map(|part| shell_quote(part)));
        parts.push("-o BatchMode=yes".to_string());
        if self.strict {
            parts.push("-o StrictHostKeyChecking=yes".to_string());
            parts.push(format!(
                "-o UserKnownHostsFile={}",
                shell_quote(&self.known_hosts().to_string_lossy())
            ));
        } else {
            parts.push("-o StrictHostKeyChecking=no".to_string());
            parts.push("-o UserKnownHostsFile=/dev/null".to_string());
        }
        parts.join(" ")
    }

    fn identity_options(&self) -> Vec<String> {
        let mut options = vec!["-o".to_string(), "IdentitiesOnly=yes".to_string()];
        for identity in &self.identities {
            options.push("-i".to_string());
            options.push(identity.to_string_lossy().into_owned());
        }
        options
    }

    /// Removes the temporary key directory. Safe to call more than once.
    ///
    /// # Errors
    /// Returns an error if the directory exists but cannot be removed.
    pub async fn cleanup(&self) -> Result<()> {
        match fs::remove_dir_all(&self.temp_dir).await {
            Ok(()) => {
                info!("Removed temporary SSH key directory");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| {
                format!("Failed to remove {}", self.temp_dir.display())
            }),
        }
    }
}

/// Copies `keys` into a private temp directory under `ssh_home` and makes
/// sure the SSH client config has a block for `host`.
///
/// The temp directory is removed again when any step fails.
///
/// # Errors
/// Returns an error if a directory, key copy or config write fails.
pub async fn install_keys(
    keys: &[PathBuf],
    ssh_home: &Path,
    host: &str,
    strict: bool,
) -> Result<SshSession> {
    let first = keys.first().context("No SSH private keys to install")?;
    ensure_private_dir(ssh_home).await?;
    ensure_known_hosts_file(&ssh_home.join(KNOWN_HOSTS_FILE)).await?;

    let temp_dir = ssh_home.join(format!("{TEMP_KEYS_PREFIX}{}", unix_timestamp()));
    ensure_private_dir(&temp_dir).await?;

    match copy_keys_and_configure(keys, first, ssh_home, &temp_dir, host, strict).await {
        Ok(identities) => Ok(SshSession {
            ssh_home: ssh_home.to_path_buf(),
            temp_dir,
            identities,
            strict,
        }),
        Err(err) => {
            if let Err(cleanup_err) = fs::remove_dir_all(&temp_dir).await {
                warn!(
                    "Failed to remove {} after error: {cleanup_err}",
                    temp_dir.display()
                );
            }
            Err(err)
        }
    }
}

async fn copy_keys_and_configure(
    keys: &[PathBuf],
    first: &Path,
    ssh_home: &Path,
    temp_dir: &Path,
    host: &str,
    strict: bool,
) -> Result<Vec<PathBuf>> {
    let mut identities = Vec::with_capacity(keys.len());
    for key in keys {
        let name = key
            .file_name()
            .with_context(|| format!("Invalid key path {}", key.display()))?;
        let target = temp_dir.join(name);
        fs::copy(key, &target)
            .await
            .with_context(|| format!("Failed to copy {}", key.display()))?;
        set_mode(&target, PRIVATE_FILE_MODE).await?;
        identities.push(target);
    }
    info!("Installed {} SSH key(s)", identities.len());

    let primary = temp_dir.join(first.file_name().unwrap_or_default());
    ensure_client_config(&ssh_home.join(CONFIG_FILE), host, &primary, strict).await?;
    Ok(identities)
}

async fn ensure_known_hosts_file(path: &Path) -> Result<()> {
    if fs::try_exists(path).await.unwrap_or(false) {
        set_mode(path, PRIVATE_FILE_MODE).await
    } else {
        write_private_file(path, "").await
    }
}

async fn ensure_client_config(
    config: &Path,
    host: &str,
    identity: &Path,
    strict: bool,
) -> Result<()> {
    let existing = match fs::read_to_string(config).await {
        Ok(contents) => Some(contents),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => {
            return Err(err).with_context(|| format!("Failed to read {}", config.display()));
        }
    };

    let host_line = format!("Host {host}");
    if existing
        .as_deref()
        .is_some_and(|contents| contents.lines().any(|line| line.trim() == host_line))
    {
        info!("SSH config already has an entry for {host}");
        return Ok(());
    }

    let backup = match &existing {
        Some(contents) => {
            let backup =
                config.with_file_name(format!("{CONFIG_BACKUP_PREFIX}{}", unix_timestamp()));
            write_private_file(&backup, contents).await?;
            debug!("Backed up SSH config to {}", backup.display());
            Some(backup)
        }
        None => None,
    };

    let block = client_config_block(host, identity, strict, OffsetDateTime::now_utc());
    let mut contents = existing.unwrap_or_default();
    if !contents.is_empty() && !contents.ends_with('\n') {
        contents.push('\n');
    }
    contents.push_str(&block);

    if let Err(err) = write_private_file(config, &contents).await {
        if let Some(backup) = &backup {
            warn!("Restoring SSH config from {}", backup.display());
            if let Err(restore_err) = fs::copy(backup, config).await {
                warn!("Failed to restore SSH config: {restore_err}");
            }
        }
        return Err(err);
    }
    info!("Added SSH config entry for {host}");
    Ok(())
}

pub fn client_config_block(
    host: &str,
    identity: &Path,
    strict: bool,
    at: OffsetDateTime,
) -> String {
    let mut block = format!(
        "\n# {host} configuration added by hostprep at {}\nHost {host}\n  User git\n  \
         IdentityFile {}\n  IdentitiesOnly yes\n",
        human_stamp(at),
        identity.display()
    );
    if strict {
        block.push_str("  StrictHostKeyChecking yes\n  VerifyHostKeyDNS yes\n");
    } else {
        block.push_str(
            "  StrictHostKeyChecking no\n  UserKnownHostsFile=/dev/null\n  LogLevel ERROR\n",
        );
    }
    block
}

/// Deletes every `config.bak.*` file under `ssh_home`.
///
/// # Errors
/// Returns an error if the directory cannot be listed.
pub async fn remove_config_backups(ssh_home: &Path) -> Result<usize> {
    let mut entries = match fs::read_dir(ssh_home).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(err) => {
            return Err(err).with_context(|| format!("Failed to list {}", ssh_home.display()));
        }
    };
    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let is_backup = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(CONFIG_BACKUP_PREFIX));
        if !is_backup {
            continue;
        }
        match fs::remove_file(entry.path()).await {
            Ok(()) => removed += 1,
            Err(err) => warn!("Failed to remove {}: {err}", entry.path().display()),
        }
    }
    Ok(removed)
}

/// Quotes `value` for a POSIX shell when it contains special characters.
pub fn shell_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || "-_./=:,@+%".contains(ch));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', r"'\''"))
    }
}

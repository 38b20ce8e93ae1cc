//! Idempotent clone-or-update of a private repository over SSH.
//!
//! The workflow runs five steps in order (find keys, install keys, trust
//! the host, test the connection, reconcile the checkout) and always
//! removes the temporary key material afterwards.

use std::error::Error as StdError;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::config::{Settings, absolutize};
use crate::phases::banner;

pub mod backup;
pub mod connection;
pub mod git;
pub mod known_hosts;
pub mod reconcile;
pub mod ssh;
pub mod url;

use connection::ConnectionDiagnosis;
use known_hosts::KnownHostsOutcome;
use reconcile::{ReconcileError, ReconcileOptions, ReconcileOutcome};
use ssh::SshSession;
use url::RepoUrl;

pub const EXIT_OK: i32 = 0;
pub const EXIT_GENERAL: i32 = 1;
pub const EXIT_SSH_KEY: i32 = 2;
pub const EXIT_SSH_CONFIG: i32 = 3;
pub const EXIT_CONNECTION: i32 = 4;
pub const EXIT_CLONE: i32 = 5;
pub const EXIT_UPDATE: i32 = 6;
pub const EXIT_PERMISSION: i32 = 7;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Repository sync setup failed")]
    General(#[source] anyhow::Error),
    #[error("SSH key setup failed")]
    SshKey(#[source] anyhow::Error),
    #[error("SSH host verification failed")]
    SshConfig(#[source] anyhow::Error),
    #[error("Connection to the repository host failed")]
    Connection(#[source] anyhow::Error),
    #[error("Repository clone failed")]
    Clone(#[source] anyhow::Error),
    #[error("Repository update failed")]
    Update(#[source] anyhow::Error),
}

impl SyncError {
    /// Process exit code; a permission error anywhere in the chain wins.
    pub fn exit_code(&self) -> i32 {
        if self.is_permission_denied() {
            return EXIT_PERMISSION;
        }
        match self {
            Self::General(_) => EXIT_GENERAL,
            Self::SshKey(_) => EXIT_SSH_KEY,
            Self::SshConfig(_) => EXIT_SSH_CONFIG,
            Self::Connection(_) => EXIT_CONNECTION,
            Self::Clone(_) => EXIT_CLONE,
            Self::Update(_) => EXIT_UPDATE,
        }
    }

    fn is_permission_denied(&self) -> bool {
        let mut current: Option<&(dyn StdError + 'static)> = Some(self);
        while let Some(err) = current {
            if let Some(io) = err.downcast_ref::<std::io::Error>()
                && io.kind() == std::io::ErrorKind::PermissionDenied
            {
                return true;
            }
            current = err.source();
        }
        false
    }
}

impl From<ReconcileError> for SyncError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::Clone(source) => Self::Clone(source),
            ReconcileError::Update(source) => Self::Update(source),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncReport {
    pub url: String,
    pub dest: PathBuf,
    pub keys: usize,
    pub known_hosts: KnownHostsOutcome,
    pub connection: ConnectionDiagnosis,
    pub outcome: ReconcileOutcome,
}

/// Runs the whole repo-sync workflow.
///
/// # Errors
/// Returns a `SyncError` whose variant selects the exit code.
pub async fn run_sync(settings: &Settings) -> Result<SyncReport, SyncError> {
    let repo = &settings.repo;
    let url = RepoUrl::parse(&repo.url).map_err(|err| SyncError::General(err.into()))?;
    let keys_dir = absolutize(&repo.ssh_keys_dir).map_err(SyncError::General)?;
    let dest = absolutize(&repo.dest_dir).map_err(SyncError::General)?;
    let ssh_home = repo.resolve_ssh_home().map_err(SyncError::General)?;

    info!("Repository: {url}");
    info!("Destination: {}", dest.display());
    info!("SSH keys directory: {}", keys_dir.display());
    if !keys_dir.is_dir() {
        return Err(SyncError::General(anyhow::anyhow!(
            "SSH keys directory not found: {}",
            keys_dir.display()
        )));
    }

    banner("STEP 1: Finding SSH keys");
    let keys = ssh::find_private_keys(&keys_dir)
        .await
        .map_err(SyncError::SshKey)?;
    if keys.is_empty() {
        return Err(SyncError::SshKey(anyhow::anyhow!(
            "No SSH private keys found in {}",
            keys_dir.display()
        )));
    }
    info!("Found {} SSH private key(s)", keys.len());

    banner("STEP 2: Installing SSH keys");
    let session = ssh::install_keys(&keys, &ssh_home, url.host(), repo.strict_host_checking)
        .await
        .map_err(SyncError::SshKey)?;

    let result = sync_with_session(settings, &url, &session, dest, keys.len()).await;

    banner("Cleaning up");
    cleanup(&session, &ssh_home).await;
    result
}

async fn sync_with_session(
    settings: &Settings,
    url: &RepoUrl,
    session: &SshSession,
    dest: PathBuf,
    keys: usize,
) -> Result<SyncReport, SyncError> {
    let repo = &settings.repo;
    let tools = &settings.tools;

    banner("STEP 3: Verifying host keys");
    let known_hosts = if repo.strict_host_checking {
        known_hosts::ensure_known_host(
            &tools.ssh_keyscan,
            url.host(),
            &session.known_hosts(),
            &repo.host_fingerprints,
            repo.connect_timeout,
        )
        .await
        .map_err(SyncError::SshConfig)?
    } else {
        info!("Strict host checking disabled; skipping host key verification");
        KnownHostsOutcome::Skipped
    };

    banner("STEP 4: Testing SSH connection");
    let connection = connection::test_connection(
        &tools.ssh,
        &tools.shell,
        url.host(),
        session,
        repo.connect_timeout,
    )
    .await
    .map_err(SyncError::Connection)?;
    if !connection.is_authenticated() {
        if repo.strict_host_checking {
            return Err(SyncError::Connection(anyhow::anyhow!(
                "Could not authenticate to {} ({connection:?})",
                url.host()
            )));
        }
        warn!("Continuing without a verified SSH connection");
    }

    banner("STEP 5: Cloning or updating repository");
    let options = ReconcileOptions {
        url: url.as_str().to_string(),
        repo_name: url.name().to_string(),
        dest: dest.clone(),
        git_program: tools.git.clone(),
        ssh_command: Some(session.git_ssh_command(&tools.ssh)),
        force_clone: repo.force_clone,
        skip_pull: repo.skip_pull,
        skip_clone: repo.skip_clone,
        max_backups: repo.max_backups,
        retry_attempts: settings.retry.attempts,
        retry_delay: settings.retry.delay,
        fetch_timeout: repo.fetch_timeout,
        health_timeout: repo.health_timeout,
    };
    let outcome = reconcile::reconcile(&options).await?;

    Ok(SyncReport {
        url: url.to_string(),
        dest,
        keys,
        known_hosts,
        connection,
        outcome,
    })
}

async fn cleanup(session: &SshSession, ssh_home: &Path) {
    if let Err(err) = session.cleanup().await {
        warn!("{err:#}");
    }
    match ssh::remove_config_backups(ssh_home).await {
        Ok(0) => {}
        Ok(removed) => info!("Removed {removed} SSH config backup(s)"),
        Err(err) => warn!("{err:#}"),
    }
}

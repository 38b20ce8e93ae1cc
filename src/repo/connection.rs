use std::time::Duration;

use anyhow::Result;
use tracing::{error, info, warn};

use super::ssh::{SshSession, shell_quote};
use crate::exec::{self, CommandOutput, CommandSpec};

const AUTHENTICATED_MARKER: &str = "successfully authenticated";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionDiagnosis {
    Authenticated,
    PermissionDenied,
    HostKeyVerificationFailed,
    TimedOut,
    Unknown,
}

impl ConnectionDiagnosis {
    pub fn is_authenticated(self) -> bool {
        self == Self::Authenticated
    }

    fn hint(self) -> &'static str {
        match self {
            Self::Authenticated => "authenticated",
            Self::PermissionDenied => "the key is not authorized for this account or repository",
            Self::HostKeyVerificationFailed => "the host key could not be verified",
            Self::TimedOut => "the host did not answer; check network and firewall",
            Self::Unknown => "unrecognized ssh failure",
        }
    }
}

/// Classifies an ssh connection attempt from its stderr.
pub fn diagnose(stderr: &str) -> ConnectionDiagnosis {
    if stderr.contains(AUTHENTICATED_MARKER) {
        ConnectionDiagnosis::Authenticated
    } else if stderr.contains("Permission denied") {
        ConnectionDiagnosis::PermissionDenied
    } else if stderr.contains("Host key verification failed") {
        ConnectionDiagnosis::HostKeyVerificationFailed
    } else if stderr.contains("Connection timed out") || stderr.contains("Timeout after") {
        ConnectionDiagnosis::TimedOut
    } else {
        ConnectionDiagnosis::Unknown
    }
}

pub fn check_args(host: &str, session: &SshSession) -> Vec<String> {
    let mut args = vec!["-n".to_string()];
    args.extend(session.check_options());
    args.push("-T".to_string());
    args.push(format!("git@{host}"));
    args
}

/// Tests `git@<host>` and retries once through the shell when the direct
/// invocation does not authenticate.
///
/// # Errors
/// Returns an error only if the check cannot be spawned at all.
pub async fn test_connection(
    ssh: &str,
    shell: &str,
    host: &str,
    session: &SshSession,
    timeout: Duration,
) -> Result<ConnectionDiagnosis> {
    let args = check_args(host, session);
    let direct = CommandSpec::new(ssh)
        .args(args.iter().cloned())
        .timeout(timeout)
        .describe(format!("Testing SSH connection to {host}"))
        .benign_stderr(AUTHENTICATED_MARKER)
        .benign_stderr(host);
    let diagnosis = attempt(&direct).await;
    if diagnosis.is_authenticated() {
        info!("SSH connection to {host} authenticated");
        return Ok(diagnosis);
    }
    warn!("SSH connection test failed: {}", diagnosis.hint());

    let line = std::iter::once(ssh)
        .chain(args.iter().map(String::as_str))
        .map(shell_quote)
        .collect::<Vec<_>>()
        .join(" ");
    let fallback = exec::shell(shell, &line)
        .timeout(timeout)
        .describe("Retrying SSH connection test through the shell")
        .benign_stderr(AUTHENTICATED_MARKER)
        .benign_stderr(host);
    let fallback_diagnosis = attempt(&fallback).await;
    if fallback_diagnosis.is_authenticated() {
        info!("SSH connection to {host} authenticated through the shell");
        return Ok(fallback_diagnosis);
    }
    error!(
        "SSH connection to {host} failed: {}",
        fallback_diagnosis.hint()
    );
    Ok(fallback_diagnosis)
}

async fn attempt(spec: &CommandSpec) -> ConnectionDiagnosis {
    match exec::run(spec).await {
        Ok(CommandOutput { stderr, .. }) => diagnose(&stderr),
        Err(err) => {
            warn!("{err:#}");
            ConnectionDiagnosis::Unknown
        }
    }
}

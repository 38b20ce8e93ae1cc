use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use ring::digest::{SHA256, digest};
use tracing::{info, warn};

use crate::exec::{self, CommandSpec};
use crate::fs_util::{PRIVATE_FILE_MODE, append_line, set_mode};

const SCAN_KEY_TYPES: &str = "rsa,ecdsa,ed25519";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedKey {
    pub host: String,
    pub algorithm: String,
    pub blob: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownHostsOutcome {
    /// Host key checking is off.
    Skipped,
    AlreadyPresent,
    Added { verified: usize },
}

/// Parses `ssh-keyscan` stdout, ignoring comments and malformed lines.
pub fn parse_scan_output(output: &str) -> Vec<ScannedKey> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let host = fields.next()?;
            let algorithm = fields.next()?;
            let blob = fields.next()?;
            Some(ScannedKey {
                host: host.to_string(),
                algorithm: algorithm.to_string(),
                blob: blob.to_string(),
            })
        })
        .collect()
}

/// OpenSSH-style `SHA256:<base64>` fingerprint of a base64 key blob.
///
/// # Errors
/// Returns an error if the blob is not valid base64.
pub fn fingerprint(blob: &str) -> Result<String> {
    let raw = STANDARD
        .decode(blob.trim())
        .context("Host key is not valid base64")?;
    let hash = digest(&SHA256, &raw);
    Ok(format!("SHA256:{}", STANDARD_NO_PAD.encode(hash.as_ref())))
}

/// Maps an SSH key algorithm to the key type used in the fingerprint table.
pub fn key_type_for_algorithm(algorithm: &str) -> Option<&'static str> {
    match algorithm {
        "ssh-rsa" => Some("rsa"),
        "ssh-ed25519" => Some("ed25519"),
        other if other.starts_with("ecdsa-sha2-") => Some("ecdsa"),
        _ => None,
    }
}

/// Returns the scanned keys whose fingerprint matches `expected`.
///
/// A key with a differing fingerprint is logged and left out.
///
/// # Errors
/// Returns an error when no key matched.
pub fn verify_scanned_keys<'a>(
    keys: &'a [ScannedKey],
    expected: &BTreeMap<String, String>,
) -> Result<Vec<&'a ScannedKey>> {
    let mut verified = Vec::new();
    for key in keys {
        let Some(key_type) = key_type_for_algorithm(&key.algorithm) else {
            warn!("Ignoring unknown host key type {}", key.algorithm);
            continue;
        };
        let Some(want) = expected.get(key_type) else {
            warn!("No expected fingerprint configured for {key_type} keys");
            continue;
        };
        let actual = match fingerprint(&key.blob) {
            Ok(actual) => actual,
            Err(err) => {
                warn!("Skipping {key_type} host key for {}: {err:#}", key.host);
                continue;
            }
        };
        if &actual != want {
            warn!(
                "Host key fingerprint mismatch for {} {key_type}: expected {want}, got {actual}",
                key.host
            );
            continue;
        }
        info!("Verified {key_type} host key for {}: {actual}", key.host);
        verified.push(key);
    }
    if verified.is_empty() {
        anyhow::bail!("None of the scanned host keys matched a known fingerprint");
    }
    Ok(verified)
}

/// True when a `known_hosts` entry names `host`. Hashed entries never match.
pub fn mentions_host(known_hosts: &str, host: &str) -> bool {
    known_hosts.lines().any(|line| {
        line.split_whitespace()
            .next()
            .is_some_and(|hosts| hosts.split(',').any(|entry| entry == host))
    })
}

/// Makes sure `known_hosts` trusts `host`, scanning and verifying its keys
/// when no entry exists yet.
///
/// # Errors
/// Returns an error if scanning fails, no key verifies or the file cannot
/// be updated.
pub async fn ensure_known_host(
    ssh_keyscan: &str,
    host: &str,
    known_hosts: &Path,
    expected: &BTreeMap<String, String>,
    timeout: Duration,
) -> Result<KnownHostsOutcome> {
    let existing = tokio::fs::read_to_string(known_hosts)
        .await
        .unwrap_or_default();
    if mentions_host(&existing, host) {
        info!("{host} is already in {}", known_hosts.display());
        return Ok(KnownHostsOutcome::AlreadyPresent);
    }

    let spec = CommandSpec::new(ssh_keyscan)
        .args(["-t", SCAN_KEY_TYPES, host])
        .timeout(timeout)
        .describe(format!("Scanning host keys for {host}"))
        .benign_stderr(format!("# {host}"));
    let output = exec::run_checked(&spec)
        .await
        .with_context(|| format!("Failed to scan host keys for {host}"))?;
    let keys = parse_scan_output(&output.stdout);
    if keys.is_empty() {
        anyhow::bail!("ssh-keyscan returned no keys for {host}");
    }

    let verified = verify_scanned_keys(&keys, expected)?;
    for key in &verified {
        let line = format!("{} {} {}", key.host, key.algorithm, key.blob);
        append_line(known_hosts, &line).await?;
    }
    set_mode(known_hosts, PRIVATE_FILE_MODE).await?;
    info!("Added {host} to {}", known_hosts.display());
    Ok(KnownHostsOutcome::Added {
        verified: verified.len(),
    })
}

use anyhow::{Context, Result};
use tracing::info;

use super::plan::TlsPlan;
use super::templates::build_credentials;
use crate::exec::{self, CommandSpec};
use crate::fs_util::{ensure_private_dir, write_private_file};

/// Writes the DNS provider credentials file with mode 0600.
///
/// # Errors
/// Returns an error if the directory or file cannot be written.
pub async fn write_credentials(plan: &TlsPlan, token: &str) -> Result<()> {
    ensure_private_dir(&plan.credentials_dir).await?;
    write_private_file(&plan.credentials_file, &build_credentials(token)).await?;
    info!(
        "Wrote DNS credentials to {}",
        plan.credentials_file.display()
    );
    Ok(())
}

pub fn certonly_args(plan: &TlsPlan, email: &str, propagation_seconds: Option<u64>) -> Vec<String> {
    let mut args = vec![
        "certonly".to_string(),
        "--dns-cloudflare".to_string(),
        format!(
            "--dns-cloudflare-credentials={}",
            plan.credentials_file.display()
        ),
        "--preferred-challenges=dns-01".to_string(),
        format!("--email={email}"),
        "--agree-tos".to_string(),
        "--no-eff-email".to_string(),
        "-n".to_string(),
    ];
    if let Some(seconds) = propagation_seconds {
        args.push(format!("--dns-cloudflare-propagation-seconds={seconds}"));
    }
    for name in plan.certificate_names() {
        args.push("-d".to_string());
        args.push(name.to_string());
    }
    args
}

/// Requests the wildcard certificate.
///
/// # Errors
/// Returns an error if certbot fails.
pub async fn issue_certificate(
    certbot: &str,
    plan: &TlsPlan,
    email: &str,
    propagation_seconds: Option<u64>,
) -> Result<()> {
    let spec = CommandSpec::new(certbot)
        .args(certonly_args(plan, email, propagation_seconds))
        .describe(format!(
            "Requesting certificate for {} and {}",
            plan.base_domain, plan.wildcard_domain
        ))
        .benign_stderr("Saving debug log")
        .benign_stderr("Requesting a certificate")
        .benign_stderr("Waiting");
    exec::run_checked(&spec)
        .await
        .context("certbot could not issue the certificate")?;
    Ok(())
}

/// Fails unless both certificate files exist.
///
/// # Errors
/// Returns an error naming the first missing file.
pub async fn ensure_certificate_files(plan: &TlsPlan) -> Result<()> {
    for path in [&plan.fullchain, &plan.privkey] {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            anyhow::bail!("Certificate file not found: {}", path.display());
        }
    }
    let live = plan.fullchain.parent().unwrap_or(&plan.fullchain);
    info!("Certificate files present in {}", live.display());
    Ok(())
}

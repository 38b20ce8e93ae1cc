//! Wildcard certificate issuance over DNS-01 plus nginx reverse proxy setup.

use anyhow::{Context, Result};
use time::OffsetDateTime;
use tracing::info;

use crate::config::{Settings, TlsSettings};
use crate::exec::{self, CommandSpec};
use crate::fs_util::{EXECUTABLE_MODE, PUBLIC_FILE_MODE, append_line, set_mode, write_with_mode};
use crate::phases::{Phase, run_phases};
use crate::utils::human_stamp;

pub mod certbot;
pub mod nginx;
pub mod plan;
pub(crate) mod templates;
pub mod verify;

use plan::TlsPlan;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsPhase {
    Packages,
    Credentials,
    Certificate,
    RenewalHook,
    ReverseProxy,
    Verify,
}

impl TlsPhase {
    pub const ALL: [TlsPhase; 6] = [
        TlsPhase::Packages,
        TlsPhase::Credentials,
        TlsPhase::Certificate,
        TlsPhase::RenewalHook,
        TlsPhase::ReverseProxy,
        TlsPhase::Verify,
    ];
}

impl Phase for TlsPhase {
    fn description(self) -> &'static str {
        match self {
            TlsPhase::Packages => "Updating system and installing dependencies",
            TlsPhase::Credentials => "Configuring Cloudflare credentials",
            TlsPhase::Certificate => "Generating wildcard certificate",
            TlsPhase::RenewalHook => "Configuring renewal hook",
            TlsPhase::ReverseProxy => "Configuring Nginx as reverse proxy",
            TlsPhase::Verify => "Testing SSL certificate and Nginx configuration",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TlsReport {
    pub plan: TlsPlan,
    pub completed: Vec<TlsPhase>,
}

/// Fails unless the effective user is root, when root is required.
///
/// # Errors
/// Returns an error when not running as root.
pub fn ensure_root(tls: &TlsSettings) -> Result<()> {
    if tls.require_root && !nix::unistd::geteuid().is_root() {
        anyhow::bail!("wildcard-tls must be run as root (try sudo)");
    }
    Ok(())
}

/// Runs every phase in order and stops at the first failure.
///
/// # Errors
/// Returns the pre-flight error or the `PhaseFailure` of the failed phase.
pub async fn run_wildcard_tls(settings: &Settings) -> Result<TlsReport> {
    ensure_root(&settings.tls)?;
    let plan = TlsPlan::new(&settings.tls);
    info!("Domain: {} (API host {})", plan.wildcard_domain, plan.api_host);

    let completed = run_phases(&TlsPhase::ALL, |phase| run_phase(settings, &plan, phase)).await?;
    Ok(TlsReport { plan, completed })
}

async fn run_phase(settings: &Settings, plan: &TlsPlan, phase: TlsPhase) -> Result<()> {
    match phase {
        TlsPhase::Packages => install_packages(settings).await,
        TlsPhase::Credentials => configure_credentials(&settings.tls, plan).await,
        TlsPhase::Certificate => obtain_certificate(settings, plan).await,
        TlsPhase::RenewalHook => install_renewal_hook(settings, plan).await,
        TlsPhase::ReverseProxy => configure_reverse_proxy(settings, plan).await,
        TlsPhase::Verify => verify_installation(settings, plan).await,
    }
}

async fn install_packages(settings: &Settings) -> Result<()> {
    if settings.tls.skip_packages {
        info!("Skipping package installation");
        return Ok(());
    }
    let apt = &settings.tools.apt_get;
    let update = CommandSpec::new(apt)
        .args(["update", "-y"])
        .env("DEBIAN_FRONTEND", "noninteractive")
        .describe("Updating package lists");
    exec::run_checked(&update).await?;
    let upgrade = CommandSpec::new(apt)
        .args(["upgrade", "-y"])
        .env("DEBIAN_FRONTEND", "noninteractive")
        .describe("Upgrading installed packages");
    exec::run_checked(&upgrade).await?;
    let install = CommandSpec::new(apt)
        .args(["install", "-y"])
        .args(settings.tls.packages.iter().cloned())
        .env("DEBIAN_FRONTEND", "noninteractive")
        .describe(format!("Installing {}", settings.tls.packages.join(", ")));
    exec::run_checked(&install).await?;
    Ok(())
}

async fn configure_credentials(tls: &TlsSettings, plan: &TlsPlan) -> Result<()> {
    match tls.dns_api_token.as_deref() {
        Some(token) => certbot::write_credentials(plan, token).await,
        None => {
            info!("No DNS API token configured; leaving credentials untouched");
            Ok(())
        }
    }
}

async fn obtain_certificate(settings: &Settings, plan: &TlsPlan) -> Result<()> {
    let tls = &settings.tls;
    if tls.skip_cert_generation {
        info!("Skipping certificate generation; checking existing files");
        return certbot::ensure_certificate_files(plan).await;
    }
    certbot::issue_certificate(
        &settings.tools.certbot,
        plan,
        &tls.email,
        tls.propagation_seconds,
    )
    .await?;
    certbot::ensure_certificate_files(plan).await
}

async fn install_renewal_hook(settings: &Settings, plan: &TlsPlan) -> Result<()> {
    let script = templates::build_renewal_hook(
        &plan.base_domain,
        &plan.renewal_log,
        &settings.tools.nginx,
        &settings.tools.systemctl,
    );
    write_with_mode(&plan.hook_script, &script, EXECUTABLE_MODE).await?;
    info!("Installed renewal hook {}", plan.hook_script.display());

    let line = format!(
        "[{}] Renewal hook script installed for {}",
        human_stamp(OffsetDateTime::now_utc()),
        plan.base_domain
    );
    append_line(&plan.renewal_log, &line).await?;
    set_mode(&plan.renewal_log, PUBLIC_FILE_MODE).await
}

async fn configure_reverse_proxy(settings: &Settings, plan: &TlsPlan) -> Result<()> {
    nginx::write_site_configs(plan).await?;
    test_nginx_config(settings).await?;
    let reload = CommandSpec::new(&settings.tools.systemctl)
        .args(["reload", "nginx"])
        .describe("Reloading nginx");
    exec::run_checked(&reload).await?;
    Ok(())
}

async fn verify_installation(settings: &Settings, plan: &TlsPlan) -> Result<()> {
    certbot::ensure_certificate_files(plan).await?;
    let cert = verify::inspect_certificate(&plan.fullchain).await?;
    verify::ensure_covers(&cert, &plan.certificate_names())?;
    let days_left = (cert.not_after - OffsetDateTime::now_utc()).whole_days();
    info!(
        "Certificate covers {} and expires {} ({days_left} days left)",
        cert.dns_names.join(", "),
        human_stamp(cert.not_after)
    );

    test_nginx_config(settings).await?;
    let status = CommandSpec::new(&settings.tools.systemctl)
        .args(["status", "nginx", "--no-pager"])
        .describe("Checking nginx service status");
    exec::run_checked(&status)
        .await
        .context("nginx service is not running")?;
    Ok(())
}

async fn test_nginx_config(settings: &Settings) -> Result<()> {
    let spec = CommandSpec::new(&settings.tools.nginx)
        .arg("-t")
        .describe("Testing nginx configuration")
        .benign_stderr("syntax is ok")
        .benign_stderr("test is successful");
    exec::run_checked(&spec)
        .await
        .context("nginx configuration test failed")?;
    Ok(())
}

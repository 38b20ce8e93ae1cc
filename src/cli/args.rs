use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub(crate) struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, env = "HOSTPREP_CONFIG", global = true)]
    pub(crate) config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    pub(crate) verbose: bool,

    #[command(subcommand)]
    pub(crate) command: CliCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum CliCommand {
    /// Clone or update a private repository over SSH
    RepoSync(RepoSyncArgs),
    /// Issue a wildcard certificate and configure nginx
    WildcardTls(WildcardTlsArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct RepoSyncArgs {
    /// Repository URL (git@<host>:<owner>/<repo>.git)
    #[arg(long = "repo", env = "GITHUB_REPO_URL")]
    pub(crate) repo: Option<String>,

    /// Directory containing SSH private keys
    #[arg(long = "ssh-dir", env = "SSH_KEYS_DIR")]
    pub(crate) ssh_dir: Option<PathBuf>,

    /// Destination directory for the checkout
    #[arg(long = "dest-dir", env = "REPO_DEST_DIR")]
    pub(crate) dest_dir: Option<PathBuf>,

    /// Move any existing checkout aside and clone fresh
    #[arg(long)]
    pub(crate) force_clone: bool,

    /// Leave an existing matching checkout untouched
    #[arg(long)]
    pub(crate) skip_pull: bool,

    /// Verify the host key against known fingerprints (true/yes/1)
    #[arg(long, value_parser = parse_truthy)]
    pub(crate) strict_host_checking: Option<bool>,

    /// Write a marker file instead of cloning
    #[arg(
        long,
        env = "SKIP_CLONE",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = parse_truthy
    )]
    pub(crate) skip_clone: Option<bool>,

    /// Number of backup directories to keep (0 keeps all)
    #[arg(long)]
    pub(crate) max_backups: Option<u32>,

    /// Log to stdout only
    #[arg(long)]
    pub(crate) no_log_file: bool,
}

#[derive(Args, Debug, Default)]
pub(crate) struct WildcardTlsArgs {
    /// Wildcard domain, e.g. *.example.com
    #[arg(long)]
    pub(crate) domain: Option<String>,

    /// Contact email for the certificate authority
    #[arg(long)]
    pub(crate) email: Option<String>,

    /// Cloudflare API token for DNS-01 challenges
    #[arg(long, env = "CLOUDFLARE_API_TOKEN", hide_env_values = true)]
    pub(crate) dns_api_token: Option<String>,

    /// Subdomain proxied to the API backend
    #[arg(long)]
    pub(crate) api_subdomain: Option<String>,

    /// Local port of the API backend
    #[arg(long)]
    pub(crate) upstream_port: Option<u16>,

    /// Seconds to wait for DNS propagation
    #[arg(long)]
    pub(crate) propagation_seconds: Option<u64>,

    /// Do not run apt-get
    #[arg(long)]
    pub(crate) skip_packages: bool,

    /// Reuse an existing certificate instead of requesting one
    #[arg(
        long,
        env = "SKIP_CERT_GENERATION",
        num_args = 0..=1,
        default_missing_value = "true",
        value_parser = parse_truthy
    )]
    pub(crate) skip_cert_generation: Option<bool>,

    /// Directory for the run log
    #[arg(long)]
    pub(crate) log_dir: Option<PathBuf>,

    /// Log to stdout only
    #[arg(long)]
    pub(crate) no_log_file: bool,

    /// Print the API token in the summary
    #[arg(long)]
    pub(crate) show_secrets: bool,
}

/// `true`, `yes` and `1` (any case) are true; everything else is false.
#[allow(clippy::unnecessary_wraps)]
pub(crate) fn parse_truthy(value: &str) -> Result<bool, String> {
    Ok(matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "1"
    ))
}

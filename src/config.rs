use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Deserializer};

mod defaults;
mod validation;

pub const DEFAULT_CONFIG_FILE: &str = "hostprep.toml";
const ENV_PREFIX: &str = "HOSTPREP";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub tools: ToolSettings,
    pub retry: RetrySettings,
    pub repo: RepoSettings,
    pub tls: TlsSettings,
}

/// Program names for every external tool the workflows invoke.
#[derive(Debug, Deserialize, Clone)]
pub struct ToolSettings {
    pub git: String,
    pub ssh: String,
    pub ssh_keyscan: String,
    pub certbot: String,
    pub nginx: String,
    pub systemctl: String,
    pub apt_get: String,
    pub shell: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrySettings {
    pub attempts: u32,
    #[serde(deserialize_with = "deserialize_duration")]
    pub delay: Duration,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RepoSettings {
    pub url: String,
    pub ssh_keys_dir: PathBuf,
    pub dest_dir: PathBuf,
    #[serde(default)]
    pub ssh_home: Option<PathBuf>,
    pub strict_host_checking: bool,
    pub max_backups: u32,
    pub force_clone: bool,
    pub skip_pull: bool,
    pub skip_clone: bool,
    #[serde(deserialize_with = "deserialize_duration")]
    pub connect_timeout: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub fetch_timeout: Duration,
    #[serde(deserialize_with = "deserialize_duration")]
    pub health_timeout: Duration,
    pub host_fingerprints: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TlsSettings {
    pub domain: String,
    pub email: String,
    #[serde(default)]
    pub dns_api_token: Option<String>,
    pub api_subdomain: String,
    pub upstream_port: u16,
    pub letsencrypt_dir: PathBuf,
    pub nginx_dir: PathBuf,
    pub web_root: PathBuf,
    pub log_dir: PathBuf,
    pub renewal_log: PathBuf,
    pub require_root: bool,
    pub skip_packages: bool,
    pub skip_cert_generation: bool,
    #[serde(default)]
    pub propagation_seconds: Option<u64>,
    pub packages: Vec<String>,
}

impl Settings {
    /// Loads settings from defaults, an optional TOML file and `HOSTPREP__*`
    /// environment variables, in that order.
    ///
    /// # Errors
    /// Returns error if a source cannot be parsed or a value has the wrong type.
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let builder = defaults::apply_defaults(Config::builder())?;

        let path = config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let builder = builder
            .add_source(File::from(path).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .list_separator(",")
                    .with_list_parse_key("tls.packages")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validates the settings shared by every workflow.
    ///
    /// # Errors
    /// Returns error if a tool name, retry or timeout value is unusable.
    pub fn validate_common(&self) -> Result<()> {
        validation::validate_common(self)
    }

    /// Validates the settings used by `repo-sync`.
    ///
    /// # Errors
    /// Returns error if the repository settings are invalid.
    pub fn validate_repo(&self) -> Result<()> {
        self.validate_common()?;
        validation::validate_repo(&self.repo)
    }

    /// Validates the settings used by `wildcard-tls`.
    ///
    /// # Errors
    /// Returns error if the certificate or proxy settings are invalid.
    pub fn validate_tls(&self) -> Result<()> {
        self.validate_common()?;
        validation::validate_tls(&self.tls)
    }
}

impl RepoSettings {
    /// Directory holding the SSH client state (`~/.ssh` unless configured).
    ///
    /// # Errors
    /// Returns error if no home directory can be determined.
    pub fn resolve_ssh_home(&self) -> Result<PathBuf> {
        if let Some(path) = &self.ssh_home {
            return Ok(path.clone());
        }
        let home = std::env::var_os("HOME").context("HOME is not set; configure repo.ssh_home")?;
        Ok(PathBuf::from(home).join(".ssh"))
    }
}

/// Makes `path` absolute against the current working directory.
///
/// # Errors
/// Returns error if the current directory cannot be read.
pub fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    Ok(cwd.join(path))
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
}

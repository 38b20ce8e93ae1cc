use config::{ConfigBuilder, ConfigError, builder::DefaultState};

const DEFAULT_GIT: &str = "git";
const DEFAULT_SSH: &str = "ssh";
const DEFAULT_SSH_KEYSCAN: &str = "ssh-keyscan";
const DEFAULT_CERTBOT: &str = "certbot";
const DEFAULT_NGINX: &str = "nginx";
const DEFAULT_SYSTEMCTL: &str = "systemctl";
const DEFAULT_APT_GET: &str = "apt-get";
const DEFAULT_SHELL: &str = "sh";

const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_DELAY: &str = "5s";

const DEFAULT_REPO_URL: &str = "";
const DEFAULT_SSH_KEYS_DIR: &str = "ssh_keys";
const DEFAULT_DEST_DIR: &str = "/opt/app";
const DEFAULT_MAX_BACKUPS: u32 = 3;
const DEFAULT_CONNECT_TIMEOUT: &str = "30s";
const DEFAULT_FETCH_TIMEOUT: &str = "5m";
const DEFAULT_HEALTH_TIMEOUT: &str = "30s";

// https://docs.github.com/en/authentication/keeping-your-account-and-data-secure/githubs-ssh-key-fingerprints
const GITHUB_FINGERPRINT_RSA: &str = "SHA256:uNiVztksCsDhcc0u9e8BujQXVUpKZIDTMczCvj3tD2s";
const GITHUB_FINGERPRINT_ECDSA: &str = "SHA256:p2QAMXNIC1TJYWeIOttrVc98/R1BUFWu3/LiyKgUfQM";
const GITHUB_FINGERPRINT_ED25519: &str = "SHA256:+DiY3wvvV6TuJJhbpZisF/zLDA0zPMSvHdkr4UvCOqU";

const DEFAULT_TLS_DOMAIN: &str = "";
const DEFAULT_TLS_EMAIL: &str = "";
const DEFAULT_API_SUBDOMAIN: &str = "api";
const DEFAULT_UPSTREAM_PORT: u16 = 8080;
const DEFAULT_LETSENCRYPT_DIR: &str = "/etc/letsencrypt";
const DEFAULT_NGINX_DIR: &str = "/etc/nginx";
const DEFAULT_WEB_ROOT: &str = "/var/www/html";
const DEFAULT_TLS_LOG_DIR: &str = "/var/log/letsencrypt-automation";
const DEFAULT_RENEWAL_LOG: &str = "/var/log/letsencrypt-renewal.log";
const DEFAULT_PACKAGES: [&str; 5] = [
    "nginx",
    "python3",
    "python3-pip",
    "certbot",
    "python3-certbot-dns-cloudflare",
];

pub(crate) fn apply_defaults(
    builder: ConfigBuilder<DefaultState>,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    builder
        .set_default("tools.git", DEFAULT_GIT)?
        .set_default("tools.ssh", DEFAULT_SSH)?
        .set_default("tools.ssh_keyscan", DEFAULT_SSH_KEYSCAN)?
        .set_default("tools.certbot", DEFAULT_CERTBOT)?
        .set_default("tools.nginx", DEFAULT_NGINX)?
        .set_default("tools.systemctl", DEFAULT_SYSTEMCTL)?
        .set_default("tools.apt_get", DEFAULT_APT_GET)?
        .set_default("tools.shell", DEFAULT_SHELL)?
        .set_default("retry.attempts", DEFAULT_RETRY_ATTEMPTS)?
        .set_default("retry.delay", DEFAULT_RETRY_DELAY)?
        .set_default("repo.url", DEFAULT_REPO_URL)?
        .set_default("repo.ssh_keys_dir", DEFAULT_SSH_KEYS_DIR)?
        .set_default("repo.dest_dir", DEFAULT_DEST_DIR)?
        .set_default("repo.strict_host_checking", false)?
        .set_default("repo.max_backups", DEFAULT_MAX_BACKUPS)?
        .set_default("repo.force_clone", false)?
        .set_default("repo.skip_pull", false)?
        .set_default("repo.skip_clone", false)?
        .set_default("repo.connect_timeout", DEFAULT_CONNECT_TIMEOUT)?
        .set_default("repo.fetch_timeout", DEFAULT_FETCH_TIMEOUT)?
        .set_default("repo.health_timeout", DEFAULT_HEALTH_TIMEOUT)?
        .set_default("repo.host_fingerprints.rsa", GITHUB_FINGERPRINT_RSA)?
        .set_default("repo.host_fingerprints.ecdsa", GITHUB_FINGERPRINT_ECDSA)?
        .set_default("repo.host_fingerprints.ed25519", GITHUB_FINGERPRINT_ED25519)?
        .set_default("tls.domain", DEFAULT_TLS_DOMAIN)?
        .set_default("tls.email", DEFAULT_TLS_EMAIL)?
        .set_default("tls.api_subdomain", DEFAULT_API_SUBDOMAIN)?
        .set_default("tls.upstream_port", DEFAULT_UPSTREAM_PORT)?
        .set_default("tls.letsencrypt_dir", DEFAULT_LETSENCRYPT_DIR)?
        .set_default("tls.nginx_dir", DEFAULT_NGINX_DIR)?
        .set_default("tls.web_root", DEFAULT_WEB_ROOT)?
        .set_default("tls.log_dir", DEFAULT_TLS_LOG_DIR)?
        .set_default("tls.renewal_log", DEFAULT_RENEWAL_LOG)?
        .set_default("tls.require_root", true)?
        .set_default("tls.skip_packages", false)?
        .set_default("tls.skip_cert_generation", false)?
        .set_default("tls.packages", DEFAULT_PACKAGES.to_vec())
}

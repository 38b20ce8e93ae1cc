use anyhow::Result;

use super::{RepoSettings, Settings, TlsSettings};
use crate::repo::url::RepoUrl;
use crate::tls::plan::base_domain;

pub(crate) fn validate_common(settings: &Settings) -> Result<()> {
    let tools = [
        ("tools.git", &settings.tools.git),
        ("tools.ssh", &settings.tools.ssh),
        ("tools.ssh_keyscan", &settings.tools.ssh_keyscan),
        ("tools.certbot", &settings.tools.certbot),
        ("tools.nginx", &settings.tools.nginx),
        ("tools.systemctl", &settings.tools.systemctl),
        ("tools.apt_get", &settings.tools.apt_get),
        ("tools.shell", &settings.tools.shell),
    ];
    for (key, value) in tools {
        if value.trim().is_empty() {
            anyhow::bail!("{key} must not be empty");
        }
    }
    if settings.retry.attempts == 0 {
        anyhow::bail!("retry.attempts must be greater than 0");
    }
    Ok(())
}

pub(crate) fn validate_repo(repo: &RepoSettings) -> Result<()> {
    RepoUrl::parse(&repo.url)?;
    if repo.dest_dir.as_os_str().is_empty() {
        anyhow::bail!("repo.dest_dir must not be empty");
    }
    if repo.ssh_keys_dir.as_os_str().is_empty() {
        anyhow::bail!("repo.ssh_keys_dir must not be empty");
    }
    if repo.connect_timeout.is_zero() {
        anyhow::bail!("repo.connect_timeout must be greater than 0");
    }
    if repo.fetch_timeout.is_zero() {
        anyhow::bail!("repo.fetch_timeout must be greater than 0");
    }
    if repo.health_timeout.is_zero() {
        anyhow::bail!("repo.health_timeout must be greater than 0");
    }
    if repo.strict_host_checking && repo.host_fingerprints.is_empty() {
        anyhow::bail!("repo.host_fingerprints must not be empty with strict host checking");
    }
    Ok(())
}

pub(crate) fn validate_tls(tls: &TlsSettings) -> Result<()> {
    let domain = tls.domain.trim();
    if domain.is_empty() {
        anyhow::bail!("tls.domain must not be empty");
    }
    if !domain.is_ascii() {
        anyhow::bail!("tls.domain must be ASCII");
    }
    let base = base_domain(domain);
    if base.is_empty() || !base.contains('.') || base.contains('*') {
        anyhow::bail!("tls.domain must look like *.example.com or example.com: {domain}");
    }
    if tls.api_subdomain.trim().is_empty() || tls.api_subdomain.contains('.') {
        anyhow::bail!("tls.api_subdomain must be a single DNS label");
    }
    if tls.upstream_port == 0 {
        anyhow::bail!("tls.upstream_port must be greater than 0");
    }
    if tls.skip_cert_generation {
        return Ok(());
    }
    if !tls.email.contains('@') {
        anyhow::bail!("tls.email must be a contact email address");
    }
    if tls
        .dns_api_token
        .as_deref()
        .is_none_or(|token| token.trim().is_empty())
    {
        anyhow::bail!("tls.dns_api_token is required to issue a certificate");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn settings() -> Settings {
        let mut settings = Settings::new(Some(PathBuf::from("does-not-exist.toml"))).unwrap();
        settings.repo.url = "git@github.com:acme/widgets.git".to_string();
        settings.tls.domain = "*.example.com".to_string();
        settings.tls.email = "ops@example.com".to_string();
        settings.tls.dns_api_token = Some("token".to_string());
        settings
    }

    #[test]
    fn test_valid_settings_pass() {
        let settings = settings();
        settings.validate_repo().unwrap();
        settings.validate_tls().unwrap();
    }

    #[test]
    fn test_validate_rejects_zero_retry_attempts() {
        let mut settings = settings();
        settings.retry.attempts = 0;
        let err = settings.validate_common().unwrap_err();
        assert!(err.to_string().contains("retry.attempts"));
    }

    #[test]
    fn test_validate_rejects_empty_tool() {
        let mut settings = settings();
        settings.tools.git = " ".to_string();
        let err = settings.validate_repo().unwrap_err();
        assert!(err.to_string().contains("tools.git"));
    }

    #[test]
    fn test_validate_repo_rejects_https_url() {
        let mut settings = settings();
        settings.repo.url = "https://github.com/acme/widgets.git".to_string();
        let err = settings.validate_repo().unwrap_err();
        assert!(err.to_string().contains("Invalid repository URL"));
    }

    #[test]
    fn test_validate_repo_rejects_zero_timeout() {
        let mut settings = settings();
        settings.repo.fetch_timeout = std::time::Duration::ZERO;
        let err = settings.validate_repo().unwrap_err();
        assert!(err.to_string().contains("repo.fetch_timeout"));
    }

    #[test]
    fn test_validate_tls_requires_token_unless_skipping_issuance() {
        let mut settings = settings();
        settings.tls.dns_api_token = None;
        let err = settings.validate_tls().unwrap_err();
        assert!(err.to_string().contains("dns_api_token"));

        settings.tls.skip_cert_generation = true;
        settings.validate_tls().unwrap();
    }

    #[test]
    fn test_validate_tls_rejects_bare_label() {
        let mut settings = settings();
        settings.tls.domain = "*.localhost".to_string();
        let err = settings.validate_tls().unwrap_err();
        assert!(err.to_string().contains("tls.domain"));
    }

    #[test]
    fn test_validate_tls_rejects_dotted_subdomain() {
        let mut settings = settings();
        settings.tls.api_subdomain = "api.v2".to_string();
        let err = settings.validate_tls().unwrap_err();
        assert!(err.to_string().contains("api_subdomain"));
    }
}

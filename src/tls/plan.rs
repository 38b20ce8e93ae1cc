use std::path::PathBuf;

use crate::config::TlsSettings;

const WILDCARD_PREFIX: &str = "*.";
pub const DEFAULT_SITE: &str = "default";

/// Domain without a leading `*.`.
pub fn base_domain(domain: &str) -> &str {
    let domain = domain.trim();
    domain.strip_prefix(WILDCARD_PREFIX).unwrap_or(domain)
}

/// Every path and name the wildcard-TLS workflow touches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPlan {
    pub base_domain: String,
    pub wildcard_domain: String,
    pub api_host: String,
    pub upstream_port: u16,
    pub fullchain: PathBuf,
    pub privkey: PathBuf,
    pub credentials_dir: PathBuf,
    pub credentials_file: PathBuf,
    pub hook_script: PathBuf,
    pub ssl_params: PathBuf,
    pub sites_available: PathBuf,
    pub sites_enabled: PathBuf,
    pub web_root: PathBuf,
    pub renewal_log: PathBuf,
}

impl TlsPlan {
    pub fn new(tls: &TlsSettings) -> Self {
        let base = base_domain(&tls.domain).to_string();
        let live = tls.letsencrypt_dir.join("live").join(&base);
        let credentials_dir = tls.letsencrypt_dir.join("cloudflare");
        Self {
            wildcard_domain: format!("{WILDCARD_PREFIX}{base}"),
            api_host: format!("{}.{base}", tls.api_subdomain.trim()),
            upstream_port: tls.upstream_port,
            fullchain: live.join("fullchain.pem"),
            privkey: live.join("privkey.pem"),
            credentials_file: credentials_dir.join("credentials.ini"),
            credentials_dir,
            hook_script: tls
                .letsencrypt_dir
                .join("renewal-hooks")
                .join("deploy")
                .join("nginx-reload.sh"),
            ssl_params: tls.nginx_dir.join("conf.d").join("ssl-params.conf"),
            sites_available: tls.nginx_dir.join("sites-available"),
            sites_enabled: tls.nginx_dir.join("sites-enabled"),
            web_root: tls.web_root.clone(),
            renewal_log: tls.renewal_log.clone(),
            base_domain: base,
        }
    }

    pub fn api_site(&self) -> PathBuf {
        self.sites_available.join(&self.api_host)
    }

    pub fn default_site(&self) -> PathBuf {
        self.sites_available.join(DEFAULT_SITE)
    }

    /// Names the certificate must cover.
    pub fn certificate_names(&self) -> [&str; 2] {
        [&self.base_domain, &self.wildcard_domain]
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::Settings;

    #[test]
    fn test_base_domain() {
        assert_eq!(base_domain("*.example.com"), "example.com");
        assert_eq!(base_domain("example.com"), "example.com");
        assert_eq!(base_domain(" *.a.b.c "), "a.b.c");
    }

    #[test]
    fn test_plan_paths() {
        let mut settings = Settings::new(Some(PathBuf::from("does-not-exist.toml"))).unwrap();
        settings.tls.domain = "*.example.com".to_string();

        let plan = TlsPlan::new(&settings.tls);

        assert_eq!(plan.base_domain, "example.com");
        assert_eq!(plan.api_host, "api.example.com");
        assert_eq!(
            plan.fullchain,
            PathBuf::from("/etc/letsencrypt/live/example.com/fullchain.pem")
        );
        assert_eq!(
            plan.credentials_file,
            PathBuf::from("/etc/letsencrypt/cloudflare/credentials.ini")
        );
        assert_eq!(
            plan.hook_script,
            PathBuf::from("/etc/letsencrypt/renewal-hooks/deploy/nginx-reload.sh")
        );
        assert_eq!(
            plan.api_site(),
            PathBuf::from("/etc/nginx/sites-available/api.example.com")
        );
        assert_eq!(plan.certificate_names(), ["example.com", "*.example.com"]);
    }
}

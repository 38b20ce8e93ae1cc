#[cfg(unix)]
mod support;

#[cfg(unix)]
mod unix {
    use std::fs;
    use std::path::PathBuf;

    use super::support::{self, Sandbox};

    const TOKEN: &str = "cf-token-abcdef123456";

    struct TlsFixture {
        sandbox: Sandbox,
        config: String,
    }

    impl TlsFixture {
        fn new(skip_cert_generation: bool) -> Self {
            let sandbox = Sandbox::new().expect("sandbox");
            let bin = sandbox.bin();
            let calls = sandbox.path().join("calls.log");
            for tool in ["apt-get", "systemctl"] {
                sandbox
                    .write_tool(tool, &format!("echo \"{tool} $*\" >> '{}'", calls.display()))
                    .expect("fake tool");
            }
            sandbox
                .write_tool(
                    "nginx",
                    "echo 'nginx: the configuration file syntax is ok' >&2\n\
                     echo 'nginx: configuration file test is successful' >&2",
                )
                .expect("fake nginx");

            let config = format!(
                r#"
[tools]
certbot = "{certbot}"
nginx = "{nginx}"
systemctl = "{systemctl}"
apt_get = "{apt_get}"

[tls]
domain = "*.example.com"
email = "ops@example.com"
dns_api_token = "{TOKEN}"
upstream_port = 9000
letsencrypt_dir = "{letsencrypt}"
nginx_dir = "{nginx_dir}"
web_root = "{web_root}"
log_dir = "{log_dir}"
renewal_log = "{renewal_log}"
require_root = false
skip_cert_generation = {skip_cert_generation}
packages = ["nginx", "certbot"]
"#,
                certbot = bin.join("certbot").display(),
                nginx = bin.join("nginx").display(),
                systemctl = bin.join("systemctl").display(),
                apt_get = bin.join("apt-get").display(),
                letsencrypt = sandbox.path().join("letsencrypt").display(),
                nginx_dir = sandbox.path().join("nginx").display(),
                web_root = sandbox.path().join("www").display(),
                log_dir = sandbox.path().join("logs").display(),
                renewal_log = sandbox.path().join("renewal.log").display(),
            );
            let config = sandbox
                .write_config(&config)
                .expect("config")
                .display()
                .to_string();
            Self { sandbox, config }
        }

        fn path(&self, relative: &str) -> PathBuf {
            self.sandbox.path().join(relative)
        }

        fn live_dir(&self) -> PathBuf {
            self.path("letsencrypt/live/example.com")
        }

        fn place_certificate(&self, names: &[&str]) {
            fs::create_dir_all(self.live_dir()).expect("live dir");
            fs::write(self.live_dir().join("fullchain.pem"), support::cert_pem(names))
                .expect("fullchain");
            fs::write(self.live_dir().join("privkey.pem"), "private\n").expect("privkey");
        }

        fn run(&self, extra: &[&str]) -> (String, String, i32) {
            let mut args = vec!["--config", self.config.as_str(), "wildcard-tls"];
            args.extend_from_slice(extra);
            self.sandbox.run(&args, &[])
        }

        fn calls(&self) -> String {
            fs::read_to_string(self.path("calls.log")).unwrap_or_default()
        }
    }

    #[test]
    fn test_full_run_with_fake_certbot() {
        let fixture = TlsFixture::new(false);
        let staged = fixture.path("staged.pem");
        fs::write(&staged, support::cert_pem(&["example.com", "*.example.com"])).expect("staged");
        let live = fixture.live_dir();
        let certbot_args = fixture.path("certbot.args");
        fixture
            .sandbox
            .write_tool(
                "certbot",
                &format!(
                    "echo \"$*\" > '{args}'\nmkdir -p '{live}'\n\
                     cp '{staged}' '{live}/fullchain.pem'\ncp '{staged}' '{live}/privkey.pem'",
                    args = certbot_args.display(),
                    live = live.display(),
                    staged = staged.display(),
                ),
            )
            .expect("fake certbot");

        let (stdout, stderr, code) = fixture.run(&[]);

        assert_eq!(code, 0, "stdout: {stdout}\nstderr: {stderr}");
        assert!(stdout.contains("wildcard-tls summary"), "{stdout}");
        assert!(stdout.contains("- api host: https://api.example.com"), "{stdout}");
        assert!(stdout.contains("- dns api token: ****3456"), "{stdout}");
        assert!(!stdout.contains(TOKEN), "{stdout}");

        let calls = fixture.calls();
        assert!(calls.contains("apt-get update -y"), "{calls}");
        assert!(calls.contains("apt-get install -y nginx certbot"), "{calls}");
        assert!(calls.contains("systemctl reload nginx"), "{calls}");
        assert!(calls.contains("systemctl status nginx --no-pager"), "{calls}");

        let certbot = fs::read_to_string(certbot_args).expect("certbot args");
        assert!(certbot.contains("certonly --dns-cloudflare"), "{certbot}");
        assert!(certbot.contains("-d example.com -d *.example.com"), "{certbot}");

        let credentials = fixture.path("letsencrypt/cloudflare/credentials.ini");
        assert_eq!(support::mode(&credentials), 0o600);
        assert!(fs::read_to_string(&credentials).expect("credentials").contains(TOKEN));

        let hook = fixture.path("letsencrypt/renewal-hooks/deploy/nginx-reload.sh");
        assert_eq!(support::mode(&hook), 0o755);
        let renewal_log = fs::read_to_string(fixture.path("renewal.log")).expect("renewal log");
        assert!(renewal_log.contains("Renewal hook script installed for example.com"));

        let api_site = fixture.path("nginx/sites-available/api.example.com");
        let site = fs::read_to_string(&api_site).expect("api site");
        assert!(site.contains("server 127.0.0.1:9000;"), "{site}");
        let link = fixture.path("nginx/sites-enabled/api.example.com");
        assert_eq!(fs::read_link(link).expect("symlink"), api_site);
        assert!(fixture.path("nginx/sites-enabled/default").is_symlink());
        assert!(fixture.path("www/index.html").is_file());

        let logs: Vec<_> = fs::read_dir(fixture.path("logs"))
            .expect("log dir")
            .flatten()
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        assert!(
            logs.iter().any(|name| name.starts_with("letsencrypt-automation")),
            "{logs:?}"
        );
    }

    #[test]
    fn test_skip_flags_reuse_existing_certificate() {
        let fixture = TlsFixture::new(true);
        fixture.place_certificate(&["example.com", "*.example.com"]);

        let (stdout, stderr, code) =
            fixture.run(&["--skip-packages", "--no-log-file", "--show-secrets"]);

        assert_eq!(code, 0, "stdout: {stdout}\nstderr: {stderr}");
        assert!(stdout.contains(&format!("- dns api token: {TOKEN}")), "{stdout}");
        assert!(!fixture.calls().contains("apt-get"));
        assert!(!fixture.path("logs").exists());
    }

    #[test]
    fn test_missing_certificate_fails_certificate_phase() {
        let fixture = TlsFixture::new(true);

        let (stdout, _, code) = fixture.run(&["--skip-packages", "--no-log-file"]);

        assert_eq!(code, 1);
        assert!(
            stdout.contains("wildcard-tls failed during: Generating wildcard certificate"),
            "{stdout}"
        );
        assert!(!fixture.path("nginx/sites-available").exists());
    }

    #[test]
    fn test_certificate_without_wildcard_fails_verification() {
        let fixture = TlsFixture::new(true);
        fixture.place_certificate(&["example.com"]);

        let (stdout, _, code) = fixture.run(&["--skip-packages", "--no-log-file"]);

        assert_eq!(code, 1);
        assert!(
            stdout.contains(
                "wildcard-tls failed during: Testing SSL certificate and Nginx configuration"
            ),
            "{stdout}"
        );
    }

    #[test]
    fn test_nginx_config_failure_stops_before_reload() {
        let fixture = TlsFixture::new(true);
        fixture.place_certificate(&["example.com", "*.example.com"]);
        fixture
            .sandbox
            .write_tool("nginx", "echo 'nginx: [emerg] unknown directive' >&2\nexit 1")
            .expect("fake nginx");

        let (stdout, _, code) = fixture.run(&["--skip-packages", "--no-log-file"]);

        assert_eq!(code, 1);
        assert!(
            stdout.contains("wildcard-tls failed during: Configuring Nginx as reverse proxy"),
            "{stdout}"
        );
        assert!(!fixture.calls().contains("reload"));
    }

    #[test]
    fn test_missing_token_is_rejected_before_any_phase() {
        let fixture = TlsFixture::new(false);
        let config = fs::read_to_string(&fixture.config).expect("config");
        fs::write(
            &fixture.config,
            config.replace(&format!("dns_api_token = \"{TOKEN}\"\n"), ""),
        )
        .expect("rewrite config");

        let (_, stderr, code) = fixture.run(&["--no-log-file"]);

        assert_eq!(code, 1);
        assert!(stderr.contains("hostprep error"), "{stderr}");
        assert!(stderr.contains("dns_api_token"), "{stderr}");
    }
}

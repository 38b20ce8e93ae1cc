use std::path::Path;

use super::plan::TlsPlan;

pub(crate) fn build_credentials(token: &str) -> String {
    format!(
        "# Cloudflare API token used for DNS-01 challenges\ndns_cloudflare_api_token = {token}\n"
    )
}

pub(crate) fn build_ssl_params() -> String {
    r#"# Shared TLS session and header settings
ssl_session_cache shared:SSL:10m;
ssl_session_timeout 1d;
ssl_session_tickets off;
ssl_stapling on;
ssl_stapling_verify on;
resolver 8.8.8.8 8.8.4.4 valid=300s;
resolver_timeout 5s;
add_header X-Frame-Options DENY;
add_header X-Content-Type-Options nosniff;
add_header X-XSS-Protection "1; mode=block";
"#
    .to_string()
}

pub(crate) fn build_api_site(plan: &TlsPlan) -> String {
    let host = &plan.api_host;
    let port = plan.upstream_port;
    let fullchain = plan.fullchain.display();
    let privkey = plan.privkey.display();
    let ssl_params = plan.ssl_params.display();
    let web_root = plan.web_root.display();
    format!(
        r#"upstream api_backend {{
    server 127.0.0.1:{port};
    keepalive 32;
}}

server {{
    listen 80;
    server_name {host};

    access_log /var/log/nginx/{host}_access.log;
    error_log /var/log/nginx/{host}_error.log;

    location / {{
        return 301 https://$host$request_uri;
    }}
}}

server {{
    listen 443 ssl http2;
    server_name {host};

    access_log /var/log/nginx/{host}_access.log;
    error_log /var/log/nginx/{host}_error.log;

    ssl_certificate {fullchain};
    ssl_certificate_key {privkey};
    include {ssl_params};

    # 6 months
    add_header Strict-Transport-Security "max-age=15768000; includeSubDomains" always;

    location / {{
        proxy_pass http://api_backend;
        proxy_http_version 1.1;
        proxy_set_header Upgrade $http_upgrade;
        proxy_set_header Connection 'upgrade';
        proxy_set_header Host $host;
        proxy_set_header X-Real-IP $remote_addr;
        proxy_set_header X-Forwarded-For $proxy_add_x_forwarded_for;
        proxy_set_header X-Forwarded-Proto $scheme;
        proxy_cache_bypass $http_upgrade;
        proxy_buffering off;
        proxy_read_timeout 300s;
        proxy_connect_timeout 75s;

        proxy_intercept_errors on;
        error_page 500 502 503 504 /50x.html;
    }}

    location = /50x.html {{
        root {web_root};
    }}
}}
"#
    )
}

pub(crate) fn build_default_site(plan: &TlsPlan) -> String {
    let base = &plan.base_domain;
    let wildcard = &plan.wildcard_domain;
    let fullchain = plan.fullchain.display();
    let privkey = plan.privkey.display();
    let ssl_params = plan.ssl_params.display();
    let web_root = plan.web_root.display();
    format!(
        r#"server {{
    listen 80 default_server;
    server_name {base} {wildcard};

    access_log /var/log/nginx/default_access.log;
    error_log /var/log/nginx/default_error.log;

    location / {{
        return 301 https://$host$request_uri;
    }}
}}

server {{
    listen 443 ssl http2 default_server;
    server_name {base} {wildcard};

    access_log /var/log/nginx/default_ssl_access.log;
    error_log /var/log/nginx/default_ssl_error.log;

    ssl_certificate {fullchain};
    ssl_certificate_key {privkey};
    include {ssl_params};

    add_header Strict-Transport-Security "max-age=15768000; includeSubDomains" always;

    location / {{
        root {web_root};
        index index.html;
    }}
}}
"#
    )
}

/// Deploy hook run by certbot after each renewal.
pub(crate) fn build_renewal_hook(
    base_domain: &str,
    renewal_log: &Path,
    nginx: &str,
    systemctl: &str,
) -> String {
    let log = renewal_log.display();
    format!(
        r#"#!/bin/sh
# Reloads nginx after a certificate renewal for {base_domain}.
LOG="{log}"

echo "[$(date)] Certificate renewal completed for {base_domain}" >> "$LOG"

if ! {nginx} -t 2>/dev/null; then
    echo "[$(date)] ERROR: nginx configuration is invalid; manual intervention required" >> "$LOG"
    exit 1
fi

{systemctl} reload nginx

if {systemctl} is-active --quiet nginx; then
    echo "[$(date)] nginx reloaded after certificate renewal" >> "$LOG"
    exit 0
fi

echo "[$(date)] ERROR: nginx is not active after reload; restarting" >> "$LOG"
{systemctl} restart nginx
if {systemctl} is-active --quiet nginx; then
    echo "[$(date)] nginx restarted after failed reload" >> "$LOG"
else
    echo "[$(date)] CRITICAL: nginx failed to restart after certificate renewal" >> "$LOG"
    exit 1
fi
"#
    )
}

pub(crate) fn build_index_page(base_domain: &str, generated_at: &str) -> String {
    format!(
        r"<!DOCTYPE html>
<html>
<head>
    <title>SSL Test for {base_domain}</title>
</head>
<body>
    <h1>SSL Certificate Test</h1>
    <p>This site is secured with a Let's Encrypt wildcard certificate.</p>
    <p>Domain: {base_domain}</p>
    <p>Generated on: {generated_at}</p>
</body>
</html>
"
    )
}

pub(crate) fn build_error_page(base_domain: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>Server Error - {base_domain}</title>
    <style>
        body {{ font-family: Arial, sans-serif; color: #333; text-align: center; padding: 50px; }}
        .error-container {{ max-width: 600px; margin: 0 auto; }}
        h1 {{ color: #e74c3c; }}
    </style>
</head>
<body>
    <div class="error-container">
        <h1>Server Error</h1>
        <p>Sorry, the server encountered an error and was unable to complete your request.</p>
        <p>Please try again later.</p>
    </div>
</body>
</html>
"#
    )
}

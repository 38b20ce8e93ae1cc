use std::path::PathBuf;

use anyhow::{Context, Result};
use hostprep::config::TlsSettings;
use hostprep::logging::{self, TLS_LOG_PREFIX};
use hostprep::phases::PhaseFailure;
use hostprep::tls;
use hostprep::Settings;
use tracing::{error, info};

use crate::cli::args::WildcardTlsArgs;
use crate::cli::output::{print_tls_failure, print_tls_summary};

const EXIT_FAILURE: i32 = 1;

pub(crate) fn run_wildcard_tls(
    config: Option<PathBuf>,
    verbose: bool,
    args: &WildcardTlsArgs,
) -> Result<i32> {
    let mut settings = Settings::new(config).context("Failed to load configuration")?;
    apply_overrides(&mut settings.tls, args);
    settings.validate_tls()?;

    let log_file = if args.no_log_file {
        None
    } else {
        Some(logging::prepare_log_dir(&settings.tls.log_dir, TLS_LOG_PREFIX)?)
    };
    logging::init(verbose, log_file.as_deref())?;
    if let Some(path) = &log_file {
        info!("Logging to {}", path.display());
    }
    if verbose {
        logging::log_environment();
    }

    let runtime = tokio::runtime::Runtime::new()
        .context("Failed to initialize async runtime for wildcard-tls")?;
    match runtime.block_on(tls::run_wildcard_tls(&settings)) {
        Ok(report) => {
            info!("All phases completed");
            info!("Next steps:");
            info!("  - point DNS for {} at this host", report.plan.wildcard_domain);
            info!(
                "  - start the API backend on 127.0.0.1:{}",
                report.plan.upstream_port
            );
            info!("  - test renewal with: certbot renew --dry-run");
            info!("  - renewal log: {}", report.plan.renewal_log.display());
            print_tls_summary(
                &report,
                settings.tls.dns_api_token.as_deref(),
                args.show_secrets,
                log_file.as_deref(),
            );
            Ok(0)
        }
        Err(err) => {
            let phase = err.downcast_ref::<PhaseFailure>().map(|failure| failure.phase);
            error!("{err:#}");
            error!("Setup did not complete");
            if let Some(path) = &log_file {
                error!("See {} for details", path.display());
            }
            print_tls_failure(phase, log_file.as_deref());
            Ok(EXIT_FAILURE)
        }
    }
}

fn apply_overrides(tls: &mut TlsSettings, args: &WildcardTlsArgs) {
    if let Some(domain) = &args.domain {
        tls.domain.clone_from(domain);
    }
    if let Some(email) = &args.email {
        tls.email.clone_from(email);
    }
    if let Some(token) = &args.dns_api_token {
        tls.dns_api_token = Some(token.clone());
    }
    if let Some(subdomain) = &args.api_subdomain {
        tls.api_subdomain.clone_from(subdomain);
    }
    if let Some(port) = args.upstream_port {
        tls.upstream_port = port;
    }
    if let Some(seconds) = args.propagation_seconds {
        tls.propagation_seconds = Some(seconds);
    }
    if args.skip_packages {
        tls.skip_packages = true;
    }
    if let Some(skip) = args.skip_cert_generation {
        tls.skip_cert_generation = skip;
    }
    if let Some(dir) = &args.log_dir {
        tls.log_dir.clone_from(dir);
    }
}

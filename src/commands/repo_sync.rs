use std::path::PathBuf;

use anyhow::{Context, Result};
use hostprep::config::RepoSettings;
use hostprep::repo::{self, EXIT_OK};
use hostprep::{Settings, logging};
use tracing::{error, info, warn};

use crate::cli::args::RepoSyncArgs;
use crate::cli::output::{print_sync_failure, print_sync_summary};

pub(crate) fn run_repo_sync(
    config: Option<PathBuf>,
    verbose: bool,
    args: &RepoSyncArgs,
) -> Result<i32> {
    let mut settings = Settings::new(config).context("Failed to load configuration")?;
    apply_overrides(&mut settings.repo, args);
    settings.validate_repo()?;

    let log_file = if args.no_log_file {
        None
    } else {
        logging::first_writable(&logging::repo_sync_candidates())
    };
    logging::init(verbose, log_file.as_deref())?;
    match &log_file {
        Some(path) => info!("Logging to {}", path.display()),
        None if !args.no_log_file => warn!("No writable log file location; logging to stdout only"),
        None => {}
    }
    if verbose {
        logging::log_environment();
    }

    let runtime = tokio::runtime::Runtime::new()
        .context("Failed to initialize async runtime for repo-sync")?;
    match runtime.block_on(repo::run_sync(&settings)) {
        Ok(report) => {
            info!("Repository sync completed: {}", report.dest.display());
            print_sync_summary(&report, log_file.as_deref());
            Ok(EXIT_OK)
        }
        Err(err) => {
            let code = err.exit_code();
            let err = anyhow::Error::from(err);
            error!("{err:#}");
            error!("Repository sync failed with exit code {code}");
            print_sync_failure(code, log_file.as_deref());
            Ok(code)
        }
    }
}

fn apply_overrides(repo: &mut RepoSettings, args: &RepoSyncArgs) {
    if let Some(url) = &args.repo {
        repo.url.clone_from(url);
    }
    if let Some(dir) = &args.ssh_dir {
        repo.ssh_keys_dir.clone_from(dir);
    }
    if let Some(dir) = &args.dest_dir {
        repo.dest_dir.clone_from(dir);
    }
    if args.force_clone {
        repo.force_clone = true;
    }
    if args.skip_pull {
        repo.skip_pull = true;
    }
    if let Some(strict) = args.strict_host_checking {
        repo.strict_host_checking = strict;
    }
    if let Some(skip) = args.skip_clone {
        repo.skip_clone = skip;
    }
    if let Some(max) = args.max_backups {
        repo.max_backups = max;
    }
}

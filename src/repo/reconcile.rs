use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::fs;
use tracing::{info, warn};

use super::backup::{BACKUP_MARKER, OLD_MARKER, move_aside, rotate_backups};
use super::git::Git;
use crate::utils::{human_stamp, retry_with_backoff};

pub const SIMULATED_CLONE_FILE: &str = "SIMULATED_CLONE.txt";

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("Failed to clone repository")]
    Clone(#[source] anyhow::Error),
    #[error("Failed to update repository")]
    Update(#[source] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub url: String,
    pub repo_name: String,
    pub dest: PathBuf,
    pub git_program: String,
    pub ssh_command: Option<String>,
    pub force_clone: bool,
    pub skip_pull: bool,
    pub skip_clone: bool,
    pub max_backups: u32,
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub fetch_timeout: Duration,
    pub health_timeout: Duration,
}

impl ReconcileOptions {
    fn git(&self) -> Git {
        Git::new(&self.git_program, &self.dest).with_ssh_command(self.ssh_command.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Simulated,
    Unchanged,
    Updated { branch: String },
    Reset { branch: String },
    Cloned { branch: String, previous: Option<PathBuf> },
}

/// Brings `dest` in line with the remote: update a matching checkout,
/// back up and re-clone a mismatched one, clone when absent.
///
/// # Errors
/// Returns `ReconcileError::Update` when switching branches fails and
/// `ReconcileError::Clone` for every other failure.
pub async fn reconcile(opts: &ReconcileOptions) -> Result<ReconcileOutcome, ReconcileError> {
    if let Some(parent) = opts.dest.parent() {
        fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))
            .map_err(ReconcileError::Clone)?;
    }

    if opts.skip_clone {
        return simulate(opts).await.map_err(ReconcileError::Clone);
    }

    let has_checkout = fs::try_exists(opts.dest.join(".git"))
        .await
        .unwrap_or(false);
    if has_checkout && !opts.force_clone {
        return update_existing(opts).await;
    }
    if opts.force_clone {
        info!("Force clone requested");
    }
    fresh_clone(opts).await
}

async fn simulate(opts: &ReconcileOptions) -> anyhow::Result<ReconcileOutcome> {
    if fs::try_exists(&opts.dest).await.unwrap_or(false) {
        info!("Skip-clone mode: {} already exists", opts.dest.display());
        return Ok(ReconcileOutcome::Simulated);
    }
    fs::create_dir_all(&opts.dest)
        .await
        .with_context(|| format!("Failed to create {}", opts.dest.display()))?;
    let marker = opts.dest.join(SIMULATED_CLONE_FILE);
    let contents = format!(
        "Simulated clone of {} at {}\n",
        opts.url,
        human_stamp(OffsetDateTime::now_utc())
    );
    fs::write(&marker, contents)
        .await
        .with_context(|| format!("Failed to write {}", marker.display()))?;
    info!("Skip-clone mode: wrote {}", marker.display());
    Ok(ReconcileOutcome::Simulated)
}

async fn update_existing(opts: &ReconcileOptions) -> Result<ReconcileOutcome, ReconcileError> {
    let git = opts.git();
    info!("Existing repository found at {}", opts.dest.display());

    if !is_healthy(&git, opts.health_timeout).await {
        warn!("Repository health check failed; trying to recover");
    }

    let remotes = match git.run(&["remote", "-v"]).await {
        Ok(output) if output.success() => output.stdout,
        Ok(_) | Err(_) => {
            warn!("Could not read remotes; re-cloning");
            return fresh_clone(opts).await;
        }
    };
    if !remotes.contains(&opts.url) && !remotes.contains(&opts.repo_name) {
        warn!("Existing checkout points at a different remote; backing it up");
        let backup = move_aside(&opts.dest, BACKUP_MARKER)
            .await
            .map_err(ReconcileError::Clone)?;
        rotate_backups(&opts.dest, opts.max_backups)
            .await
            .map_err(ReconcileError::Clone)?;
        return match fresh_clone(opts).await? {
            ReconcileOutcome::Cloned { branch, .. } => Ok(ReconcileOutcome::Cloned {
                branch,
                previous: Some(backup),
            }),
            other => Ok(other),
        };
    }

    if opts.skip_pull {
        info!("Skipping pull as requested");
        return Ok(ReconcileOutcome::Unchanged);
    }

    if let Err(err) = git
        .run_with_timeout(&["fetch", "--all", "--tags", "--prune", "--quiet"], opts.fetch_timeout)
        .await
    {
        warn!("Fetch failed, continuing with local refs: {err:#}");
    }

    let branch = select_branch(&git).await.map_err(ReconcileError::Update)?;

    let pull = git
        .run_with_timeout(&["pull", "--ff-only", "origin", &branch], opts.fetch_timeout)
        .await;
    if pull.is_ok() {
        info!("Updated {branch} with a fast-forward pull");
        return Ok(ReconcileOutcome::Updated { branch });
    }
    warn!("Fast-forward pull failed; resetting to origin/{branch}");

    let target = format!("origin/{branch}");
    if git.run_checked(&["reset", "--hard", &target]).await.is_ok() {
        info!("Reset {branch} to {target}");
        return Ok(ReconcileOutcome::Reset { branch });
    }
    warn!("Reset failed; re-cloning");
    fresh_clone(opts).await
}

/// Picks the branch to update, checking out the default branch when HEAD
/// is detached or the current branch has no remote counterpart.
async fn select_branch(git: &Git) -> anyhow::Result<String> {
    let default = git.default_branch().await?;
    let branch = match git.current_branch().await? {
        Some(branch) => {
            if git.has_remote_ref(&branch).await? {
                return Ok(branch);
            }
            warn!("Branch {branch} has no remote counterpart; using {default}");
            default
        }
        None => {
            warn!("Detached HEAD; checking out {default}");
            default
        }
    };
    git.run_checked(&["checkout", &branch])
        .await
        .with_context(|| format!("Failed to check out {branch}"))?;
    Ok(branch)
}

async fn is_healthy(git: &Git, timeout: Duration) -> bool {
    let checks: [&[&str]; 3] = [
        &["status", "--porcelain"],
        &["remote", "-v"],
        &["fetch", "--quiet", "--dry-run", "origin"],
    ];
    for args in checks {
        if let Err(err) = git.run_with_timeout(args, timeout).await {
            warn!("Health check '{}' failed: {err:#}", args.join(" "));
            return false;
        }
    }
    true
}

/// Clones into `opts.dest`, moving a non-empty directory aside first.
///
/// # Errors
/// Returns `ReconcileError::Clone` on any failure.
pub async fn fresh_clone(opts: &ReconcileOptions) -> Result<ReconcileOutcome, ReconcileError> {
    clone_into(opts).await.map_err(ReconcileError::Clone)
}

async fn clone_into(opts: &ReconcileOptions) -> anyhow::Result<ReconcileOutcome> {
    let dest = &opts.dest;
    let previous = clear_destination(dest, opts.max_backups).await?;
    fs::create_dir_all(dest)
        .await
        .with_context(|| format!("Failed to create {}", dest.display()))?;
    info!("Cloning {} into {}", opts.url, dest.display());

    let git = opts.git();
    git.run_checked(&["init", "--quiet"]).await?;
    let has_origin = git.run(&["remote", "get-url", "origin"]).await?.success();
    let remote_verb = if has_origin { "set-url" } else { "add" };
    git.run_checked(&["remote", remote_verb, "origin", &opts.url])
        .await?;

    retry_with_backoff(opts.retry_attempts, opts.retry_delay, |attempt, total| {
        let git = git.clone();
        let timeout = opts.fetch_timeout;
        async move {
            info!("Fetching from origin (attempt {attempt}/{total})");
            git.run_with_timeout(&["fetch", "--all"], timeout).await
        }
    })
    .await
    .context("Failed to fetch from origin")?;

    let branch = git.remote_head_branch(opts.fetch_timeout).await?;
    check_out_branch(&git, &branch).await?;

    if !fs::try_exists(dest.join(".git")).await.unwrap_or(false) {
        anyhow::bail!("Clone finished but {} has no .git directory", dest.display());
    }
    info!("Cloned {} on branch {branch}", opts.url);
    Ok(ReconcileOutcome::Cloned { branch, previous })
}

async fn check_out_branch(git: &Git, branch: &str) -> anyhow::Result<()> {
    let tracking = format!("origin/{branch}");
    let output = git.run(&["checkout", "-b", branch, &tracking]).await?;
    if output.success() {
        return Ok(());
    }
    if !output.stderr.contains("already exists") {
        anyhow::bail!(
            "Failed to check out {branch}: {}",
            output.stderr.trim()
        );
    }
    let switched = git.run_checked(&["checkout", branch]).await.is_ok()
        && git.run_checked(&["pull", "origin", branch]).await.is_ok();
    if !switched {
        warn!("Falling back to a forced checkout of {branch}");
        git.run_checked(&["checkout", "-f", branch]).await?;
    }
    Ok(())
}

/// Makes room for a fresh clone and returns where a previous directory
/// was moved.
async fn clear_destination(dest: &Path, max_backups: u32) -> anyhow::Result<Option<PathBuf>> {
    let metadata = match fs::symlink_metadata(dest).await {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("Failed to inspect {}", dest.display()));
        }
    };
    if !metadata.is_dir() {
        warn!("Removing file in the way of the clone: {}", dest.display());
        fs::remove_file(dest)
            .await
            .with_context(|| format!("Failed to remove {}", dest.display()))?;
        return Ok(None);
    }
    let mut entries = fs::read_dir(dest)
        .await
        .with_context(|| format!("Failed to list {}", dest.display()))?;
    if entries.next_entry().await?.is_none() {
        return Ok(None);
    }
    let moved = move_aside(dest, OLD_MARKER).await?;
    rotate_backups(dest, max_backups).await?;
    Ok(Some(moved))
}

#[cfg(test)]
mod tests {
    use std::process::Command;

    use tempfile::{TempDir, tempdir};

    use super::*;

    fn git_available() -> bool {
        Command::new("git")
            .arg("--version")
            .output()
            .is_ok_and(|output| output.status.success())
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .arg("-C")
            .arg(dir)
            .args([
                "-c",
                "user.name=hostprep",
                "-c",
                "user.email=hostprep@example.com",
            ])
            .args(args)
            .output()
            .unwrap();
        assert!(
            status.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&status.stderr)
        );
    }

    /// Work tree plus a bare `upstream.git` cloned from it.
    fn upstream() -> (TempDir, PathBuf, PathBuf) {
        let root = tempdir().unwrap();
        let work = root.path().join("work");
        std::fs::create_dir(&work).unwrap();
        git(&work, &["init", "--quiet"]);
        git(&work, &["checkout", "--quiet", "-b", "main"]);
        std::fs::write(work.join("README.md"), "v1\n").unwrap();
        git(&work, &["add", "README.md"]);
        git(&work, &["commit", "--quiet", "-m", "initial"]);
        let bare = root.path().join("upstream.git");
        git(
            root.path(),
            &["clone", "--quiet", "--bare", "work", "upstream.git"],
        );
        (root, work, bare)
    }

    fn git_stdout(dir: &Path, args: &[&str]) -> String {
        let output = Command::new("git").arg("-C").arg(dir).args(args).output().unwrap();
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    fn push_readme(work: &Path, bare: &Path, contents: &str) {
        std::fs::write(work.join("README.md"), contents).unwrap();
        git(work, &["commit", "--quiet", "-am", contents.trim()]);
        git(work, &["push", "--quiet", bare.to_str().unwrap(), "main"]);
    }

    fn options(url: &Path, dest: PathBuf) -> ReconcileOptions {
        ReconcileOptions {
            url: url.to_string_lossy().into_owned(),
            repo_name: "upstream".to_string(),
            dest,
            git_program: "git".to_string(),
            ssh_command: None,
            force_clone: false,
            skip_pull: false,
            skip_clone: false,
            max_backups: 3,
            retry_attempts: 2,
            retry_delay: Duration::from_millis(10),
            fetch_timeout: Duration::from_secs(60),
            health_timeout: Duration::from_secs(30),
        }
    }

    #[tokio::test]
    async fn test_skip_clone_writes_marker() {
        let dir = tempdir().unwrap();
        let mut opts = options(
            Path::new("git@github.com:acme/widgets.git"),
            dir.path().join("srv").join("app"),
        );
        opts.skip_clone = true;

        let outcome = reconcile(&opts).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Simulated);
        let marker = std::fs::read_to_string(opts.dest.join(SIMULATED_CLONE_FILE)).unwrap();
        assert!(marker.starts_with("Simulated clone of git@github.com:acme/widgets.git at "));
    }

    #[tokio::test]
    async fn test_clone_then_update() {
        if !git_available() {
            return;
        }
        let (root, work, bare) = upstream();
        let opts = options(&bare, root.path().join("deploy").join("app"));

        let outcome = reconcile(&opts).await.unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Cloned {
                branch: "main".to_string(),
                previous: None
            }
        );
        assert_eq!(
            std::fs::read_to_string(opts.dest.join("README.md")).unwrap(),
            "v1\n"
        );

        std::fs::write(work.join("README.md"), "v2\n").unwrap();
        git(&work, &["commit", "--quiet", "-am", "second"]);
        git(&work, &["push", "--quiet", bare.to_str().unwrap(), "main"]);

        let outcome = reconcile(&opts).await.unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Updated {
                branch: "main".to_string()
            }
        );
        assert_eq!(
            std::fs::read_to_string(opts.dest.join("README.md")).unwrap(),
            "v2\n"
        );
    }

    #[tokio::test]
    async fn test_skip_pull_leaves_checkout() {
        if !git_available() {
            return;
        }
        let (root, _work, bare) = upstream();
        let mut opts = options(&bare, root.path().join("app"));
        reconcile(&opts).await.unwrap();

        opts.skip_pull = true;
        assert_eq!(reconcile(&opts).await.unwrap(), ReconcileOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_mismatched_remote_is_backed_up() {
        if !git_available() {
            return;
        }
        let (root, _work, bare) = upstream();
        let dest = root.path().join("app");
        std::fs::create_dir(&dest).unwrap();
        git(&dest, &["init", "--quiet"]);
        git(&dest, &["remote", "add", "origin", "/nowhere/elsewhere.git"]);
        std::fs::write(dest.join("local.txt"), "keep me").unwrap();
        let opts = options(&bare, dest.clone());

        let outcome = reconcile(&opts).await.unwrap();

        let ReconcileOutcome::Cloned {
            branch,
            previous: Some(previous),
        } = outcome
        else {
            panic!("expected a re-clone with backup, got {outcome:?}");
        };
        assert_eq!(branch, "main");
        assert!(
            previous
                .file_name()
                .unwrap()
                .to_str()
                .unwrap()
                .starts_with("app_backup_")
        );
        assert_eq!(
            std::fs::read_to_string(previous.join("local.txt")).unwrap(),
            "keep me"
        );
        assert!(dest.join("README.md").is_file());
    }

    #[tokio::test]
    async fn test_fresh_clone_replaces_plain_file() {
        if !git_available() {
            return;
        }
        let (root, _work, bare) = upstream();
        let dest = root.path().join("app");
        std::fs::write(&dest, "not a directory").unwrap();
        let opts = options(&bare, dest.clone());

        let outcome = reconcile(&opts).await.unwrap();

        assert!(matches!(
            outcome,
            ReconcileOutcome::Cloned { previous: None, .. }
        ));
        assert!(dest.join(".git").is_dir());
    }

    #[tokio::test]
    async fn test_force_clone_moves_checkout_aside() {
        if !git_available() {
            return;
        }
        let (root, _work, bare) = upstream();
        let mut opts = options(&bare, root.path().join("app"));
        reconcile(&opts).await.unwrap();

        opts.force_clone = true;
        let outcome = reconcile(&opts).await.unwrap();

        let ReconcileOutcome::Cloned {
            previous: Some(previous),
            ..
        } = outcome
        else {
            panic!("expected the old checkout to be moved aside");
        };
        assert!(
            previous
                .file_name()
                .unwrap()
                .to_str()
                .unwrap()
                .starts_with("app_old_")
        );
    }

    #[tokio::test]
    async fn test_clone_from_missing_remote_fails() {
        if !git_available() {
            return;
        }
        let dir = tempdir().unwrap();
        let mut opts = options(&dir.path().join("missing.git"), dir.path().join("app"));
        opts.retry_attempts = 1;

        let err = reconcile(&opts).await.unwrap_err();

        assert!(matches!(err, ReconcileError::Clone(_)));
    }

    #[tokio::test]
    async fn test_diverged_checkout_is_reset_to_origin() {
        if !git_available() {
            return;
        }
        let (root, work, bare) = upstream();
        let opts = options(&bare, root.path().join("app"));
        reconcile(&opts).await.unwrap();
        std::fs::write(opts.dest.join("local.txt"), "local\n").unwrap();
        git(&opts.dest, &["add", "local.txt"]);
        git(&opts.dest, &["commit", "--quiet", "-m", "local only"]);
        push_readme(&work, &bare, "v2\n");

        let outcome = reconcile(&opts).await.unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Reset {
                branch: "main".to_string()
            }
        );
        assert_eq!(
            std::fs::read_to_string(opts.dest.join("README.md")).unwrap(),
            "v2\n"
        );
        assert!(!opts.dest.join("local.txt").exists());
    }

    #[tokio::test]
    async fn test_failed_reset_falls_back_to_fresh_clone() {
        if !git_available() {
            return;
        }
        let (root, work, bare) = upstream();
        let opts = options(&bare, root.path().join("app"));
        reconcile(&opts).await.unwrap();
        push_readme(&work, &bare, "v2\n");
        // A stale index lock makes both the pull and the reset fail.
        std::fs::write(opts.dest.join(".git").join("index.lock"), "").unwrap();

        let outcome = reconcile(&opts).await.unwrap();

        let ReconcileOutcome::Cloned {
            branch,
            previous: Some(previous),
        } = outcome
        else {
            panic!("expected a re-clone, got {outcome:?}");
        };
        assert_eq!(branch, "main");
        assert!(previous.join(".git").join("index.lock").exists());
        assert_eq!(
            std::fs::read_to_string(opts.dest.join("README.md")).unwrap(),
            "v2\n"
        );
    }

    #[tokio::test]
    async fn test_detached_head_returns_to_default_branch() {
        if !git_available() {
            return;
        }
        let (root, work, bare) = upstream();
        let opts = options(&bare, root.path().join("app"));
        reconcile(&opts).await.unwrap();
        git(&opts.dest, &["checkout", "--quiet", "--detach"]);
        push_readme(&work, &bare, "v2\n");

        let outcome = reconcile(&opts).await.unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Updated {
                branch: "main".to_string()
            }
        );
        assert_eq!(git_stdout(&opts.dest, &["branch", "--show-current"]), "main");
        assert_eq!(
            std::fs::read_to_string(opts.dest.join("README.md")).unwrap(),
            "v2\n"
        );
    }

    #[tokio::test]
    async fn test_local_only_branch_switches_to_default() {
        if !git_available() {
            return;
        }
        let (root, _work, bare) = upstream();
        let opts = options(&bare, root.path().join("app"));
        reconcile(&opts).await.unwrap();
        git(&opts.dest, &["checkout", "--quiet", "-b", "experiment"]);

        let outcome = reconcile(&opts).await.unwrap();

        assert_eq!(
            outcome,
            ReconcileOutcome::Updated {
                branch: "main".to_string()
            }
        );
        assert_eq!(git_stdout(&opts.dest, &["branch", "--show-current"]), "main");
    }

    #[tokio::test]
    async fn test_blocked_checkout_is_an_update_error() {
        if !git_available() {
            return;
        }
        let (root, _work, bare) = upstream();
        let opts = options(&bare, root.path().join("app"));
        reconcile(&opts).await.unwrap();
        git(&opts.dest, &["checkout", "--quiet", "--detach"]);
        std::fs::write(opts.dest.join("README.md"), "detached\n").unwrap();
        git(&opts.dest, &["commit", "--quiet", "-am", "detached work"]);
        std::fs::write(opts.dest.join("README.md"), "uncommitted\n").unwrap();

        let err = reconcile(&opts).await.unwrap_err();

        assert!(matches!(err, ReconcileError::Update(_)), "{err:?}");
        assert_eq!(
            crate::repo::SyncError::from(err).exit_code(),
            crate::repo::EXIT_UPDATE
        );
        assert_eq!(
            std::fs::read_to_string(opts.dest.join("README.md")).unwrap(),
            "uncommitted\n"
        );
    }

    #[tokio::test]
    async fn test_check_out_existing_branch_pulls_instead() {
        if !git_available() {
            return;
        }
        let (root, work, bare) = upstream();
        let dest = root.path().join("app");
        git(
            root.path(),
            &["clone", "--quiet", bare.to_str().unwrap(), "app"],
        );
        push_readme(&work, &bare, "v2\n");
        let repo = Git::new("git", &dest);
        repo.run_checked(&["fetch", "--quiet", "origin"]).await.unwrap();

        check_out_branch(&repo, "main").await.unwrap();

        assert_eq!(git_stdout(&dest, &["branch", "--show-current"]), "main");
        assert_eq!(
            std::fs::read_to_string(dest.join("README.md")).unwrap(),
            "v2\n"
        );
    }

    #[tokio::test]
    async fn test_check_out_unknown_branch_fails() {
        if !git_available() {
            return;
        }
        let (root, _work, bare) = upstream();
        git(
            root.path(),
            &["clone", "--quiet", bare.to_str().unwrap(), "app"],
        );
        let repo = Git::new("git", root.path().join("app"));

        let err = check_out_branch(&repo, "missing").await.unwrap_err();

        assert!(err.to_string().contains("Failed to check out missing"), "{err}");
    }
}

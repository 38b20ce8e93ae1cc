use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;

use crate::exec::{self, CommandOutput, CommandSpec};

const REMOTE_REF_PREFIX: &str = "refs/remotes/origin/";
const FALLBACK_BRANCHES: [&str; 2] = ["main", "master"];
pub const DEFAULT_BRANCH: &str = "main";

/// `git -C <dir>` runner for one working tree.
#[derive(Debug, Clone)]
pub struct Git {
    program: String,
    dir: PathBuf,
    ssh_command: Option<String>,
}

impl Git {
    pub fn new(program: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            dir: dir.into(),
            ssh_command: None,
        }
    }

    /// Sets `GIT_SSH_COMMAND` for every invocation.
    #[must_use]
    pub fn with_ssh_command(mut self, command: Option<String>) -> Self {
        self.ssh_command = command;
        self
    }

    pub fn command<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut spec = CommandSpec::new(&self.program)
            .arg("-C")
            .arg(self.dir.to_string_lossy())
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .benign_stderr("From ")
            .benign_stderr("Already on")
            .benign_stderr("Switched to");
        if let Some(ssh_command) = &self.ssh_command {
            spec = spec.env("GIT_SSH_COMMAND", ssh_command);
        }
        spec
    }

    /// Runs git; a non-zero exit is returned, not raised.
    ///
    /// # Errors
    /// Returns an error if git cannot be spawned.
    pub async fn run(&self, args: &[&str]) -> Result<CommandOutput> {
        exec::run(&self.command(args.iter().copied())).await
    }

    /// # Errors
    /// Returns an error if git cannot be spawned or exits non-zero.
    pub async fn run_checked(&self, args: &[&str]) -> Result<CommandOutput> {
        exec::run_checked(&self.command(args.iter().copied())).await
    }

    /// # Errors
    /// Returns an error if git cannot be spawned, times out or exits non-zero.
    pub async fn run_with_timeout(
        &self,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput> {
        exec::run_checked(&self.command(args.iter().copied()).timeout(timeout)).await
    }

    /// Checked-out branch, or `None` for a detached HEAD.
    ///
    /// # Errors
    /// Returns an error if git cannot be spawned or exits non-zero.
    pub async fn current_branch(&self) -> Result<Option<String>> {
        let output = self.run_checked(&["branch", "--show-current"]).await?;
        let branch = output.stdout.trim();
        Ok((!branch.is_empty()).then(|| branch.to_string()))
    }

    /// # Errors
    /// Returns an error if git cannot be spawned.
    pub async fn has_remote_ref(&self, branch: &str) -> Result<bool> {
        let reference = format!("{REMOTE_REF_PREFIX}{branch}");
        let output = self
            .run(&["rev-parse", "--verify", "--quiet", &reference])
            .await?;
        Ok(output.success())
    }

    /// Default branch of `origin` from its symbolic HEAD, else `main` or
    /// `master` when present on the remote, else `main`.
    ///
    /// # Errors
    /// Returns an error if git cannot be spawned.
    pub async fn default_branch(&self) -> Result<String> {
        let output = self
            .run(&["symbolic-ref", "refs/remotes/origin/HEAD"])
            .await?;
        if output.success()
            && let Some(branch) = branch_from_symbolic_ref(&output.stdout)
        {
            return Ok(branch);
        }
        for candidate in FALLBACK_BRANCHES {
            if self.has_remote_ref(candidate).await? {
                return Ok(candidate.to_string());
            }
        }
        Ok(DEFAULT_BRANCH.to_string())
    }

    /// Default branch as advertised by `git remote show origin`.
    ///
    /// # Errors
    /// Returns an error if git cannot be spawned.
    pub async fn remote_head_branch(&self, timeout: Duration) -> Result<String> {
        let output = exec::run(&self.command(["remote", "show", "origin"]).timeout(timeout)).await?;
        if output.success()
            && let Some(branch) = parse_head_branch(&output.stdout)
        {
            return Ok(branch);
        }
        Ok(DEFAULT_BRANCH.to_string())
    }
}

/// Branch name from `git symbolic-ref` output.
pub fn branch_from_symbolic_ref(output: &str) -> Option<String> {
    let reference = output.trim();
    let branch = reference
        .strip_prefix(REMOTE_REF_PREFIX)
        .unwrap_or_else(|| reference.rsplit('/').next().unwrap_or(reference));
    (!branch.is_empty()).then(|| branch.to_string())
}

/// Branch named on the `HEAD branch:` line of `git remote show`.
pub fn parse_head_branch(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix("HEAD branch:"))
        .map(str::trim)
        .filter(|branch| !branch.is_empty() && *branch != "(unknown)")
        .map(ToString::to_string)
}

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, error, info, warn};

/// Exit code reported for a command killed after its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

const DEFAULT_MAX_OUTPUT_BYTES: usize = 4 * 1024 * 1024;
const BENIGN_STDERR_MARKERS: [&str; 3] = ["Warning", "remote:", "hint:"];
const SENSITIVE_KEYWORDS: [&str; 4] = ["key", "token", "password", "secret"];
const REDACTED: &str = "[REDACTED]";

#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
    description: Option<String>,
    benign_stderr: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Marks stderr lines containing `marker` as informational.
    #[must_use]
    pub fn benign_stderr(mut self, marker: impl Into<String>) -> Self {
        self.benign_stderr.push(marker.into());
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0 && !self.timed_out
    }
}

/// Builds a spec that runs `line` through `shell -c`.
pub fn shell(shell: &str, line: &str) -> CommandSpec {
    CommandSpec::new(shell).args(["-c", line])
}

/// Runs a command, capturing its output. A non-zero exit is not an error.
///
/// # Errors
/// Returns error if the command cannot be spawned or its output cannot be read.
pub async fn run(spec: &CommandSpec) -> anyhow::Result<CommandOutput> {
    if let Some(description) = &spec.description {
        info!("TASK: {description}");
    }
    let logged = redact_command(&spec.command_line());
    info!("Executing: {logged}");

    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .envs(spec.envs.iter().map(|(key, value)| (key, value)))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);
    if let Some(working_dir) = &spec.working_dir {
        command.current_dir(working_dir);
    }

    let mut child = command
        .spawn()
        .with_context(|| format!("Failed to spawn '{logged}'"))?;
    let pid = child.id();

    let stdout_handle = tokio::spawn(read_stream_limited(
        child.stdout.take(),
        DEFAULT_MAX_OUTPUT_BYTES,
    ));
    let stderr_handle = tokio::spawn(read_stream_limited(
        child.stderr.take(),
        DEFAULT_MAX_OUTPUT_BYTES,
    ));

    let waited = match spec.timeout {
        Some(timeout) => tokio::time::timeout(timeout, child.wait()).await.ok(),
        None => Some(child.wait().await),
    };

    let Some(status) = waited else {
        // Descendants such as the ssh spawned by git share the group and
        // may hold the output pipes open.
        kill_process_group(pid);
        if let Err(err) = child.kill().await {
            warn!("Failed to kill timed out command: {err}");
        }
        stdout_handle.abort();
        stderr_handle.abort();
        let secs = spec.timeout.unwrap_or_default().as_secs();
        error!("Command timed out after {secs} seconds: {logged}");
        return Ok(CommandOutput {
            code: TIMEOUT_EXIT_CODE,
            stdout: String::new(),
            stderr: format!("Timeout after {secs}s"),
            timed_out: true,
        });
    };

    let status = status.with_context(|| format!("Failed to wait for '{logged}'"))?;
    let stdout = stdout_handle
        .await
        .context("stdout reader task failed")??;
    let stderr = stderr_handle
        .await
        .context("stderr reader task failed")??;

    let output = CommandOutput {
        code: status.code().unwrap_or(-1),
        stdout,
        stderr,
        timed_out: false,
    };
    log_output(spec, &output);
    if !output.success() {
        error!("Command failed with return code {}", output.code);
    }
    Ok(output)
}

/// Runs a command and treats a non-zero exit as an error.
///
/// # Errors
/// Returns error if the command cannot run, times out or exits non-zero.
pub async fn run_checked(spec: &CommandSpec) -> anyhow::Result<CommandOutput> {
    let output = run(spec).await?;
    if output.success() {
        return Ok(output);
    }
    let logged = redact_command(&spec.command_line());
    let stderr = output.stderr.trim();
    if stderr.is_empty() {
        anyhow::bail!("Command '{logged}' failed with return code {}", output.code)
    }
    anyhow::bail!(
        "Command '{logged}' failed with return code {}: {stderr}",
        output.code
    )
}

/// Hides private key paths in a command line before it is logged.
pub fn redact_command(line: &str) -> String {
    let lowered = line.to_ascii_lowercase();
    if !SENSITIVE_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword))
    {
        return line.to_string();
    }
    line.split(' ')
        .map(|token| {
            if is_key_material(token) {
                REDACTED
            } else {
                token
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_key_material(token: &str) -> bool {
    let token = token.trim_matches(|ch| ch == '\'' || ch == '"');
    let file_name = token.rsplit('/').next().unwrap_or(token);
    file_name.starts_with("id_")
        || file_name.ends_with(".pem")
        || (token.contains('/') && file_name.to_ascii_lowercase().contains("key"))
}

fn kill_process_group(pid: Option<u32>) {
    let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
        return;
    };
    if let Err(err) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        debug!("Failed to kill process group {pid}: {err}");
    }
}

fn log_output(spec: &CommandSpec, output: &CommandOutput) {
    for line in output.stdout.lines() {
        debug!("STDOUT: {line}");
    }
    for line in output.stderr.lines() {
        if is_benign_stderr(line, &spec.benign_stderr) {
            debug!("STDERR: {line}");
        } else {
            warn!("STDERR: {line}");
        }
    }
}

fn is_benign_stderr(line: &str, extra_markers: &[String]) -> bool {
    if line.contains("Error") {
        return false;
    }
    BENIGN_STDERR_MARKERS
        .iter()
        .any(|marker| line.contains(marker))
        || extra_markers.iter().any(|marker| line.contains(marker))
}

async fn read_stream_limited<R>(stream: Option<R>, max_bytes: usize) -> anyhow::Result<String>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let Some(mut stream) = stream else {
        return Ok(String::new());
    };

    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let read = stream
            .read(&mut chunk)
            .await
            .context("Failed to read command output")?;
        if read == 0 {
            break;
        }
        // Keep draining past the limit so the child never blocks on a full pipe.
        let remaining = max_bytes.saturating_sub(buf.len());
        buf.extend_from_slice(&chunk[..read.min(remaining)]);
    }

    Ok(String::from_utf8_lossy(&buf).to_string())
}

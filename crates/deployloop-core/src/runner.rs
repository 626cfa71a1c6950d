use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

// ---------------------------------------------------------------------------
// ToolCommand
// ---------------------------------------------------------------------------

/// One external tool invocation: program, argv, extra env, working dir.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: PathBuf,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>, cwd: &Path) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            cwd: cwd.to_path_buf(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (k, v) in &self.env {
            write!(f, "{k}={v} ")?;
        }
        f.write_str(&self.program)?;
        for a in &self.args {
            if a.contains(' ') {
                write!(f, " '{a}'")?;
            } else {
                write!(f, " {a}")?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CommandOutput
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// `None` when the process was killed or terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    /// Successful output carrying `stdout`. Handy for fakes.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(code),
            stderr: stderr.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("'{0}' not found on PATH; install it or add it to PATH")]
    NotFound(String),

    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed waiting for '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// CommandRunner
// ---------------------------------------------------------------------------

/// Seam between the stages and the operating system.
pub trait CommandRunner {
    fn run(&self, cmd: &ToolCommand, timeout: Duration) -> Result<CommandOutput, RunnerError>;
}

/// Spawns real processes. The program is resolved on `PATH` first so a
/// missing tool gets a clear message instead of a bare ENOENT.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, cmd: &ToolCommand, timeout: Duration) -> Result<CommandOutput, RunnerError> {
        let program = which::which(&cmd.program)
            .map_err(|_| RunnerError::NotFound(cmd.program.clone()))?;

        tracing::debug!(command = %cmd, cwd = %cmd.cwd.display(), "spawning");
        let mut child = Command::new(&program)
            .args(&cmd.args)
            .envs(cmd.env.iter().map(|(k, v)| (k, v)))
            .current_dir(&cmd.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                program: cmd.program.clone(),
                source,
            })?;

        let child_pid = child.id();

        // Drain both pipes on their own threads so a chatty tool never
        // blocks on a full pipe buffer.
        let stdout_reader = PipeReader::spawn(child.stdout.take());
        let stderr_reader = PipeReader::spawn(child.stderr.take());

        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(child.wait());
        });

        let status = match rx.recv_timeout(timeout) {
            Ok(result) => result.map_err(|source| RunnerError::Wait {
                program: cmd.program.clone(),
                source,
            })?,
            Err(_) => {
                kill_process(child_pid);
                tracing::warn!(command = %cmd, timeout_ms = timeout.as_millis() as u64, "command timed out");
                // A grandchild may still hold the pipes open; take what
                // arrived within the grace period.
                let stdout = stdout_reader.finish(Some(KILL_GRACE));
                let mut stderr = stderr_reader.finish(Some(KILL_GRACE));
                if !stderr.is_empty() && !stderr.ends_with('\n') {
                    stderr.push('\n');
                }
                stderr.push_str(&format!("timed out after {timeout:?}"));
                return Ok(CommandOutput {
                    exit_code: None,
                    stdout,
                    stderr,
                    timed_out: true,
                });
            }
        };

        Ok(CommandOutput {
            exit_code: status.code(),
            stdout: stdout_reader.finish(None),
            stderr: stderr_reader.finish(None),
            timed_out: false,
        })
    }
}

const KILL_GRACE: Duration = Duration::from_millis(500);

/// Drains one pipe into a shared buffer so a partial read survives a kill.
struct PipeReader {
    buf: Arc<Mutex<Vec<u8>>>,
    done: mpsc::Receiver<()>,
}

impl PipeReader {
    fn spawn<R>(handle: Option<R>) -> Self
    where
        R: Read + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let (tx, done) = mpsc::channel();
        let sink = Arc::clone(&buf);
        std::thread::spawn(move || {
            if let Some(mut r) = handle {
                let mut chunk = [0u8; 8192];
                loop {
                    match r.read(&mut chunk) {
                        Ok(0) | Err(_) => break,
                        Ok(n) => lock(&sink).extend_from_slice(&chunk[..n]),
                    }
                }
            }
            let _ = tx.send(());
        });
        Self { buf, done }
    }

    /// Wait for EOF (bounded by `grace` when given) and return what was read.
    fn finish(self, grace: Option<Duration>) -> String {
        match grace {
            Some(limit) => {
                let _ = self.done.recv_timeout(limit);
            }
            None => {
                let _ = self.done.recv();
            }
        }
        let bytes = lock(&self.buf);
        let text = String::from_utf8_lossy(&bytes).into_owned();
        text
    }
}

fn lock(buf: &Mutex<Vec<u8>>) -> MutexGuard<'_, Vec<u8>> {
    buf.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Terminate a process by PID using SIGKILL. Best-effort.
fn kill_process(pid: u32) {
    let _ = Command::new("kill")
        .arg("-9")
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

/// Keep the tail of `text` within `max` bytes, on a char boundary.
pub fn tail(text: &str, max: usize) -> &str {
    let trimmed = text.trim();
    if trimmed.len() <= max {
        return trimmed;
    }
    let mut start = trimmed.len() - max;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    &trimmed[start..]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn display_quotes_spaced_args() {
        let cmd = ToolCommand::new("aws", Path::new("."))
            .args(["cloudformation", "describe-stacks"])
            .arg("--query")
            .arg("a b")
            .env("TF_VAR_region", "us-east-1");
        assert_eq!(
            cmd.to_string(),
            "TF_VAR_region=us-east-1 aws cloudformation describe-stacks --query 'a b'"
        );
    }

    #[test]
    fn missing_program_is_not_found() {
        let dir = TempDir::new().unwrap();
        let cmd = ToolCommand::new("definitely-not-a-real-tool-xyz", dir.path());
        let err = SystemRunner
            .run(&cmd, Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, RunnerError::NotFound(_)));
        assert!(err.to_string().contains("not found on PATH"));
    }

    #[test]
    fn captures_stdout_stderr_and_exit_code() {
        let dir = TempDir::new().unwrap();
        let cmd = ToolCommand::new("sh", dir.path())
            .arg("-c")
            .arg("echo out; echo err >&2; exit 3");
        let out = SystemRunner.run(&cmd, Duration::from_secs(10)).unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
        assert!(!out.success());
    }

    #[test]
    fn passes_env_and_cwd() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();
        let cmd = ToolCommand::new("sh", dir.path())
            .arg("-c")
            .arg("ls; echo $TF_VAR_stack_name")
            .env("TF_VAR_stack_name", "orders");
        let out = SystemRunner.run(&cmd, Duration::from_secs(10)).unwrap();
        assert!(out.success());
        assert!(out.stdout.contains("marker.txt"));
        assert!(out.stdout.contains("orders"));
    }

    #[test]
    fn timeout_kills_process() {
        let dir = TempDir::new().unwrap();
        let cmd = ToolCommand::new("sh", dir.path()).arg("-c").arg("sleep 30");
        let out = SystemRunner.run(&cmd, Duration::from_millis(200)).unwrap();
        assert!(out.timed_out);
        assert!(!out.success());
        assert!(out.stderr.contains("timed out"));
    }

    #[test]
    fn timeout_keeps_partial_output() {
        let dir = TempDir::new().unwrap();
        let cmd = ToolCommand::new("sh", dir.path())
            .arg("-c")
            .arg("echo 'Creating changeset...'; echo 'waiting on stack' >&2; sleep 30");
        let started = std::time::Instant::now();
        let out = SystemRunner.run(&cmd, Duration::from_millis(700)).unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(out.timed_out);
        assert!(out.stdout.contains("Creating changeset..."));
        assert!(out.stderr.contains("waiting on stack"));
        assert!(out.stderr.ends_with("timed out after 700ms"));
    }

    #[test]
    fn tail_keeps_end() {
        assert_eq!(tail("  abcdef  ", 3), "def");
        assert_eq!(tail("short", 100), "short");
    }
}

// ---------------------------------------------------------------------------
// Fake runner (tests only)
// ---------------------------------------------------------------------------

/// Records every command and answers from a table of canned outputs keyed by
/// command-line prefix. Unmatched commands succeed with empty output.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct FakeRunner {
    calls: std::sync::Mutex<Vec<ToolCommand>>,
    responses: Vec<(String, CommandOutput)>,
    missing: Vec<String>,
}

#[cfg(test)]
impl FakeRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(mut self, prefix: &str, output: CommandOutput) -> Self {
        self.responses.push((prefix.to_string(), output));
        self
    }

    pub(crate) fn missing(mut self, program: &str) -> Self {
        self.missing.push(program.to_string());
        self
    }

    pub(crate) fn calls(&self) -> Vec<ToolCommand> {
        self.calls.lock().unwrap().clone()
    }

    /// Command lines without env, e.g. `sam build --template-file template.yaml`.
    pub(crate) fn lines(&self) -> Vec<String> {
        self.calls().iter().map(command_line).collect()
    }
}

#[cfg(test)]
fn command_line(cmd: &ToolCommand) -> String {
    std::iter::once(cmd.program.as_str())
        .chain(cmd.args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
impl CommandRunner for FakeRunner {
    fn run(&self, cmd: &ToolCommand, _timeout: Duration) -> Result<CommandOutput, RunnerError> {
        self.calls.lock().unwrap().push(cmd.clone());
        if self.missing.contains(&cmd.program) {
            return Err(RunnerError::NotFound(cmd.program.clone()));
        }
        let line = command_line(cmd);
        Ok(self
            .responses
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_else(|| CommandOutput::ok("")))
    }
}

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::types::{CliMessage, CliResult, GenerateRequest};
use crate::{GatewayError, Result};

const PROVIDER: &str = "claude-cli";

// ─── ClaudeProcess ────────────────────────────────────────────────────────

/// A running `claude --output-format stream-json --input-format stream-json`
/// subprocess.
///
/// The prompt is sent as a JSON user message on stdin, and responses are
/// read as JSONL from stdout. Stderr is captured in a background task and
/// surfaced on process exit errors.
pub(crate) struct ClaudeProcess {
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
    stdin: Option<ChildStdin>,
    stderr_buf: Arc<Mutex<String>>,
}

impl ClaudeProcess {
    /// Spawn the `claude` binary for a single-turn, tool-less completion.
    ///
    /// `CLAUDECODE` is removed from the environment so this also works when
    /// the pipeline itself runs inside a Claude session.
    pub(crate) async fn spawn(exe: &str, model: &str, req: &GenerateRequest) -> Result<Self> {
        let mut cmd = build_command(exe, model, req);
        cmd.env_remove("CLAUDECODE");

        let mut process = Self::from_command(cmd)?;

        let user_msg = serde_json::json!({
            "type": "user",
            "message": {
                "role": "user",
                "content": [{"type": "text", "text": req.prompt}]
            }
        });
        process.send_message(&user_msg).await?;
        process.close_stdin();

        Ok(process)
    }

    /// Spawn an arbitrary command as a mock Claude process.
    #[cfg(test)]
    pub(crate) fn spawn_command(cmd: Command) -> Result<Self> {
        Self::from_command(cmd)
    }

    fn from_command(mut cmd: Command) -> Result<Self> {
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| GatewayError::provider(PROVIDER, format!("failed to spawn: {e}")))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| GatewayError::provider(PROVIDER, "stdout not captured"))?;

        let stdin = child.stdin.take();

        let stderr_buf = Arc::new(Mutex::new(String::new()));
        if let Some(stderr) = child.stderr.take() {
            let buf = Arc::clone(&stderr_buf);
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    if let Ok(mut b) = buf.lock() {
                        if !b.is_empty() {
                            b.push('\n');
                        }
                        b.push_str(&line);
                    }
                }
            });
        }

        Ok(Self {
            child,
            lines: BufReader::new(stdout).lines(),
            stdin,
            stderr_buf,
        })
    }

    async fn send_message(&mut self, msg: &serde_json::Value) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| GatewayError::provider(PROVIDER, "stdin already closed"))?;

        let mut buf = serde_json::to_vec(msg).map_err(|e| {
            GatewayError::provider(PROVIDER, format!("failed to serialize stdin message: {e}"))
        })?;
        buf.push(b'\n');

        stdin.write_all(&buf).await?;
        stdin.flush().await?;
        Ok(())
    }

    fn close_stdin(&mut self) {
        self.stdin.take();
    }

    /// Read JSONL lines until the terminal `result` message.
    ///
    /// Lines of other types are skipped. A line that is not JSON at all is a
    /// protocol error. Returns `Ok(None)` on EOF without a result.
    pub(crate) async fn next_result(&mut self) -> Result<Option<CliResult>> {
        while let Some(line) = self.lines.next_line().await? {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<CliMessage>(trimmed) {
                Ok(CliMessage::Result(r)) => return Ok(Some(r)),
                Ok(CliMessage::Other) => continue,
                Err(e) => {
                    return Err(GatewayError::MalformedResponse {
                        reason: format!("unparseable stream-json line: {e}"),
                        preview: preview(trimmed),
                    })
                }
            }
        }
        Ok(None)
    }

    /// Wait for the child to exit; `Some(error)` for a non-zero exit.
    pub(crate) async fn wait_exit_error(&mut self) -> Option<GatewayError> {
        let status = match self.child.wait().await {
            Ok(s) => s,
            Err(e) => return Some(GatewayError::Io(e)),
        };
        if status.success() {
            return None;
        }

        let stderr = self
            .stderr_buf
            .lock()
            .ok()
            .map(|b| b.clone())
            .unwrap_or_default();

        let head = match status.code() {
            Some(code) => format!("claude process exited with code {code}"),
            None => "claude process terminated by signal".to_string(),
        };
        let msg = if stderr.is_empty() {
            head
        } else {
            format!("{head}\nstderr: {stderr}")
        };
        Some(GatewayError::provider(PROVIDER, msg))
    }

    pub(crate) async fn kill(&mut self) {
        let _ = self.child.kill().await;
    }
}

fn build_command(exe: &str, model: &str, req: &GenerateRequest) -> Command {
    let mut cmd = Command::new(exe);
    cmd.arg("--print")
        .arg("--output-format")
        .arg("stream-json")
        .arg("--verbose")
        .arg("--input-format")
        .arg("stream-json")
        .arg("--model")
        .arg(model)
        .arg("--max-turns")
        .arg("1")
        .arg("--no-session-persistence");

    if let Some(sp) = &req.system_prompt {
        cmd.arg("--system-prompt").arg(sp);
    }
    cmd
}

fn preview(s: &str) -> String {
    s.chars().take(300).collect()
}

// ─── Provider entry point ─────────────────────────────────────────────────

/// Drive one completion through the local `claude` CLI.
pub(crate) async fn generate(
    exe: &str,
    model: &str,
    req: &GenerateRequest,
    timeout: Duration,
) -> Result<String> {
    let mut process = ClaudeProcess::spawn(exe, model, req).await?;
    collect(&mut process, timeout).await
}

async fn collect(process: &mut ClaudeProcess, timeout: Duration) -> Result<String> {
    let result = match tokio::time::timeout(timeout, process.next_result()).await {
        Ok(r) => r?,
        Err(_) => {
            process.kill().await;
            return Err(GatewayError::provider(
                PROVIDER,
                format!("timed out after {}s", timeout.as_secs()),
            ));
        }
    };

    let Some(result) = result else {
        return Err(process.wait_exit_error().await.unwrap_or_else(|| {
            GatewayError::provider(PROVIDER, "stream ended without a result message")
        }));
    };

    if result.is_error {
        let detail = if result.errors.is_empty() {
            result.subtype.clone()
        } else {
            result.errors.join("; ")
        };
        return Err(GatewayError::provider(PROVIDER, detail));
    }

    if let Some(cost) = result.total_cost_usd {
        tracing::debug!(cost_usd = cost, "claude-cli completion cost");
    }
    Ok(result.result.unwrap_or_default())
}

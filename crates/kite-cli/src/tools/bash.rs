//! Shell command execution tool

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use kite_agent::tool::{Confirmation, Tool, ToolError, ToolInvocation, ToolResult, required_str};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Maximum output size in bytes before truncation
const MAX_OUTPUT_SIZE: usize = 100_000;
/// Maximum number of lines before truncation
const MAX_OUTPUT_LINES: usize = 1000;

const DEFAULT_SHELL_TIMEOUT: Duration = Duration::from_secs(120);

/// Tool for executing shell commands
pub struct BashTool {
    timeout: Duration,
}

impl BashTool {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for BashTool {
    fn default() -> Self {
        Self::new(DEFAULT_SHELL_TIMEOUT)
    }
}

/// Combined stdout/stderr, capped at the line and byte limits
#[derive(Default)]
struct Output {
    text: String,
    lines: usize,
    truncated: bool,
}

impl Output {
    fn push(&mut self, line: &str) {
        if self.truncated {
            return;
        }
        if self.lines >= MAX_OUTPUT_LINES || self.text.len() + line.len() + 1 > MAX_OUTPUT_SIZE {
            self.truncated = true;
            return;
        }
        if !self.text.is_empty() {
            self.text.push('\n');
        }
        self.text.push_str(line);
        self.lines += 1;
    }

    fn finish(mut self) -> (String, bool) {
        if self.truncated {
            self.text.push_str(&format!(
                "\n\n... (output truncated at {} lines / {}KB)",
                self.lines,
                MAX_OUTPUT_SIZE / 1024
            ));
        }
        (self.text, self.truncated)
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the working directory. Returns combined stdout and stderr."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                }
            },
            "required": ["command"]
        })
    }

    fn is_mutating(&self) -> bool {
        true
    }

    fn confirmation(&self, invocation: &ToolInvocation<'_>) -> Option<Confirmation> {
        let command = invocation.params.get("command")?.as_str()?;
        Some(Confirmation::new(format!("Run: {}", command)).with_command(command))
    }

    async fn execute(&self, params: serde_json::Value, cwd: &Path) -> Result<ToolResult, ToolError> {
        let command = required_str(&params, "command")?;

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .map_err(|e| ToolError::failed(format!("Failed to spawn command: {}", e)))?;
        let pid = child.id();

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolError::failed("stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ToolError::failed("stderr was not captured"))?;
        let mut stdout_reader = BufReader::new(stdout).lines();
        let mut stderr_reader = BufReader::new(stderr).lines();

        let mut output = Output::default();
        let run = async {
            let mut stdout_open = true;
            let mut stderr_open = true;
            while stdout_open || stderr_open {
                tokio::select! {
                    line = stdout_reader.next_line(), if stdout_open => match line {
                        Ok(Some(l)) => output.push(&l),
                        Ok(None) => stdout_open = false,
                        Err(e) => {
                            output.push(&format!("stdout read error: {}", e));
                            stdout_open = false;
                        }
                    },
                    line = stderr_reader.next_line(), if stderr_open => match line {
                        Ok(Some(l)) => output.push(&l),
                        Ok(None) => stderr_open = false,
                        Err(e) => {
                            output.push(&format!("stderr read error: {}", e));
                            stderr_open = false;
                        }
                    },
                }
            }
            child.wait().await
        };

        let finished = tokio::time::timeout(self.timeout, run).await;
        let status = match finished {
            Ok(status) => status?,
            Err(_) => {
                if let Some(pid) = pid {
                    kill_process_group(pid).await;
                }
                tracing::warn!(command, timeout = ?self.timeout, "Shell command timed out");
                let (text, truncated) = output.finish();
                return Ok(ToolResult::failure(format!(
                    "Command timed out after {} seconds",
                    self.timeout.as_secs()
                ))
                .with_output(text)
                .with_truncated(truncated));
            }
        };

        let (text, truncated) = output.finish();
        let code = status.code().unwrap_or(-1);
        let result = if status.success() {
            ToolResult::success(text)
        } else {
            ToolResult::failure(format!("Command exited with code {}", code)).with_output(text)
        };
        Ok(result.with_truncated(truncated).with_exit_code(code))
    }
}

/// Kill every process in the group led by `pid`
async fn kill_process_group(pid: u32) {
    let killed = Command::new("kill")
        .arg("-9")
        .arg("--")
        .arg(format!("-{}", pid))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;
    if let Err(e) = killed {
        tracing::warn!("Failed to kill process group {}: {}", pid, e);
    }
}

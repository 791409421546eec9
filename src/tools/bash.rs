//! Reference tool: run a shell command and return combined stdout/stderr.
//! Grounded in the teacher's `tools::bash::BashTool`, re-implemented against
//! the `ToolHandler` trait instead of the teacher's bespoke `Tool`/`ToolCall`
//! pair.

use super::{ToolContext, ToolHandler, ToolOutcome};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

#[derive(Clone)]
pub struct BashTool {
    timeout_secs: u64,
    working_dir: Option<std::path::PathBuf>,
}

impl BashTool {
    pub fn new() -> Self {
        Self { timeout_secs: 30, working_dir: None }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_working_dir(mut self, dir: std::path::PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    fn error_context(&self, command: &str, ctx: &ToolContext) -> String {
        let shell = if cfg!(target_os = "windows") { "powershell" } else { "sh" };
        let cwd = ctx
            .working_dir
            .as_ref()
            .or(self.working_dir.as_ref())
            .map(|dir| dir.display().to_string())
            .unwrap_or_else(|| "(unknown)".to_string());
        format!("shell={shell}\ncwd={cwd}\ncommand={command}")
    }

    fn combine_output(stdout: &str, stderr: &str) -> String {
        let mut result = String::new();
        if !stdout.is_empty() {
            result.push_str(stdout);
        }
        if !stderr.is_empty() {
            if !result.is_empty() {
                result.push_str("\n---STDERR---\n");
            }
            result.push_str(stderr);
        }
        result
    }

    async fn run(&self, command: &str, ctx: &ToolContext) -> Result<String, String> {
        if command.trim().is_empty() {
            return Err(format!("Command cannot be empty\n{}", self.error_context(command, ctx)));
        }

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("powershell");
            c.args(["-NoProfile", "-ExecutionPolicy", "Bypass", "-Command", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };

        if let Some(dir) = ctx.working_dir.as_ref().or(self.working_dir.as_ref()) {
            cmd.current_dir(dir);
        }
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| format!("Failed to spawn command: {e}\n{}", self.error_context(command, ctx)))?;
        let stdout = child.stdout.take().ok_or_else(|| format!("Failed to capture stdout\n{}", self.error_context(command, ctx)))?;
        let stderr = child.stderr.take().ok_or_else(|| format!("Failed to capture stderr\n{}", self.error_context(command, ctx)))?;

        let stdout_handle = tokio::spawn(async move {
            let mut buf = Vec::new();
            tokio::io::BufReader::new(stdout).read_to_end(&mut buf).await.map(|_| buf)
        });
        let stderr_handle = tokio::spawn(async move {
            let mut buf = Vec::new();
            tokio::io::BufReader::new(stderr).read_to_end(&mut buf).await.map(|_| buf)
        });

        let timeout = Duration::from_secs(self.timeout_secs);
        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(result) => result.map_err(|e| format!("Command execution failed: {e}\n{}", self.error_context(command, ctx)))?,
            Err(_) => {
                let _ = child.kill().await;
                let _ = tokio::time::timeout(Duration::from_secs(2), child.wait()).await;
                return Err(format!("Command timed out after {} seconds\n{}", self.timeout_secs, self.error_context(command, ctx)));
            }
        };

        let stdout_bytes = stdout_handle.await.map_err(|e| e.to_string())?.map_err(|e| e.to_string())?;
        let stderr_bytes = stderr_handle.await.map_err(|e| e.to_string())?.map_err(|e| e.to_string())?;
        let result = Self::combine_output(&String::from_utf8_lossy(&stdout_bytes), &String::from_utf8_lossy(&stderr_bytes));

        if status.success() {
            Ok(if result.is_empty() { "(command completed with no output)".to_string() } else { result })
        } else {
            Err(format!("Command failed with exit code {}\n{}\n{}", status.code().unwrap_or(-1), result, self.error_context(command, ctx)))
        }
    }
}

impl Default for BashTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolHandler for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return its combined stdout/stderr."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "The shell command to execute." }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> Result<ToolOutcome, String> {
        let command = arguments.get("command").and_then(|v| v.as_str()).ok_or("missing 'command' argument")?;
        self.run(command, ctx).await.map(ToolOutcome::text)
    }
}

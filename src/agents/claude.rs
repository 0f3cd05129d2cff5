//! Claude Code agent: spawns the `claude` CLI and parses its stream-JSON
//! output.
//!
//! The same binary doubles as the review synthesizer when constructed in
//! read-only mode; reviews must not modify the workspace.

use crate::agents::{Agent, AgentOutcome, AgentTask};
use crate::errors::AgentError;
use crate::review::ReviewSynthesizer;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

const DEFAULT_CLAUDE_CMD: &str = "claude";

/// One line of the CLI's stream-JSON output.
#[derive(Debug, Deserialize)]
struct StreamMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: String,
}

pub struct ClaudeCode {
    command: String,
    read_only: bool,
}

impl ClaudeCode {
    pub fn new() -> Self {
        Self {
            command: DEFAULT_CLAUDE_CMD.to_string(),
            read_only: false,
        }
    }

    /// Read-only variant used for review synthesis.
    pub fn reviewer() -> Self {
        Self {
            command: DEFAULT_CLAUDE_CMD.to_string(),
            read_only: true,
        }
    }

    pub fn with_command(mut self, command: &str) -> Self {
        self.command = command.to_string();
        self
    }

    /// Run the CLI with a prompt, collecting assistant text from the
    /// stream-JSON output. Cancellation kills the child process.
    pub(crate) async fn run_print(
        &self,
        cancel: &CancellationToken,
        prompt: &str,
        dir: &Path,
    ) -> Result<(String, String, ExitStatus), AgentError> {
        let mut cmd = Command::new(&self.command);
        cmd.args(["--print", "--output-format", "stream-json"]);
        if self.read_only {
            cmd.args(["--permission-mode", "read-only"]);
        }
        cmd.arg(prompt)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(AgentError::Spawn)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Io(std::io::Error::other("missing stdout pipe")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| AgentError::Io(std::io::Error::other("missing stderr pipe")))?;

        let collect = async move {
            let mut summary = String::new();
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                // Non-JSON lines are tool noise; skip them.
                let Ok(msg) = serde_json::from_str::<StreamMessage>(&line) else {
                    continue;
                };
                if msg.kind == "assistant" && !msg.content.is_empty() {
                    summary.push_str(&msg.content);
                }
            }

            let mut err_output = String::new();
            BufReader::new(stderr).read_to_string(&mut err_output).await?;

            let status = child.wait().await?;
            Ok::<_, std::io::Error>((summary, err_output, status))
        };
        tokio::pin!(collect);

        tokio::select! {
            // Dropping the collect future drops the child; kill_on_drop
            // takes the process down with it.
            _ = cancel.cancelled() => Err(AgentError::Cancelled),
            result = &mut collect => Ok(result?),
        }
    }
}

impl Default for ClaudeCode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for ClaudeCode {
    fn name(&self) -> &str {
        if self.read_only {
            "claude-code-reviewer"
        } else {
            "claude-code"
        }
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        task: &AgentTask,
    ) -> Result<AgentOutcome, AgentError> {
        let start = Instant::now();
        let (summary, err_output, status) =
            self.run_print(cancel, &task.spec, &task.workspace).await?;
        let duration = start.elapsed();

        if status.success() {
            Ok(AgentOutcome {
                success: true,
                summary,
                duration,
                error: None,
            })
        } else {
            Ok(AgentOutcome {
                success: false,
                summary,
                duration,
                error: Some(format!(
                    "claude exited with {status}\nstderr: {}",
                    err_output.trim()
                )),
            })
        }
    }
}

#[async_trait]
impl ReviewSynthesizer for ClaudeCode {
    async fn synthesize(
        &self,
        cancel: &CancellationToken,
        prompt: &str,
        workspace: &Path,
    ) -> anyhow::Result<String> {
        let (output, err_output, status) = self.run_print(cancel, prompt, workspace).await?;
        if !status.success() {
            anyhow::bail!("claude review failed: {status}: {}", err_output.trim());
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(ClaudeCode::new().name(), "claude-code");
        assert_eq!(ClaudeCode::reviewer().name(), "claude-code-reviewer");
    }

    #[test]
    fn test_stream_message_parsing() {
        let msg: StreamMessage =
            serde_json::from_str(r#"{"type":"assistant","content":"done"}"#).unwrap();
        assert_eq!(msg.kind, "assistant");
        assert_eq!(msg.content, "done");

        let msg: StreamMessage = serde_json::from_str(r#"{"type":"system"}"#).unwrap();
        assert_eq!(msg.kind, "system");
        assert!(msg.content.is_empty());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_infra_error() {
        let agent = ClaudeCode::new().with_command("definitely-not-claude-xyz");
        let cancel = CancellationToken::new();
        let task = AgentTask {
            id: "t1".into(),
            spec: "do things".into(),
            workspace: std::env::current_dir().unwrap(),
        };

        let err = agent.execute(&cancel, &task).await.unwrap_err();
        assert!(matches!(err, AgentError::Spawn(_)));
    }

    #[tokio::test]
    async fn test_fake_agent_script_round_trip() {
        // Stand in a shell script for the CLI that emits stream-JSON.
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-claude");
        std::fs::write(
            &script,
            "#!/bin/sh\necho '{\"type\":\"assistant\",\"content\":\"implemented\"}'\n",
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let agent = ClaudeCode::new().with_command(&script.to_string_lossy());
        let cancel = CancellationToken::new();
        let task = AgentTask {
            id: "t1".into(),
            spec: "spec".into(),
            workspace: dir.path().to_path_buf(),
        };

        let outcome = agent.execute(&cancel, &task).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.summary, "implemented");
        assert!(outcome.error.is_none());
    }
}

//! Codex agent: spawns the `codex` CLI in quiet mode and captures its
//! combined output as the summary.

use crate::agents::{Agent, AgentOutcome, AgentTask};
use crate::errors::AgentError;
use async_trait::async_trait;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

const DEFAULT_CODEX_CMD: &str = "codex";

pub struct Codex {
    command: String,
}

impl Codex {
    pub fn new() -> Self {
        Self {
            command: DEFAULT_CODEX_CMD.to_string(),
        }
    }

    pub fn with_command(mut self, command: &str) -> Self {
        self.command = command.to_string();
        self
    }
}

impl Default for Codex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Agent for Codex {
    fn name(&self) -> &str {
        "codex"
    }

    async fn execute(
        &self,
        cancel: &CancellationToken,
        task: &AgentTask,
    ) -> Result<AgentOutcome, AgentError> {
        let start = Instant::now();

        let mut cmd = Command::new(&self.command);
        cmd.args(["--prompt", &task.spec, "--quiet"])
            .current_dir(&task.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(AgentError::Spawn)?;
        let wait = child.wait_with_output();
        tokio::pin!(wait);

        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(AgentError::Cancelled),
            result = &mut wait => result?,
        };

        let duration = start.elapsed();
        let mut summary = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if summary.is_empty() {
            summary = stderr.clone();
        }

        if output.status.success() {
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
                error: Some(format!("codex failed with {}: {stderr}", output.status)),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name() {
        assert_eq!(Codex::new().name(), "codex");
    }

    #[tokio::test]
    async fn test_spawn_failure_is_infra_error() {
        let agent = Codex::new().with_command("definitely-not-codex-xyz");
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
    async fn test_nonzero_exit_is_agent_reported_failure() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-codex");
        std::fs::write(&script, "#!/bin/sh\necho 'could not finish'\nexit 3\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let agent = Codex::new().with_command(&script.to_string_lossy());
        let cancel = CancellationToken::new();
        let task = AgentTask {
            id: "t1".into(),
            spec: "spec".into(),
            workspace: dir.path().to_path_buf(),
        };

        let outcome = agent.execute(&cancel, &task).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.summary, "could not finish");
        assert!(outcome.error.is_some());
    }
}

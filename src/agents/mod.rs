//! Coding-agent collaborators.
//!
//! An [`Agent`] takes a task specification and an isolated workspace,
//! does the work, and reports back. The orchestrator core depends only on
//! this trait; the concrete implementations here spawn external CLIs.

pub mod claude;
pub mod codex;

pub use claude::ClaudeCode;
pub use codex::Codex;

use crate::errors::AgentError;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What an agent needs to execute one task.
#[derive(Debug, Clone)]
pub struct AgentTask {
    pub id: String,
    /// Full instruction payload (spec plus accumulated context).
    pub spec: String,
    /// Isolated workspace the agent works in.
    pub workspace: PathBuf,
}

/// What an agent reports back.
///
/// `success: false` means the agent ran and declared failure; it is routed
/// through the retry policy, not raised. Infrastructure problems launching
/// or running the agent surface as [`AgentError`] instead.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub success: bool,
    pub summary: String,
    pub duration: Duration,
    pub error: Option<String>,
}

/// A coding agent capable of executing tasks in a workspace.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        cancel: &CancellationToken,
        task: &AgentTask,
    ) -> Result<AgentOutcome, AgentError>;
}

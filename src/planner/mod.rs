//! Planning pipeline: drives the specify → clarify → plan → tasks steps
//! and parses the markdown artifacts they produce.
//!
//! The concrete driver shells out to the spec-kit tooling through the
//! Claude CLI's slash commands; the orchestrator depends only on the
//! [`PlanDriver`] trait so tests can substitute canned artifacts.

pub mod parser;

use crate::agents::ClaudeCode;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Outcome of one pipeline step.
#[derive(Debug, Clone)]
pub struct ArtifactResult {
    /// Collected assistant output.
    pub output: String,
    pub success: bool,
    pub error: Option<String>,
}

/// The four artifact-producing steps of the planning pipeline.
#[async_trait]
pub trait PlanDriver: Send + Sync {
    /// One-time repository setup; failure is reported but not fatal.
    async fn initialize(&self, cancel: &CancellationToken) -> Result<()>;

    /// Produce the feature specification on the given branch.
    async fn specify(
        &self,
        cancel: &CancellationToken,
        description: &str,
        branch: &str,
    ) -> Result<ArtifactResult>;

    /// Surface clarification questions for the current spec.
    async fn clarify(&self, cancel: &CancellationToken) -> Result<ArtifactResult>;

    /// Produce the implementation plan.
    async fn plan(&self, cancel: &CancellationToken, tech_stack: &str) -> Result<ArtifactResult>;

    /// Produce the task breakdown.
    async fn tasks(&self, cancel: &CancellationToken) -> Result<ArtifactResult>;

    /// Directory holding the most recently generated artifacts.
    fn latest_feature_dir(&self) -> Option<PathBuf>;
}

/// Spec-kit driver: runs `specify init` once, then slash commands through
/// the Claude CLI in the managed repository.
pub struct SpecKitDriver {
    repo_path: PathBuf,
    specify_dir: PathBuf,
    claude: ClaudeCode,
}

impl SpecKitDriver {
    pub fn new(repo_path: &Path) -> Self {
        Self {
            repo_path: repo_path.to_path_buf(),
            specify_dir: repo_path.join(".specify"),
            claude: ClaudeCode::new(),
        }
    }

    async fn run_slash_command(
        &self,
        cancel: &CancellationToken,
        command: &str,
        args: &str,
    ) -> Result<ArtifactResult> {
        let prompt = format!("/{command} {args}");
        debug!(command, "running planning step");

        let (output, err_output, status) = self
            .claude
            .run_print(cancel, &prompt, &self.repo_path)
            .await
            .with_context(|| format!("planning step {command} failed to run"))?;

        Ok(ArtifactResult {
            output,
            success: status.success(),
            error: if status.success() {
                None
            } else {
                Some(format!("{command} exited with {status}: {}", err_output.trim()))
            },
        })
    }
}

#[async_trait]
impl PlanDriver for SpecKitDriver {
    async fn initialize(&self, cancel: &CancellationToken) -> Result<()> {
        if self.specify_dir.exists() {
            return Ok(());
        }

        let run = crate::tools::run_command(
            cancel,
            &self.repo_path,
            "specify",
            &["init", ".", "--ai", "claude", "--force"],
        )
        .await
        .context("specify init failed to run")?;

        if !run.success {
            anyhow::bail!("specify init failed: {}", run.output);
        }
        Ok(())
    }

    async fn specify(
        &self,
        cancel: &CancellationToken,
        description: &str,
        branch: &str,
    ) -> Result<ArtifactResult> {
        // Specification work happens on the feature branch.
        let _ = crate::tools::run_command(
            cancel,
            &self.repo_path,
            "git",
            &["checkout", "-B", branch],
        )
        .await;

        self.run_slash_command(cancel, "speckit.specify", description).await
    }

    async fn clarify(&self, cancel: &CancellationToken) -> Result<ArtifactResult> {
        self.run_slash_command(cancel, "speckit.clarify", "").await
    }

    async fn plan(&self, cancel: &CancellationToken, tech_stack: &str) -> Result<ArtifactResult> {
        self.run_slash_command(cancel, "speckit.plan", tech_stack).await
    }

    async fn tasks(&self, cancel: &CancellationToken) -> Result<ArtifactResult> {
        self.run_slash_command(cancel, "speckit.tasks", "").await
    }

    fn latest_feature_dir(&self) -> Option<PathBuf> {
        let specs_dir = self.specify_dir.join("specs");
        let entries = std::fs::read_dir(&specs_dir).ok()?;

        let mut dirs: Vec<PathBuf> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .map(|e| e.path())
            .collect();
        dirs.sort();
        dirs.pop()
    }
}

//! Static-analysis review collaborator.
//!
//! Wraps an external analysis CLI (`coderabbit` by default). When the CLI
//! is not installed the collaborator degrades to an informational message
//! instead of erroring, so review can proceed on the other collaborators.

use crate::review::ReviewTool;
use crate::tools::{command_available, run_command};
use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;

pub struct Analyzer {
    command: String,
    enabled: bool,
}

impl Analyzer {
    pub fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            enabled: true,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

#[async_trait]
impl ReviewTool for Analyzer {
    fn name(&self) -> &str {
        "analysis"
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
        workspace: &Path,
        branch: &str,
    ) -> Result<String> {
        if !self.enabled {
            return Ok("static analysis disabled".to_string());
        }

        if !command_available(&self.command) {
            return Ok(format!("{} not installed (skipped)", self.command));
        }

        let run = run_command(
            cancel,
            workspace,
            self.command.as_str(),
            &["review", "--branch", branch],
        )
        .await?;

        if run.output.is_empty() {
            return Ok(format!("No issues found by {}", self.command));
        }

        Ok(run.output)
    }
}

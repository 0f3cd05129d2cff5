//! External tool execution for review collaborators.
//!
//! This module provides:
//! - [`run_command`] — cancellation-aware process runner used by the
//!   linter aggregator, the static analyzer, and the test runner
//! - [`command_available`] — PATH lookup for graceful degradation when a
//!   tool is not installed

pub mod analyzer;
pub mod linter;

pub use analyzer::Analyzer;
pub use linter::Linter;

use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Outcome of a finished command.
#[derive(Debug, Clone)]
pub struct CommandRun {
    /// Stdout, falling back to stderr when stdout is empty. When the
    /// command failed and both streams have content, stderr is appended
    /// for context.
    pub output: String,
    /// Whether the command exited successfully.
    pub success: bool,
}

/// Run a command in `dir`, honoring cancellation.
///
/// A non-zero exit is not an error at this level (linters exit non-zero
/// when they find issues); it is reported through `CommandRun::success`.
/// The returned error covers spawn failures and cancellation only.
pub async fn run_command(
    cancel: &CancellationToken,
    dir: &Path,
    program: impl AsRef<OsStr>,
    args: &[&str],
) -> Result<CommandRun> {
    let program = program.as_ref();
    let mut cmd = Command::new(program);
    cmd.args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd
        .spawn()
        .with_context(|| format!("failed to spawn {}", program.to_string_lossy()))?;

    let wait = child.wait_with_output();
    tokio::pin!(wait);

    let output = tokio::select! {
        // Dropping the pinned future kills the child via kill_on_drop.
        _ = cancel.cancelled() => anyhow::bail!("command cancelled"),
        result = &mut wait => result.context("failed to wait for command")?,
    };

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut text = stdout.clone();
    if text.is_empty() && !stderr.is_empty() {
        text = stderr.clone();
    }
    if !output.status.success() && !stderr.is_empty() && !stdout.is_empty() {
        text = format!("{text}\n\nStderr:\n{stderr}");
    }

    Ok(CommandRun {
        output: text,
        success: output.status.success(),
    })
}

/// Check whether a command is available on PATH.
pub fn command_available(name: &str) -> bool {
    which::which(name).is_ok()
}

//! Automated review of completed task work.
//!
//! After an agent finishes a task, the work is routed through the
//! `ReviewEngine`, which fans out to three independent collaborators
//! (static analysis, linters, tests), waits for all of them, and derives a
//! three-valued verdict either deterministically from the tool outputs or
//! by delegating to an LLM review synthesizer.

pub mod engine;
pub mod verdict;

pub use engine::{ReviewEngine, ReviewSynthesizer};
pub use verdict::parse_verdict;

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Three-valued outcome of a review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The work is acceptable; request human approval.
    Approve,
    /// The work needs changes; eligible for automatic retry.
    RequestChanges,
    /// Automation cannot judge this; escalate to a human.
    Block,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Approve => "APPROVE",
            Verdict::RequestChanges => "REQUEST_CHANGES",
            Verdict::Block => "BLOCK",
        };
        write!(f, "{s}")
    }
}

/// Full output of one review pass.
#[derive(Debug, Clone)]
pub struct ReviewResult {
    pub verdict: Verdict,
    pub blocking_issues: Vec<String>,
    pub suggestions: Vec<String>,
    /// Raw output per collaborator, keyed by collaborator name.
    pub tool_outputs: HashMap<String, String>,
    pub summary: String,
}

/// What the engine needs to review one task's work.
#[derive(Debug, Clone)]
pub struct ReviewRequest {
    pub branch: String,
    pub base_branch: String,
    pub workspace: PathBuf,
    /// Original task instruction.
    pub spec: String,
}

/// A review collaborator: static analyzer, linter aggregator, or similar.
///
/// Absence or non-availability of the underlying tool must be reported as
/// informational output, never as an error.
#[async_trait]
pub trait ReviewTool: Send + Sync {
    fn name(&self) -> &str;

    async fn run(
        &self,
        cancel: &CancellationToken,
        workspace: &Path,
        branch: &str,
    ) -> anyhow::Result<String>;
}

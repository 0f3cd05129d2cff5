//! Typed error hierarchy for the conductor orchestrator.
//!
//! Each subsystem gets its own enum:
//! - `TransitionError` — illegal phase edge, never fatal, feature unchanged
//! - `WorkspaceError` — isolated-workspace setup/commit/push failures
//! - `AgentError` — infrastructure failures launching or running an agent
//! - `SchedulerError` — task queue failures
//! - `OrchestratorError` — registry lookups and operator-command failures
//!
//! An agent that ran but declared failure is not an error here; it is a
//! regular `AgentOutcome { success: false, .. }` routed through the retry
//! policy. Review-tool failures are likewise recorded as `"ERROR: ..."`
//! outputs, never raised.

use crate::phase::Phase;
use thiserror::Error;

/// Rejected phase transition. The feature is left untouched.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("invalid phase transition from {from} to {to}")]
pub struct TransitionError {
    pub from: Phase,
    pub to: Phase,
}

/// Errors from isolated-workspace management and git operations.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("invalid branch name: {0}")]
    InvalidBranch(String),

    #[error("failed to create worktree for {branch}: {detail}")]
    WorktreeCreate { branch: String, detail: String },

    #[error("git {operation} failed: {detail}")]
    Git {
        operation: &'static str,
        detail: String,
    },

    #[error("not a git repository: {0}")]
    NotARepository(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Infrastructure errors launching or running a coding agent.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("failed to spawn agent process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("agent execution cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Whether the error is a cooperative cancellation rather than a fault.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, AgentError::Cancelled)
    }
}

/// Errors from the task scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task queue is closed")]
    QueueClosed,
}

/// Errors surfaced by the orchestrator's public operations.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("feature {0} not found")]
    FeatureNotFound(String),

    #[error("task {0} not found")]
    TaskNotFound(String),

    #[error("feature {id} is not awaiting {gate} approval")]
    NotAwaitingApproval { id: String, gate: &'static str },

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("no feedback is currently pending")]
    NoPendingFeedback,

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

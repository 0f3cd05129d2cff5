//! Feature lifecycle phases and the transition table that governs them.
//!
//! This module provides:
//! - `Phase` enum covering the full specify → implement → approve pipeline
//! - `can_transition` — a pure lookup against the fixed adjacency table
//! - `PhaseInfo` static metadata (label, description, human-gate flag)
//!
//! The table is forward-only apart from the re-run edges (approval rejection
//! returns to the producing phase) and the reset edges out of
//! `Complete`/`Failed`, which lead back to `Idle` only. There is no direct
//! restart path from a terminal phase.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A stage in a feature's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Specifying,
    AwaitingSpecApproval,
    Clarifying,
    Planning,
    AwaitingPlanApproval,
    Tasking,
    AwaitingTaskApproval,
    Implementing,
    Reviewing,
    AwaitingCodeApproval,
    Complete,
    Failed,
}

impl Phase {
    /// Phases reachable from this phase.
    pub fn successors(self) -> &'static [Phase] {
        use Phase::*;
        match self {
            Idle => &[Specifying],
            Specifying => &[AwaitingSpecApproval, Failed],
            AwaitingSpecApproval => &[Clarifying, Specifying, Failed],
            Clarifying => &[Planning, AwaitingSpecApproval, Failed],
            Planning => &[AwaitingPlanApproval, Failed],
            AwaitingPlanApproval => &[Tasking, Planning, Failed],
            Tasking => &[AwaitingTaskApproval, Failed],
            AwaitingTaskApproval => &[Implementing, Tasking, Failed],
            Implementing => &[Reviewing, Failed],
            Reviewing => &[AwaitingCodeApproval, Implementing, Failed],
            AwaitingCodeApproval => &[Implementing, Complete, Failed],
            Complete => &[Idle],
            Failed => &[Idle],
        }
    }

    /// Static metadata for this phase.
    pub fn info(self) -> PhaseInfo {
        use Phase::*;
        match self {
            Idle => PhaseInfo::new("Idle", "Waiting for a new feature request", false),
            Specifying => PhaseInfo::new("Specifying", "Creating feature specification", false),
            AwaitingSpecApproval => PhaseInfo::new("Spec Review", "Waiting for spec approval", true),
            Clarifying => PhaseInfo::new("Clarifying", "Gathering clarifications", true),
            Planning => PhaseInfo::new("Planning", "Creating implementation plan", false),
            AwaitingPlanApproval => PhaseInfo::new("Plan Review", "Waiting for plan approval", true),
            Tasking => PhaseInfo::new("Tasking", "Breaking work down into tasks", false),
            AwaitingTaskApproval => PhaseInfo::new("Task Review", "Waiting for task approval", true),
            Implementing => PhaseInfo::new("Implementing", "Coding in progress", false),
            Reviewing => PhaseInfo::new("Reviewing", "Automated review in progress", false),
            AwaitingCodeApproval => PhaseInfo::new("Code Review", "Waiting for code approval", true),
            Complete => PhaseInfo::new("Complete", "Feature completed", false),
            Failed => PhaseInfo::new("Failed", "Feature failed", false),
        }
    }

    /// Human-readable label.
    pub fn label(self) -> &'static str {
        self.info().label
    }

    /// Whether this phase is a wait-for-human-input gate.
    pub fn needs_human(self) -> bool {
        self.info().needs_human
    }

    /// Whether this phase is terminal (only resettable to `Idle`).
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Complete | Phase::Failed)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Static metadata attached to each phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseInfo {
    /// Human-readable label
    pub label: &'static str,
    /// One-line description of what happens in the phase
    pub description: &'static str,
    /// Whether the phase waits for human input
    pub needs_human: bool,
}

impl PhaseInfo {
    const fn new(label: &'static str, description: &'static str, needs_human: bool) -> Self {
        Self {
            label,
            description,
            needs_human,
        }
    }
}

/// Check whether the transition table permits `from` → `to`.
pub fn can_transition(from: Phase, to: Phase) -> bool {
    from.successors().contains(&to)
}

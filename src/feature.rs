//! Feature aggregate: one unit of delivery work moving through the phase
//! pipeline.
//!
//! A `Feature` owns its task list, clarification Q&A state, and an
//! append-only audit log of phase transitions. The orchestrator wraps each
//! feature in its own reader/writer lock; every mutation goes through these
//! methods while that lock is held, so a rejected transition can guarantee
//! the aggregate is untouched.

use crate::errors::TransitionError;
use crate::phase::{Phase, can_transition};
use crate::planner::parser::Question;
use crate::task::{Task, TaskStatus};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Maximum length of the sanitized name segment of a branch.
const BRANCH_SLUG_MAX: usize = 30;

/// An immutable audit record of one phase transition.
#[derive(Debug, Clone)]
pub struct WorkflowEvent {
    pub timestamp: DateTime<Utc>,
    pub from_phase: Phase,
    pub to_phase: Phase,
    pub message: String,
    pub actor: String,
}

/// A unit of delivery work: identity, phase, tasks, Q&A, audit log.
#[derive(Debug)]
pub struct Feature {
    pub id: String,
    pub name: String,
    pub description: String,
    pub branch: String,

    pub phase: Phase,
    /// Id of the sequential task currently in flight, if any.
    pub current_task: Option<String>,

    pub tasks: Vec<Task>,
    /// How many sequential tasks have been dispatched.
    pub task_index: usize,

    pub pending_questions: Vec<Question>,
    pub answers: HashMap<String, String>,

    pub events: Vec<WorkflowEvent>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub tech_stack: String,
    pub constraints: String,
}

impl Feature {
    /// Create a new feature in `Idle` with a deterministically derived
    /// branch name.
    pub fn new(id: &str, name: &str, description: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            branch: derive_branch(id, name),
            phase: Phase::Idle,
            current_task: None,
            tasks: Vec::new(),
            task_index: 0,
            pending_questions: Vec::new(),
            answers: HashMap::new(),
            events: Vec::new(),
            created_at: now,
            updated_at: now,
            tech_stack: String::new(),
            constraints: String::new(),
        }
    }

    /// Transition to a new phase, appending exactly one audit event.
    ///
    /// An edge absent from the transition table is rejected: no state
    /// mutation, no event, and the caller receives the illegal pair.
    pub fn transition(&mut self, to: Phase, message: &str, actor: &str) -> Result<(), TransitionError> {
        if !can_transition(self.phase, to) {
            return Err(TransitionError {
                from: self.phase,
                to,
            });
        }

        self.events.push(WorkflowEvent {
            timestamp: Utc::now(),
            from_phase: self.phase,
            to_phase: to,
            message: message.to_string(),
            actor: actor.to_string(),
        });
        self.phase = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Replace the task list, resetting the dispatch cursor.
    pub fn set_tasks(&mut self, tasks: Vec<Task>) {
        self.tasks = tasks;
        self.task_index = 0;
        self.current_task = None;
        self.updated_at = Utc::now();
    }

    /// Look up one of this feature's tasks by id.
    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id == task_id)
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    /// The next sequential (non-parallel) task still waiting to run.
    pub fn next_sequential_pending(&self) -> Option<&Task> {
        self.tasks
            .iter()
            .find(|t| !t.is_parallel && t.status == TaskStatus::Pending)
    }

    /// Whether every task has reached `Complete`.
    pub fn all_tasks_complete(&self) -> bool {
        self.tasks.iter().all(|t| t.status == TaskStatus::Complete)
    }

    /// Whether all pending clarification questions have answers.
    pub fn all_questions_answered(&self) -> bool {
        self.pending_questions
            .iter()
            .all(|q| self.answers.contains_key(&q.id))
    }

    /// One-line progress summary.
    pub fn progress(&self) -> String {
        if self.tasks.is_empty() {
            return self.phase.to_string();
        }
        let completed = self
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Complete)
            .count();
        format!("{} ({}/{} tasks)", self.phase, completed, self.tasks.len())
    }

    /// Multi-line status report for the operator.
    pub fn status_report(&self) -> String {
        let mut report = format!("Feature: {}\n", self.name);
        report.push_str(&format!("ID: {}\n", self.id));
        report.push_str(&format!("Branch: {}\n", self.branch));
        report.push_str(&format!("Phase: {}\n", self.phase));

        if !self.tasks.is_empty() {
            let completed = self
                .tasks
                .iter()
                .filter(|t| t.status == TaskStatus::Complete)
                .count();
            report.push_str(&format!("Progress: {}/{} tasks\n", completed, self.tasks.len()));
        }

        if let Some(current) = &self.current_task {
            report.push_str(&format!("Current task: {current}\n"));
        }

        report
    }
}

/// Derive a branch name from a feature id and name.
///
/// Deterministic, contains only alphanumerics and hyphens, and bounded in
/// length regardless of input: the name is slugged (spaces become hyphens,
/// everything else non-alphanumeric is dropped) and capped.
pub fn derive_branch(id: &str, name: &str) -> String {
    let mut slug = String::new();
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '-' {
            slug.push(c);
        } else if c == ' ' {
            slug.push('-');
        }
        if slug.len() >= BRANCH_SLUG_MAX {
            break;
        }
    }
    let slug = slug.trim_matches('-');

    if slug.is_empty() {
        format!("feature-{id}")
    } else {
        format!("feature-{id}-{slug}")
    }
}

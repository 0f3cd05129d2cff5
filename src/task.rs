//! Task model: a single unit of agent work.

use crate::util::short_id;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Delimiter between accumulated context entries, kept visible so each
/// retry attempt's guidance is distinguishable in the agent prompt.
const CONTEXT_DELIMITER: &str = "\n\n---\n";

/// Lifecycle status of a task.
///
/// Advances monotonically through the variants except for the bounded
/// `Review` → `Pending` retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Review,
    AwaitingApproval,
    Complete,
    Failed,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Review => "review",
            TaskStatus::AwaitingApproval => "awaiting_approval",
            TaskStatus::Complete => "complete",
            TaskStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A unit of work dispatched to a coding agent.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: String,
    /// Original instruction text.
    pub spec: String,
    /// Feedback accumulated across retry attempts, visibly delimited.
    pub context: String,
    pub branch: String,
    /// Assigned at dispatch time, once the isolated workspace exists.
    pub worktree_path: Option<PathBuf>,
    pub agent_name: String,
    pub timeout: Duration,
    /// Retry attempt counter, starts at 0.
    pub attempt: u32,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    /// Owning feature, if any. Ad-hoc tasks have none.
    pub feature_id: Option<String>,
    /// Safe to run concurrently with the feature's other tasks.
    pub is_parallel: bool,
    pub metadata: HashMap<String, String>,
}

impl Task {
    /// Create a new ad-hoc task with a generated id and branch.
    pub fn new(spec: &str, agent_name: &str, timeout: Duration) -> Self {
        let id = short_id();
        let branch = format!("task-{id}");
        Self {
            id,
            spec: spec.to_string(),
            context: String::new(),
            branch,
            worktree_path: None,
            agent_name: agent_name.to_string(),
            timeout,
            attempt: 0,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            feature_id: None,
            is_parallel: false,
            metadata: HashMap::new(),
        }
    }

    /// Append a feedback note to the accumulated context.
    pub fn add_context(&mut self, note: &str) {
        if !self.context.is_empty() {
            self.context.push_str(CONTEXT_DELIMITER);
        }
        self.context.push_str(note);
    }

    /// Full instruction payload for dispatch: the original spec, followed by
    /// the accumulated context verbatim.
    pub fn full_spec(&self) -> String {
        if self.context.is_empty() {
            self.spec.clone()
        } else {
            format!("{}\n\n## Additional Context\n{}", self.spec, self.context)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::new("Implement login endpoint", "claude-code", Duration::from_secs(60))
    }

    #[test]
    fn test_new_task_defaults() {
        let t = task();
        assert_eq!(t.id.len(), 8);
        assert_eq!(t.branch, format!("task-{}", t.id));
        assert_eq!(t.attempt, 0);
        assert_eq!(t.status, TaskStatus::Pending);
        assert!(t.context.is_empty());
        assert!(t.feature_id.is_none());
        assert!(!t.is_parallel);
        assert!(t.worktree_path.is_none());
    }

    #[test]
    fn test_add_context_single_entry() {
        let mut t = task();
        t.add_context("first note");
        assert_eq!(t.context, "first note");
    }

    #[test]
    fn test_add_context_delimits_entries() {
        let mut t = task();
        t.add_context("first note");
        t.add_context("second note");
        assert_eq!(t.context, "first note\n\n---\nsecond note");
    }

    #[test]
    fn test_full_spec_without_context() {
        let t = task();
        assert_eq!(t.full_spec(), "Implement login endpoint");
    }

    #[test]
    fn test_full_spec_appends_context_after_spec() {
        let mut t = task();
        t.add_context("Review feedback (attempt 1):\nfix the null check");
        let full = t.full_spec();
        assert!(full.starts_with("Implement login endpoint"));
        assert!(full.contains("## Additional Context"));
        assert!(full.ends_with("fix the null check"));
    }

    #[test]
    fn test_ids_are_unique() {
        let a = task();
        let b = task();
        assert_ne!(a.id, b.id);
    }
}

//! Operator notification channel.
//!
//! The core treats notifications as fire-and-forget: a [`Notifier`] never
//! returns an error to its caller; implementations handle delivery
//! problems themselves. Approval requests carry opaque callback tokens the
//! operator echoes back through the command surface (`approve spec <id>`
//! and friends).

use async_trait::async_trait;
use console::style;

/// Which approval gate a request refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    Spec,
    Plan,
    Tasks,
    Code,
}

impl Gate {
    pub fn as_str(self) -> &'static str {
        match self {
            Gate::Spec => "spec",
            Gate::Plan => "plan",
            Gate::Tasks => "tasks",
            Gate::Code => "code",
        }
    }
}

impl std::fmt::Display for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outbound notifications and approval/escalation requests.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Plain informational message.
    async fn send(&self, message: &str);

    /// Ask the operator to approve or reject a feature's gated phase.
    async fn request_phase_approval(
        &self,
        feature_id: &str,
        gate: Gate,
        summary: &str,
        detail: &str,
    );

    /// Ask the operator to approve an individual (feature-less) task.
    async fn request_task_approval(&self, task_id: &str, summary: &str);

    /// Route a task to the operator outside the automatic retry loop.
    async fn escalate(&self, task_id: &str, reason: &str, detail: &str);
}

/// Console-backed notifier for interactive runs.
pub struct ConsoleNotifier;

const SUMMARY_MAX: usize = 500;

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn send(&self, message: &str) {
        println!("{message}");
    }

    async fn request_phase_approval(
        &self,
        feature_id: &str,
        gate: Gate,
        summary: &str,
        detail: &str,
    ) {
        println!(
            "\n{} {} approval needed for feature {}",
            style("[gate]").yellow().bold(),
            gate,
            style(feature_id).cyan()
        );
        if !summary.is_empty() {
            println!("{}", crate::util::truncate(summary, SUMMARY_MAX));
        }
        if !detail.is_empty() {
            println!("{detail}");
        }
        println!(
            "  reply: {} | {}",
            style(format!("approve {gate} {feature_id}")).green(),
            style(format!("reject {gate} {feature_id}")).red()
        );
    }

    async fn request_task_approval(&self, task_id: &str, summary: &str) {
        println!(
            "\n{} approval needed for task {}",
            style("[gate]").yellow().bold(),
            style(task_id).cyan()
        );
        if !summary.is_empty() {
            println!("{}", crate::util::truncate(summary, SUMMARY_MAX));
        }
        println!(
            "  reply: {} | {}",
            style(format!("approve task {task_id}")).green(),
            style(format!("reject task {task_id}")).red()
        );
    }

    async fn escalate(&self, task_id: &str, reason: &str, detail: &str) {
        println!(
            "\n{} task {} needs a human decision: {reason}",
            style("[escalation]").red().bold(),
            style(task_id).cyan()
        );
        if !detail.is_empty() {
            println!("{}", crate::util::truncate(detail, SUMMARY_MAX));
        }
        println!(
            "  reply: {} | {}",
            style(format!("retry {task_id}")).green(),
            style(format!("cancel {task_id}")).red()
        );
    }
}

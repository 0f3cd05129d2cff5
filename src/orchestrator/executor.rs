//! Per-task execution body: workspace, agent, commit, review, and the
//! routing of outcomes back into feature state.
//!
//! Teardown is unconditional: whatever way the body exits (success,
//! failure, cancellation, timeout), the isolated workspace is removed and
//! a terminal (or requeued) status is reported.

use super::Inner;
use crate::agents::AgentTask;
use crate::notify::Gate;
use crate::phase::Phase;
use crate::policy::{Disposition, ExecutionOutcome};
use crate::review::ReviewRequest;
use crate::scheduler::TaskExecutor;
use crate::task::{Task, TaskStatus};
use crate::util::truncate;
use crate::validation::sanitize_message;
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bridges the scheduler to the orchestrator's execution body.
pub struct TaskRunner {
    inner: Arc<Inner>,
}

impl TaskRunner {
    pub(crate) fn new(inner: Arc<Inner>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl TaskExecutor for TaskRunner {
    async fn execute(&self, task: Task, cancel: CancellationToken) {
        self.inner.execute_task(task, cancel).await;
    }
}

impl Inner {
    pub(crate) async fn execute_task(&self, mut task: Task, cancel: CancellationToken) {
        task.status = TaskStatus::Running;
        self.update_task_record(&task).await;

        info!(task = %task.id, agent = %task.agent_name, attempt = task.attempt, "task started");
        self.notifier
            .send(&format!(
                "Task started\nID: {}\nAgent: {}\nBranch: {}",
                task.id, task.agent_name, task.branch
            ))
            .await;

        let outcome = self.run_task_body(&mut task, &cancel).await;

        // Teardown runs on every exit path; removing a missing workspace
        // is a no-op.
        if let Err(e) = self.repo.remove_workspace(&task.branch).await {
            warn!(task = %task.id, error = %e, "workspace teardown failed");
        }

        self.settle_task(task, outcome).await;
    }

    async fn run_task_body(
        &self,
        task: &mut Task,
        cancel: &CancellationToken,
    ) -> ExecutionOutcome {
        let workspace = match self.repo.create_workspace(&task.branch).await {
            Ok(path) => path,
            Err(e) => {
                return ExecutionOutcome::InfraError(format!("workspace setup failed: {e}"));
            }
        };
        task.worktree_path = Some(workspace.clone());

        let Some(agent) = self.agents.get(&task.agent_name) else {
            return ExecutionOutcome::InfraError(format!("unknown agent: {}", task.agent_name));
        };

        let agent_task = AgentTask {
            id: task.id.clone(),
            spec: task.full_spec(),
            workspace: workspace.clone(),
        };

        let outcome = match agent.execute(cancel, &agent_task).await {
            Err(e) if e.is_cancelled() => return ExecutionOutcome::Cancelled,
            Err(e) => {
                return ExecutionOutcome::InfraError(format!("agent execution failed: {e}"));
            }
            Ok(outcome) => outcome,
        };
        if cancel.is_cancelled() {
            return ExecutionOutcome::Cancelled;
        }

        debug!(
            task = %task.id,
            success = outcome.success,
            duration_secs = outcome.duration.as_secs(),
            "agent finished"
        );

        if !outcome.success {
            let detail = outcome.error.unwrap_or(outcome.summary);
            return ExecutionOutcome::AgentFailure(detail);
        }

        let message = format!("Task {}: {}", task.id, truncate(&task.spec, 50));
        if let Err(e) = self
            .repo
            .commit_and_push(&workspace, &task.branch, &message)
            .await
        {
            return ExecutionOutcome::InfraError(format!("commit and push failed: {e}"));
        }

        task.status = TaskStatus::Review;
        self.update_task_record(task).await;
        self.feature_transition_quiet(task, Phase::Reviewing, "Task entering review")
            .await;
        self.notifier
            .send(&format!("Reviewing {}...", task.id))
            .await;

        let request = ReviewRequest {
            branch: task.branch.clone(),
            base_branch: self.repo.main_branch().to_string(),
            workspace,
            spec: task.spec.clone(),
        };

        match self.review.review(cancel, &request).await {
            _ if cancel.is_cancelled() => ExecutionOutcome::Cancelled,
            Ok(result) => ExecutionOutcome::Reviewed(result),
            Err(e) => ExecutionOutcome::InfraError(format!("review failed: {e:#}")),
        }
    }

    /// Apply the retry policy's decision to the finished attempt.
    async fn settle_task(&self, mut task: Task, outcome: ExecutionOutcome) {
        match self.policy.decide(&outcome, task.attempt) {
            Disposition::Retry { feedback } => {
                task.attempt += 1;
                task.add_context(&feedback);
                task.status = TaskStatus::Pending;
                self.update_task_record(&task).await;
                self.feature_transition_quiet(&task, Phase::Implementing, "Task retrying")
                    .await;

                info!(task = %task.id, attempt = task.attempt, "retrying task");
                self.notifier
                    .send(&format!(
                        "Retrying task {} (attempt {}/{})\n{}",
                        task.id,
                        task.attempt,
                        self.policy.max_retries(),
                        sanitize_message(&feedback)
                    ))
                    .await;
                self.enqueue_or_fail(task).await;
            }

            Disposition::Fail { reason } => {
                task.status = TaskStatus::Failed;
                self.update_task_record(&task).await;

                warn!(task = %task.id, reason = %reason, "task failed terminally");
                self.notifier
                    .send(&format!(
                        "Task failed\nID: {}\nError: {}",
                        task.id,
                        sanitize_message(&reason)
                    ))
                    .await;
            }

            Disposition::Escalate { reason, detail } => {
                task.status = TaskStatus::AwaitingApproval;
                self.update_task_record(&task).await;

                info!(task = %task.id, reason = %reason, "task escalated");
                self.notifier
                    .escalate(&task.id, &reason, &sanitize_message(&detail))
                    .await;
            }

            Disposition::AwaitApproval => {
                task.status = TaskStatus::AwaitingApproval;
                self.update_task_record(&task).await;

                let summary = match &outcome {
                    ExecutionOutcome::Reviewed(review) => review.summary.clone(),
                    _ => String::new(),
                };

                if let Some(feature_id) = task.feature_id.clone() {
                    self.feature_transition_quiet(
                        &task,
                        Phase::AwaitingCodeApproval,
                        "Review approved, awaiting code approval",
                    )
                    .await;
                    self.notifier
                        .request_phase_approval(
                            &feature_id,
                            Gate::Code,
                            &summary,
                            &format!("Task: {}", task.id),
                        )
                        .await;
                } else {
                    self.notifier.request_task_approval(&task.id, &summary).await;
                }
            }
        }
    }

    /// Copy a working task's mutable fields back into its home record
    /// (feature task list or the standalone registry).
    async fn update_task_record(&self, task: &Task) {
        if let Some(feature_id) = &task.feature_id {
            let Some(feature) = self.get_feature(feature_id).await else {
                warn!(task = %task.id, feature = %feature_id, "task's feature is gone");
                return;
            };
            let mut f = feature.write().await;
            if let Some(record) = f.task_mut(&task.id) {
                record.status = task.status;
                record.attempt = task.attempt;
                record.context = task.context.clone();
                record.worktree_path = task.worktree_path.clone();
            }
            self.persist(&f);
        } else if let Some(record) = self.standalone.write().await.get_mut(&task.id) {
            *record = task.clone();
        }
    }

    /// Attempt a feature phase transition driven by task progress.
    ///
    /// With parallel tasks in flight the feature may already sit in the
    /// target phase (or ahead of it); a rejected edge here is expected and
    /// only logged.
    async fn feature_transition_quiet(&self, task: &Task, to: Phase, message: &str) {
        let Some(feature_id) = &task.feature_id else {
            return;
        };
        let Some(feature) = self.get_feature(feature_id).await else {
            return;
        };

        let mut f = feature.write().await;
        match f.transition(to, message, super::ACTOR) {
            Ok(()) => self.persist(&f),
            Err(e) => debug!(feature = %feature_id, error = %e, "task-driven transition skipped"),
        }
    }
}

//! Retry and escalation policy.
//!
//! A pure decision function: given what happened to a task attempt and the
//! retry budget, decide whether to retry with feedback, fail terminally,
//! request approval, or hand the task to a human. The orchestrator applies
//! the decision; nothing here mutates state.

use crate::review::{ReviewResult, Verdict};

/// What happened to one task attempt.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    /// Infrastructure failed before or around the agent: workspace setup,
    /// process spawn, commit/push.
    InfraError(String),
    /// The agent ran to completion but declared failure.
    AgentFailure(String),
    /// The agent succeeded and the work was reviewed.
    Reviewed(ReviewResult),
    /// The attempt was cancelled or timed out.
    Cancelled,
}

/// What to do next with the task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Re-enqueue with this feedback appended to the task context.
    Retry { feedback: String },
    /// Mark terminally failed.
    Fail { reason: String },
    /// Hand to a human, outside the retry budget.
    Escalate { reason: String, detail: String },
    /// Work approved by review; request human approval.
    AwaitApproval,
}

/// Bounded-retry policy.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Decide the next step for a task whose current attempt counter is
    /// `attempt`. A retry decision implies the caller increments the
    /// counter; the feedback already names the upcoming attempt.
    pub fn decide(&self, outcome: &ExecutionOutcome, attempt: u32) -> Disposition {
        match outcome {
            ExecutionOutcome::InfraError(detail) => {
                if attempt < self.max_retries {
                    Disposition::Retry {
                        feedback: format!("Previous attempt failed with error: {detail}"),
                    }
                } else {
                    Disposition::Fail {
                        reason: detail.clone(),
                    }
                }
            }

            ExecutionOutcome::AgentFailure(summary) => {
                if attempt < self.max_retries {
                    Disposition::Retry {
                        feedback: format!("Previous attempt failed:\n{summary}"),
                    }
                } else {
                    Disposition::Fail {
                        reason: format!("agent failed: {summary}"),
                    }
                }
            }

            ExecutionOutcome::Reviewed(review) => match review.verdict {
                Verdict::Approve => Disposition::AwaitApproval,
                Verdict::RequestChanges => {
                    if attempt < self.max_retries {
                        Disposition::Retry {
                            feedback: format!(
                                "Review feedback (attempt {}):\n{}",
                                attempt + 1,
                                review.summary
                            ),
                        }
                    } else {
                        Disposition::Fail {
                            reason: format!("review requested changes: {}", review.summary),
                        }
                    }
                }
                // A block means automation cannot judge this; the retry
                // budget does not apply.
                Verdict::Block => Disposition::Escalate {
                    reason: "Blocking issues found".to_string(),
                    detail: review.summary.clone(),
                },
            },

            ExecutionOutcome::Cancelled => Disposition::Fail {
                reason: "task cancelled or timed out".to_string(),
            },
        }
    }
}

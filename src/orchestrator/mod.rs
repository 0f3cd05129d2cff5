//! Feature orchestrator: owns the feature registry and drives phase
//! handlers.
//!
//! The orchestrator is the top-level coordinator. It creates features,
//! walks them through the phase state machine by invoking the planning
//! collaborators between phases, pauses at human approval gates, pushes
//! implementation tasks into the scheduler, and folds task outcomes (via
//! the retry policy) back into feature state.
//!
//! Locking: the registry map and each feature carry their own
//! reader/writer lock. Locks are held for short critical sections only;
//! collaborator calls happen outside them.

mod executor;

pub use executor::TaskRunner;

use crate::agents::{Agent, ClaudeCode, Codex};
use crate::config::Config;
use crate::errors::OrchestratorError;
use crate::feature::Feature;
use crate::notify::{ConsoleNotifier, Gate, Notifier};
use crate::phase::Phase;
use crate::planner::{PlanDriver, SpecKitDriver, parser};
use crate::policy::RetryPolicy;
use crate::repo::{GitRepository, Repository};
use crate::review::{ReviewEngine, ReviewSynthesizer};
use crate::scheduler::{TaskQueue, TaskScheduler};
use crate::storage::{FeatureSnapshot, FileStore};
use crate::task::{Task, TaskStatus};
use crate::tools::{Analyzer, Linter};
use crate::util::{short_id, truncate};
use crate::validation::sanitize_message;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Actor name recorded on automated transitions.
const ACTOR: &str = "conductor";

/// Actor name recorded on operator-driven transitions.
const OPERATOR: &str = "operator";

/// Tracks that free-text operator input is expected for a feature.
///
/// One slot per orchestrator: only one feature can be awaiting free-text
/// feedback at a time.
#[derive(Debug, Clone)]
pub struct PendingFeedback {
    pub feature_id: String,
    pub gate: Gate,
    pub task_id: Option<String>,
}

/// External collaborators the orchestrator is wired with.
pub struct Collaborators {
    pub repo: Arc<dyn Repository>,
    pub agents: Vec<Arc<dyn Agent>>,
    pub planner: Arc<dyn PlanDriver>,
    pub notifier: Arc<dyn Notifier>,
    pub synthesizer: Option<Arc<dyn ReviewSynthesizer>>,
    pub storage: Option<FileStore>,
}

pub(crate) struct Inner {
    pub(crate) cfg: Config,
    pub(crate) repo: Arc<dyn Repository>,
    pub(crate) agents: HashMap<String, Arc<dyn Agent>>,
    pub(crate) review: ReviewEngine,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) planner: Arc<dyn PlanDriver>,
    pub(crate) storage: Option<FileStore>,
    pub(crate) policy: RetryPolicy,
    pub(crate) scheduler: TaskScheduler,
    queue: StdMutex<Option<TaskQueue>>,
    pub(crate) features: RwLock<HashMap<String, Arc<RwLock<Feature>>>>,
    pub(crate) standalone: RwLock<HashMap<String, Task>>,
    pending_feedback: StdMutex<Option<PendingFeedback>>,
    pub(crate) shutdown: CancellationToken,
}

/// Top-level coordinator for feature delivery.
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(cfg: Config, collaborators: Collaborators) -> Self {
        let (scheduler, queue) = TaskScheduler::new(cfg.concurrency.max_tasks);

        let analyzer = Arc::new(Analyzer::new(&cfg.review.analyzer));
        let linter = Arc::new(Linter::new(&cfg.review.linters));
        let mut review = ReviewEngine::new(
            collaborators.repo.clone(),
            analyzer,
            linter,
            &cfg.review.test_command,
        );
        if cfg.review.use_llm
            && let Some(synthesizer) = collaborators.synthesizer
        {
            review = review.with_synthesizer(synthesizer);
        }

        let agents: HashMap<String, Arc<dyn Agent>> = collaborators
            .agents
            .into_iter()
            .map(|agent| (agent.name().to_string(), agent))
            .collect();

        let policy = RetryPolicy::new(cfg.review.max_retries);

        Self {
            inner: Arc::new(Inner {
                cfg,
                repo: collaborators.repo,
                agents,
                review,
                notifier: collaborators.notifier,
                planner: collaborators.planner,
                storage: collaborators.storage,
                policy,
                scheduler,
                queue: StdMutex::new(Some(queue)),
                features: RwLock::new(HashMap::new()),
                standalone: RwLock::new(HashMap::new()),
                pending_feedback: StdMutex::new(None),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Wire the default collaborators from configuration.
    pub fn from_config(cfg: Config) -> Result<Self> {
        let repo: Arc<dyn Repository> = Arc::new(GitRepository::open(
            &cfg.repo.path,
            &cfg.repo.remote,
            &cfg.repo.main_branch,
        )?);

        let mut agents: Vec<Arc<dyn Agent>> = Vec::new();
        if cfg.agents.claude_code.enabled {
            agents.push(Arc::new(ClaudeCode::new()));
        }
        if cfg.agents.codex.enabled {
            agents.push(Arc::new(Codex::new()));
        }

        let planner: Arc<dyn PlanDriver> = Arc::new(SpecKitDriver::new(&cfg.repo.path));
        let notifier: Arc<dyn Notifier> = Arc::new(ConsoleNotifier);
        let synthesizer: Option<Arc<dyn ReviewSynthesizer>> = cfg
            .review
            .use_llm
            .then(|| Arc::new(ClaudeCode::reviewer()) as Arc<dyn ReviewSynthesizer>);
        let storage = Some(FileStore::open(&cfg.storage.path)?);

        Ok(Self::new(
            cfg,
            Collaborators {
                repo,
                agents,
                planner,
                notifier,
                synthesizer,
                storage,
            },
        ))
    }

    /// Initialize tooling, restore persisted features, and start the task
    /// dispatcher. Returns immediately; work proceeds in the background
    /// until [`Orchestrator::shutdown`].
    pub async fn start(&self) -> Result<()> {
        if let Err(e) = self.inner.planner.initialize(&self.inner.shutdown).await {
            warn!(error = %format!("{e:#}"), "planning tooling initialization failed");
        }

        let restored = self.inner.restore_features().await;
        if restored > 0 {
            info!(count = restored, "restored persisted features");
        }

        let queue = self
            .inner
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .context("orchestrator already started")?;

        let runner = Arc::new(TaskRunner::new(self.inner.clone()));
        self.inner
            .scheduler
            .spawn_dispatcher(queue, runner, self.inner.shutdown.clone());

        self.inner.notifier.send("conductor ready").await;
        Ok(())
    }

    /// Stop the dispatcher and cancel in-flight work cooperatively.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    // =====================================================================
    // Feature lifecycle operations
    // =====================================================================

    /// Create a feature and kick off the specification phase.
    pub async fn start_feature(
        &self,
        name: &str,
        description: &str,
    ) -> Result<String, OrchestratorError> {
        let id = short_id();
        let feature = Feature::new(&id, name, description);
        let branch = feature.branch.clone();

        let handle = Arc::new(RwLock::new(feature));
        self.inner
            .features
            .write()
            .await
            .insert(id.clone(), handle.clone());
        {
            let f = handle.read().await;
            self.inner.persist(&f);
        }

        info!(feature = %id, name, "feature started");
        self.inner
            .notifier
            .send(&format!(
                "New feature started\nID: {id}\nName: {name}\nBranch: {branch}"
            ))
            .await;

        self.inner.spawn_specification(handle);
        Ok(id)
    }

    pub async fn approve_spec(&self, feature_id: &str) -> Result<(), OrchestratorError> {
        let feature = self.inner.require_gate(feature_id, Phase::AwaitingSpecApproval, "spec").await?;
        self.inner
            .notifier
            .send(&format!(
                "Spec approved for {feature_id}. Starting clarification..."
            ))
            .await;
        self.inner.spawn_clarification(feature);
        Ok(())
    }

    pub async fn reject_spec(&self, feature_id: &str) -> Result<(), OrchestratorError> {
        self.inner
            .reject_with_feedback(feature_id, Phase::AwaitingSpecApproval, Gate::Spec)
            .await
    }

    pub async fn approve_plan(&self, feature_id: &str) -> Result<(), OrchestratorError> {
        let feature = self.inner.require_gate(feature_id, Phase::AwaitingPlanApproval, "plan").await?;
        self.inner
            .notifier
            .send(&format!("Plan approved for {feature_id}. Generating tasks..."))
            .await;
        self.inner.spawn_tasking(feature);
        Ok(())
    }

    pub async fn reject_plan(&self, feature_id: &str) -> Result<(), OrchestratorError> {
        self.inner
            .reject_with_feedback(feature_id, Phase::AwaitingPlanApproval, Gate::Plan)
            .await
    }

    pub async fn approve_tasks(&self, feature_id: &str) -> Result<(), OrchestratorError> {
        let feature = self.inner.require_gate(feature_id, Phase::AwaitingTaskApproval, "task").await?;
        self.inner
            .notifier
            .send(&format!(
                "Tasks approved for {feature_id}. Starting implementation..."
            ))
            .await;
        self.inner.spawn_implementation(feature);
        Ok(())
    }

    pub async fn reject_tasks(&self, feature_id: &str) -> Result<(), OrchestratorError> {
        self.inner
            .reject_with_feedback(feature_id, Phase::AwaitingTaskApproval, Gate::Tasks)
            .await
    }

    /// Approve the feature's code gate: complete the approved tasks, then
    /// either finish the feature or release the next sequential task.
    pub async fn approve_code(&self, feature_id: &str) -> Result<(), OrchestratorError> {
        let feature = self.inner.require_gate(feature_id, Phase::AwaitingCodeApproval, "code").await?;

        let next_task = {
            let mut f = feature.write().await;

            for task in f.tasks.iter_mut() {
                if task.status == TaskStatus::AwaitingApproval {
                    task.status = TaskStatus::Complete;
                }
            }
            f.current_task = None;

            if f.all_tasks_complete() {
                f.transition(Phase::Complete, "All tasks completed", OPERATOR)?;
                self.inner.persist(&f);
                None
            } else if let Some(next) = f.next_sequential_pending().cloned() {
                f.current_task = Some(next.id.clone());
                f.transition(Phase::Implementing, "Code approved, next task released", OPERATOR)?;
                self.inner.persist(&f);
                Some(next)
            } else {
                f.transition(Phase::Implementing, "Code approved, parallel tasks in flight", OPERATOR)?;
                self.inner.persist(&f);
                None
            }
        };

        match next_task {
            Some(task) => {
                self.inner
                    .notifier
                    .send(&format!(
                        "Starting next task {} for feature {feature_id}...",
                        task.id
                    ))
                    .await;
                self.inner.enqueue_or_fail(task).await;
            }
            None => {
                let f = feature.read().await;
                if f.phase == Phase::Complete {
                    self.inner
                        .notifier
                        .send(&format!(
                            "Feature complete\nID: {}\nName: {}\nBranch: {}\nReady for final review and merge.",
                            f.id, f.name, f.branch
                        ))
                        .await;
                } else {
                    self.inner
                        .notifier
                        .send(&format!(
                            "Waiting for remaining parallel tasks in feature {feature_id}..."
                        ))
                        .await;
                }
            }
        }
        Ok(())
    }

    /// Reject the code gate: cancel the task under review and wait for
    /// operator guidance.
    pub async fn reject_code(&self, feature_id: &str) -> Result<(), OrchestratorError> {
        let feature = self
            .inner
            .get_feature(feature_id)
            .await
            .ok_or_else(|| OrchestratorError::FeatureNotFound(feature_id.to_string()))?;

        let current = { feature.read().await.current_task.clone() };
        if let Some(task_id) = &current {
            self.inner.scheduler.cancel(task_id);
        }

        self.inner.set_pending_feedback(PendingFeedback {
            feature_id: feature_id.to_string(),
            gate: Gate::Code,
            task_id: current,
        });
        self.inner
            .notifier
            .send(&format!(
                "Code rejected for {feature_id}. Reply with: feedback <required changes>"
            ))
            .await;
        Ok(())
    }

    /// Merge an individual (feature-less) task's branch.
    pub async fn approve_task(&self, task_id: &str) -> Result<(), OrchestratorError> {
        let branch = {
            let map = self.inner.standalone.read().await;
            map.get(task_id)
                .map(|t| t.branch.clone())
                .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))?
        };

        match self.inner.repo.merge_branch(&branch).await {
            Ok(()) => {
                if let Some(task) = self.inner.standalone.write().await.get_mut(task_id) {
                    task.status = TaskStatus::Complete;
                }
                self.inner
                    .notifier
                    .send(&format!("Task {task_id} merged successfully"))
                    .await;
                Ok(())
            }
            Err(e) => {
                self.inner
                    .notifier
                    .send(&format!(
                        "Merge failed for {task_id}: {}",
                        sanitize_message(&e.to_string())
                    ))
                    .await;
                Err(OrchestratorError::Other(e.into()))
            }
        }
    }

    /// Reject an individual task: cancel it if running, otherwise delete
    /// its branch.
    pub async fn reject_task(&self, task_id: &str) -> Result<(), OrchestratorError> {
        if self.inner.scheduler.cancel(task_id) {
            self.inner
                .notifier
                .send(&format!("Task {task_id} rejected and cancelled"))
                .await;
            return Ok(());
        }

        let branch = {
            let map = self.inner.standalone.read().await;
            map.get(task_id).map(|t| t.branch.clone())
        };
        if let Some(branch) = branch {
            let _ = self.inner.repo.delete_branch(&branch).await;
        }
        self.inner
            .notifier
            .send(&format!("Task {task_id} rejected"))
            .await;
        Ok(())
    }

    /// Record clarification answers; planning starts once every pending
    /// question has one.
    pub async fn answer_clarifications(
        &self,
        feature_id: &str,
        answers: HashMap<String, String>,
    ) -> Result<(), OrchestratorError> {
        let feature = self
            .inner
            .get_feature(feature_id)
            .await
            .ok_or_else(|| OrchestratorError::FeatureNotFound(feature_id.to_string()))?;

        let ready = {
            let mut f = feature.write().await;
            f.answers.extend(answers);
            self.inner.persist(&f);
            f.phase == Phase::Clarifying
                && !f.pending_questions.is_empty()
                && f.all_questions_answered()
        };

        if ready {
            self.inner
                .notifier
                .send(&format!(
                    "All clarifications answered for {feature_id}. Proceeding to planning..."
                ))
                .await;
            self.inner.spawn_planning(feature);
        }
        Ok(())
    }

    pub async fn set_tech_stack(
        &self,
        feature_id: &str,
        tech_stack: &str,
    ) -> Result<(), OrchestratorError> {
        let feature = self
            .inner
            .get_feature(feature_id)
            .await
            .ok_or_else(|| OrchestratorError::FeatureNotFound(feature_id.to_string()))?;

        {
            let mut f = feature.write().await;
            f.tech_stack = tech_stack.to_string();
            self.inner.persist(&f);
        }
        self.inner
            .notifier
            .send(&format!("Tech stack set for {feature_id}: {tech_stack}"))
            .await;
        Ok(())
    }

    /// Free-text operator input for whichever feature is awaiting it.
    pub async fn provide_feedback(&self, text: &str) -> Result<(), OrchestratorError> {
        let pending = self
            .inner
            .pending_feedback
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .ok_or(OrchestratorError::NoPendingFeedback)?;

        let feature = self
            .inner
            .get_feature(&pending.feature_id)
            .await
            .ok_or_else(|| OrchestratorError::FeatureNotFound(pending.feature_id.clone()))?;

        match pending.gate {
            Gate::Spec | Gate::Plan | Gate::Tasks => {
                {
                    let mut f = feature.write().await;
                    if !f.constraints.is_empty() {
                        f.constraints.push('\n');
                    }
                    f.constraints.push_str(text);
                    self.inner.persist(&f);
                }
                match pending.gate {
                    Gate::Spec => self.inner.spawn_specification(feature),
                    Gate::Plan => self.inner.spawn_planning(feature),
                    Gate::Tasks => self.inner.spawn_tasking(feature),
                    Gate::Code => unreachable!(),
                }
            }
            Gate::Code => {
                let Some(task_id) = pending.task_id else {
                    return Err(OrchestratorError::NoPendingFeedback);
                };
                let requeue = {
                    let mut f = feature.write().await;
                    let task = f
                        .task_mut(&task_id)
                        .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.clone()))?;
                    task.add_context(&format!("Operator feedback:\n{text}"));
                    task.status = TaskStatus::Pending;
                    let clone = task.clone();
                    if f.transition(Phase::Implementing, "Operator requested changes", OPERATOR).is_err() {
                        debug!(feature = %f.id, "phase unchanged on operator feedback");
                    }
                    self.inner.persist(&f);
                    clone
                };
                self.inner.enqueue_or_fail(requeue).await;
            }
        }
        Ok(())
    }

    // =====================================================================
    // Task operations
    // =====================================================================

    /// Create an ad-hoc task for a named agent.
    pub async fn assign_task(
        &self,
        agent_name: &str,
        spec: &str,
    ) -> Result<String, OrchestratorError> {
        if !self.inner.agents.contains_key(agent_name) {
            return Err(OrchestratorError::UnknownAgent(agent_name.to_string()));
        }

        let task = Task::new(spec, agent_name, self.inner.cfg.concurrency.task_timeout());
        let id = task.id.clone();

        self.inner
            .standalone
            .write()
            .await
            .insert(id.clone(), task.clone());
        self.inner
            .notifier
            .send(&format!("Task created: {id}\nSpec: {}", truncate(spec, 100)))
            .await;
        self.inner.enqueue_or_fail(task).await;
        Ok(id)
    }

    /// Cancel a task or a feature by id.
    pub async fn cancel(&self, id: &str) -> Result<String, OrchestratorError> {
        if self.inner.scheduler.cancel(id) {
            return Ok(format!("Cancelled task {id}"));
        }

        let Some(feature) = self.inner.get_feature(id).await else {
            return Err(OrchestratorError::TaskNotFound(id.to_string()));
        };

        let current = {
            let mut f = feature.write().await;
            if let Err(e) = f.transition(Phase::Failed, "Cancelled by operator", OPERATOR) {
                warn!(feature = %id, error = %e, "cancel could not fail the feature");
            }
            self.inner.persist(&f);
            f.current_task.clone()
        };
        if let Some(task_id) = current {
            self.inner.scheduler.cancel(&task_id);
        }

        self.inner
            .notifier
            .send(&format!("Cancelled feature {id}"))
            .await;
        Ok(format!("Cancelled feature {id}"))
    }

    /// Re-run an escalated or failed task from a clean attempt counter.
    pub async fn retry_task(&self, task_id: &str) -> Result<(), OrchestratorError> {
        // Feature-owned tasks first.
        let features: Vec<Arc<RwLock<Feature>>> =
            self.inner.features.read().await.values().cloned().collect();
        for feature in features {
            let mut f = feature.write().await;
            if let Some(task) = f.task_mut(task_id) {
                task.attempt = 0;
                task.status = TaskStatus::Pending;
                let clone = task.clone();
                self.inner.persist(&f);
                drop(f);
                self.inner
                    .notifier
                    .send(&format!("Retrying task {task_id}..."))
                    .await;
                self.inner.enqueue_or_fail(clone).await;
                return Ok(());
            }
        }

        let clone = {
            let mut map = self.inner.standalone.write().await;
            let Some(task) = map.get_mut(task_id) else {
                return Err(OrchestratorError::TaskNotFound(task_id.to_string()));
            };
            task.attempt = 0;
            task.status = TaskStatus::Pending;
            task.clone()
        };
        self.inner
            .notifier
            .send(&format!("Retrying task {task_id}..."))
            .await;
        self.inner.enqueue_or_fail(clone).await;
        Ok(())
    }

    // =====================================================================
    // Introspection
    // =====================================================================

    pub fn agent_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.agents.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn feature_phase(&self, feature_id: &str) -> Result<Phase, OrchestratorError> {
        let feature = self
            .inner
            .get_feature(feature_id)
            .await
            .ok_or_else(|| OrchestratorError::FeatureNotFound(feature_id.to_string()))?;
        let phase = { feature.read().await.phase };
        Ok(phase)
    }

    /// Per-task `(id, spec, status, attempt)` rows for a feature.
    pub async fn task_statuses(
        &self,
        feature_id: &str,
    ) -> Result<Vec<(String, String, TaskStatus, u32)>, OrchestratorError> {
        let feature = self
            .inner
            .get_feature(feature_id)
            .await
            .ok_or_else(|| OrchestratorError::FeatureNotFound(feature_id.to_string()))?;
        let f = feature.read().await;
        Ok(f.tasks
            .iter()
            .map(|t| (t.id.clone(), t.spec.clone(), t.status, t.attempt))
            .collect())
    }

    /// Status of an ad-hoc (feature-less) task.
    pub async fn standalone_task_status(&self, task_id: &str) -> Option<(TaskStatus, u32)> {
        self.inner
            .standalone
            .read()
            .await
            .get(task_id)
            .map(|t| (t.status, t.attempt))
    }

    pub async fn feature_status(&self, feature_id: &str) -> Result<String, OrchestratorError> {
        let feature = self
            .inner
            .get_feature(feature_id)
            .await
            .ok_or_else(|| OrchestratorError::FeatureNotFound(feature_id.to_string()))?;
        let f = feature.read().await;
        Ok(f.status_report())
    }

    pub async fn list_features(&self) -> Vec<String> {
        let features = self.inner.features.read().await;
        let mut lines = Vec::new();
        for handle in features.values() {
            let f = handle.read().await;
            lines.push(format!("- {} {}: {}", f.id, f.name, f.progress()));
        }
        lines.sort();
        lines
    }

    pub async fn status_report(&self) -> String {
        let features = self.list_features().await;
        let active = self.inner.scheduler.active_ids();

        if features.is_empty() && active.is_empty() {
            return "No active tasks or features".to_string();
        }

        let mut report = String::from("Status\n");
        if !features.is_empty() {
            report.push_str("\nFeatures:\n");
            for line in features {
                report.push_str(&format!("  {line}\n"));
            }
        }
        if !active.is_empty() {
            report.push_str("\nActive tasks:\n");
            for id in active {
                report.push_str(&format!("  - {id}\n"));
            }
        }
        report
    }

    /// Currently pending feedback request, if any.
    pub fn pending_feedback(&self) -> Option<PendingFeedback> {
        self.inner
            .pending_feedback
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

// =========================================================================
// Phase handlers
// =========================================================================

impl Inner {
    pub(crate) async fn get_feature(&self, id: &str) -> Option<Arc<RwLock<Feature>>> {
        self.features.read().await.get(id).cloned()
    }

    /// Look up a feature and verify it sits at the expected approval gate.
    async fn require_gate(
        &self,
        feature_id: &str,
        expected: Phase,
        gate: &'static str,
    ) -> Result<Arc<RwLock<Feature>>, OrchestratorError> {
        let feature = self
            .get_feature(feature_id)
            .await
            .ok_or_else(|| OrchestratorError::FeatureNotFound(feature_id.to_string()))?;

        let phase = { feature.read().await.phase };
        if phase != expected {
            return Err(OrchestratorError::NotAwaitingApproval {
                id: feature_id.to_string(),
                gate,
            });
        }
        Ok(feature)
    }

    async fn reject_with_feedback(
        &self,
        feature_id: &str,
        expected: Phase,
        gate: Gate,
    ) -> Result<(), OrchestratorError> {
        let phase = {
            let feature = self
                .get_feature(feature_id)
                .await
                .ok_or_else(|| OrchestratorError::FeatureNotFound(feature_id.to_string()))?;
            feature.read().await.phase
        };
        if phase != expected {
            return Err(OrchestratorError::NotAwaitingApproval {
                id: feature_id.to_string(),
                gate: gate.as_str(),
            });
        }

        self.set_pending_feedback(PendingFeedback {
            feature_id: feature_id.to_string(),
            gate,
            task_id: None,
        });
        self.notifier
            .send(&format!(
                "{gate} rejected for {feature_id}. Reply with: feedback <your guidance>"
            ))
            .await;
        Ok(())
    }

    fn set_pending_feedback(&self, pending: PendingFeedback) {
        let mut slot = self.pending_feedback.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = slot.replace(pending) {
            warn!(feature = %old.feature_id, "replaced an outstanding feedback request");
        }
    }

    pub(crate) fn persist(&self, feature: &Feature) {
        if let Some(storage) = &self.storage
            && let Err(e) = storage.save_feature(FeatureSnapshot::of(feature))
        {
            warn!(feature = %feature.id, error = %format!("{e:#}"), "failed to persist feature");
        }
    }

    async fn restore_features(&self) -> usize {
        let Some(storage) = &self.storage else {
            return 0;
        };

        let snapshots = storage.load_all();
        let mut features = self.features.write().await;
        let count = snapshots.len();
        for snap in snapshots {
            features.insert(
                snap.id.clone(),
                Arc::new(RwLock::new(self.feature_from_snapshot(snap))),
            );
        }
        count
    }

    fn feature_from_snapshot(&self, snap: FeatureSnapshot) -> Feature {
        let mut feature = Feature::new(&snap.id, &snap.name, &snap.description);
        feature.branch = snap.branch;
        feature.phase = snap.phase;
        feature.tech_stack = snap.tech_stack;
        feature.constraints = snap.constraints;
        feature.created_at = snap.created_at;
        feature.updated_at = snap.updated_at;
        feature.answers = snap.answers;
        feature.tasks = snap
            .tasks
            .into_iter()
            .map(|t| {
                let mut task = Task::new(&t.spec, &t.agent_name, self.cfg.concurrency.task_timeout());
                task.id = t.id;
                task.branch = t.branch;
                task.status = t.status;
                task.attempt = t.attempt;
                task.is_parallel = t.is_parallel;
                task.feature_id = t.feature_id;
                task
            })
            .collect();
        feature
    }

    /// Enqueue a task, failing it loudly if the queue is gone.
    pub(crate) async fn enqueue_or_fail(&self, task: Task) {
        let id = task.id.clone();
        if let Err(e) = self.scheduler.enqueue(task).await {
            error!(task = %id, error = %e, "failed to enqueue task");
            self.notifier
                .send(&format!("Task {id} could not be queued: {e}"))
                .await;
        }
    }

    fn spawn_specification(self: &Arc<Self>, feature: Arc<RwLock<Feature>>) {
        let inner = self.clone();
        tokio::spawn(async move { inner.run_specification_phase(feature).await });
    }

    fn spawn_clarification(self: &Arc<Self>, feature: Arc<RwLock<Feature>>) {
        let inner = self.clone();
        tokio::spawn(async move { inner.run_clarification_phase(feature).await });
    }

    fn spawn_planning(self: &Arc<Self>, feature: Arc<RwLock<Feature>>) {
        let inner = self.clone();
        tokio::spawn(async move { inner.run_planning_phase(feature).await });
    }

    fn spawn_tasking(self: &Arc<Self>, feature: Arc<RwLock<Feature>>) {
        let inner = self.clone();
        tokio::spawn(async move { inner.run_tasking_phase(feature).await });
    }

    fn spawn_implementation(self: &Arc<Self>, feature: Arc<RwLock<Feature>>) {
        let inner = self.clone();
        tokio::spawn(async move { inner.run_implementation_phase(feature).await });
    }

    async fn run_specification_phase(&self, feature: Arc<RwLock<Feature>>) {
        if self
            .transition_feature(&feature, Phase::Specifying, "Starting specification", ACTOR)
            .await
            .is_err()
        {
            return;
        }

        let (id, description, branch) = {
            let f = feature.read().await;
            let mut description = f.description.clone();
            if !f.constraints.is_empty() {
                description.push_str("\n\nConstraints:\n");
                description.push_str(&f.constraints);
            }
            (f.id.clone(), description, f.branch.clone())
        };

        self.notifier
            .send(&format!("Creating specification for {id}..."))
            .await;

        match self.planner.specify(&self.shutdown, &description, &branch).await {
            Err(e) => {
                return self
                    .handle_phase_error(&feature, &format!("specify failed: {e:#}"))
                    .await;
            }
            Ok(result) if !result.success => {
                return self
                    .handle_phase_error(
                        &feature,
                        &format!("specify failed: {}", result.error.unwrap_or_default()),
                    )
                    .await;
            }
            Ok(_) => {}
        }

        let summary = match self
            .planner
            .latest_feature_dir()
            .map(|dir| parser::parse_spec(&dir))
        {
            Some(Ok(spec)) => spec.summary(),
            other => {
                if let Some(Err(e)) = other {
                    warn!(feature = %id, error = %format!("{e:#}"), "could not parse spec");
                }
                "Specification created. Review it in your working tree.".to_string()
            }
        };

        if self
            .transition_feature(
                &feature,
                Phase::AwaitingSpecApproval,
                "Spec created, awaiting approval",
                ACTOR,
            )
            .await
            .is_err()
        {
            return;
        }

        self.notifier
            .request_phase_approval(&id, Gate::Spec, &summary, &format!("Branch: {branch}"))
            .await;
    }

    async fn run_clarification_phase(&self, feature: Arc<RwLock<Feature>>) {
        if self
            .transition_feature(&feature, Phase::Clarifying, "Running clarification", ACTOR)
            .await
            .is_err()
        {
            return;
        }

        let id = { feature.read().await.id.clone() };

        let result = match self.planner.clarify(&self.shutdown).await {
            Ok(result) => result,
            Err(e) => {
                return self
                    .handle_phase_error(&feature, &format!("clarify failed: {e:#}"))
                    .await;
            }
        };

        let questions = parser::parse_clarifications(&result.output);
        let has_questions = !questions.is_empty();
        {
            let mut f = feature.write().await;
            f.pending_questions = questions.clone();
            self.persist(&f);
        }

        if has_questions {
            let mut message = format!("Clarification needed for {id}\n\n");
            for q in &questions {
                message.push_str(&format!("{}: {}\n", q.id, q.question));
            }
            message.push_str(&format!(
                "\nReply with: answer {id} Q1: your answer, Q2: your answer"
            ));
            self.notifier.send(&message).await;
        } else {
            self.notifier
                .send(&format!(
                    "No clarifications needed for {id}. Proceeding to planning..."
                ))
                .await;
            self.run_planning_phase(feature).await;
        }
    }

    async fn run_planning_phase(&self, feature: Arc<RwLock<Feature>>) {
        if self
            .transition_feature(&feature, Phase::Planning, "Creating implementation plan", ACTOR)
            .await
            .is_err()
        {
            return;
        }

        let (id, tech_stack) = {
            let f = feature.read().await;
            let mut tech = if f.tech_stack.is_empty() {
                self.cfg.default_tech_stack.clone()
            } else {
                f.tech_stack.clone()
            };
            if !f.constraints.is_empty() {
                tech.push_str("\n\nConstraints:\n");
                tech.push_str(&f.constraints);
            }
            (f.id.clone(), tech)
        };

        self.notifier
            .send(&format!("Creating implementation plan for {id}..."))
            .await;

        match self.planner.plan(&self.shutdown, &tech_stack).await {
            Err(e) => {
                return self
                    .handle_phase_error(&feature, &format!("plan failed: {e:#}"))
                    .await;
            }
            Ok(result) if !result.success => {
                return self
                    .handle_phase_error(
                        &feature,
                        &format!("plan failed: {}", result.error.unwrap_or_default()),
                    )
                    .await;
            }
            Ok(_) => {}
        }

        let summary = match self
            .planner
            .latest_feature_dir()
            .map(|dir| parser::parse_plan(&dir))
        {
            Some(Ok(plan)) => plan.summary(),
            _ => "Implementation plan created. Review it in your working tree.".to_string(),
        };

        if self
            .transition_feature(
                &feature,
                Phase::AwaitingPlanApproval,
                "Plan created, awaiting approval",
                ACTOR,
            )
            .await
            .is_err()
        {
            return;
        }

        let branch = { feature.read().await.branch.clone() };
        self.notifier
            .request_phase_approval(&id, Gate::Plan, &summary, &format!("Branch: {branch}"))
            .await;
    }

    async fn run_tasking_phase(&self, feature: Arc<RwLock<Feature>>) {
        if self
            .transition_feature(&feature, Phase::Tasking, "Generating tasks", ACTOR)
            .await
            .is_err()
        {
            return;
        }

        let id = { feature.read().await.id.clone() };

        match self.planner.tasks(&self.shutdown).await {
            Err(e) => {
                return self
                    .handle_phase_error(&feature, &format!("task generation failed: {e:#}"))
                    .await;
            }
            Ok(result) if !result.success => {
                return self
                    .handle_phase_error(
                        &feature,
                        &format!("task generation failed: {}", result.error.unwrap_or_default()),
                    )
                    .await;
            }
            Ok(_) => {}
        }

        // The task breakdown is a required artifact; failing to parse it
        // fails the phase.
        let items = match self.planner.latest_feature_dir() {
            Some(dir) => match parser::parse_tasks(&dir) {
                Ok(items) => items,
                Err(e) => {
                    return self
                        .handle_phase_error(&feature, &format!("could not parse tasks: {e:#}"))
                        .await;
                }
            },
            None => {
                return self
                    .handle_phase_error(&feature, "no task breakdown was produced")
                    .await;
            }
        };

        let summary = {
            let mut f = feature.write().await;
            let branch = f.branch.clone();
            let feature_id = f.id.clone();
            let tasks: Vec<Task> = items
                .iter()
                .map(|item| {
                    let mut task = Task::new(
                        &item.title,
                        &self.cfg.default_agent,
                        self.cfg.concurrency.task_timeout(),
                    );
                    // Every task gets its own branch (and therefore its own
                    // isolated workspace); two tasks never share one.
                    task.branch = format!("{branch}-{}", task.id);
                    task.feature_id = Some(feature_id.clone());
                    task.is_parallel = item.is_parallel;
                    task.metadata
                        .insert("source_id".to_string(), item.id.clone());
                    task.metadata
                        .insert("user_story".to_string(), item.user_story.clone());
                    task.metadata
                        .insert("is_test".to_string(), item.is_test.to_string());
                    task
                })
                .collect();
            f.set_tasks(tasks);
            self.persist(&f);
            task_breakdown_summary(&f.tasks)
        };

        if self
            .transition_feature(
                &feature,
                Phase::AwaitingTaskApproval,
                "Tasks generated, awaiting approval",
                ACTOR,
            )
            .await
            .is_err()
        {
            return;
        }

        self.notifier
            .request_phase_approval(&id, Gate::Tasks, &summary, "")
            .await;
    }

    async fn run_implementation_phase(&self, feature: Arc<RwLock<Feature>>) {
        if self
            .transition_feature(&feature, Phase::Implementing, "Starting implementation", ACTOR)
            .await
            .is_err()
        {
            return;
        }

        let (id, parallel, first_sequential) = {
            let mut f = feature.write().await;
            let parallel: Vec<Task> = f
                .tasks
                .iter()
                .filter(|t| t.is_parallel && t.status == TaskStatus::Pending)
                .cloned()
                .collect();
            let first_sequential = f.next_sequential_pending().cloned();
            if let Some(task) = &first_sequential {
                f.current_task = Some(task.id.clone());
            }
            self.persist(&f);
            (f.id.clone(), parallel, first_sequential)
        };

        let total = parallel.len() + usize::from(first_sequential.is_some());
        self.notifier
            .send(&format!(
                "Implementation started for {id}: dispatching {total} task(s), updates will follow..."
            ))
            .await;

        // Independent work goes out immediately; dependent work is strictly
        // one task at a time, released by code approval.
        for task in parallel {
            self.enqueue_or_fail(task).await;
        }
        if let Some(task) = first_sequential {
            self.enqueue_or_fail(task).await;
        }
    }

    pub(crate) async fn transition_feature(
        &self,
        feature: &Arc<RwLock<Feature>>,
        to: Phase,
        message: &str,
        actor: &str,
    ) -> Result<(), OrchestratorError> {
        let mut f = feature.write().await;
        match f.transition(to, message, actor) {
            Ok(()) => {
                debug!(feature = %f.id, phase = %to, "phase transition");
                self.persist(&f);
                Ok(())
            }
            Err(e) => {
                warn!(feature = %f.id, error = %e, "illegal phase transition requested");
                Err(e.into())
            }
        }
    }

    /// Unrecoverable phase-level error: fail the feature and surface it.
    async fn handle_phase_error(&self, feature: &Arc<RwLock<Feature>>, detail: &str) {
        let id = {
            let mut f = feature.write().await;
            if let Err(e) = f.transition(Phase::Failed, detail, ACTOR) {
                warn!(feature = %f.id, error = %e, "could not mark feature failed");
            }
            self.persist(&f);
            f.id.clone()
        };

        error!(feature = %id, detail, "phase failed");
        self.notifier
            .send(&format!(
                "Phase failed for feature {id}: {}",
                sanitize_message(detail)
            ))
            .await;
    }
}

/// Operator-facing summary of a generated task breakdown.
fn task_breakdown_summary(tasks: &[Task]) -> String {
    let mut summary = format!("{} tasks generated\n\n", tasks.len());
    let mut current_story: Option<&str> = None;

    for task in tasks {
        let story = task.metadata.get("user_story").map(String::as_str).unwrap_or("");
        if !story.is_empty() && current_story != Some(story) {
            summary.push_str(&format!("{story}:\n"));
            current_story = Some(story);
        }
        let marker = if task.is_parallel { " [P]" } else { "" };
        summary.push_str(&format!(
            "  - {} {}{marker}\n",
            task.id,
            truncate(&task.spec, 40)
        ));
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_breakdown_summary_groups_by_story() {
        use std::time::Duration;

        let mut t1 = Task::new("Create login handler", "claude-code", Duration::from_secs(5));
        t1.metadata.insert("user_story".into(), "Login".into());
        t1.is_parallel = true;
        let mut t2 = Task::new("Wire login route", "claude-code", Duration::from_secs(5));
        t2.metadata.insert("user_story".into(), "Login".into());

        let summary = task_breakdown_summary(&[t1, t2]);
        assert!(summary.starts_with("2 tasks generated"));
        assert_eq!(summary.matches("Login:").count(), 1);
        assert!(summary.contains("[P]"));
    }

    #[test]
    fn test_task_breakdown_summary_truncates_titles() {
        use std::time::Duration;

        let long = "x".repeat(100);
        let task = Task::new(&long, "claude-code", Duration::from_secs(5));
        let summary = task_breakdown_summary(&[task]);
        assert!(summary.contains("..."));
        assert!(!summary.contains(&long));
    }
}

//! Integration tests for conductor.
//!
//! The orchestrator is wired with stub collaborators (repository, agent,
//! planner, notifier) and driven through the full feature lifecycle:
//! specify → clarify → plan → tasks → implement → review → approve.

use assert_cmd::Command as CliCommand;
use async_trait::async_trait;
use conductor::agents::{Agent, AgentOutcome, AgentTask};
use conductor::config::{
    AgentsConfig, Config, ConcurrencyConfig, RepoConfig, ReviewConfig, StorageConfig,
};
use conductor::errors::{AgentError, OrchestratorError, WorkspaceError};
use conductor::notify::{Gate, Notifier};
use conductor::orchestrator::{Collaborators, Orchestrator};
use conductor::phase::Phase;
use conductor::planner::{ArtifactResult, PlanDriver};
use conductor::repo::Repository;
use conductor::storage::FileStore;
use conductor::task::TaskStatus;
use predicates::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Stub collaborators
// =============================================================================

struct StubRepo {
    root: PathBuf,
}

impl StubRepo {
    fn new(root: &Path) -> Self {
        Self {
            root: root.join("workspaces"),
        }
    }
}

#[async_trait]
impl Repository for StubRepo {
    async fn create_workspace(&self, branch: &str) -> Result<PathBuf, WorkspaceError> {
        let path = self.root.join(branch);
        std::fs::create_dir_all(&path)?;
        Ok(path)
    }

    async fn remove_workspace(&self, branch: &str) -> Result<(), WorkspaceError> {
        let path = self.root.join(branch);
        match std::fs::remove_dir_all(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn commit_and_push(
        &self,
        _workspace: &Path,
        _branch: &str,
        _message: &str,
    ) -> Result<(), WorkspaceError> {
        Ok(())
    }

    async fn merge_branch(&self, _branch: &str) -> Result<(), WorkspaceError> {
        Ok(())
    }

    async fn delete_branch(&self, _branch: &str) -> Result<(), WorkspaceError> {
        Ok(())
    }

    async fn diff_summary(&self, _base: &str, _branch: &str) -> Result<String, WorkspaceError> {
        Ok("1 file changed".to_string())
    }

    fn main_branch(&self) -> &str {
        "main"
    }
}

/// Agent that fails its first `fail_first` executions, then succeeds.
struct ScriptedAgent {
    fail_first: usize,
    calls: AtomicUsize,
}

impl ScriptedAgent {
    fn succeeding() -> Self {
        Self {
            fail_first: 0,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing_first(n: usize) -> Self {
        Self {
            fail_first: n,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        "stub-agent"
    }

    async fn execute(
        &self,
        _cancel: &CancellationToken,
        _task: &AgentTask,
    ) -> Result<AgentOutcome, AgentError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            Ok(AgentOutcome {
                success: false,
                summary: "simulated agent failure".to_string(),
                duration: Duration::from_millis(1),
                error: Some("simulated agent failure".to_string()),
            })
        } else {
            Ok(AgentOutcome {
                success: true,
                summary: "work done".to_string(),
                duration: Duration::from_millis(1),
                error: None,
            })
        }
    }
}

/// Planner that serves pre-written artifacts from a directory.
struct StubPlanner {
    artifacts: PathBuf,
    clarify_output: String,
}

impl StubPlanner {
    fn new(artifacts: &Path, clarify_output: &str) -> Self {
        Self {
            artifacts: artifacts.to_path_buf(),
            clarify_output: clarify_output.to_string(),
        }
    }

    fn ok(output: &str) -> anyhow::Result<ArtifactResult> {
        Ok(ArtifactResult {
            output: output.to_string(),
            success: true,
            error: None,
        })
    }
}

#[async_trait]
impl PlanDriver for StubPlanner {
    async fn initialize(&self, _cancel: &CancellationToken) -> anyhow::Result<()> {
        Ok(())
    }

    async fn specify(
        &self,
        _cancel: &CancellationToken,
        _description: &str,
        _branch: &str,
    ) -> anyhow::Result<ArtifactResult> {
        Self::ok("spec written")
    }

    async fn clarify(&self, _cancel: &CancellationToken) -> anyhow::Result<ArtifactResult> {
        Self::ok(&self.clarify_output)
    }

    async fn plan(
        &self,
        _cancel: &CancellationToken,
        _tech_stack: &str,
    ) -> anyhow::Result<ArtifactResult> {
        Self::ok("plan written")
    }

    async fn tasks(&self, _cancel: &CancellationToken) -> anyhow::Result<ArtifactResult> {
        Self::ok("tasks written")
    }

    fn latest_feature_dir(&self) -> Option<PathBuf> {
        Some(self.artifacts.clone())
    }
}

#[derive(Default)]
struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
    phase_approvals: Mutex<Vec<(String, String)>>,
    task_approvals: Mutex<Vec<String>>,
    escalations: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    fn escalations(&self) -> Vec<(String, String)> {
        self.escalations.lock().unwrap().clone()
    }

    fn task_approvals(&self) -> Vec<String> {
        self.task_approvals.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }

    async fn request_phase_approval(
        &self,
        feature_id: &str,
        gate: Gate,
        _summary: &str,
        _detail: &str,
    ) {
        self.phase_approvals
            .lock()
            .unwrap()
            .push((feature_id.to_string(), gate.as_str().to_string()));
    }

    async fn request_task_approval(&self, task_id: &str, _summary: &str) {
        self.task_approvals.lock().unwrap().push(task_id.to_string());
    }

    async fn escalate(&self, task_id: &str, reason: &str, _detail: &str) {
        self.escalations
            .lock()
            .unwrap()
            .push((task_id.to_string(), reason.to_string()));
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    orchestrator: Orchestrator,
    notifier: Arc<RecordingNotifier>,
    agent: Arc<ScriptedAgent>,
    _dir: TempDir,
}

fn test_config(dir: &Path, max_retries: u32, test_command: &str) -> Config {
    Config {
        repo: RepoConfig {
            path: dir.to_path_buf(),
            remote: "origin".to_string(),
            main_branch: "main".to_string(),
        },
        agents: AgentsConfig::default(),
        review: ReviewConfig {
            use_llm: false,
            max_retries,
            linters: vec!["nonexistent-linter-xyz".to_string()],
            test_command: test_command.to_string(),
            analyzer: "nonexistent-analyzer-xyz".to_string(),
        },
        concurrency: ConcurrencyConfig {
            max_tasks: 3,
            task_timeout_secs: 30,
        },
        storage: StorageConfig {
            path: dir.join("features.json"),
        },
        default_agent: "stub-agent".to_string(),
        default_tech_stack: String::new(),
    }
}

async fn harness_with(
    agent: ScriptedAgent,
    clarify_output: &str,
    tasks_md: &str,
    max_retries: u32,
    test_command: &str,
) -> Harness {
    let dir = TempDir::new().unwrap();
    let artifacts = dir.path().join("artifacts");
    std::fs::create_dir_all(&artifacts).unwrap();
    std::fs::write(
        artifacts.join("spec.md"),
        "# Stub Feature\n## User Story: Flow\n",
    )
    .unwrap();
    std::fs::write(artifacts.join("plan.md"), "# Plan\n## Tech Stack\n- rust\n").unwrap();
    std::fs::write(artifacts.join("tasks.md"), tasks_md).unwrap();

    let cfg = test_config(dir.path(), max_retries, test_command);
    let notifier = Arc::new(RecordingNotifier::default());
    let agent = Arc::new(agent);
    let storage = FileStore::open(&cfg.storage.path).unwrap();

    let orchestrator = Orchestrator::new(
        cfg,
        Collaborators {
            repo: Arc::new(StubRepo::new(dir.path())),
            agents: vec![agent.clone() as Arc<dyn Agent>],
            planner: Arc::new(StubPlanner::new(&artifacts, clarify_output)),
            notifier: notifier.clone(),
            synthesizer: None,
            storage: Some(storage),
        },
    );
    orchestrator.start().await.unwrap();

    Harness {
        orchestrator,
        notifier,
        agent,
        _dir: dir,
    }
}

const TASKS_MD: &str = "# Tasks\n\
## User Story: Flow\n\
- [ ] [P] P1 parallel groundwork\n\
- [ ] S1 sequential core\n\
- [ ] [P] P2 parallel docs\n\
- [ ] S2 sequential polish\n";

async fn wait_until<F>(cond: F, what: &str)
where
    F: AsyncFn() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while tokio::time::Instant::now() < deadline {
        if cond().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

async fn wait_for_phase(orchestrator: &Orchestrator, id: &str, phase: Phase) {
    wait_until(
        async || orchestrator.feature_phase(id).await.ok() == Some(phase),
        &format!("feature {id} to reach {phase:?}"),
    )
    .await;
}

async fn statuses_by_spec(orchestrator: &Orchestrator, id: &str) -> HashMap<String, TaskStatus> {
    orchestrator
        .task_statuses(id)
        .await
        .unwrap()
        .into_iter()
        .map(|(_, spec, status, _)| (spec, status))
        .collect()
}

// =============================================================================
// Feature lifecycle
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_full_feature_lifecycle_with_sequential_ordering() {
    let h = harness_with(
        ScriptedAgent::succeeding(),
        "No questions, everything is clear.",
        TASKS_MD,
        2,
        "",
    )
    .await;

    let id = h
        .orchestrator
        .start_feature("Checkout Flow", "Build the checkout flow")
        .await
        .unwrap();

    // Specification runs and pauses at the spec gate.
    wait_for_phase(&h.orchestrator, &id, Phase::AwaitingSpecApproval).await;

    // No clarification questions: approval flows straight through planning.
    h.orchestrator.approve_spec(&id).await.unwrap();
    wait_for_phase(&h.orchestrator, &id, Phase::AwaitingPlanApproval).await;

    h.orchestrator.approve_plan(&id).await.unwrap();
    wait_for_phase(&h.orchestrator, &id, Phase::AwaitingTaskApproval).await;

    let tasks = h.orchestrator.task_statuses(&id).await.unwrap();
    assert_eq!(tasks.len(), 4);

    // Entering implementation dispatches both parallel tasks plus exactly
    // one sequential task; the second sequential task stays pending.
    h.orchestrator.approve_tasks(&id).await.unwrap();
    wait_until(
        async || {
            let statuses = statuses_by_spec(&h.orchestrator, &id).await;
            statuses["P1 parallel groundwork"] == TaskStatus::AwaitingApproval
                && statuses["P2 parallel docs"] == TaskStatus::AwaitingApproval
                && statuses["S1 sequential core"] == TaskStatus::AwaitingApproval
        },
        "P1, P2 and S1 to pass review",
    )
    .await;

    let statuses = statuses_by_spec(&h.orchestrator, &id).await;
    assert_eq!(
        statuses["S2 sequential polish"],
        TaskStatus::Pending,
        "second sequential task must not be dispatched before S1 approval"
    );
    assert_eq!(h.agent.calls(), 3);

    wait_for_phase(&h.orchestrator, &id, Phase::AwaitingCodeApproval).await;
    h.orchestrator.approve_code(&id).await.unwrap();

    // S2 is released only now.
    wait_until(
        async || {
            statuses_by_spec(&h.orchestrator, &id).await["S2 sequential polish"]
                == TaskStatus::AwaitingApproval
        },
        "S2 to pass review after S1 approval",
    )
    .await;
    assert_eq!(h.agent.calls(), 4);

    wait_for_phase(&h.orchestrator, &id, Phase::AwaitingCodeApproval).await;
    h.orchestrator.approve_code(&id).await.unwrap();
    wait_for_phase(&h.orchestrator, &id, Phase::Complete).await;

    let statuses = statuses_by_spec(&h.orchestrator, &id).await;
    assert!(statuses.values().all(|s| *s == TaskStatus::Complete));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_clarification_questions_gate_planning() {
    let h = harness_with(
        ScriptedAgent::succeeding(),
        "1. Which database should we use?\n2. Is SSO in scope?\n",
        TASKS_MD,
        2,
        "",
    )
    .await;

    let id = h
        .orchestrator
        .start_feature("Auth", "Build auth")
        .await
        .unwrap();
    wait_for_phase(&h.orchestrator, &id, Phase::AwaitingSpecApproval).await;

    h.orchestrator.approve_spec(&id).await.unwrap();
    wait_for_phase(&h.orchestrator, &id, Phase::Clarifying).await;

    // One of two answers: still clarifying.
    h.orchestrator
        .answer_clarifications(&id, HashMap::from([("Q1".to_string(), "postgres".to_string())]))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        h.orchestrator.feature_phase(&id).await.unwrap(),
        Phase::Clarifying
    );

    // Second answer releases planning.
    h.orchestrator
        .answer_clarifications(&id, HashMap::from([("Q2".to_string(), "no".to_string())]))
        .await
        .unwrap();
    wait_for_phase(&h.orchestrator, &id, Phase::AwaitingPlanApproval).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_approving_wrong_gate_is_rejected() {
    let h = harness_with(ScriptedAgent::succeeding(), "none", TASKS_MD, 2, "").await;

    let id = h
        .orchestrator
        .start_feature("Auth", "Build auth")
        .await
        .unwrap();
    wait_for_phase(&h.orchestrator, &id, Phase::AwaitingSpecApproval).await;

    let err = h.orchestrator.approve_plan(&id).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::NotAwaitingApproval { .. }));

    // The feature is untouched by the rejected operation.
    assert_eq!(
        h.orchestrator.feature_phase(&id).await.unwrap(),
        Phase::AwaitingSpecApproval
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_feature_operations_error() {
    let h = harness_with(ScriptedAgent::succeeding(), "none", TASKS_MD, 2, "").await;

    assert!(matches!(
        h.orchestrator.approve_spec("nope").await.unwrap_err(),
        OrchestratorError::FeatureNotFound(_)
    ));
    assert!(matches!(
        h.orchestrator.cancel("nope").await.unwrap_err(),
        OrchestratorError::TaskNotFound(_)
    ));
}

// =============================================================================
// Retry and escalation
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_agent_failure_retries_then_succeeds() {
    let h = harness_with(ScriptedAgent::failing_first(1), "none", TASKS_MD, 2, "").await;

    let id = h
        .orchestrator
        .assign_task("stub-agent", "flaky work")
        .await
        .unwrap();

    wait_until(
        async || {
            h.orchestrator.standalone_task_status(&id).await
                == Some((TaskStatus::AwaitingApproval, 1))
        },
        "task to succeed on second attempt",
    )
    .await;

    assert_eq!(h.agent.calls(), 2);
    assert!(
        h.notifier
            .messages()
            .iter()
            .any(|m| m.contains("Retrying task")),
        "retry must be announced"
    );
    assert_eq!(h.notifier.task_approvals(), vec![id]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_retry_budget_exhaustion_fails_terminally() {
    let h = harness_with(ScriptedAgent::failing_first(100), "none", TASKS_MD, 1, "").await;

    let id = h
        .orchestrator
        .assign_task("stub-agent", "doomed work")
        .await
        .unwrap();

    wait_until(
        async || {
            h.orchestrator.standalone_task_status(&id).await == Some((TaskStatus::Failed, 1))
        },
        "task to fail after exhausting the budget",
    )
    .await;

    // attempt 0 + 1 retry, never re-queued past the budget.
    assert_eq!(h.agent.calls(), 2);
    assert!(
        h.notifier
            .messages()
            .iter()
            .any(|m| m.contains("Task failed")),
        "terminal failure must be announced"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failing_tests_block_and_escalate() {
    // The test command output contains FAILED, so the review verdict is
    // Block, which escalates without consuming the retry budget.
    let h = harness_with(
        ScriptedAgent::succeeding(),
        "none",
        TASKS_MD,
        2,
        "echo FAILED: 1",
    )
    .await;

    let id = h
        .orchestrator
        .assign_task("stub-agent", "blocked work")
        .await
        .unwrap();

    wait_until(
        async || !h.notifier.escalations().is_empty(),
        "escalation to be raised",
    )
    .await;

    let escalations = h.notifier.escalations();
    assert_eq!(escalations[0].0, id);
    assert_eq!(escalations[0].1, "Blocking issues found");
    assert_eq!(
        h.orchestrator.standalone_task_status(&id).await,
        Some((TaskStatus::AwaitingApproval, 0)),
        "a block must not consume the retry budget"
    );
    assert_eq!(h.agent.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_assign_unknown_agent_is_rejected() {
    let h = harness_with(ScriptedAgent::succeeding(), "none", TASKS_MD, 2, "").await;

    let err = h
        .orchestrator
        .assign_task("no-such-agent", "work")
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::UnknownAgent(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_retry_command_requeues_task() {
    let h = harness_with(ScriptedAgent::failing_first(100), "none", TASKS_MD, 0, "").await;

    let id = h
        .orchestrator
        .assign_task("stub-agent", "doomed work")
        .await
        .unwrap();

    wait_until(
        async || {
            matches!(
                h.orchestrator.standalone_task_status(&id).await,
                Some((TaskStatus::Failed, _))
            )
        },
        "task to fail",
    )
    .await;
    let calls_before = h.agent.calls();

    h.orchestrator.retry_task(&id).await.unwrap();
    wait_until(
        async || h.agent.calls() > calls_before,
        "retried task to execute again",
    )
    .await;
}

// =============================================================================
// Persistence
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_feature_state_is_persisted() {
    let h = harness_with(ScriptedAgent::succeeding(), "none", TASKS_MD, 2, "").await;

    let id = h
        .orchestrator
        .start_feature("Persisted", "Survives restarts")
        .await
        .unwrap();
    wait_for_phase(&h.orchestrator, &id, Phase::AwaitingSpecApproval).await;

    let store = FileStore::open(&h._dir.path().join("features.json")).unwrap();
    let snapshot = store.load_feature(&id).expect("feature should be persisted");
    assert_eq!(snapshot.name, "Persisted");
    assert_eq!(snapshot.phase, Phase::AwaitingSpecApproval);
}

// =============================================================================
// CLI surface
// =============================================================================

fn conductor_cli() -> CliCommand {
    CliCommand::cargo_bin("conductor").unwrap()
}

#[test]
fn test_cli_help() {
    conductor_cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("orchestrator"));
}

#[test]
fn test_cli_version() {
    conductor_cli().arg("--version").assert().success();
}

#[test]
fn test_cli_config_init_and_show() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("conductor.toml");

    conductor_cli()
        .args(["--config", &config.to_string_lossy(), "config", "init"])
        .assert()
        .success();
    assert!(config.exists());

    conductor_cli()
        .args(["--config", &config.to_string_lossy(), "config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("max_tasks"));

    // A second init must refuse to overwrite.
    conductor_cli()
        .args(["--config", &config.to_string_lossy(), "config", "init"])
        .assert()
        .failure();
}

#[test]
fn test_cli_run_requires_config() {
    conductor_cli()
        .args(["--config", "/nonexistent/conductor.toml", "run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read config file"));
}

//! Review decision engine: concurrent tool fan-out and verdict derivation.
//!
//! The engine runs three independent collaborators concurrently (a static
//! analyzer, a linter aggregator, and the configured test command) and
//! waits for all of them before deciding. Collaborator failures are never
//! fatal: they are recorded as `"ERROR: ..."` outputs keyed by collaborator
//! name and fed into the decision like any other output.
//!
//! Two decision modes, selected by configuration:
//! - tool-based (default): deterministic rules over the raw outputs
//! - LLM-assisted: a structured prompt is synthesized into a free-text
//!   review whose trailing `VERDICT:` line is parsed (see [`super::verdict`])

use crate::repo::Repository;
use crate::review::{ReviewRequest, ReviewResult, ReviewTool, Verdict, parse_verdict};
use crate::tools;
use crate::util::truncate;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, join_all};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Hard cap on the diff summary embedded in the LLM prompt.
const DIFF_SUMMARY_MAX: usize = 2000;

/// Key under which linter output is recorded.
const LINT_KEY: &str = "lint";

/// Key under which test-runner output is recorded.
const TESTS_KEY: &str = "tests";

/// Summary used when the tool-based decision finds nothing to report.
const ALL_CLEAR: &str = "all checks passed";

/// External collaborator that turns a review prompt into free text.
#[async_trait]
pub trait ReviewSynthesizer: Send + Sync {
    async fn synthesize(
        &self,
        cancel: &CancellationToken,
        prompt: &str,
        workspace: &Path,
    ) -> Result<String>;
}

/// The review decision engine.
pub struct ReviewEngine {
    repo: Arc<dyn Repository>,
    analyzer: Arc<dyn ReviewTool>,
    linter: Arc<dyn ReviewTool>,
    test_command: String,
    synthesizer: Option<Arc<dyn ReviewSynthesizer>>,
}

impl ReviewEngine {
    pub fn new(
        repo: Arc<dyn Repository>,
        analyzer: Arc<dyn ReviewTool>,
        linter: Arc<dyn ReviewTool>,
        test_command: &str,
    ) -> Self {
        Self {
            repo,
            analyzer,
            linter,
            test_command: test_command.to_string(),
            synthesizer: None,
        }
    }

    /// Enable LLM-assisted verdicts through the given synthesizer.
    pub fn with_synthesizer(mut self, synthesizer: Arc<dyn ReviewSynthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    /// Review one task's work and derive a verdict.
    pub async fn review(
        &self,
        cancel: &CancellationToken,
        request: &ReviewRequest,
    ) -> Result<ReviewResult> {
        // Fan out to the three collaborators; the join is the barrier. No
        // ordering is implied among them.
        let analyzer = self.analyzer.clone();
        let linter = self.linter.clone();
        let runs: Vec<BoxFuture<'_, (String, Result<String>)>> = vec![
            async move {
                let out = analyzer.run(cancel, &request.workspace, &request.branch).await;
                (analyzer.name().to_string(), out)
            }
            .boxed(),
            async move {
                let out = linter.run(cancel, &request.workspace, &request.branch).await;
                (LINT_KEY.to_string(), out)
            }
            .boxed(),
            async move {
                let out = self.run_tests(cancel, &request.workspace).await;
                (TESTS_KEY.to_string(), out)
            }
            .boxed(),
        ];

        let mut tool_outputs = HashMap::new();
        for (name, result) in join_all(runs).await {
            let output = match result {
                Ok(output) => output,
                Err(e) => format!("ERROR: {e:#}"),
            };
            debug!(tool = %name, bytes = output.len(), "review collaborator finished");
            tool_outputs.insert(name, output);
        }

        if self.synthesizer.is_some() {
            self.llm_review(cancel, request, tool_outputs).await
        } else {
            Ok(tool_based_review(tool_outputs))
        }
    }

    /// Run the configured test command in the workspace.
    ///
    /// An empty command is a neutral informational result, not an error.
    async fn run_tests(&self, cancel: &CancellationToken, workspace: &Path) -> Result<String> {
        let parts: Vec<&str> = self.test_command.split_whitespace().collect();
        let Some((program, args)) = parts.split_first() else {
            return Ok("no test command configured".to_string());
        };

        let run = tools::run_command(cancel, workspace, program, args).await?;
        Ok(run.output)
    }

    async fn llm_review(
        &self,
        cancel: &CancellationToken,
        request: &ReviewRequest,
        tool_outputs: HashMap<String, String>,
    ) -> Result<ReviewResult> {
        let synthesizer = self
            .synthesizer
            .as_ref()
            .context("LLM review requested without a synthesizer")?;

        let diff = self
            .repo
            .diff_summary(&request.base_branch, &request.branch)
            .await
            .unwrap_or_default();

        let prompt = build_review_prompt(request, &diff, &tool_outputs, self.analyzer.name());

        let output = synthesizer
            .synthesize(cancel, &prompt, &request.workspace)
            .await
            .context("LLM review failed")?;

        let verdict = parse_verdict(&output);
        Ok(ReviewResult {
            verdict,
            blocking_issues: Vec::new(),
            suggestions: Vec::new(),
            tool_outputs,
            summary: output,
        })
    }
}

/// Deterministic verdict from raw tool outputs.
///
/// Default verdict is `Approve`. Collaborator infra errors are listed as
/// issues but do not by themselves change the verdict. A linter error
/// indicator downgrades to `RequestChanges`; a test failure indicator is
/// checked afterwards and overrides it, so a failing test always wins over
/// a lint complaint.
pub(crate) fn tool_based_review(tool_outputs: HashMap<String, String>) -> ReviewResult {
    let mut verdict = Verdict::Approve;
    let mut issues = Vec::new();

    let mut names: Vec<&String> = tool_outputs.keys().collect();
    names.sort();
    for name in names {
        let output = &tool_outputs[name];
        if output.starts_with("ERROR:") {
            issues.push(format!("{name}: {output}"));
        }
    }

    if let Some(lint) = tool_outputs.get(LINT_KEY)
        && lint.contains("error")
    {
        verdict = Verdict::RequestChanges;
        issues.push("Linter errors found".to_string());
    }

    if let Some(tests) = tool_outputs.get(TESTS_KEY)
        && tests.contains("FAILED")
    {
        verdict = Verdict::Block;
        issues.push("Tests failing".to_string());
    }

    let summary = if issues.is_empty() {
        ALL_CLEAR.to_string()
    } else {
        issues.join("\n")
    };

    ReviewResult {
        verdict,
        blocking_issues: issues,
        suggestions: Vec::new(),
        tool_outputs,
        summary,
    }
}

/// Build the structured prompt for the review synthesizer.
fn build_review_prompt(
    request: &ReviewRequest,
    diff: &str,
    tool_outputs: &HashMap<String, String>,
    analyzer_key: &str,
) -> String {
    let empty = String::new();
    format!(
        "You are a senior engineer reviewing a change.\n\n\
         ## Original Spec\n{spec}\n\n\
         ## Diff Summary\n{diff}\n\n\
         ## Static Analysis\n{analysis}\n\n\
         ## Linter Output\n{lint}\n\n\
         ## Test Results\n{tests}\n\n\
         Provide a review covering:\n\
         1. Does this implementation match the spec?\n\
         2. Architectural concerns (if any)\n\
         3. Security issues (beyond what tools caught)\n\
         4. Suggestions for improvement\n\n\
         End with a verdict on a new line: VERDICT: APPROVE or VERDICT: REQUEST_CHANGES or VERDICT: BLOCK\n\n\
         Be pragmatic. Not everything needs to be perfect.\n\
         Distinguish between blocking issues and nice-to-haves.",
        spec = request.spec,
        diff = truncate(diff, DIFF_SUMMARY_MAX),
        analysis = tool_outputs.get(analyzer_key).unwrap_or(&empty),
        lint = tool_outputs.get(LINT_KEY).unwrap_or(&empty),
        tests = tool_outputs.get(TESTS_KEY).unwrap_or(&empty),
    )
}

//! Linter aggregator review collaborator.
//!
//! Runs every configured linter in the workspace and joins their outputs.
//! A linter that is not installed is reported as skipped; a linter that
//! exits non-zero has simply found issues. Neither case is an error.

use crate::review::ReviewTool;
use crate::tools::{command_available, run_command};
use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Known linter invocations: (program, args, availability probe).
fn linter_invocation(name: &str) -> Option<(&'static str, &'static [&'static str], &'static str)> {
    match name {
        "eslint" => Some(("npx", &["eslint", ".", "--format", "compact"], "npx")),
        "ruff" => Some(("ruff", &["check", "."], "ruff")),
        "golangci-lint" => Some(("golangci-lint", &["run", "./..."], "golangci-lint")),
        "flake8" => Some(("flake8", &["."], "flake8")),
        "pylint" => Some(("pylint", &["."], "pylint")),
        "clippy" => Some(("cargo", &["clippy", "--quiet"], "cargo")),
        _ => None,
    }
}

/// Aggregates the configured linters into one review collaborator.
pub struct Linter {
    linters: Vec<String>,
}

impl Linter {
    pub fn new(linters: &[String]) -> Self {
        let linters = if linters.is_empty() {
            vec!["eslint".to_string(), "ruff".to_string()]
        } else {
            linters.to_vec()
        };
        Self { linters }
    }
}

#[async_trait]
impl ReviewTool for Linter {
    fn name(&self) -> &str {
        "lint"
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
        workspace: &Path,
        _branch: &str,
    ) -> Result<String> {
        let mut results = Vec::new();

        for linter in &self.linters {
            let invocation = linter_invocation(linter);

            let (program, args, probe) = match &invocation {
                Some((program, args, probe)) => (*program, *args, *probe),
                // Unknown linter: try to run it directly by name.
                None => (linter.as_str(), &[] as &[&str], linter.as_str()),
            };

            if !command_available(probe) {
                results.push(format!("{linter}: not installed (skipped)"));
                continue;
            }

            let run = run_command(cancel, workspace, program, args).await?;
            if run.output.is_empty() {
                if run.success {
                    results.push(format!("{linter}: no issues found"));
                } else {
                    results.push(format!("{linter}: exited with failure and no output"));
                }
            } else {
                results.push(format!("{linter}:\n{}", run.output));
            }
        }

        if results.is_empty() {
            return Ok("No linters configured or available".to_string());
        }

        Ok(results.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_linters_when_none_configured() {
        let linter = Linter::new(&[]);
        assert_eq!(linter.linters, vec!["eslint", "ruff"]);
    }

    #[test]
    fn test_configured_linters_are_kept() {
        let linter = Linter::new(&["clippy".to_string()]);
        assert_eq!(linter.linters, vec!["clippy"]);
    }

    #[test]
    fn test_known_invocations() {
        assert!(linter_invocation("eslint").is_some());
        assert!(linter_invocation("ruff").is_some());
        assert!(linter_invocation("clippy").is_some());
        assert!(linter_invocation("made-up-linter").is_none());
    }

    #[tokio::test]
    async fn test_missing_linter_is_skipped_not_error() {
        let linter = Linter::new(&["definitely-not-a-real-linter-xyz".to_string()]);
        let cancel = CancellationToken::new();
        let out = linter
            .run(&cancel, &std::env::current_dir().unwrap(), "main")
            .await
            .unwrap();
        assert!(out.contains("not installed (skipped)"));
    }

    #[test]
    fn test_tool_name() {
        assert_eq!(Linter::new(&[]).name(), "lint");
    }
}

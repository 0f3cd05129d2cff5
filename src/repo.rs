//! Source-control collaborator: isolated worktree workspaces per branch.
//!
//! Each task attempt gets a fresh worktree under `.workspaces/<branch>`
//! inside the managed repository. Setup removes any pre-existing worktree
//! for the branch first, which makes retries of the same task idempotent;
//! removal of a missing worktree is a no-op. Branch names are validated
//! before they touch the filesystem or a git invocation.

use crate::errors::WorkspaceError;
use crate::validation::is_valid_branch_name;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Source-control operations the orchestrator core depends on.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Create a fresh isolated workspace for `branch`, replacing any
    /// pre-existing one.
    async fn create_workspace(&self, branch: &str) -> Result<PathBuf, WorkspaceError>;

    /// Remove the workspace for `branch`. Removing a workspace that does
    /// not exist is not an error.
    async fn remove_workspace(&self, branch: &str) -> Result<(), WorkspaceError>;

    /// Stage, commit, and push everything in the workspace. A clean tree is
    /// a no-op, not an error.
    async fn commit_and_push(
        &self,
        workspace: &Path,
        branch: &str,
        message: &str,
    ) -> Result<(), WorkspaceError>;

    /// Merge `branch` into the main branch and push.
    async fn merge_branch(&self, branch: &str) -> Result<(), WorkspaceError>;

    /// Delete `branch` locally and on the remote, best effort.
    async fn delete_branch(&self, branch: &str) -> Result<(), WorkspaceError>;

    /// Short change summary between `base` and `branch`.
    async fn diff_summary(&self, base: &str, branch: &str) -> Result<String, WorkspaceError>;

    /// Name of the integration branch reviews diff against.
    fn main_branch(&self) -> &str;
}

/// Git-backed [`Repository`] shelling out to the `git` CLI.
pub struct GitRepository {
    path: PathBuf,
    remote: String,
    main_branch: String,
    workspaces: PathBuf,
}

impl GitRepository {
    /// Open an existing git repository and prepare the workspaces
    /// directory.
    pub fn open(path: &Path, remote: &str, main_branch: &str) -> Result<Self, WorkspaceError> {
        git2::Repository::open(path)
            .map_err(|_| WorkspaceError::NotARepository(path.display().to_string()))?;

        let workspaces = path.join(".workspaces");
        std::fs::create_dir_all(&workspaces)?;

        Ok(Self {
            path: path.to_path_buf(),
            remote: remote.to_string(),
            main_branch: main_branch.to_string(),
            workspaces,
        })
    }

    /// Run git in `dir`, returning combined output and success flag.
    async fn git(&self, dir: &Path, args: &[&str]) -> Result<(String, bool), WorkspaceError> {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .output()
            .await?;

        let mut text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if text.is_empty() {
            text = stderr;
        } else if !output.status.success() && !stderr.is_empty() {
            text.push('\n');
            text.push_str(&stderr);
        }

        Ok((text, output.status.success()))
    }

    /// Run git and convert a non-zero exit into a `WorkspaceError`.
    async fn git_ok(
        &self,
        dir: &Path,
        args: &[&str],
        operation: &'static str,
    ) -> Result<String, WorkspaceError> {
        let (output, success) = self.git(dir, args).await?;
        if !success {
            return Err(WorkspaceError::Git {
                operation,
                detail: output,
            });
        }
        Ok(output)
    }

    fn workspace_path(&self, branch: &str) -> PathBuf {
        self.workspaces.join(branch)
    }
}

#[async_trait]
impl Repository for GitRepository {
    async fn create_workspace(&self, branch: &str) -> Result<PathBuf, WorkspaceError> {
        if !is_valid_branch_name(branch) {
            return Err(WorkspaceError::InvalidBranch(branch.to_string()));
        }

        let wt_path = self.workspace_path(branch);
        let remote_ref = format!("{}/{}", self.remote, self.main_branch);

        // Best effort: the branch may already exist, the remote may be
        // unreachable. The worktree add below is the authoritative step.
        let _ = self.git(&self.path, &["fetch", &self.remote, &self.main_branch]).await;
        let (_, from_remote) = self.git(&self.path, &["branch", branch, &remote_ref]).await?;
        if !from_remote {
            let _ = self.git(&self.path, &["branch", branch]).await;
        }

        // Replace any pre-existing worktree so retries start clean.
        let wt = wt_path.to_string_lossy().to_string();
        let _ = self
            .git(&self.path, &["worktree", "remove", &wt, "--force"])
            .await;
        if let Err(e) = tokio::fs::remove_dir_all(&wt_path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            return Err(e.into());
        }

        let (output, success) = self.git(&self.path, &["worktree", "add", &wt, branch]).await?;
        if !success {
            return Err(WorkspaceError::WorktreeCreate {
                branch: branch.to_string(),
                detail: output,
            });
        }

        debug!(branch, path = %wt_path.display(), "created workspace");
        Ok(wt_path)
    }

    async fn remove_workspace(&self, branch: &str) -> Result<(), WorkspaceError> {
        let wt_path = self.workspace_path(branch);
        let wt = wt_path.to_string_lossy().to_string();

        let _ = self
            .git(&self.path, &["worktree", "remove", &wt, "--force"])
            .await;
        if let Err(e) = tokio::fs::remove_dir_all(&wt_path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            return Err(e.into());
        }

        Ok(())
    }

    async fn commit_and_push(
        &self,
        workspace: &Path,
        branch: &str,
        message: &str,
    ) -> Result<(), WorkspaceError> {
        self.git_ok(workspace, &["add", "-A"], "add").await?;

        // Nothing staged means nothing to do.
        let (_, has_no_changes) = self
            .git(workspace, &["diff", "--cached", "--quiet"])
            .await?;
        if has_no_changes {
            return Ok(());
        }

        self.git_ok(workspace, &["commit", "-m", message], "commit").await?;
        self.git_ok(
            workspace,
            &["push", "-u", &self.remote, branch, "--force-with-lease"],
            "push",
        )
        .await?;

        Ok(())
    }

    async fn merge_branch(&self, branch: &str) -> Result<(), WorkspaceError> {
        self.git_ok(&self.path, &["fetch", &self.remote], "fetch").await?;
        self.git_ok(&self.path, &["checkout", &self.main_branch], "checkout")
            .await?;
        self.git_ok(
            &self.path,
            &["pull", &self.remote, &self.main_branch],
            "pull",
        )
        .await?;

        let merge_message = format!("Merge {branch}");
        self.git_ok(
            &self.path,
            &["merge", branch, "--no-ff", "-m", &merge_message],
            "merge",
        )
        .await?;
        self.git_ok(
            &self.path,
            &["push", &self.remote, &self.main_branch],
            "push",
        )
        .await?;

        let _ = self.git(&self.path, &["branch", "-d", branch]).await;
        let _ = self
            .git(&self.path, &["push", &self.remote, "--delete", branch])
            .await;

        Ok(())
    }

    async fn delete_branch(&self, branch: &str) -> Result<(), WorkspaceError> {
        let _ = self.git(&self.path, &["branch", "-D", branch]).await;
        let _ = self
            .git(&self.path, &["push", &self.remote, "--delete", branch])
            .await;
        Ok(())
    }

    async fn diff_summary(&self, base: &str, branch: &str) -> Result<String, WorkspaceError> {
        let range = format!("{base}...{branch}");
        let (output, _) = self
            .git(&self.path, &["diff", &range, "--stat"])
            .await?;
        Ok(output)
    }

    fn main_branch(&self) -> &str {
        &self.main_branch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn init_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        let run = |args: &[&str]| {
            let out = std::process::Command::new("git")
                .args(args)
                .current_dir(dir.path())
                .output()
                .unwrap();
            assert!(out.status.success(), "git {args:?}: {out:?}");
        };
        run(&["init", "-b", "main"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "test"]);
        run(&["commit", "--allow-empty", "-m", "init"]);
        dir
    }

    #[test]
    fn test_open_rejects_non_repo() {
        let dir = TempDir::new().unwrap();
        let result = GitRepository::open(dir.path(), "origin", "main");
        assert!(matches!(result, Err(WorkspaceError::NotARepository(_))));
    }

    #[tokio::test]
    async fn test_open_creates_workspaces_dir() {
        let dir = init_repo().await;
        let _repo = GitRepository::open(dir.path(), "origin", "main").unwrap();
        assert!(dir.path().join(".workspaces").is_dir());
    }

    #[tokio::test]
    async fn test_create_workspace_rejects_invalid_branch() {
        let dir = init_repo().await;
        let repo = GitRepository::open(dir.path(), "origin", "main").unwrap();

        let result = repo.create_workspace("../escape").await;
        assert!(matches!(result, Err(WorkspaceError::InvalidBranch(_))));
    }

    #[tokio::test]
    async fn test_create_and_remove_workspace() {
        let dir = init_repo().await;
        let repo = GitRepository::open(dir.path(), "origin", "main").unwrap();

        let path = repo.create_workspace("task-abc12345").await.unwrap();
        assert!(path.is_dir());

        repo.remove_workspace("task-abc12345").await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_create_workspace_is_idempotent_across_retries() {
        let dir = init_repo().await;
        let repo = GitRepository::open(dir.path(), "origin", "main").unwrap();

        let first = repo.create_workspace("task-abc12345").await.unwrap();
        std::fs::write(first.join("leftover.txt"), "stale attempt").unwrap();

        let second = repo.create_workspace("task-abc12345").await.unwrap();
        assert_eq!(first, second);
        assert!(!second.join("leftover.txt").exists(), "workspace must be fresh");
    }

    #[tokio::test]
    async fn test_remove_missing_workspace_is_noop() {
        let dir = init_repo().await;
        let repo = GitRepository::open(dir.path(), "origin", "main").unwrap();

        repo.remove_workspace("task-never-created").await.unwrap();
    }

    #[tokio::test]
    async fn test_commit_and_push_noop_on_clean_tree() {
        let dir = init_repo().await;
        let repo = GitRepository::open(dir.path(), "origin", "main").unwrap();

        let ws = repo.create_workspace("task-abc12345").await.unwrap();
        // Clean tree, no remote configured: must still be Ok.
        repo.commit_and_push(&ws, "task-abc12345", "Task abc: noop")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_diff_summary_runs() {
        let dir = init_repo().await;
        let repo = GitRepository::open(dir.path(), "origin", "main").unwrap();
        repo.create_workspace("task-abc12345").await.unwrap();

        let diff = repo.diff_summary("main", "task-abc12345").await.unwrap();
        assert!(diff.is_empty(), "no changes yet: {diff}");
    }
}

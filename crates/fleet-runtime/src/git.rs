//! Thin async wrapper around the git binary.

use std::path::{Path, PathBuf};
use std::process::Output;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Result, RuntimeError};

/// Runs git commands in one working directory.
#[derive(Debug, Clone)]
pub struct GitRunner {
    working_dir: PathBuf,
}

impl GitRunner {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub async fn run(&self, args: &[&str]) -> Result<Output> {
        debug!(args = ?args, dir = %self.working_dir.display(), "running git command");

        let output = Command::new("git")
            .args(args)
            .current_dir(&self.working_dir)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(args = ?args, stderr = %stderr.trim(), "git command failed");
        }

        Ok(output)
    }

    pub async fn run_checked(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RuntimeError::Git(stderr.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// True if `branch` exists locally or as `<remote>/<branch>`.
    pub async fn branch_exists(&self, branch: &str) -> Result<bool> {
        let local = format!("refs/heads/{}", branch);
        let output = self.run(&["rev-parse", "--verify", "--quiet", &local]).await?;
        if output.status.success() {
            return Ok(true);
        }

        let output = self
            .run(&["for-each-ref", "--format=%(refname)", "refs/remotes"])
            .await?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .any(|r| is_remote_branch(r.trim(), branch)))
    }

    /// Adds a worktree at `path` on `branch`, creating the branch from HEAD
    /// if it does not exist. Returns true if the branch was created.
    pub async fn worktree_add(&self, path: &Path, branch: &str) -> Result<bool> {
        let path_str = path_arg(path)?;

        if self.branch_exists(branch).await? {
            self.run_checked(&["worktree", "add", path_str, branch]).await?;
            Ok(false)
        } else {
            self.run_checked(&["worktree", "add", "-b", branch, path_str, "HEAD"])
                .await?;
            Ok(true)
        }
    }

    pub async fn delete_branch(&self, branch: &str) -> Result<()> {
        self.run_checked(&["branch", "-D", branch]).await?;
        Ok(())
    }

    pub async fn worktree_remove(&self, path: &Path) -> Result<()> {
        let path_str = path_arg(path)?;
        self.run_checked(&["worktree", "remove", "--force", path_str])
            .await?;
        Ok(())
    }

    pub async fn worktree_prune(&self) -> Result<()> {
        self.run_checked(&["worktree", "prune"]).await?;
        Ok(())
    }

    pub async fn worktree_list(&self) -> Result<String> {
        self.run_checked(&["worktree", "list", "--porcelain"]).await
    }
}

/// Matches `refs/remotes/<remote>/<branch>` exactly, never a longer branch
/// name that merely ends in `/<branch>`.
fn is_remote_branch(refname: &str, branch: &str) -> bool {
    refname
        .strip_prefix("refs/remotes/")
        .and_then(|short| short.split_once('/'))
        .is_some_and(|(_, name)| name == branch)
}

fn path_arg(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| RuntimeError::Git(format!("invalid path encoding: {}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_remote_branch_exact() {
        assert!(is_remote_branch("refs/remotes/origin/x", "x"));
        assert!(is_remote_branch("refs/remotes/upstream/feature/x", "feature/x"));
        assert!(!is_remote_branch("refs/remotes/origin/feature/x", "x"));
        assert!(!is_remote_branch("refs/remotes/origin/xy", "x"));
        assert!(!is_remote_branch("refs/heads/x", "x"));
    }
}

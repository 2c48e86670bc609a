//! Isolated git worktrees, one per session.
//!
//! Managed worktrees live at `<worktree_root>/<repo-name>/<session-id>`, so the
//! owning session can always be read back from the final path segment.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use fleet_models::{SessionId, WorkspaceInfo};
use tracing::{debug, info, warn};

use crate::error::{Result, RuntimeError};
use crate::git::GitRunner;

/// A workspace returned by [`WorkspaceManager::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWorkspace {
    pub path: PathBuf,
    /// Set when the branch did not exist and was created from HEAD.
    pub created_branch: Option<String>,
}

/// Creates and reclaims isolated workspaces for one repository.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    repo_path: PathBuf,
    root: PathBuf,
    git: GitRunner,
}

impl WorkspaceManager {
    /// Creates a manager for `repo_path`, placing workspaces under
    /// `worktree_root/<repo base name>`.
    pub fn new(repo_path: impl Into<PathBuf>, worktree_root: impl AsRef<Path>) -> Self {
        let repo_path = repo_path.into();
        let name = repo_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("repo")
            .to_string();
        Self {
            root: worktree_root.as_ref().join(name),
            git: GitRunner::new(&repo_path),
            repo_path,
        }
    }

    /// Repository this manager operates on.
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    /// Directory holding this repository's managed workspaces.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path a session's workspace lives at.
    pub fn workspace_path(&self, session_id: &SessionId) -> PathBuf {
        self.root.join(session_id.as_str())
    }

    /// Creates an isolated workspace for `session_id` on `branch`.
    ///
    /// An existing branch (local or remote-tracking) is checked out; a new one
    /// is created from the current HEAD.
    pub async fn create(&self, session_id: &SessionId, branch: &str) -> Result<NewWorkspace> {
        let path = self.workspace_path(session_id);
        if path.exists() {
            return Err(RuntimeError::WorkspaceExists(path));
        }

        tokio::fs::create_dir_all(&self.root).await?;
        let created = self.git.worktree_add(&path, branch).await?;

        info!(
            session_id = %session_id,
            branch = %branch,
            new_branch = created,
            path = %path.display(),
            "workspace created"
        );
        Ok(NewWorkspace {
            path,
            created_branch: created.then(|| branch.to_string()),
        })
    }

    /// Undoes [`create`](Self::create) for a session that never got going:
    /// removes the workspace and deletes the branch if it was created for it.
    pub async fn discard(&self, session_id: &SessionId, workspace: &NewWorkspace) -> Result<()> {
        self.remove(session_id).await?;
        if let Some(branch) = &workspace.created_branch {
            self.git.delete_branch(branch).await?;
            debug!(session_id = %session_id, branch = %branch, "created branch deleted");
        }
        Ok(())
    }

    /// Removes a session's workspace. Returns false if there was none.
    pub async fn remove(&self, session_id: &SessionId) -> Result<bool> {
        let path = self.workspace_path(session_id);
        if !path.exists() {
            return Ok(false);
        }

        self.git.worktree_remove(&path).await?;
        info!(session_id = %session_id, path = %path.display(), "workspace removed");
        Ok(true)
    }

    /// Lists every worktree of the repository, primary first.
    pub async fn list(&self) -> Result<Vec<WorkspaceInfo>> {
        let output = self.git.worktree_list().await?;
        Ok(parse_worktree_list(&output, &self.root))
    }

    /// Lists only the workspaces this manager created.
    pub async fn list_managed(&self) -> Result<Vec<WorkspaceInfo>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(WorkspaceInfo::is_managed)
            .collect())
    }

    /// Removes every managed workspace whose session is not in `active`.
    ///
    /// Returns the session ids whose workspaces were removed.
    pub async fn cleanup(&self, active: &[SessionId]) -> Result<Vec<SessionId>> {
        let mut candidates: BTreeSet<SessionId> = BTreeSet::new();

        match self.list_managed().await {
            Ok(managed) => candidates.extend(managed.into_iter().filter_map(|w| w.session_id)),
            Err(e) => warn!(error = %e, "failed to list worktrees, scanning directory only"),
        }

        // Directories git has lost track of still count
        match tokio::fs::read_dir(&self.root).await {
            Ok(mut entries) => loop {
                match entries.next_entry().await {
                    Ok(Some(entry)) => {
                        let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
                        if let (true, Some(name)) = (is_dir, entry.file_name().to_str()) {
                            candidates.insert(SessionId::from_string(name));
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(root = %self.root.display(), error = %e, "failed to scan workspace root");
                        break;
                    }
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(root = %self.root.display(), error = %e, "failed to read workspace root"),
        }

        let mut removed = Vec::new();
        let mut forced = false;
        for session_id in candidates {
            if active.contains(&session_id) {
                continue;
            }

            let path = self.workspace_path(&session_id);
            if let Err(e) = self.git.worktree_remove(&path).await {
                warn!(
                    session_id = %session_id,
                    error = %e,
                    "worktree removal failed, deleting directory"
                );
                if let Err(e) = force_delete(&path).await {
                    warn!(session_id = %session_id, error = %e, "failed to delete workspace directory");
                    continue;
                }
                forced = true;
            }

            debug!(session_id = %session_id, "orphaned workspace removed");
            removed.push(session_id);
        }

        if forced {
            if let Err(e) = self.git.worktree_prune().await {
                warn!(error = %e, "worktree prune failed");
            }
        }

        if !removed.is_empty() {
            info!(count = removed.len(), "cleaned up orphaned workspaces");
        }
        Ok(removed)
    }
}

async fn force_delete(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

/// Parses `git worktree list --porcelain` output.
fn parse_worktree_list(output: &str, managed_root: &Path) -> Vec<WorkspaceInfo> {
    let canonical_root = managed_root.canonicalize().ok();
    let is_managed = |path: &Path| {
        path.parent() == Some(managed_root)
            || match (&canonical_root, path.canonicalize().ok()) {
                (Some(root), Some(p)) => p.parent() == Some(root.as_path()),
                _ => false,
            }
    };

    let mut workspaces = Vec::new();
    for block in output.split("\n\n") {
        let mut path = None;
        let mut commit = String::new();
        let mut branch = None;

        for line in block.lines() {
            if let Some(p) = line.strip_prefix("worktree ") {
                path = Some(PathBuf::from(p));
            } else if let Some(c) = line.strip_prefix("HEAD ") {
                commit = c.to_string();
            } else if let Some(b) = line.strip_prefix("branch ") {
                branch = Some(b.trim_start_matches("refs/heads/").to_string());
            }
        }

        let Some(path) = path else { continue };
        let session_id = if is_managed(&path) {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(SessionId::from_string)
        } else {
            None
        };

        workspaces.push(WorkspaceInfo {
            is_primary: workspaces.is_empty(),
            path,
            branch,
            commit,
            session_id,
        });
    }
    workspaces
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn git_available() -> bool {
        which::which("git").is_ok()
    }

    async fn git(dir: &Path, args: &[&str]) {
        let output = tokio::process::Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .await
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?}: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    async fn init_repo() -> (TempDir, PathBuf, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let repo = tmp.path().join("widget");
        std::fs::create_dir_all(&repo).unwrap();
        git(&repo, &["init", "-q"]).await;
        git(&repo, &["config", "user.email", "dev@example.com"]).await;
        git(&repo, &["config", "user.name", "Dev"]).await;
        std::fs::write(repo.join("README.md"), "widget\n").unwrap();
        git(&repo, &["add", "."]).await;
        git(&repo, &["commit", "-q", "-m", "init"]).await;
        let root = tmp.path().join("worktrees");
        (tmp, repo, root)
    }

    #[test]
    fn test_parse_worktree_list() {
        let root = PathBuf::from("/state/worktrees/widget");
        let output = "worktree /code/widget\nHEAD 1111\nbranch refs/heads/main\n\n\
                      worktree /state/worktrees/widget/sess-a\nHEAD 2222\nbranch refs/heads/feature/x\n\n\
                      worktree /elsewhere/tmp\nHEAD 3333\ndetached\n";
        let list = parse_worktree_list(output, &root);

        assert_eq!(list.len(), 3);
        assert!(list[0].is_primary);
        assert_eq!(list[0].branch.as_deref(), Some("main"));
        assert!(!list[0].is_managed());

        assert!(!list[1].is_primary);
        assert_eq!(list[1].branch.as_deref(), Some("feature/x"));
        assert_eq!(list[1].session_id, Some(SessionId::from_string("sess-a")));
        assert_eq!(list[1].commit, "2222");

        assert!(list[2].branch.is_none());
        assert!(list[2].session_id.is_none());
    }

    #[test]
    fn test_workspace_path_keyed_by_repo_name() {
        let manager = WorkspaceManager::new("/code/widget", "/state/worktrees");
        let id = SessionId::from_string("sess-1");
        assert_eq!(
            manager.workspace_path(&id),
            PathBuf::from("/state/worktrees/widget/sess-1")
        );
    }

    #[tokio::test]
    async fn test_create_new_branch_from_head() {
        if !git_available() {
            return;
        }
        let (_tmp, repo, root) = init_repo().await;
        let manager = WorkspaceManager::new(&repo, &root);
        let id = SessionId::from_string("sess-x");

        let created = manager.create(&id, "feature/x").await.unwrap();
        assert!(created.path.join("README.md").exists());
        assert_eq!(created.created_branch.as_deref(), Some("feature/x"));

        let managed = manager.list_managed().await.unwrap();
        assert_eq!(managed.len(), 1);
        assert_eq!(managed[0].branch.as_deref(), Some("feature/x"));
        assert_eq!(managed[0].session_id, Some(id.clone()));
    }

    #[tokio::test]
    async fn test_create_existing_branch_checks_it_out() {
        if !git_available() {
            return;
        }
        let (_tmp, repo, root) = init_repo().await;
        git(&repo, &["branch", "existing"]).await;
        let manager = WorkspaceManager::new(&repo, &root);

        let created = manager
            .create(&SessionId::from_string("sess-e"), "existing")
            .await
            .unwrap();
        assert!(created.created_branch.is_none());
        let list = manager.list_managed().await.unwrap();
        assert_eq!(list[0].branch.as_deref(), Some("existing"));
    }

    #[tokio::test]
    async fn test_create_fails_when_path_exists() {
        if !git_available() {
            return;
        }
        let (_tmp, repo, root) = init_repo().await;
        let manager = WorkspaceManager::new(&repo, &root);
        let id = SessionId::from_string("sess-dup");
        std::fs::create_dir_all(manager.workspace_path(&id)).unwrap();

        let err = manager.create(&id, "dup").await.unwrap_err();
        assert!(matches!(err, RuntimeError::WorkspaceExists(_)));
    }

    #[tokio::test]
    async fn test_remove_is_noop_when_absent() {
        if !git_available() {
            return;
        }
        let (_tmp, repo, root) = init_repo().await;
        let manager = WorkspaceManager::new(&repo, &root);
        let id = SessionId::from_string("sess-r");

        assert!(!manager.remove(&id).await.unwrap());
        manager.create(&id, "r").await.unwrap();
        assert!(manager.remove(&id).await.unwrap());
        assert!(!manager.workspace_path(&id).exists());
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_inactive() {
        if !git_available() {
            return;
        }
        let (_tmp, repo, root) = init_repo().await;
        let manager = WorkspaceManager::new(&repo, &root);
        let a = SessionId::from_string("sess-a");
        let b = SessionId::from_string("sess-b");
        let c = SessionId::from_string("sess-c");
        for (id, branch) in [(&a, "a"), (&b, "b"), (&c, "c")] {
            manager.create(id, branch).await.unwrap();
        }

        let removed = manager.cleanup(&[a.clone(), b.clone()]).await.unwrap();

        assert_eq!(removed, vec![c.clone()]);
        assert!(manager.workspace_path(&a).exists());
        assert!(manager.workspace_path(&b).exists());
        assert!(!manager.workspace_path(&c).exists());
    }

    #[tokio::test]
    async fn test_cleanup_force_deletes_unknown_directory() {
        if !git_available() {
            return;
        }
        let (_tmp, repo, root) = init_repo().await;
        let manager = WorkspaceManager::new(&repo, &root);
        let stray = SessionId::from_string("sess-stray");
        std::fs::create_dir_all(manager.workspace_path(&stray)).unwrap();

        let removed = manager.cleanup(&[]).await.unwrap();

        assert_eq!(removed, vec![stray.clone()]);
        assert!(!manager.workspace_path(&stray).exists());
    }

    #[tokio::test]
    async fn test_create_branch_not_matched_by_remote_suffix() {
        if !git_available() {
            return;
        }
        let (_tmp, repo, root) = init_repo().await;
        git(&repo, &["update-ref", "refs/remotes/origin/feature/x", "HEAD"]).await;
        let manager = WorkspaceManager::new(&repo, &root);

        let created = manager
            .create(&SessionId::from_string("sess-x"), "x")
            .await
            .unwrap();

        assert_eq!(created.created_branch.as_deref(), Some("x"));
        let list = manager.list_managed().await.unwrap();
        assert_eq!(list[0].branch.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn test_discard_deletes_created_branch() {
        if !git_available() {
            return;
        }
        let (_tmp, repo, root) = init_repo().await;
        git(&repo, &["branch", "kept"]).await;
        let manager = WorkspaceManager::new(&repo, &root);
        let fresh = SessionId::from_string("sess-fresh");
        let reused = SessionId::from_string("sess-reused");

        let created = manager.create(&fresh, "fresh").await.unwrap();
        manager.discard(&fresh, &created).await.unwrap();
        let checked_out = manager.create(&reused, "kept").await.unwrap();
        manager.discard(&reused, &checked_out).await.unwrap();

        let git = GitRunner::new(&repo);
        assert!(!manager.workspace_path(&fresh).exists());
        assert!(!git.branch_exists("fresh").await.unwrap());
        assert!(git.branch_exists("kept").await.unwrap());
    }

    #[tokio::test]
    async fn test_cleanup_continues_past_failed_delete() {
        if !git_available() {
            return;
        }
        let (_tmp, repo, root) = init_repo().await;
        let manager = WorkspaceManager::new(&repo, &root);
        let broken = SessionId::from_string("sess-a");
        let stray = SessionId::from_string("sess-b");

        // A registered worktree replaced by a plain file can be neither
        // removed by git nor deleted as a directory
        manager.create(&broken, "broken").await.unwrap();
        let broken_path = manager.workspace_path(&broken);
        std::fs::remove_dir_all(&broken_path).unwrap();
        std::fs::write(&broken_path, "not a worktree").unwrap();
        std::fs::create_dir_all(manager.workspace_path(&stray)).unwrap();

        let removed = manager.cleanup(&[]).await.unwrap();

        assert_eq!(removed, vec![stray.clone()]);
        assert!(!manager.workspace_path(&stray).exists());
        assert!(broken_path.is_file());
    }
}

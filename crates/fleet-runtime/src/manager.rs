//! Session lifecycle: workspace, worker process and status, as one unit.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use fleet_models::{AgentMode, AgentState, Session, SessionId, StatusUpdate};
use nix::sys::signal::Signal;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::event::{ProcessEvent, SessionEvent, StatusEvent};
use crate::monitor::StatusMonitor;
use crate::process::{ProcessRegistry, SpawnOptions};
use crate::report::{INSTANCE_ID_ENV, SESSION_ID_ENV, SESSION_STATUS_DIR_ENV};
use crate::workspace::{NewWorkspace, WorkspaceManager};

/// What [`SessionManager::cleanup`] reclaimed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Sessions whose orphaned workspaces were removed.
    pub removed_workspaces: Vec<SessionId>,
    /// Exited processes dropped from the registry.
    pub pruned_processes: usize,
}

struct ManagerInner {
    config: RuntimeConfig,
    repo_path: PathBuf,
    sessions: RwLock<HashMap<SessionId, Session>>,
    next_display_id: AtomicU32,
    monitor: StatusMonitor,
    processes: ProcessRegistry,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl ManagerInner {
    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    async fn on_status_event(&self, event: StatusEvent) {
        match event {
            StatusEvent::Changed {
                session_id,
                current,
                ..
            } => {
                if let Some(session) = self.sessions.write().await.get_mut(&session_id) {
                    session.status = current.clone();
                }
                self.emit(SessionEvent::Updated {
                    session_id,
                    status: current,
                });
            }
            StatusEvent::NeedsInput { session_id, prompt } => {
                self.emit(SessionEvent::NeedsInput { session_id, prompt });
            }
            _ => {}
        }
    }

    async fn on_process_event(&self, event: ProcessEvent) {
        if let ProcessEvent::Exited {
            session_id,
            exit_code,
            ..
        } = event
        {
            self.monitor.mark_exited(&session_id, exit_code).await;
            self.emit(SessionEvent::Exited {
                session_id,
                exit_code,
            });
        }
    }
}

/// Owns every session of one orchestrator.
///
/// Cheap to clone; clones share the same sessions. Must be created inside a
/// tokio runtime.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    /// Creates a manager whose default repository is `repo_path`.
    pub fn new(config: RuntimeConfig, repo_path: impl Into<PathBuf>) -> Self {
        let monitor = StatusMonitor::new(&config);
        let processes = ProcessRegistry::new();
        let (event_tx, _) = broadcast::channel(256);

        let status_rx = monitor.subscribe();
        let process_rx = processes.subscribe();
        let inner = Arc::new(ManagerInner {
            config,
            repo_path: repo_path.into(),
            sessions: RwLock::new(HashMap::new()),
            next_display_id: AtomicU32::new(1),
            monitor,
            processes,
            event_tx,
        });

        tokio::spawn(forward_events(Arc::downgrade(&inner), status_rx, process_rx));
        Self { inner }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn monitor(&self) -> &StatusMonitor {
        &self.inner.monitor
    }

    pub fn processes(&self) -> &ProcessRegistry {
        &self.inner.processes
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Creates a session and starts its worker.
    ///
    /// With a `branch`, the worker runs in a fresh isolated workspace;
    /// otherwise in `working_dir`. Any failure undoes every step taken so far
    /// and is returned as [`RuntimeError::SessionCreation`].
    pub async fn create_session(
        &self,
        branch: Option<&str>,
        mode: AgentMode,
        working_dir: &Path,
        repo_path: &Path,
    ) -> Result<Session> {
        let max = self.inner.config.max_sessions;
        if self.inner.sessions.read().await.len() >= max {
            return Err(RuntimeError::MaxSessionsReached(max));
        }

        let display_id = self.inner.next_display_id.fetch_add(1, Ordering::SeqCst);
        let mut session = Session::new(display_id, mode, repo_path);
        if let Some(branch) = branch {
            session = session.with_branch(branch);
        }
        let id = session.id.clone();

        self.inner
            .sessions
            .write()
            .await
            .insert(id.clone(), session.clone());
        self.inner.monitor.register_session(&id).await;
        debug!(session_id = %id, display_id, mode = %mode, "creating session");

        let mut workspace = None;
        if let Err(e) = self.provision(&mut session, working_dir, &mut workspace).await {
            warn!(session_id = %id, error = %e, "session creation failed, rolling back");
            self.rollback(&id, workspace).await;
            return Err(RuntimeError::SessionCreation {
                session_id: id,
                source: Box::new(e),
            });
        }

        if self.inner.processes.is_active(&id) {
            self.inner
                .monitor
                .update_status(&id, StatusUpdate::state(AgentState::Idle).with_message("Ready"))
                .await;
        }
        // The worker may have exited between the check and the update
        if let Some(entry) = self.inner.processes.get(&id).filter(|e| !e.is_active()) {
            self.inner.monitor.mark_exited(&id, entry.exit_code).await;
        }
        if let Some(status) = self.inner.monitor.status(&id).await {
            session.status = status;
        }
        self.inner
            .sessions
            .write()
            .await
            .insert(id.clone(), session.clone());

        info!(
            session_id = %id,
            display_id,
            mode = %mode,
            pid = ?session.pid,
            workspace = ?session.workspace_path,
            "session created"
        );
        self.inner.emit(SessionEvent::Created {
            session: session.clone(),
        });
        Ok(session)
    }

    async fn provision(
        &self,
        session: &mut Session,
        working_dir: &Path,
        workspace: &mut Option<(WorkspaceManager, NewWorkspace)>,
    ) -> Result<()> {
        let cwd = match &session.branch {
            Some(branch) => {
                let manager =
                    WorkspaceManager::new(&session.repo_path, &self.inner.config.worktree_root);
                let created = manager.create(&session.id, branch).await?;
                let path = created.path.clone();
                *workspace = Some((manager, created));
                session.workspace_path = Some(path.clone());
                path
            }
            None => working_dir.to_path_buf(),
        };

        let (command, args) = self.inner.config.launch_command(session.mode);
        let mut options = SpawnOptions::new()
            .with_cwd(cwd)
            .with_env(SESSION_ID_ENV, session.id.as_str())
            .with_env(
                SESSION_STATUS_DIR_ENV,
                self.inner.monitor.status_dir().to_string_lossy(),
            );
        if let Some(instance_id) = &self.inner.config.instance_id {
            options = options.with_env(INSTANCE_ID_ENV, instance_id.as_str());
        }
        if let Some(log_dir) = &self.inner.config.log_dir {
            tokio::fs::create_dir_all(log_dir).await?;
            options = options.with_log_file(log_dir.join(format!("{}.log", session.id)));
        }

        let handle = self
            .inner
            .processes
            .spawn(&session.id, &command, &args, options)
            .await?;
        session.pid = Some(handle.pid);
        Ok(())
    }

    async fn rollback(&self, id: &SessionId, workspace: Option<(WorkspaceManager, NewWorkspace)>) {
        self.inner.processes.kill(id, Signal::SIGKILL).await;
        if let Some((manager, created)) = workspace {
            if let Err(e) = manager.discard(id, &created).await {
                warn!(session_id = %id, error = %e, "failed to remove workspace during rollback");
            }
        }
        self.inner.monitor.unregister_session(id).await;
        self.inner.sessions.write().await.remove(id);
    }

    /// Tears a session down. Returns false if it did not exist.
    ///
    /// Workspace removal failures are logged and left for [`cleanup`](Self::cleanup).
    pub async fn destroy_session(&self, id: &SessionId) -> Result<bool> {
        let Some(session) = self.inner.sessions.write().await.remove(id) else {
            return Ok(false);
        };

        self.inner
            .processes
            .terminate(id, self.inner.config.kill_grace)
            .await;

        if session.workspace_path.is_some() {
            let manager = WorkspaceManager::new(&session.repo_path, &self.inner.config.worktree_root);
            if let Err(e) = manager.remove(id).await {
                warn!(session_id = %id, error = %e, "workspace removal failed, leaving it for cleanup");
            }
        }

        self.inner.monitor.unregister_session(id).await;
        info!(session_id = %id, display_id = session.display_id, "session destroyed");
        self.inner.emit(SessionEvent::Destroyed {
            session_id: id.clone(),
        });
        Ok(true)
    }

    /// Returns a session with its current status.
    pub async fn get_session(&self, id: &SessionId) -> Option<Session> {
        let mut session = self.inner.sessions.read().await.get(id).cloned()?;
        if let Some(status) = self.inner.monitor.status(id).await {
            session.status = status;
        }
        Some(session)
    }

    /// Finds a session by id or display id.
    pub async fn find_session(&self, key: &str) -> Option<Session> {
        let display_id: Option<u32> = key.parse().ok();
        let id = self
            .inner
            .sessions
            .read()
            .await
            .values()
            .find(|s| s.id.as_str() == key || Some(s.display_id) == display_id)
            .map(|s| s.id.clone())?;
        self.get_session(&id).await
    }

    /// Returns every session ordered by display id.
    pub async fn list_sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.inner.sessions.read().await.values().cloned().collect();
        for session in &mut sessions {
            if let Some(status) = self.inner.monitor.status(&session.id).await {
                session.status = status;
            }
        }
        sessions.sort_by_key(|s| s.display_id);
        sessions
    }

    pub async fn session_count(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    /// Removes workspaces no live session owns and forgets exited processes.
    pub async fn cleanup(&self) -> Result<CleanupReport> {
        let (active, repos) = {
            let sessions = self.inner.sessions.read().await;
            let active: Vec<SessionId> = sessions.keys().cloned().collect();
            let mut repos: BTreeSet<PathBuf> =
                sessions.values().map(|s| s.repo_path.clone()).collect();
            repos.insert(self.inner.repo_path.clone());
            (active, repos)
        };

        let mut report = CleanupReport::default();
        for repo in repos {
            let manager = WorkspaceManager::new(&repo, &self.inner.config.worktree_root);
            match manager.cleanup(&active).await {
                Ok(removed) => report.removed_workspaces.extend(removed),
                Err(e) => warn!(repo = %repo.display(), error = %e, "workspace cleanup failed"),
            }
        }
        report.pruned_processes = self.inner.processes.prune();

        info!(
            workspaces = report.removed_workspaces.len(),
            processes = report.pruned_processes,
            "cleanup finished"
        );
        Ok(report)
    }

    /// Destroys every session. Returns how many were destroyed.
    pub async fn shutdown(&self) -> usize {
        let ids: Vec<SessionId> = self.inner.sessions.read().await.keys().cloned().collect();
        let mut destroyed = 0;
        for id in ids {
            match self.destroy_session(&id).await {
                Ok(true) => destroyed += 1,
                Ok(false) => {}
                Err(e) => warn!(session_id = %id, error = %e, "failed to destroy session"),
            }
        }
        destroyed
    }
}

/// Turns monitor and process events into session events until the manager
/// is dropped.
async fn forward_events(
    inner: Weak<ManagerInner>,
    mut status_rx: broadcast::Receiver<StatusEvent>,
    mut process_rx: broadcast::Receiver<ProcessEvent>,
) {
    loop {
        tokio::select! {
            event = status_rx.recv() => match event {
                Ok(event) => {
                    let Some(inner) = inner.upgrade() else { break };
                    inner.on_status_event(event).await;
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "status events lagged"),
                Err(RecvError::Closed) => break,
            },
            event = process_rx.recv() => match event {
                Ok(event) => {
                    let Some(inner) = inner.upgrade() else { break };
                    inner.on_process_event(event).await;
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "process events lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }
    debug!("session event forwarding stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    struct Fixture {
        _tmp: TempDir,
        repo: PathBuf,
        worktrees: PathBuf,
        status: PathBuf,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let repo = tmp.path().join("widget");
        std::fs::create_dir_all(&repo).unwrap();
        Fixture {
            worktrees: tmp.path().join("worktrees"),
            status: tmp.path().join("status"),
            repo,
            _tmp: tmp,
        }
    }

    fn config(f: &Fixture, command: &str, args: &[&str]) -> RuntimeConfig {
        RuntimeConfig::new()
            .with_worktree_root(&f.worktrees)
            .with_status_dir(&f.status)
            .with_kill_grace(Duration::from_millis(200))
            .with_launch_command(
                AgentMode::Claude,
                command,
                args.iter().map(|a| a.to_string()).collect(),
            )
    }

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
        assert!(output.status.success());
    }

    async fn init_repo(repo: &Path) {
        git(repo, &["init", "-q"]).await;
        git(repo, &["config", "user.email", "dev@example.com"]).await;
        git(repo, &["config", "user.name", "Dev"]).await;
        std::fs::write(repo.join("README.md"), "widget\n").unwrap();
        git(repo, &["add", "."]).await;
        git(repo, &["commit", "-q", "-m", "init"]).await;
    }

    async fn wait_for_state(manager: &SessionManager, id: &SessionId, state: AgentState) {
        timeout(Duration::from_secs(10), async {
            loop {
                if manager.get_session(id).await.map(|s| s.status.state) == Some(state) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .expect("state never reached");
    }

    #[tokio::test]
    async fn test_create_list_destroy() {
        let f = fixture();
        let manager = SessionManager::new(config(&f, "sleep", &["30"]), &f.repo);

        let first = manager
            .create_session(None, AgentMode::Claude, &f.repo, &f.repo)
            .await
            .unwrap();
        let second = manager
            .create_session(None, AgentMode::Claude, &f.repo, &f.repo)
            .await
            .unwrap();

        assert_eq!(first.status.state, AgentState::Idle);
        assert!(first.pid.is_some());
        assert_eq!((first.display_id, second.display_id), (1, 2));

        let listed: Vec<u32> = manager
            .list_sessions()
            .await
            .iter()
            .map(|s| s.display_id)
            .collect();
        assert_eq!(listed, vec![1, 2]);
        assert_eq!(manager.find_session("2").await.unwrap().id, second.id);

        assert!(manager.destroy_session(&first.id).await.unwrap());
        assert!(!manager.destroy_session(&first.id).await.unwrap());
        assert!(!manager.monitor().is_tracked(&first.id).await);
        assert_eq!(manager.session_count().await, 1);

        assert_eq!(manager.shutdown().await, 1);
    }

    #[tokio::test]
    async fn test_spawn_failure_rolls_back() {
        let f = fixture();
        let manager = SessionManager::new(config(&f, "fleet-no-such-binary-xyz", &[]), &f.repo);

        let err = manager
            .create_session(None, AgentMode::Claude, &f.repo, &f.repo)
            .await
            .unwrap_err();

        match err {
            RuntimeError::SessionCreation { source, .. } => {
                assert!(matches!(*source, RuntimeError::Spawn { .. }));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(manager.list_sessions().await.is_empty());
        assert!(manager.monitor().statuses().await.is_empty());
    }

    #[tokio::test]
    async fn test_spawn_failure_removes_workspace() {
        if !git_available() {
            return;
        }
        let f = fixture();
        init_repo(&f.repo).await;
        let manager = SessionManager::new(config(&f, "fleet-no-such-binary-xyz", &[]), &f.repo);

        let err = manager
            .create_session(Some("feature/x"), AgentMode::Claude, &f.repo, &f.repo)
            .await
            .unwrap_err();
        let RuntimeError::SessionCreation { session_id, .. } = err else {
            panic!("expected SessionCreation");
        };

        let workspaces = WorkspaceManager::new(&f.repo, &f.worktrees);
        assert!(!workspaces.workspace_path(&session_id).exists());
        assert!(workspaces.list_managed().await.unwrap().is_empty());
        assert!(!crate::git::GitRunner::new(&f.repo)
            .branch_exists("feature/x")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_branch_session_gets_workspace() {
        if !git_available() {
            return;
        }
        let f = fixture();
        init_repo(&f.repo).await;
        let manager = SessionManager::new(config(&f, "sleep", &["30"]), &f.repo);

        let session = manager
            .create_session(Some("feature/x"), AgentMode::Claude, &f.repo, &f.repo)
            .await
            .unwrap();
        let path = session.workspace_path.clone().unwrap();
        assert!(path.join("README.md").exists());
        assert_eq!(session.working_dir(), &path);

        manager.destroy_session(&session.id).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_process_exit_sets_terminal_status() {
        let f = fixture();
        let manager = SessionManager::new(
            config(&f, "sh", &["-c", "sleep 0.2; exit 0"])
                .with_launch_command(AgentMode::Shell, "sh", vec!["-c".into(), "sleep 0.2; exit 4".into()]),
            &f.repo,
        );
        let mut rx = manager.subscribe();

        let ok = manager
            .create_session(None, AgentMode::Claude, &f.repo, &f.repo)
            .await
            .unwrap();
        let bad = manager
            .create_session(None, AgentMode::Shell, &f.repo, &f.repo)
            .await
            .unwrap();

        wait_for_state(&manager, &ok.id, AgentState::Done).await;
        wait_for_state(&manager, &bad.id, AgentState::Error).await;

        let mut exited = Vec::new();
        timeout(Duration::from_secs(5), async {
            while exited.len() < 2 {
                if let Ok(SessionEvent::Exited { exit_code, .. }) = rx.recv().await {
                    exited.push(exit_code);
                }
            }
        })
        .await
        .unwrap();
        exited.sort();
        assert_eq!(exited, vec![Some(0), Some(4)]);
    }

    #[tokio::test]
    async fn test_worker_gets_session_env() {
        let f = fixture();
        let out = f.repo.join("env.txt");
        let script = format!(
            "echo $FLEET_SESSION_ID $FLEET_SESSION_STATUS_DIR > {}; sleep 0.1",
            out.display()
        );
        let manager = SessionManager::new(config(&f, "sh", &["-c", &script]), &f.repo);

        let session = manager
            .create_session(None, AgentMode::Claude, &f.repo, &f.repo)
            .await
            .unwrap();
        wait_for_state(&manager, &session.id, AgentState::Done).await;

        let written = std::fs::read_to_string(&out).unwrap();
        assert!(written.contains(session.id.as_str()));
        assert!(written.contains(f.status.to_str().unwrap()));
    }

    #[tokio::test]
    async fn test_max_sessions() {
        let f = fixture();
        let manager = SessionManager::new(config(&f, "sleep", &["30"]).with_max_sessions(1), &f.repo);

        manager
            .create_session(None, AgentMode::Claude, &f.repo, &f.repo)
            .await
            .unwrap();
        let err = manager
            .create_session(None, AgentMode::Claude, &f.repo, &f.repo)
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::MaxSessionsReached(1)));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_cleanup_reclaims_orphans() {
        if !git_available() {
            return;
        }
        let f = fixture();
        init_repo(&f.repo).await;
        let manager = SessionManager::new(config(&f, "sleep", &["30"]), &f.repo);

        let live = manager
            .create_session(Some("live"), AgentMode::Claude, &f.repo, &f.repo)
            .await
            .unwrap();
        let workspaces = WorkspaceManager::new(&f.repo, &f.worktrees);
        let orphan = SessionId::from_string("sess-orphan");
        workspaces.create(&orphan, "orphan").await.unwrap();

        let report = manager.cleanup().await.unwrap();
        assert_eq!(report.removed_workspaces, vec![orphan.clone()]);
        assert!(workspaces.workspace_path(&live.id).exists());
        assert!(!workspaces.workspace_path(&orphan).exists());

        manager.shutdown().await;
    }
}

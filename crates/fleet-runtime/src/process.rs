//! Worker process tracking.
//!
//! Workers fork their own helpers (language servers, test runners, shells),
//! so every kill targets the whole process tree rooted at the tracked pid.

use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use fleet_models::{ProcessEntry, SessionId};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use sysinfo::{ProcessesToUpdate, System};
use tokio::process::Command;
use tokio::signal::unix::{signal, Signal as UnixSignal, SignalKind};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, trace, warn};

use crate::error::{Result, RuntimeError};
use crate::event::ProcessEvent;

/// How to spawn a worker.
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    /// Working directory.
    pub cwd: Option<PathBuf>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// File that receives stdout and stderr. Output is discarded if unset.
    pub log_file: Option<PathBuf>,
}

impl SpawnOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }
}

/// Handle returned by [`ProcessRegistry::spawn`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub session_id: SessionId,
    pub pid: u32,
}

struct Inner {
    entries: Mutex<HashMap<SessionId, ProcessEntry>>,
    event_tx: broadcast::Sender<ProcessEvent>,
}

impl Inner {
    fn entries(&self) -> MutexGuard<'_, HashMap<SessionId, ProcessEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn active_pids(&self) -> Vec<(SessionId, u32)> {
        self.entries()
            .values()
            .filter(|e| e.is_active())
            .map(|e| (e.session_id.clone(), e.pid))
            .collect()
    }

    fn kill_all_sync(&self, signal: Signal) -> usize {
        self.active_pids()
            .into_iter()
            .filter(|(_, pid)| signal_tree(*pid, signal))
            .count()
    }

    fn record_exit(&self, session_id: &SessionId, pid: u32, exit_code: Option<i32>) {
        let recorded = {
            let mut entries = self.entries();
            match entries.get_mut(session_id) {
                Some(entry) if entry.pid == pid => entry.mark_exited(exit_code),
                _ => false,
            }
        };

        if recorded {
            debug!(session_id = %session_id, pid, exit_code = ?exit_code, "process exited");
            let _ = self.event_tx.send(ProcessEvent::Exited {
                session_id: session_id.clone(),
                pid,
                exit_code,
            });
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let active: Vec<u32> = self
            .entries
            .get_mut()
            .map(|entries| {
                entries
                    .values()
                    .filter(|e| e.is_active())
                    .map(|e| e.pid)
                    .collect()
            })
            .unwrap_or_default();

        for pid in active {
            signal_tree(pid, Signal::SIGKILL);
        }
    }
}

/// Tracks one worker process per session.
///
/// Cheap to clone; clones share the same table. When the last clone is
/// dropped every still-running tree is killed.
#[derive(Clone)]
pub struct ProcessRegistry {
    inner: Arc<Inner>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                event_tx,
            }),
        }
    }

    /// Subscribe to process events.
    pub fn subscribe(&self) -> broadcast::Receiver<ProcessEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Spawns `command` for `session_id`.
    ///
    /// Fails if the session already has an active process.
    pub async fn spawn(
        &self,
        session_id: &SessionId,
        command: &str,
        args: &[String],
        options: SpawnOptions,
    ) -> Result<ProcessHandle> {
        if self.is_active(session_id) {
            return Err(RuntimeError::ProcessExists(session_id.clone()));
        }

        let command_line = if args.is_empty() {
            command.to_string()
        } else {
            format!("{} {}", command, args.join(" "))
        };

        let mut cmd = Command::new(command);
        cmd.args(args).envs(options.env.iter().map(|(k, v)| (k, v)));
        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(Stdio::null());
        match &options.log_file {
            Some(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                cmd.stdout(Stdio::from(file.try_clone()?));
                cmd.stderr(Stdio::from(file));
            }
            None => {
                cmd.stdout(Stdio::null());
                cmd.stderr(Stdio::null());
            }
        }

        let mut child = cmd.spawn().map_err(|source| RuntimeError::Spawn {
            command: command_line.clone(),
            source,
        })?;
        let pid = child.id().ok_or_else(|| RuntimeError::Spawn {
            command: command_line.clone(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "process exited before pid was read"),
        })?;

        {
            let mut entries = self.inner.entries();
            // Another spawn may have raced us while the child started
            if entries.get(session_id).is_some_and(|e| e.is_active()) {
                drop(entries);
                signal_tree(pid, Signal::SIGKILL);
                return Err(RuntimeError::ProcessExists(session_id.clone()));
            }
            entries.insert(
                session_id.clone(),
                ProcessEntry::new(pid, session_id.clone(), &command_line),
            );
        }

        info!(session_id = %session_id, pid, command = %command_line, "process spawned");
        let _ = self.inner.event_tx.send(ProcessEvent::Spawned {
            session_id: session_id.clone(),
            pid,
        });

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let waiter_session = session_id.clone();
        tokio::spawn(async move {
            let exit_code = match child.wait().await {
                Ok(status) => status.code(),
                Err(e) => {
                    warn!(session_id = %waiter_session, pid, error = %e, "failed to wait for process");
                    None
                }
            };
            if let Some(inner) = weak.upgrade() {
                inner.record_exit(&waiter_session, pid, exit_code);
            }
        });

        Ok(ProcessHandle {
            session_id: session_id.clone(),
            pid,
        })
    }

    /// Signals the process tree of a session.
    ///
    /// Returns whether a live process was found and signaled.
    pub async fn kill(&self, session_id: &SessionId, signal: Signal) -> bool {
        let pid = match self.get(session_id) {
            Some(entry) if entry.is_active() => entry.pid,
            _ => return false,
        };

        debug!(session_id = %session_id, pid, signal = %signal, "signaling process tree");
        tokio::task::spawn_blocking(move || signal_tree(pid, signal))
            .await
            .unwrap_or(false)
    }

    /// Signals every active process concurrently.
    ///
    /// Returns after every signal attempt has completed, not after the
    /// processes exit. Returns how many were signaled.
    pub async fn kill_all(&self, signal: Signal) -> usize {
        let targets = self.inner.active_pids();
        let results = futures::future::join_all(
            targets.iter().map(|(session_id, _)| self.kill(session_id, signal)),
        )
        .await;
        results.into_iter().filter(|signaled| *signaled).count()
    }

    /// Sends SIGTERM, waits up to `grace` for the exit, then sends SIGKILL.
    pub async fn terminate(&self, session_id: &SessionId, grace: Duration) -> bool {
        if !self.kill(session_id, Signal::SIGTERM).await {
            return false;
        }

        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if !self.is_active(session_id) {
                return true;
            }
            sleep(Duration::from_millis(25)).await;
        }

        if self.is_active(session_id) {
            warn!(session_id = %session_id, grace_ms = grace.as_millis() as u64, "process ignored SIGTERM, killing");
            self.kill(session_id, Signal::SIGKILL).await;
        }
        true
    }

    /// Removes bookkeeping for every exited process. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut entries = self.inner.entries();
        let before = entries.len();
        entries.retain(|_, e| e.is_active());
        let pruned = before - entries.len();
        if pruned > 0 {
            debug!(count = pruned, "pruned exited processes");
        }
        pruned
    }

    /// Returns the entry for a session.
    pub fn get(&self, session_id: &SessionId) -> Option<ProcessEntry> {
        self.inner.entries().get(session_id).cloned()
    }

    /// Returns true if the session has a running process.
    pub fn is_active(&self, session_id: &SessionId) -> bool {
        self.inner
            .entries()
            .get(session_id)
            .is_some_and(|e| e.is_active())
    }

    /// Returns all entries, active and exited.
    pub fn list(&self) -> Vec<ProcessEntry> {
        self.inner.entries().values().cloned().collect()
    }

    /// Returns the number of active processes.
    pub fn active_count(&self) -> usize {
        self.inner.active_pids().len()
    }

    /// SIGKILLs every tracked tree on the next signal from `signals`, then
    /// exits with `128 + signal`.
    pub fn install_shutdown_handler(&self, mut signals: ShutdownSignals) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            let code = signals.recv().await;
            if let Some(inner) = weak.upgrade() {
                let killed = inner.kill_all_sync(Signal::SIGKILL);
                info!(count = killed, "killed tracked processes on shutdown");
            }
            std::process::exit(code);
        })
    }
}

impl Default for ProcessRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// SIGINT and SIGTERM listeners for the orchestrator process.
///
/// From the moment this is created neither signal runs its default action,
/// so an orchestrator that holds one never dies with its workers still
/// running.
pub struct ShutdownSignals {
    interrupt: UnixSignal,
    terminate: UnixSignal,
}

impl ShutdownSignals {
    /// Registers both listeners. Must be called inside a tokio runtime.
    pub fn new() -> Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Waits for the next signal. Returns the exit code it conventionally
    /// maps to: 130 for SIGINT, 143 for SIGTERM.
    pub async fn recv(&mut self) -> i32 {
        tokio::select! {
            _ = self.interrupt.recv() => 130,
            _ = self.terminate.recv() => 143,
        }
    }
}

/// Returns every descendant pid of `root`, not including `root`.
fn descendants(root: u32) -> Vec<u32> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let mut children: HashMap<u32, Vec<u32>> = HashMap::new();
    for (pid, process) in system.processes() {
        if process.thread_kind().is_some() {
            continue;
        }
        if let Some(parent) = process.parent() {
            children.entry(parent.as_u32()).or_default().push(pid.as_u32());
        }
    }

    let mut found = Vec::new();
    let mut seen = HashSet::from([root]);
    let mut stack = vec![root];
    while let Some(pid) = stack.pop() {
        for &child in children.get(&pid).into_iter().flatten() {
            if seen.insert(child) {
                found.push(child);
                stack.push(child);
            }
        }
    }
    found
}

/// Signals `root` and all its descendants. Returns whether `root` was alive.
fn signal_tree(root: u32, signal: Signal) -> bool {
    let tree = descendants(root);
    let root_signaled = send_signal(root, signal);
    for pid in tree {
        send_signal(pid, signal);
    }
    root_signaled
}

fn send_signal(pid: u32, signal: Signal) -> bool {
    match kill(Pid::from_raw(pid as i32), signal) {
        Ok(()) => true,
        // Already gone: the goal is achieved
        Err(Errno::ESRCH) => {
            trace!(pid, "process already exited");
            false
        }
        Err(e) => {
            warn!(pid, signal = %signal, error = %e, "failed to signal process");
            false
        }
    }
}

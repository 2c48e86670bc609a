//! Per-session status state machine.
//!
//! Status arrives from three tiers, highest priority first: the agent's own
//! status file, pane-text heuristics, and the idle timeout. The monitor is the
//! only writer of [`SessionStatus`]; everyone else reads snapshots.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fleet_adapters::Classification;
use fleet_models::{AgentState, SessionId, SessionStatus, StatusReport, StatusSource, StatusUpdate};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant};
use tracing::{debug, info, trace, warn};

use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::event::StatusEvent;

/// Message recorded when a session's status file disappears.
pub const SOURCE_LOST_MESSAGE: &str = "status source lost";

struct Entry {
    status: SessionStatus,
    /// Last observed activity on the monotonic clock.
    touched: Instant,
    /// Pending idle timeout, armed while `working`.
    timer: Option<JoinHandle<()>>,
    /// Raw contents of the last status file applied.
    last_report: Option<String>,
}

impl Entry {
    fn new() -> Self {
        Self {
            status: SessionStatus::initializing(),
            touched: Instant::now(),
            timer: None,
            last_report: None,
        }
    }

    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for Entry {
    fn drop(&mut self) {
        self.disarm();
    }
}

struct Inner {
    idle_timeout: Duration,
    status_dir: PathBuf,
    entries: Mutex<HashMap<SessionId, Entry>>,
    event_tx: broadcast::Sender<StatusEvent>,
}

impl Inner {
    fn emit(&self, event: StatusEvent) {
        let _ = self.event_tx.send(event);
    }

    fn emit_transition(&self, id: &SessionId, previous: &SessionStatus, current: &SessionStatus) {
        if previous.state != current.state {
            debug!(
                session_id = %id,
                from = %previous.state,
                to = %current.state,
                source = ?current.source,
                "status changed"
            );
            self.emit(StatusEvent::Changed {
                session_id: id.clone(),
                previous: previous.state,
                current: current.clone(),
            });
            match current.state {
                AgentState::Error => self.emit(StatusEvent::Errored {
                    session_id: id.clone(),
                    message: current.message.clone(),
                }),
                AgentState::Done => self.emit(StatusEvent::Done {
                    session_id: id.clone(),
                    message: current.message.clone(),
                }),
                _ => {}
            }
        }

        if current.state == AgentState::Waiting {
            if let Some(prompt) = current.needs_input.as_ref().filter(|p| !p.trim().is_empty()) {
                let is_new = previous.state != AgentState::Waiting
                    || previous.needs_input.as_ref() != Some(prompt);
                if is_new {
                    self.emit(StatusEvent::NeedsInput {
                        session_id: id.clone(),
                        prompt: prompt.clone(),
                    });
                }
            }
        }
    }

    /// Merges an update, restarts the idle timer and emits transitions.
    fn apply(self: &Arc<Self>, id: &SessionId, entry: &mut Entry, update: &StatusUpdate) -> SessionStatus {
        let previous = entry.status.clone();
        entry.status.apply(update, Utc::now());
        entry.touched = Instant::now();
        self.arm_timer(id, entry);
        self.emit_transition(id, &previous, &entry.status);
        entry.status.clone()
    }

    fn arm_timer(self: &Arc<Self>, id: &SessionId, entry: &mut Entry) {
        entry.disarm();
        if entry.status.state != AgentState::Working {
            return;
        }

        let weak = Arc::downgrade(self);
        let id = id.clone();
        let timeout = self.idle_timeout;
        entry.timer = Some(tokio::spawn(async move {
            sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                inner.expire(&id).await;
            }
        }));
    }

    async fn expire(&self, id: &SessionId) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(id) {
            // This task is the one running; dropping the handle does not abort it
            entry.timer.take();
            if entry.status.state == AgentState::Working
                && entry.touched.elapsed() >= self.idle_timeout
            {
                self.idle_out(id, entry);
            }
        }
    }

    /// Forces `working` to `idle` without touching `last_activity`.
    fn idle_out(&self, id: &SessionId, entry: &mut Entry) {
        let previous = entry.status.clone();
        entry.status.state = AgentState::Idle;
        entry.status.message = format!("No activity for {}s", self.idle_timeout.as_secs());
        entry.status.needs_input = None;
        entry.status.source = StatusSource::IdleTimeout;
        info!(session_id = %id, "session idle after timeout");
        self.emit_transition(id, &previous, &entry.status);
    }
}

/// Tracks the status of every registered session.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct StatusMonitor {
    inner: Arc<Inner>,
}

impl StatusMonitor {
    /// Creates a monitor using the idle timeout and status directory of `config`.
    pub fn new(config: &RuntimeConfig) -> Self {
        Self::with_settings(config.idle_timeout, &config.status_dir)
    }

    /// Creates a monitor with explicit settings.
    pub fn with_settings(idle_timeout: Duration, status_dir: impl Into<PathBuf>) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                idle_timeout,
                status_dir: status_dir.into(),
                entries: Mutex::new(HashMap::new()),
                event_tx,
            }),
        }
    }

    /// Directory holding the self-report files.
    pub fn status_dir(&self) -> &Path {
        &self.inner.status_dir
    }

    /// Path of a session's status file.
    pub fn status_file(&self, id: &SessionId) -> PathBuf {
        self.inner.status_dir.join(format!("{}.json", id))
    }

    /// Subscribe to status events.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Starts tracking a session as `initializing`.
    ///
    /// Returns false, changing nothing, if it is already tracked.
    pub async fn register_session(&self, id: &SessionId) -> bool {
        let mut entries = self.inner.entries.lock().await;
        if entries.contains_key(id) {
            return false;
        }
        entries.insert(id.clone(), Entry::new());
        debug!(session_id = %id, "session registered");
        true
    }

    /// Stops tracking a session. Returns whether it was tracked.
    pub async fn unregister_session(&self, id: &SessionId) -> bool {
        let removed = self.inner.entries.lock().await.remove(id).is_some();
        if removed {
            debug!(session_id = %id, "session unregistered");
        }
        removed
    }

    pub async fn is_tracked(&self, id: &SessionId) -> bool {
        self.inner.entries.lock().await.contains_key(id)
    }

    /// Returns a snapshot of a session's status.
    pub async fn status(&self, id: &SessionId) -> Option<SessionStatus> {
        self.inner
            .entries
            .lock()
            .await
            .get(id)
            .map(|e| e.status.clone())
    }

    /// Returns snapshots of every tracked session, ordered by id.
    pub async fn statuses(&self) -> Vec<(SessionId, SessionStatus)> {
        let entries = self.inner.entries.lock().await;
        let mut all: Vec<_> = entries
            .iter()
            .map(|(id, e)| (id.clone(), e.status.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Applies an explicit update.
    ///
    /// Explicit updates may leave `done` and `error`. Returns `None` if the
    /// session is not tracked.
    pub async fn update_status(&self, id: &SessionId, update: StatusUpdate) -> Option<SessionStatus> {
        let mut entries = self.inner.entries.lock().await;
        let Some(entry) = entries.get_mut(id) else {
            debug!(session_id = %id, "update for untracked session ignored");
            return None;
        };
        Some(self.inner.apply(id, entry, &update))
    }

    /// Applies a pane-text classification.
    ///
    /// Only consulted while the session is `idle` or `initializing`, or while
    /// the current non-terminal state was itself set by a heuristic. Returns
    /// the new status if it was applied.
    pub async fn apply_heuristic(
        &self,
        id: &SessionId,
        classification: &Classification,
    ) -> Option<SessionStatus> {
        let mut entries = self.inner.entries.lock().await;
        let entry = entries.get_mut(id)?;
        let current = &entry.status;

        let eligible = matches!(current.state, AgentState::Idle | AgentState::Initializing)
            || (current.source == StatusSource::Heuristic && !current.state.is_terminal());
        if !eligible {
            trace!(session_id = %id, state = %current.state, "heuristic skipped");
            return None;
        }

        let unchanged = current.state == classification.state
            && current.needs_input == classification.needs_input;
        if unchanged && classification.state != AgentState::Working {
            return None;
        }

        let message = match classification.state {
            AgentState::Working => "Working".to_string(),
            AgentState::Waiting => classification
                .needs_input
                .clone()
                .unwrap_or_else(|| "Waiting for input".to_string()),
            other => other.as_str().to_string(),
        };
        let mut update = StatusUpdate::state(classification.state)
            .with_message(message)
            .with_source(StatusSource::Heuristic);
        if let Some(prompt) = &classification.needs_input {
            update = update.with_needs_input(prompt.clone());
        }

        debug!(session_id = %id, rule = classification.rule, state = %classification.state, "heuristic applied");
        Some(self.inner.apply(id, entry, &update))
    }

    /// Records a worker exit: `done` on code 0, otherwise `error`.
    ///
    /// Never moves a session out of a terminal state.
    pub async fn mark_exited(&self, id: &SessionId, exit_code: Option<i32>) -> Option<SessionStatus> {
        let mut entries = self.inner.entries.lock().await;
        let entry = entries.get_mut(id)?;
        if entry.status.state.is_terminal() {
            return None;
        }

        let update = match exit_code {
            Some(0) => StatusUpdate::state(AgentState::Done).with_message("Process exited"),
            Some(code) => StatusUpdate::state(AgentState::Error)
                .with_message(format!("Process exited with code {}", code)),
            None => StatusUpdate::state(AgentState::Error).with_message("Process killed"),
        }
        .with_source(StatusSource::Process);
        Some(self.inner.apply(id, entry, &update))
    }

    /// Reads a status file and applies it as a self-report.
    ///
    /// The session id is the file stem. Unreadable or malformed files are
    /// ignored until their contents change.
    pub async fn ingest_file(&self, path: &Path) -> Option<SessionStatus> {
        let id = session_id_for(path)?;

        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "status file unreadable");
                return None;
            }
        };

        let mut entries = self.inner.entries.lock().await;
        let Some(entry) = entries.get_mut(&id) else {
            trace!(session_id = %id, "status file for untracked session");
            return None;
        };
        if entry.last_report.as_deref() == Some(content.as_str()) {
            return None;
        }

        let report: StatusReport = match serde_json::from_str(&content) {
            Ok(report) => report,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring malformed status file");
                entry.last_report = Some(content);
                return None;
            }
        };
        if !report.agent_id.is_empty() && report.agent_id != id.as_str() {
            debug!(session_id = %id, agent_id = %report.agent_id, "status file agent id mismatch");
        }

        entry.last_report = Some(content);
        Some(self.inner.apply(&id, entry, &report.to_update()))
    }

    /// Handles a status file disappearing.
    ///
    /// The state is left alone: a missing file does not mean the session died.
    pub async fn handle_removed(&self, path: &Path) -> bool {
        let Some(id) = session_id_for(path) else {
            return false;
        };

        let mut entries = self.inner.entries.lock().await;
        let Some(entry) = entries.get_mut(&id) else {
            return false;
        };
        entry.status.message = SOURCE_LOST_MESSAGE.to_string();
        entry.last_report = None;
        debug!(session_id = %id, "status source lost");
        self.inner.emit(StatusEvent::SourceLost { session_id: id });
        true
    }

    /// Ingests every status file currently in the status directory.
    ///
    /// Returns how many were applied.
    pub async fn scan(&self) -> usize {
        let mut applied = 0;
        let Ok(mut dir) = tokio::fs::read_dir(&self.inner.status_dir).await else {
            return 0;
        };
        while let Ok(Some(entry)) = dir.next_entry().await {
            if self.ingest_file(&entry.path()).await.is_some() {
                applied += 1;
            }
        }
        applied
    }

    /// Moves every `working` session silent for at least the idle timeout to
    /// `idle`. Catches timers that were missed, e.g. across a suspend.
    pub async fn sweep_idle(&self) -> Vec<SessionId> {
        let mut entries = self.inner.entries.lock().await;
        let mut expired = Vec::new();
        for (id, entry) in entries.iter_mut() {
            if entry.status.state == AgentState::Working
                && entry.touched.elapsed() >= self.inner.idle_timeout
            {
                entry.disarm();
                self.inner.idle_out(id, entry);
                expired.push(id.clone());
            }
        }
        expired
    }

    /// Watches the status directory, applying file changes as they happen.
    ///
    /// Files already present are ingested first. Watching stops when the
    /// returned guard is dropped.
    pub async fn start_watching(&self) -> Result<StatusWatcher> {
        let dir = self.inner.status_dir.clone();
        tokio::fs::create_dir_all(&dir).await?;

        let (tx, mut rx) = mpsc::channel(128);
        let mut watcher = notify::recommended_watcher(move |res| {
            if tx.blocking_send(res).is_err() {
                debug!("status watch channel closed");
            }
        })?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        info!(path = %dir.display(), "watching status directory");

        let monitor = self.clone();
        let task = tokio::spawn(async move {
            while let Some(res) = rx.recv().await {
                match res {
                    Ok(event) => monitor.handle_event(event).await,
                    Err(e) => warn!(error = %e, "status watch error"),
                }
            }
        });

        self.scan().await;
        Ok(StatusWatcher {
            _watcher: watcher,
            task,
        })
    }

    async fn handle_event(&self, event: notify::Event) {
        match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {
                for path in &event.paths {
                    if path.exists() {
                        self.ingest_file(path).await;
                    } else {
                        self.handle_removed(path).await;
                    }
                }
            }
            _ => {}
        }
    }

    /// Runs [`sweep_idle`](Self::sweep_idle) every `period` until shutdown.
    pub fn spawn_sweeper(&self, period: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(period);
            debug!(period_ms = period.as_millis() as u64, "starting idle sweeper");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        monitor.sweep_idle().await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("idle sweeper stopped");
        })
    }

    #[cfg(test)]
    async fn disarm_timers(&self) {
        for entry in self.inner.entries.lock().await.values_mut() {
            entry.disarm();
        }
    }
}

/// Keeps a status directory watch alive.
pub struct StatusWatcher {
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

impl Drop for StatusWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Session id of a status file: the stem of a `.json` file.
fn session_id_for(path: &Path) -> Option<SessionId> {
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        return None;
    }
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(SessionId::from_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_models::ReportedState;
    use tempfile::TempDir;
    use tokio::sync::broadcast::error::TryRecvError;

    const TIMEOUT: Duration = Duration::from_secs(30);

    fn monitor() -> (StatusMonitor, TempDir) {
        let dir = TempDir::new().unwrap();
        (StatusMonitor::with_settings(TIMEOUT, dir.path()), dir)
    }

    fn drain(rx: &mut broadcast::Receiver<StatusEvent>) -> Vec<StatusEvent> {
        let mut events = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(e) => events.push(e),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return events,
                Err(TryRecvError::Lagged(_)) => continue,
            }
        }
    }

    fn classification(state: AgentState) -> Classification {
        Classification {
            state,
            rule: "test",
            needs_input: None,
        }
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let (monitor, _dir) = monitor();
        let id = SessionId::from_string("s1");

        assert!(monitor.register_session(&id).await);
        monitor
            .update_status(&id, StatusUpdate::state(AgentState::Working).with_message("busy"))
            .await
            .unwrap();
        assert!(!monitor.register_session(&id).await);

        let status = monitor.status(&id).await.unwrap();
        assert_eq!(status.state, AgentState::Working);
        assert_eq!(status.message, "busy");
    }

    #[tokio::test]
    async fn test_update_untracked_is_ignored() {
        let (monitor, _dir) = monitor();
        let result = monitor
            .update_status(&SessionId::from_string("ghost"), StatusUpdate::state(AgentState::Idle))
            .await;
        assert!(result.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_timeout_preserves_last_activity() {
        let (monitor, _dir) = monitor();
        let id = SessionId::from_string("s1");
        monitor.register_session(&id).await;
        let mut rx = monitor.subscribe();

        let working = monitor
            .update_status(&id, StatusUpdate::state(AgentState::Working))
            .await
            .unwrap();

        sleep(TIMEOUT + Duration::from_secs(1)).await;

        let status = monitor.status(&id).await.unwrap();
        assert_eq!(status.state, AgentState::Idle);
        assert_eq!(status.source, StatusSource::IdleTimeout);
        assert_eq!(status.last_activity, working.last_activity);

        let events = drain(&mut rx);
        let previous: Vec<AgentState> = events
            .iter()
            .filter_map(|e| match e {
                StatusEvent::Changed { previous, .. } => Some(*previous),
                _ => None,
            })
            .collect();
        assert_eq!(previous, vec![AgentState::Initializing, AgentState::Working]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_resets_idle_timer() {
        let (monitor, _dir) = monitor();
        let id = SessionId::from_string("s1");
        monitor.register_session(&id).await;

        monitor
            .update_status(&id, StatusUpdate::state(AgentState::Working))
            .await;
        sleep(Duration::from_secs(20)).await;
        monitor
            .update_status(&id, StatusUpdate::state(AgentState::Working).with_message("still going"))
            .await;
        sleep(Duration::from_secs(20)).await;

        assert_eq!(monitor.status(&id).await.unwrap().state, AgentState::Working);

        sleep(Duration::from_secs(11)).await;
        assert_eq!(monitor.status(&id).await.unwrap().state, AgentState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_catches_missed_timers() {
        let (monitor, _dir) = monitor();
        let id = SessionId::from_string("s1");
        monitor.register_session(&id).await;
        monitor
            .update_status(&id, StatusUpdate::state(AgentState::Working))
            .await;
        monitor.disarm_timers().await;

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(monitor.sweep_idle().await.is_empty());

        tokio::time::advance(TIMEOUT).await;
        assert_eq!(monitor.sweep_idle().await, vec![id.clone()]);
        assert_eq!(monitor.status(&id).await.unwrap().state, AgentState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_states_survive_sweep() {
        let (monitor, _dir) = monitor();
        let done = SessionId::from_string("done");
        let failed = SessionId::from_string("failed");
        for (id, state) in [(&done, AgentState::Done), (&failed, AgentState::Error)] {
            monitor.register_session(id).await;
            monitor.update_status(id, StatusUpdate::state(state)).await;
        }

        tokio::time::advance(TIMEOUT * 3).await;
        assert!(monitor.sweep_idle().await.is_empty());
        assert_eq!(monitor.status(&done).await.unwrap().state, AgentState::Done);
        assert_eq!(monitor.status(&failed).await.unwrap().state, AgentState::Error);
    }

    #[tokio::test]
    async fn test_self_report_file_applies_once() {
        let (monitor, dir) = monitor();
        let id = SessionId::from_string("s1");
        monitor.register_session(&id).await;
        monitor.update_status(&id, StatusUpdate::state(AgentState::Idle)).await;
        let mut rx = monitor.subscribe();

        let path = dir.path().join("s1.json");
        std::fs::write(
            &path,
            r#"{"agentId":"s1","state":"working","message":"compiling","timestamp":"2026-01-01T00:00:00Z"}"#,
        )
        .unwrap();

        let status = monitor.ingest_file(&path).await.unwrap();
        assert_eq!(status.state, AgentState::Working);
        assert_eq!(status.message, "compiling");
        assert_eq!(status.source, StatusSource::SelfReport);

        // A duplicate notification for the same contents changes nothing
        assert!(monitor.ingest_file(&path).await.is_none());

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        match &events[0] {
            StatusEvent::Changed {
                previous, current, ..
            } => {
                assert_eq!(*previous, AgentState::Idle);
                assert_eq!(current.state, AgentState::Working);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_file_is_ignored() {
        let (monitor, dir) = monitor();
        let id = SessionId::from_string("s1");
        monitor.register_session(&id).await;
        monitor
            .update_status(&id, StatusUpdate::state(AgentState::Working).with_message("ok"))
            .await;

        let path = dir.path().join("s1.json");
        std::fs::write(&path, "{\"state\": \"work").unwrap();
        assert!(monitor.ingest_file(&path).await.is_none());

        std::fs::write(&path, r#"{"state":"bogus"}"#).unwrap();
        assert!(monitor.ingest_file(&path).await.is_none());

        let status = monitor.status(&id).await.unwrap();
        assert_eq!(status.state, AgentState::Working);
        assert_eq!(status.message, "ok");
    }

    #[tokio::test]
    async fn test_removed_file_keeps_state() {
        let (monitor, dir) = monitor();
        let id = SessionId::from_string("s1");
        monitor.register_session(&id).await;
        monitor
            .update_status(&id, StatusUpdate::state(AgentState::Working))
            .await;
        let mut rx = monitor.subscribe();

        assert!(monitor.handle_removed(&dir.path().join("s1.json")).await);

        let status = monitor.status(&id).await.unwrap();
        assert_eq!(status.state, AgentState::Working);
        assert_eq!(status.message, SOURCE_LOST_MESSAGE);
        let events = drain(&mut rx);
        assert!(matches!(events.as_slice(), [StatusEvent::SourceLost { .. }]));
    }

    #[tokio::test]
    async fn test_needs_input_and_terminal_events() {
        let (monitor, _dir) = monitor();
        let id = SessionId::from_string("s1");
        monitor.register_session(&id).await;
        let mut rx = monitor.subscribe();

        monitor
            .update_status(
                &id,
                StatusUpdate::state(AgentState::Waiting).with_needs_input("postgres or sqlite?"),
            )
            .await;
        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], StatusEvent::NeedsInput { prompt, .. } if prompt == "postgres or sqlite?"));

        monitor.update_status(&id, StatusUpdate::state(AgentState::Done)).await;
        monitor
            .update_status(&id, StatusUpdate::state(AgentState::Done).with_message("again"))
            .await;
        let events = drain(&mut rx);
        let done = events
            .iter()
            .filter(|e| matches!(e, StatusEvent::Done { .. }))
            .count();
        assert_eq!(done, 1);
        assert_eq!(monitor.status(&id).await.unwrap().needs_input, None);
    }

    #[tokio::test]
    async fn test_explicit_update_leaves_terminal_state() {
        let (monitor, _dir) = monitor();
        let id = SessionId::from_string("s1");
        monitor.register_session(&id).await;
        monitor.update_status(&id, StatusUpdate::state(AgentState::Error)).await;

        let status = monitor
            .update_status(&id, StatusUpdate::state(AgentState::Working))
            .await
            .unwrap();
        assert_eq!(status.state, AgentState::Working);
    }

    #[tokio::test]
    async fn test_heuristic_respects_tiers() {
        let (monitor, _dir) = monitor();
        let id = SessionId::from_string("s1");
        monitor.register_session(&id).await;

        // Allowed from initializing
        let status = monitor
            .apply_heuristic(&id, &classification(AgentState::Working))
            .await
            .unwrap();
        assert_eq!(status.source, StatusSource::Heuristic);

        // A heuristic may revise its own guess
        let status = monitor
            .apply_heuristic(&id, &classification(AgentState::Idle))
            .await
            .unwrap();
        assert_eq!(status.state, AgentState::Idle);

        // Never overrides a self-reported working state
        monitor
            .update_status(&id, StatusReport::new("s1", ReportedState::Working, "tests").to_update())
            .await;
        assert!(monitor
            .apply_heuristic(&id, &classification(AgentState::Idle))
            .await
            .is_none());
        assert_eq!(monitor.status(&id).await.unwrap().message, "tests");

        // Nor a self-reported waiting state
        let mut report = StatusReport::new("s1", ReportedState::NeedsInput, "blocked");
        report.needs_input_prompt = Some("which db?".to_string());
        monitor.update_status(&id, report.to_update()).await;
        for guess in [AgentState::Idle, AgentState::Working] {
            assert!(monitor
                .apply_heuristic(&id, &classification(guess))
                .await
                .is_none());
        }
        let status = monitor.status(&id).await.unwrap();
        assert_eq!(status.state, AgentState::Waiting);
        assert_eq!(status.source, StatusSource::SelfReport);
        assert_eq!(status.needs_input.as_deref(), Some("which db?"));

        // Never touches terminal states
        monitor.update_status(&id, StatusUpdate::state(AgentState::Done)).await;
        assert!(monitor
            .apply_heuristic(&id, &classification(AgentState::Working))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_heuristic_waiting_carries_prompt() {
        let (monitor, _dir) = monitor();
        let id = SessionId::from_string("s1");
        monitor.register_session(&id).await;
        let mut rx = monitor.subscribe();

        let found = Classification {
            state: AgentState::Waiting,
            rule: "confirm",
            needs_input: Some("Proceed? [y/n]".to_string()),
        };
        let status = monitor.apply_heuristic(&id, &found).await.unwrap();
        assert_eq!(status.needs_input.as_deref(), Some("Proceed? [y/n]"));

        // Same classification again is not news
        assert!(monitor.apply_heuristic(&id, &found).await.is_none());
        let events = drain(&mut rx);
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, StatusEvent::NeedsInput { .. }))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_mark_exited() {
        let (monitor, _dir) = monitor();
        let ok = SessionId::from_string("ok");
        let bad = SessionId::from_string("bad");
        monitor.register_session(&ok).await;
        monitor.register_session(&bad).await;

        assert_eq!(
            monitor.mark_exited(&ok, Some(0)).await.unwrap().state,
            AgentState::Done
        );
        assert_eq!(
            monitor.mark_exited(&bad, Some(2)).await.unwrap().state,
            AgentState::Error
        );
        assert!(monitor.mark_exited(&ok, Some(1)).await.is_none());
        assert_eq!(monitor.status(&ok).await.unwrap().state, AgentState::Done);
    }

    #[tokio::test]
    async fn test_watcher_picks_up_atomic_writes() {
        let (monitor, dir) = monitor();
        let id = SessionId::from_string("s1");
        monitor.register_session(&id).await;
        let mut rx = monitor.subscribe();
        let _watcher = monitor.start_watching().await.unwrap();

        let report = StatusReport::new("s1", ReportedState::NeedsInput, "blocked");
        let report = StatusReport {
            needs_input_prompt: Some("which db?".to_string()),
            ..report
        };
        fleet_persistence::atomic::atomic_write_json(&dir.path().join("s1.json"), &report).unwrap();

        let prompt = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if let Ok(StatusEvent::NeedsInput { prompt, .. }) = rx.recv().await {
                    return prompt;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(prompt, "which db?");
    }

    #[tokio::test]
    async fn test_scan_ingests_existing_files() {
        let (monitor, dir) = monitor();
        let id = SessionId::from_string("s1");
        monitor.register_session(&id).await;
        std::fs::write(dir.path().join("s1.json"), r#"{"state":"finished","message":"all green"}"#).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        assert_eq!(monitor.scan().await, 1);
        assert_eq!(monitor.status(&id).await.unwrap().state, AgentState::Done);
    }

    #[test]
    fn test_session_id_for() {
        assert_eq!(
            session_id_for(Path::new("/x/sess-1.json")),
            Some(SessionId::from_string("sess-1"))
        );
        assert_eq!(session_id_for(Path::new("/x/.tmpAbc")), None);
        assert_eq!(session_id_for(Path::new("/x/sess-1.json.tmp")), None);
    }
}

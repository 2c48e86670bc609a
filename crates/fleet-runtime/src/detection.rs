//! Pane-text heuristics: the fallback tier when agents do not self-report.

use std::collections::HashMap;
use std::sync::Arc;

use fleet_adapters::ClassifierRegistry;
use fleet_models::{AgentMode, SessionId, SessionStatus};
use fleet_tmux::PaneDriver;
use tokio::sync::RwLock;
use tracing::{debug, trace};

use crate::config::RuntimeConfig;
use crate::monitor::StatusMonitor;

/// A session shown in a pane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaneTarget {
    pub session_id: SessionId,
    pub pane_id: String,
    pub mode: AgentMode,
}

impl PaneTarget {
    pub fn new(session_id: SessionId, pane_id: impl Into<String>, mode: AgentMode) -> Self {
        Self {
            session_id,
            pane_id: pane_id.into(),
            mode,
        }
    }
}

/// Captures panes and feeds classifications to a [`StatusMonitor`].
pub struct PaneHeuristics {
    monitor: StatusMonitor,
    driver: Arc<dyn PaneDriver>,
    classifiers: ClassifierRegistry,
    capture_lines: u32,
    targets: RwLock<HashMap<SessionId, PaneTarget>>,
}

impl PaneHeuristics {
    pub fn new(monitor: StatusMonitor, driver: Arc<dyn PaneDriver>, config: &RuntimeConfig) -> Self {
        Self {
            monitor,
            driver,
            classifiers: ClassifierRegistry::with_enabled(config.heuristics_enabled),
            capture_lines: config.capture_lines,
            targets: RwLock::new(HashMap::new()),
        }
    }

    pub async fn track(&self, target: PaneTarget) {
        self.targets
            .write()
            .await
            .insert(target.session_id.clone(), target);
    }

    pub async fn untrack(&self, session_id: &SessionId) {
        self.targets.write().await.remove(session_id);
    }

    /// Classifies one pane and applies the result. Returns the new status if
    /// the monitor accepted it.
    pub async fn detect(&self, target: &PaneTarget) -> Option<SessionStatus> {
        let text = match self.driver.capture(&target.pane_id, self.capture_lines) {
            Ok(text) => text,
            Err(e) => {
                debug!(session_id = %target.session_id, pane = %target.pane_id, error = %e, "pane capture failed");
                return None;
            }
        };

        let classifier = self.classifiers.for_mode(target.mode);
        let Some(found) = classifier.classify(&text) else {
            trace!(session_id = %target.session_id, classifier = classifier.name(), "no classification");
            return None;
        };
        self.monitor.apply_heuristic(&target.session_id, &found).await
    }

    /// Runs detection over every tracked pane. Returns how many statuses changed.
    pub async fn poll_once(&self) -> usize {
        let targets: Vec<PaneTarget> = self.targets.read().await.values().cloned().collect();
        let mut applied = 0;
        for target in &targets {
            if self.detect(target).await.is_some() {
                applied += 1;
            }
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_models::{AgentState, StatusSource, StatusUpdate};
    use fleet_tmux::{PaneInfo, Result as TmuxResult, TmuxError};
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    /// In-memory pane driver: panes are just strings.
    #[derive(Default)]
    struct FakeDriver {
        panes: Mutex<HashMap<String, String>>,
    }

    impl FakeDriver {
        fn show(&self, pane: &str, text: &str) {
            self.panes
                .lock()
                .unwrap()
                .insert(pane.to_string(), text.to_string());
        }
    }

    impl PaneDriver for FakeDriver {
        fn create_group(&self, _name: &str, _cwd: &Path) -> TmuxResult<PaneInfo> {
            Ok(PaneInfo::new("%0", 0, ""))
        }
        fn group_exists(&self, _name: &str) -> bool {
            true
        }
        fn kill_group(&self, _name: &str) -> TmuxResult<()> {
            Ok(())
        }
        fn split_pane(&self, _group: &str, _cwd: &Path) -> TmuxResult<PaneInfo> {
            Ok(PaneInfo::new("%1", 1, ""))
        }
        fn run_command(&self, _pane: &str, _command: &str) -> TmuxResult<()> {
            Ok(())
        }
        fn send_literal(&self, _pane: &str, _text: &str, _submit: bool) -> TmuxResult<()> {
            Ok(())
        }
        fn kill_pane(&self, _pane: &str) -> TmuxResult<()> {
            Ok(())
        }
        fn capture(&self, pane: &str, _lines: u32) -> TmuxResult<String> {
            self.panes
                .lock()
                .unwrap()
                .get(pane)
                .cloned()
                .ok_or_else(|| TmuxError::PaneNotFound(pane.to_string()))
        }
        fn list_panes(&self, _group: &str) -> TmuxResult<Vec<PaneInfo>> {
            Ok(Vec::new())
        }
        fn set_title(&self, _pane: &str, _title: &str) -> TmuxResult<()> {
            Ok(())
        }
        fn select_pane(&self, _pane: &str) -> TmuxResult<()> {
            Ok(())
        }
        fn attach(&self, _group: &str) -> TmuxResult<()> {
            Ok(())
        }
    }

    async fn setup(enabled: bool) -> (PaneHeuristics, Arc<FakeDriver>, StatusMonitor, SessionId) {
        let config = RuntimeConfig::new().with_heuristics(enabled);
        let monitor = StatusMonitor::with_settings(Duration::from_secs(30), "/nonexistent");
        let driver = Arc::new(FakeDriver::default());
        let heuristics = PaneHeuristics::new(monitor.clone(), driver.clone(), &config);
        let id = SessionId::from_string("s1");
        monitor.register_session(&id).await;
        heuristics
            .track(PaneTarget::new(id.clone(), "%3", AgentMode::Claude))
            .await;
        (heuristics, driver, monitor, id)
    }

    #[tokio::test]
    async fn test_working_spinner_applies() {
        let (heuristics, driver, monitor, id) = setup(true).await;
        driver.show("%3", "\u{273B} Reticulating\u{2026} (4s \u{00B7} esc to interrupt)\n\u{276F} \n");

        assert_eq!(heuristics.poll_once().await, 1);
        let status = monitor.status(&id).await.unwrap();
        assert_eq!(status.state, AgentState::Working);
        assert_eq!(status.source, StatusSource::Heuristic);
    }

    #[tokio::test]
    async fn test_self_report_wins() {
        let (heuristics, driver, monitor, id) = setup(true).await;
        monitor
            .update_status(
                &id,
                StatusUpdate::state(AgentState::Working).with_source(StatusSource::SelfReport),
            )
            .await;
        driver.show("%3", "done\n\u{276F} \n? for shortcuts");

        assert_eq!(heuristics.poll_once().await, 0);
        assert_eq!(monitor.status(&id).await.unwrap().state, AgentState::Working);
    }

    #[tokio::test]
    async fn test_disabled_never_applies() {
        let (heuristics, driver, monitor, id) = setup(false).await;
        driver.show("%3", "\u{273B} Thinking\u{2026} (esc to interrupt)");

        assert_eq!(heuristics.poll_once().await, 0);
        assert_eq!(
            monitor.status(&id).await.unwrap().state,
            AgentState::Initializing
        );
    }

    #[tokio::test]
    async fn test_missing_pane_is_skipped() {
        let (heuristics, _driver, monitor, id) = setup(true).await;
        assert_eq!(heuristics.poll_once().await, 0);
        assert_eq!(
            monitor.status(&id).await.unwrap().state,
            AgentState::Initializing
        );

        heuristics.untrack(&id).await;
        assert_eq!(heuristics.poll_once().await, 0);
    }
}

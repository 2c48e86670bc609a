//! Typed events, one enum per component.

use fleet_models::{AgentState, Session, SessionId, SessionStatus};

/// Events emitted by the status monitor.
#[derive(Debug, Clone)]
pub enum StatusEvent {
    /// The state of a session changed.
    Changed {
        /// Session ID.
        session_id: SessionId,
        /// State before the transition.
        previous: AgentState,
        /// Full status after the transition.
        current: SessionStatus,
    },
    /// A session is waiting on the user.
    NeedsInput {
        /// Session ID.
        session_id: SessionId,
        /// What the session is asking.
        prompt: String,
    },
    /// A session entered `error`.
    Errored {
        /// Session ID.
        session_id: SessionId,
        /// Status message at the time.
        message: String,
    },
    /// A session entered `done`.
    Done {
        /// Session ID.
        session_id: SessionId,
        /// Status message at the time.
        message: String,
    },
    /// A session's status file disappeared.
    SourceLost {
        /// Session ID.
        session_id: SessionId,
    },
}

impl StatusEvent {
    /// Returns the session ID associated with this event.
    pub fn session_id(&self) -> &SessionId {
        match self {
            StatusEvent::Changed { session_id, .. } => session_id,
            StatusEvent::NeedsInput { session_id, .. } => session_id,
            StatusEvent::Errored { session_id, .. } => session_id,
            StatusEvent::Done { session_id, .. } => session_id,
            StatusEvent::SourceLost { session_id } => session_id,
        }
    }
}

/// Events emitted by the process registry.
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    /// A worker was spawned.
    Spawned {
        /// Session ID.
        session_id: SessionId,
        /// OS process id.
        pid: u32,
    },
    /// A worker exited. Fired once per process.
    Exited {
        /// Session ID.
        session_id: SessionId,
        /// OS process id.
        pid: u32,
        /// Exit code; `None` when killed by a signal or not observable.
        exit_code: Option<i32>,
    },
}

impl ProcessEvent {
    /// Returns the session ID associated with this event.
    pub fn session_id(&self) -> &SessionId {
        match self {
            ProcessEvent::Spawned { session_id, .. } => session_id,
            ProcessEvent::Exited { session_id, .. } => session_id,
        }
    }
}

/// Events emitted by the session manager.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A session finished setting up.
    Created {
        /// The new session.
        session: Session,
    },
    /// A session's status changed.
    Updated {
        /// Session ID.
        session_id: SessionId,
        /// New status.
        status: SessionStatus,
    },
    /// A session is waiting on the user.
    NeedsInput {
        /// Session ID.
        session_id: SessionId,
        /// What the session is asking.
        prompt: String,
    },
    /// A session's worker exited.
    Exited {
        /// Session ID.
        session_id: SessionId,
        /// Exit code, if any.
        exit_code: Option<i32>,
    },
    /// A session was destroyed.
    Destroyed {
        /// Session ID.
        session_id: SessionId,
    },
}

impl SessionEvent {
    /// Returns the session ID associated with this event.
    pub fn session_id(&self) -> &SessionId {
        match self {
            SessionEvent::Created { session } => &session.id,
            SessionEvent::Updated { session_id, .. } => session_id,
            SessionEvent::NeedsInput { session_id, .. } => session_id,
            SessionEvent::Exited { session_id, .. } => session_id,
            SessionEvent::Destroyed { session_id } => session_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_session_id() {
        let id = SessionId::from_string("sess-a");

        let event = StatusEvent::SourceLost {
            session_id: id.clone(),
        };
        assert_eq!(event.session_id(), &id);

        let event = ProcessEvent::Exited {
            session_id: id.clone(),
            pid: 42,
            exit_code: Some(0),
        };
        assert_eq!(event.session_id(), &id);

        let event = SessionEvent::Destroyed {
            session_id: id.clone(),
        };
        assert_eq!(event.session_id(), &id);
    }
}

//! Headless runs: sessions as plain child processes, supervised in the
//! foreground until every one of them finishes or the user interrupts.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use fleet_models::{AgentMode, AgentState, SessionId};
use fleet_persistence::derive_instance_id;
use fleet_runtime::{RuntimeConfig, SessionEvent, SessionManager, ShutdownSignals};
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use crate::commands::{plan_sessions, Result};
use crate::resolve_repo;

pub async fn run(
    path: Option<&Path>,
    mode: AgentMode,
    branches: &[String],
    count: usize,
    idle_timeout: Duration,
) -> Result<()> {
    let repo = resolve_repo(path)?;
    let plan = plan_sessions(branches, count)?;
    if !branches.is_empty() {
        fleet_runtime::require_tool("git")?;
    }

    let instance_id = format!("{}-run-{}", derive_instance_id(&repo), std::process::id());
    let config = RuntimeConfig::for_instance(&instance_id)
        .with_idle_timeout(idle_timeout)
        .with_log_dir(fleet_core::logs_dir().join(&instance_id));
    let sweep_interval = config.sweep_interval;
    let manager = SessionManager::new(config, &repo);
    // Registered before the first spawn: from here on SIGINT and SIGTERM
    // always reach the teardown below instead of killing this process
    let mut signals = ShutdownSignals::new()?;

    let _watcher = manager.monitor().start_watching().await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = manager.monitor().spawn_sweeper(sweep_interval, shutdown_rx);
    let mut events = manager.subscribe();

    let mut interrupted = false;
    let mut pending: HashSet<SessionId> = HashSet::new();
    for branch in &plan {
        let created = tokio::select! {
            created = manager.create_session(branch.as_deref(), mode, &repo, &repo) => created,
            _ = signals.recv() => {
                interrupted = true;
                break;
            }
        };
        match created {
            Ok(session) => {
                println!(
                    "#{} {} started (pid {})",
                    session.display_id,
                    session.id,
                    session.pid.unwrap_or_default()
                );
                if !session.status.state.is_terminal() {
                    pending.insert(session.id);
                }
            }
            Err(e) => eprintln!("Failed to start session: {}", e),
        }
    }

    if !interrupted && manager.session_count().await == 0 {
        let _ = shutdown_tx.send(true);
        return Err("No session could be started".into());
    }

    while !interrupted {
        if pending.is_empty() {
            info!("all sessions finished");
            break;
        }
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    print_event(&manager, &event).await;
                    if let SessionEvent::Updated { session_id, status } = &event {
                        if status.state.is_terminal() {
                            pending.remove(session_id);
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "session events lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = signals.recv() => interrupted = true,
        }
    }

    if interrupted {
        println!("Interrupted, stopping sessions (interrupt again to force)...");
    }
    // A further signal during teardown kills every tree and exits at once
    let _force = manager.processes().install_shutdown_handler(signals);

    let _ = shutdown_tx.send(true);
    let destroyed = manager.shutdown().await;
    let _ = sweeper.await;
    println!("Stopped {} session(s)", destroyed);
    Ok(())
}

async fn print_event(manager: &SessionManager, event: &SessionEvent) {
    let label = match manager.get_session(event.session_id()).await {
        Some(session) => format!("#{}", session.display_id),
        None => event.session_id().to_string(),
    };
    match event {
        SessionEvent::Updated { status, .. } => {
            let marker = match status.state {
                AgentState::Done => "✓",
                AgentState::Error => "✗",
                AgentState::Waiting => "?",
                _ => "·",
            };
            println!("{} {} {}: {}", marker, label, status.state, status.message);
        }
        SessionEvent::NeedsInput { prompt, .. } => println!("? {} asks: {}", label, prompt),
        SessionEvent::Exited { exit_code, .. } => match exit_code {
            Some(code) => println!("  {} exited with code {}", label, code),
            None => println!("  {} was killed", label),
        },
        SessionEvent::Created { .. } | SessionEvent::Destroyed { .. } => {}
    }
}

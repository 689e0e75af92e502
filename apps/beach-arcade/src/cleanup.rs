use std::{fmt, panic::AssertUnwindSafe, time::Duration};

use tracing::{debug, info, warn};

use crate::{
    log_throttle, metrics,
    session::{SessionRegistry, SessionState},
    transport::PeerState,
};

/// Why a session is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupTrigger {
    LivenessTimeout,
    TransportClosed,
    TransportFailed,
    NegotiationFailed,
    Explicit,
    Shutdown,
}

impl CleanupTrigger {
    pub fn label(self) -> &'static str {
        match self {
            CleanupTrigger::LivenessTimeout => "liveness_timeout",
            CleanupTrigger::TransportClosed => "transport_closed",
            CleanupTrigger::TransportFailed => "transport_failed",
            CleanupTrigger::NegotiationFailed => "negotiation_failed",
            CleanupTrigger::Explicit => "explicit",
            CleanupTrigger::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for CleanupTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupOutcome {
    UnknownSession,
    AlreadyStarted,
    Completed,
}

/// Single teardown path for a session. Whoever flips the session's cleanup
/// latch first does the work; everyone else returns immediately.
#[derive(Clone)]
pub struct CleanupCoordinator {
    registry: SessionRegistry,
    close_timeout: Duration,
}

impl CleanupCoordinator {
    pub fn new(registry: SessionRegistry, close_timeout: Duration) -> Self {
        Self {
            registry,
            close_timeout,
        }
    }

    pub async fn cleanup(&self, session_id: &str, trigger: CleanupTrigger) -> CleanupOutcome {
        let Ok(session) = self.registry.get(session_id) else {
            debug!(session_id = %session_id, %trigger, "cleanup requested for unknown session");
            return CleanupOutcome::UnknownSession;
        };
        if !session.begin_cleanup() {
            debug!(session_id = %session_id, %trigger, "cleanup already in progress");
            return CleanupOutcome::AlreadyStarted;
        }

        info!(
            session_id = %session_id,
            category = %session.category(),
            simulation = %session.simulation_id(),
            %trigger,
            "cleaning up session"
        );
        session.set_state(SessionState::Closing);
        session.cancel();

        let simulation = session.simulation();
        match std::panic::catch_unwind(AssertUnwindSafe(|| simulation.stop())) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(session_id = %session_id, error = %err, "simulation stop failed"),
            Err(_) => warn!(session_id = %session_id, "simulation panicked while stopping"),
        }

        // A failed peer still holds its ICE agent and DTLS state until closed.
        let transport = session.transport();
        if transport.state() != PeerState::Closed {
            match tokio::time::timeout(self.close_timeout, transport.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(session_id = %session_id, error = %err, "transport close failed")
                }
                Err(_) => warn!(
                    session_id = %session_id,
                    timeout_ms = self.close_timeout.as_millis() as u64,
                    "transport close timed out"
                ),
            }
        }

        self.registry.remove(session_id);
        self.registry.release_connection(session_id);
        log_throttle::forget_session(session_id);
        session.set_state(SessionState::Closed);
        metrics::CLEANUPS.with_label_values(&[trigger.label()]).inc();
        info!(session_id = %session_id, %trigger, "session closed");
        CleanupOutcome::Completed
    }
    /// Process-exit teardown. Every registered session goes through
    /// [`cleanup`](Self::cleanup) concurrently; sessions already being torn
    /// down elsewhere are left to that owner.
    pub async fn shutdown(&self) {
        let ids = self.registry.ids();
        info!(sessions = ids.len(), "shutting down sessions");
        let runs = ids
            .iter()
            .map(|id| self.cleanup(id, CleanupTrigger::Shutdown));
        let outcomes = futures::future::join_all(runs).await;
        let completed = outcomes
            .iter()
            .filter(|outcome| **outcome == CleanupOutcome::Completed)
            .count();
        info!(completed, skipped = outcomes.len() - completed, "session shutdown finished");
    }
}

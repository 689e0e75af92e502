use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::{
    cleanup::{CleanupCoordinator, CleanupOutcome, CleanupTrigger},
    session::SessionRegistry,
    timer::PeriodicTask,
};

/// Tears down sessions whose viewer stopped sending heartbeats.
pub struct LivenessMonitor {
    registry: SessionRegistry,
    cleanup: CleanupCoordinator,
    threshold: Duration,
}

impl LivenessMonitor {
    pub fn new(registry: SessionRegistry, cleanup: CleanupCoordinator, threshold: Duration) -> Self {
        Self {
            registry,
            cleanup,
            threshold,
        }
    }

    /// One pass over the registry. Returns the ids that were cleaned up.
    pub async fn sweep(&self) -> Vec<String> {
        let now = Instant::now();
        let stale: Vec<String> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|session| session.is_stale(now, self.threshold))
            .map(|session| session.id().to_string())
            .collect();
        if stale.is_empty() {
            debug!(sessions = self.registry.len(), "liveness sweep: nothing stale");
            return Vec::new();
        }

        let mut closed = Vec::with_capacity(stale.len());
        for session_id in stale {
            let attempt = AssertUnwindSafe(
                self.cleanup
                    .cleanup(&session_id, CleanupTrigger::LivenessTimeout),
            )
            .catch_unwind()
            .await;
            match attempt {
                Ok(CleanupOutcome::Completed) => {
                    info!(session_id = %session_id, "closed unresponsive session");
                    closed.push(session_id);
                }
                Ok(outcome) => {
                    debug!(session_id = %session_id, ?outcome, "stale session already handled")
                }
                Err(_) => error!(session_id = %session_id, "liveness cleanup panicked"),
            }
        }
        closed
    }

    pub fn spawn(self: Arc<Self>, period: Duration) -> PeriodicTask {
        info!(
            period_ms = period.as_millis() as u64,
            threshold_ms = self.threshold.as_millis() as u64,
            "starting liveness monitor"
        );
        PeriodicTask::spawn("liveness", period, move || {
            let monitor = Arc::clone(&self);
            async move {
                monitor.sweep().await;
            }
        })
    }
}

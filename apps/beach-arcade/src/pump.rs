use std::{sync::Arc, time::Duration};

use tokio::{
    task::JoinHandle,
    time::{interval, Instant, MissedTickBehavior},
};
use tracing::{debug, trace, warn};

use crate::{
    metrics,
    session::Session,
    simulation::SimulationError,
    transport::{TransportError, VideoFrame, VIDEO_CLOCK_RATE},
};

/// Per-track presentation clock. Derived from wall time so pauses in the
/// simulation show up as gaps, but never repeats or goes backwards.
#[derive(Debug)]
pub struct PtsClock {
    origin: Instant,
    last: Option<u64>,
}

impl PtsClock {
    pub fn new(origin: Instant) -> Self {
        Self { origin, last: None }
    }

    pub fn stamp(&mut self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.origin);
        let ticks = (elapsed.as_nanos() * VIDEO_CLOCK_RATE as u128 / 1_000_000_000) as u64;
        let pts = match self.last {
            Some(last) if ticks <= last => last + 1,
            _ => ticks,
        };
        self.last = Some(pts);
        pts
    }
}

/// Moves frames from a session's simulation to its transport at a fixed
/// cadence until the session is cancelled.
pub struct FramePump {
    session: Arc<Session>,
    period: Duration,
}

impl FramePump {
    pub fn new(session: Arc<Session>, fps: u32) -> Self {
        let period = Duration::from_nanos(1_000_000_000 / u64::from(fps.max(1)));
        Self { session, period }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        let session_id = self.session.id().to_string();
        let cancel = self.session.cancellation();
        let simulation = Arc::clone(self.session.simulation());
        let transport = Arc::clone(self.session.transport());

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut clock = PtsClock::new(Instant::now());
        debug!(session_id = %session_id, period_ms = self.period.as_millis() as u64, "frame pump started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let produced = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                produced = simulation.next_frame() => produced,
            };
            let frame = match produced {
                Ok(frame) => frame,
                Err(SimulationError::Stopped) => {
                    debug!(session_id = %session_id, "simulation stopped; ending frame pump");
                    break;
                }
                Err(err) => {
                    debug!(session_id = %session_id, error = %err, "frame skipped");
                    continue;
                }
            };
            let frame = match frame.into_row_major() {
                Ok(frame) => frame,
                Err(err) => {
                    warn!(session_id = %session_id, error = %err, "dropping malformed frame");
                    continue;
                }
            };

            let pts = clock.stamp(Instant::now());
            let sent = transport
                .send_frame(VideoFrame {
                    frame,
                    pts,
                    duration: self.period,
                })
                .await;
            match sent {
                Ok(()) => {
                    metrics::FRAMES_SENT.inc();
                    trace!(session_id = %session_id, pts, "frame sent");
                }
                Err(TransportError::Closed) => {
                    debug!(session_id = %session_id, "transport closed; ending frame pump");
                    break;
                }
                Err(err) => {
                    debug!(session_id = %session_id, error = %err, "frame send failed");
                }
            }
        }
        debug!(session_id = %session_id, "frame pump stopped");
    }
}

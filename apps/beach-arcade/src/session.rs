use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, SystemTime},
};

use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{
    metrics,
    simulation::Simulation,
    transport::PeerTransport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Negotiating,
    Active,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Negotiating => "negotiating",
            SessionState::Active => "active",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// One viewer streaming one simulation instance.
pub struct Session {
    id: String,
    category: String,
    simulation_id: String,
    created_at: SystemTime,
    simulation: Arc<dyn Simulation>,
    transport: Arc<dyn PeerTransport>,
    last_liveness: Mutex<Instant>,
    cleanup_started: AtomicBool,
    state: Mutex<SessionState>,
    cancel: CancellationToken,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        category: impl Into<String>,
        simulation_id: impl Into<String>,
        simulation: Arc<dyn Simulation>,
        transport: Arc<dyn PeerTransport>,
    ) -> Self {
        Self {
            id: id.into(),
            category: category.into(),
            simulation_id: simulation_id.into(),
            created_at: SystemTime::now(),
            simulation,
            transport,
            last_liveness: Mutex::new(Instant::now()),
            cleanup_started: AtomicBool::new(false),
            state: Mutex::new(SessionState::Negotiating),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn simulation_id(&self) -> &str {
        &self.simulation_id
    }

    pub fn simulation(&self) -> &Arc<dyn Simulation> {
        &self.simulation
    }

    pub fn transport(&self) -> &Arc<dyn PeerTransport> {
        &self.transport
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        *self.state.lock() = state;
    }

    /// Negotiating -> Active. Returns false if teardown got there first.
    pub fn activate(&self) -> bool {
        let mut state = self.state.lock();
        if *state == SessionState::Negotiating && !self.cleanup_started() {
            *state = SessionState::Active;
            true
        } else {
            false
        }
    }

    /// Records a heartbeat observed at `at`. Never moves the clock backwards.
    pub fn record_heartbeat(&self, at: Instant) {
        let mut last = self.last_liveness.lock();
        if at > *last {
            *last = at;
        }
    }

    pub fn last_liveness(&self) -> Instant {
        *self.last_liveness.lock()
    }

    pub fn is_stale(&self, now: Instant, threshold: Duration) -> bool {
        !self.cleanup_started() && now.saturating_duration_since(self.last_liveness()) > threshold
    }

    /// Latches the cleanup flag. Only the first caller gets `true`.
    pub fn begin_cleanup(&self) -> bool {
        self.cleanup_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn cleanup_started(&self) -> bool {
        self.cleanup_started.load(Ordering::Acquire)
    }

    /// Fires when cleanup starts; long-running session tasks select on it.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            category: self.category.clone(),
            simulation_id: self.simulation_id.clone(),
            state: self.state(),
            transport: self.transport.state().to_string(),
            age_secs: self
                .created_at
                .elapsed()
                .map(|d| d.as_secs())
                .unwrap_or_default(),
            idle_ms: self.last_liveness().elapsed().as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "type")]
    pub category: String,
    #[serde(rename = "id")]
    pub simulation_id: String,
    pub state: SessionState,
    pub transport: String,
    pub age_secs: u64,
    pub idle_ms: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("session {0} already exists")]
    DuplicateSession(String),
    #[error("session {0} not found")]
    NotFound(String),
}

/// Live sessions plus the transports they hold open. Cheap to clone; every
/// clone sees the same maps.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    sessions: DashMap<String, Arc<Session>>,
    connections: DashMap<String, Arc<dyn PeerTransport>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, session: Arc<Session>) -> Result<(), RegistryError> {
        match self.inner.sessions.entry(session.id().to_string()) {
            Entry::Occupied(entry) => Err(RegistryError::DuplicateSession(entry.key().clone())),
            Entry::Vacant(entry) => {
                entry.insert(session);
                metrics::SESSIONS_ACTIVE.set(self.inner.sessions.len() as i64);
                Ok(())
            }
        }
    }

    pub fn get(&self, session_id: &str) -> Result<Arc<Session>, RegistryError> {
        self.inner
            .sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| RegistryError::NotFound(session_id.to_string()))
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.inner.sessions.contains_key(session_id)
    }

    pub fn remove(&self, session_id: &str) -> bool {
        let removed = self.inner.sessions.remove(session_id).is_some();
        if removed {
            metrics::SESSIONS_ACTIVE.set(self.inner.sessions.len() as i64);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.sessions.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.inner
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Point-in-time copy; guards are released before returning.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.inner
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn track_connection(&self, session_id: &str, transport: Arc<dyn PeerTransport>) {
        self.inner
            .connections
            .insert(session_id.to_string(), transport);
    }

    pub fn release_connection(&self, session_id: &str) -> bool {
        self.inner.connections.remove(session_id).is_some()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.len()
    }
}

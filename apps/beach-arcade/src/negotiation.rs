use std::{panic::AssertUnwindSafe, sync::Arc, time::Duration, time::SystemTime};

use arcade_proto::{NegotiateResponse, SessionDescription};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    catalog::{CatalogError, SimulationCatalog},
    cleanup::{CleanupCoordinator, CleanupTrigger},
    metrics,
    pump::FramePump,
    relay::InputRelay,
    session::{Session, SessionRegistry},
    simulation::{select_device, DevicePreference, Simulation, SimulationContext, SimulationError},
    transport::{
        IceServer, PeerState, PeerTransport, TransportError, TransportEvent, TransportEvents,
        TransportFactory,
    },
    turn::{TurnCredentialIssuer, TurnError},
};

const MAX_ID_ATTEMPTS: usize = 8;

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("unknown simulation category `{0}`")]
    UnknownCategory(String),
    #[error("unknown simulation `{category}/{id}`")]
    UnknownSimulation { category: String, id: String },
    #[error("simulation `{category}/{id}` has no runnable implementation")]
    ImplementationMissing { category: String, id: String },
    #[error("relay credentials unavailable: {0}")]
    RelayConfigMissing(#[from] TurnError),
    #[error("invalid offer: {0}")]
    InvalidOffer(String),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("simulation error: {0}")]
    Simulation(#[from] SimulationError),
    #[error("could not allocate a unique session id")]
    IdExhausted,
}

impl NegotiationError {
    fn reason(&self) -> &'static str {
        match self {
            NegotiationError::UnknownCategory(_) | NegotiationError::UnknownSimulation { .. } => {
                "not_found"
            }
            NegotiationError::ImplementationMissing { .. } => "implementation_missing",
            NegotiationError::RelayConfigMissing(_) => "relay_config",
            NegotiationError::InvalidOffer(_) => "invalid_offer",
            NegotiationError::Transport(_) => "transport",
            NegotiationError::Simulation(_) => "simulation",
            NegotiationError::IdExhausted => "id_exhausted",
        }
    }
}

impl From<CatalogError> for NegotiationError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::UnknownCategory(category) => NegotiationError::UnknownCategory(category),
            CatalogError::UnknownSimulation { category, id } => {
                NegotiationError::UnknownSimulation { category, id }
            }
            other => NegotiationError::Simulation(SimulationError::Start(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NegotiationSettings {
    pub local_only: bool,
    pub fps: u32,
    pub device: DevicePreference,
    pub close_timeout: Duration,
}

impl Default for NegotiationSettings {
    fn default() -> Self {
        Self {
            local_only: true,
            fps: 30,
            device: DevicePreference::Auto,
            close_timeout: Duration::from_secs(3),
        }
    }
}

/// Turns a viewer's offer into a running session.
pub struct NegotiationHandler {
    catalog: Arc<SimulationCatalog>,
    registry: SessionRegistry,
    transports: Arc<dyn TransportFactory>,
    turn: TurnCredentialIssuer,
    cleanup: CleanupCoordinator,
    relay: InputRelay,
    settings: NegotiationSettings,
}

impl NegotiationHandler {
    pub fn new(
        catalog: Arc<SimulationCatalog>,
        registry: SessionRegistry,
        transports: Arc<dyn TransportFactory>,
        turn: TurnCredentialIssuer,
        cleanup: CleanupCoordinator,
        relay: InputRelay,
        settings: NegotiationSettings,
    ) -> Self {
        Self {
            catalog,
            registry,
            transports,
            turn,
            cleanup,
            relay,
            settings,
        }
    }

    /// `request_host` names the host the viewer used, for relay URLs when no
    /// TURN host is configured.
    pub async fn negotiate(
        &self,
        category: &str,
        simulation_id: &str,
        offer: SessionDescription,
        request_host: &str,
    ) -> Result<NegotiateResponse, NegotiationError> {
        let result = self
            .negotiate_inner(category, simulation_id, offer, request_host)
            .await;
        if let Err(err) = &result {
            metrics::NEGOTIATION_FAILURES
                .with_label_values(&[err.reason()])
                .inc();
            warn!(category = %category, simulation = %simulation_id, error = %err, "negotiation failed");
        }
        result
    }

    async fn negotiate_inner(
        &self,
        category: &str,
        simulation_id: &str,
        offer: SessionDescription,
        request_host: &str,
    ) -> Result<NegotiateResponse, NegotiationError> {
        let entry = self.catalog.lookup(category, simulation_id)?;
        let factory = entry.factory.clone().ok_or_else(|| {
            NegotiationError::ImplementationMissing {
                category: category.to_string(),
                id: simulation_id.to_string(),
            }
        })?;
        if !offer.kind.eq_ignore_ascii_case("offer") {
            return Err(NegotiationError::InvalidOffer(format!(
                "expected an offer, got `{}`",
                offer.kind
            )));
        }

        let ice_servers = self.ice_servers(request_host)?;
        let (transport, events) = self.transports.create(ice_servers).await?;

        let Some(session_id) = self.allocate_id() else {
            self.release(&transport, None).await;
            return Err(NegotiationError::IdExhausted);
        };

        let device = select_device(self.settings.device);
        let ctx = SimulationContext {
            session_id: session_id.clone(),
            category: category.to_string(),
            simulation_id: simulation_id.to_string(),
            fps: self.settings.fps,
            device,
        };
        let simulation = match factory.create(ctx) {
            Ok(simulation) => simulation,
            Err(err) => {
                self.release(&transport, None).await;
                return Err(err.into());
            }
        };
        if let Err(err) = simulation.start() {
            self.release(&transport, Some(&simulation)).await;
            return Err(err.into());
        }

        let session = Arc::new(Session::new(
            session_id.clone(),
            category,
            simulation_id,
            simulation,
            Arc::clone(&transport),
        ));
        if let Err(err) = self.registry.create(Arc::clone(&session)) {
            warn!(session_id = %session_id, error = %err, "session id taken during negotiation");
            self.release(&transport, Some(session.simulation())).await;
            return Err(NegotiationError::IdExhausted);
        }
        self.registry
            .track_connection(&session_id, Arc::clone(&transport));
        FramePump::new(Arc::clone(&session), self.settings.fps).spawn();
        self.spawn_dispatcher(Arc::clone(&session), events);
        info!(
            session_id = %session_id,
            category = %category,
            simulation = %simulation_id,
            %device,
            "session registered"
        );

        let answer = match transport.accept_offer(offer).await {
            Ok(answer) => answer,
            Err(err) => {
                self.cleanup
                    .cleanup(&session_id, CleanupTrigger::NegotiationFailed)
                    .await;
                return Err(match err {
                    TransportError::InvalidOffer(reason) => NegotiationError::InvalidOffer(reason),
                    other => NegotiationError::Transport(other),
                });
            }
        };
        if !session.activate() {
            return Err(NegotiationError::Transport(TransportError::Closed));
        }
        metrics::SESSIONS_CREATED.inc();
        info!(session_id = %session_id, "session active");

        Ok(NegotiateResponse {
            sdp: answer.sdp,
            kind: answer.kind,
            session_id,
        })
    }

    fn ice_servers(&self, request_host: &str) -> Result<Vec<IceServer>, NegotiationError> {
        if self.settings.local_only {
            return Ok(Vec::new());
        }
        Ok(self.turn.ice_servers(SystemTime::now(), request_host)?)
    }

    fn allocate_id(&self) -> Option<String> {
        (0..MAX_ID_ATTEMPTS)
            .map(|_| generate_session_id())
            .find(|id| !self.registry.contains(id))
    }

    /// Undoes partial setup for a session that never reached the registry.
    async fn release(
        &self,
        transport: &Arc<dyn PeerTransport>,
        simulation: Option<&Arc<dyn Simulation>>,
    ) {
        if let Some(simulation) = simulation {
            if let Err(err) = simulation.stop() {
                warn!(error = %err, "simulation stop failed while aborting negotiation");
            }
        }
        match tokio::time::timeout(self.settings.close_timeout, transport.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "transport close failed while aborting negotiation"),
            Err(_) => warn!("transport close timed out while aborting negotiation"),
        }
    }

    /// Drains transport callbacks for one session until it is cancelled or
    /// the transport drops its event sender.
    fn spawn_dispatcher(&self, session: Arc<Session>, mut events: TransportEvents) {
        let relay = self.relay.clone();
        let cleanup = self.cleanup.clone();
        let cancel = session.cancellation();
        let session_id = session.id().to_string();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => event,
                        None => break,
                    },
                };
                match event {
                    TransportEvent::StateChanged(state) => {
                        debug!(session_id = %session_id, %state, "peer state changed");
                        let trigger = match state {
                            PeerState::Failed => CleanupTrigger::TransportFailed,
                            PeerState::Closed => CleanupTrigger::TransportClosed,
                            _ => continue,
                        };
                        cleanup.cleanup(&session_id, trigger).await;
                    }
                    TransportEvent::ControlText(text) => {
                        let dispatched = std::panic::catch_unwind(AssertUnwindSafe(|| {
                            relay.dispatch(&session_id, &text)
                        }));
                        if dispatched.is_err() {
                            metrics::INPUT_DROPPED.with_label_values(&["panic"]).inc();
                            error!(session_id = %session_id, "control message handler panicked");
                        }
                    }
                    TransportEvent::ControlBinary(len) => {
                        relay.dispatch_binary(&session_id, len);
                    }
                }
            }
            debug!(session_id = %session_id, "event dispatcher stopped");
        });
    }
}

fn generate_session_id() -> String {
    hex::encode(rand::random::<[u8; 4]>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_eight_lowercase_hex_chars() {
        for _ in 0..64 {
            let id = generate_session_id();
            assert_eq!(id.len(), 8);
            assert!(id
                .chars()
                .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        }
    }
}

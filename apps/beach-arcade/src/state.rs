use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::{
    catalog::{CatalogError, SimulationCatalog},
    cleanup::{CleanupCoordinator, CleanupOutcome, CleanupTrigger},
    config::AppConfig,
    liveness::LivenessMonitor,
    negotiation::{NegotiationHandler, NegotiationSettings},
    relay::InputRelay,
    session::{SessionRegistry, SessionSummary},
    simulation::ParamsError,
    transport::TransportFactory,
    turn::TurnCredentialIssuer,
};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("session not found")]
    SessionNotFound,
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("simulation `{category}/{id}` has no runnable implementation")]
    ImplementationMissing { category: String, id: String },
    #[error(transparent)]
    Params(#[from] ParamsError),
}

/// Services shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub catalog: Arc<SimulationCatalog>,
    pub registry: SessionRegistry,
    pub cleanup: CleanupCoordinator,
    pub relay: InputRelay,
    pub turn: TurnCredentialIssuer,
    pub negotiation: Arc<NegotiationHandler>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        catalog: SimulationCatalog,
        transports: Arc<dyn TransportFactory>,
    ) -> Self {
        let config = Arc::new(config);
        let catalog = Arc::new(catalog);
        let registry = SessionRegistry::new();
        let cleanup = CleanupCoordinator::new(registry.clone(), config.close_timeout());
        let relay = InputRelay::new(registry.clone());
        let turn = TurnCredentialIssuer::new(
            config.turn_secret_key.clone(),
            config.turn_host.clone(),
            config.turn_port,
            std::time::Duration::from_secs(config.turn_credential_ttl_secs),
        );
        let negotiation = Arc::new(NegotiationHandler::new(
            Arc::clone(&catalog),
            registry.clone(),
            transports,
            turn.clone(),
            cleanup.clone(),
            relay.clone(),
            NegotiationSettings {
                local_only: config.is_local_only(),
                fps: config.target_fps,
                device: config.device_preference(),
                close_timeout: config.close_timeout(),
            },
        ));
        Self {
            config,
            catalog,
            registry,
            cleanup,
            relay,
            turn,
            negotiation,
        }
    }

    pub fn liveness_monitor(&self) -> LivenessMonitor {
        LivenessMonitor::new(
            self.registry.clone(),
            self.cleanup.clone(),
            self.config.liveness_threshold(),
        )
    }

    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        let mut sessions: Vec<SessionSummary> = self
            .registry
            .snapshot()
            .iter()
            .map(|session| session.summary())
            .collect();
        sessions.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        sessions
    }

    pub fn parameter_schema(&self, category: &str, id: &str) -> Result<Value, StateError> {
        let entry = self.catalog.lookup(category, id)?;
        let factory = entry
            .factory
            .as_ref()
            .ok_or_else(|| StateError::ImplementationMissing {
                category: category.to_string(),
                id: id.to_string(),
            })?;
        Ok(factory.parameter_schema())
    }

    pub fn update_parameters(&self, session_id: &str, params: Value) -> Result<(), StateError> {
        let session = self
            .registry
            .get(session_id)
            .map_err(|_| StateError::SessionNotFound)?;
        if session.cleanup_started() {
            return Err(StateError::SessionNotFound);
        }
        session.simulation().update_parameters(params)?;
        info!(session_id = %session_id, "simulation parameters updated");
        Ok(())
    }

    pub async fn close_session(&self, session_id: &str) -> Result<(), StateError> {
        match self
            .cleanup
            .cleanup(session_id, CleanupTrigger::Explicit)
            .await
        {
            CleanupOutcome::UnknownSession => Err(StateError::SessionNotFound),
            CleanupOutcome::AlreadyStarted | CleanupOutcome::Completed => Ok(()),
        }
    }
}

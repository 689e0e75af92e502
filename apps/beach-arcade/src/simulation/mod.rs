//! Contracts for the simulations the arcade streams. Engines live outside
//! this crate; they are reached through [`SimulationFactory`] and driven
//! through [`Simulation`].

mod device;
mod frame;
pub mod scripted;
pub mod test_pattern;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::input::InputEvent;

pub use device::{select_device, ComputeDevice, DevicePreference};
pub use frame::{Frame, FrameError, PixelLayout};

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("simulation is not running")]
    Stopped,
    #[error("simulation failed to start: {0}")]
    Start(String),
    #[error("simulation failed to stop: {0}")]
    Stop(String),
    #[error("frame production failed: {0}")]
    Frame(String),
}

/// Parameter updates are validated before anything is applied: an `Invalid`
/// result guarantees the simulation's parameters are unchanged.
#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("invalid parameters: {0}")]
    Invalid(String),
    #[error("failed to apply parameters: {0}")]
    Apply(String),
}

/// Everything a factory needs to build one instance for one session.
#[derive(Debug, Clone)]
pub struct SimulationContext {
    pub session_id: String,
    pub category: String,
    pub simulation_id: String,
    pub fps: u32,
    pub device: ComputeDevice,
}

/// One running simulation instance, owned by exactly one session.
#[async_trait]
pub trait Simulation: Send + Sync {
    fn start(&self) -> Result<(), SimulationError>;

    /// Must release resources without blocking indefinitely; later calls to
    /// `next_frame` return [`SimulationError::Stopped`].
    fn stop(&self) -> Result<(), SimulationError>;

    /// Suspends until a rendered frame is available.
    async fn next_frame(&self) -> Result<Frame, SimulationError>;

    fn apply_input(&self, event: InputEvent);

    fn update_parameters(&self, params: Value) -> Result<(), ParamsError>;
}

pub trait SimulationFactory: Send + Sync {
    fn create(&self, ctx: SimulationContext) -> Result<Arc<dyn Simulation>, SimulationError>;

    /// JSON schema describing what `update_parameters` accepts.
    fn parameter_schema(&self) -> Value;
}

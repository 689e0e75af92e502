pub mod catalog;
pub mod cleanup;
pub mod config;
pub mod input;
pub mod liveness;
pub mod log_throttle;
pub mod metrics;
pub mod negotiation;
pub mod pump;
pub mod relay;
pub mod routes;
pub mod session;
pub mod simulation;
pub mod state;
pub mod telemetry;
pub mod timer;
pub mod transport;
pub mod turn;

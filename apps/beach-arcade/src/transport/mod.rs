//! Viewer-facing transport. Sessions only see [`PeerTransport`]; callbacks
//! from the underlying peer connection are flattened into a
//! [`TransportEvent`] stream that the session dispatcher drains.

pub mod mock;
pub mod webrtc;

use std::{fmt, sync::Arc, time::Duration};

use arcade_proto::SessionDescription;
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::simulation::Frame;

pub use self::webrtc::{RtcSettings, RtcTransportFactory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerState {
    /// States after which the connection never carries media again.
    pub fn is_terminal(self) -> bool {
        matches!(self, PeerState::Failed | PeerState::Closed)
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PeerState::New => "new",
            PeerState::Connecting => "connecting",
            PeerState::Connected => "connected",
            PeerState::Disconnected => "disconnected",
            PeerState::Failed => "failed",
            PeerState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    StateChanged(PeerState),
    ControlText(String),
    ControlBinary(usize),
}

pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// STUN/TURN server handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IceServer {
    pub urls: Vec<String>,
    pub username: String,
    pub credential: String,
}

/// A frame stamped for delivery.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub frame: Frame,
    /// Presentation timestamp in ticks of [`VIDEO_CLOCK_RATE`].
    pub pts: u64,
    pub duration: Duration,
}

/// RTP video clock.
pub const VIDEO_CLOCK_RATE: u64 = 90_000;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport setup failed: {0}")]
    Setup(String),
    #[error("invalid offer: {0}")]
    InvalidOffer(String),
    #[error("negotiation failed: {0}")]
    Negotiation(String),
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("transport is closed")]
    Closed,
    #[error("close failed: {0}")]
    Close(String),
}

#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Applies the viewer's offer and returns the local answer once
    /// candidate gathering has finished.
    async fn accept_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, TransportError>;

    async fn send_frame(&self, frame: VideoFrame) -> Result<(), TransportError>;

    async fn close(&self) -> Result<(), TransportError>;

    fn state(&self) -> PeerState;
}

#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        ice_servers: Vec<IceServer>,
    ) -> Result<(Arc<dyn PeerTransport>, TransportEvents), TransportError>;
}

/// Turns a row-major frame into the payload written to the video track.
/// Codecs are supplied by the deployment; the arcade itself never touches
/// pixel values beyond reordering them.
pub trait FrameEncoder: Send + Sync {
    fn encode(&self, frame: &Frame) -> Result<Bytes, TransportError>;
}

/// Forwards frame payloads unchanged, for simulations that emit encoded
/// frames themselves.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughEncoder;

impl FrameEncoder for PassthroughEncoder {
    fn encode(&self, frame: &Frame) -> Result<Bytes, TransportError> {
        Ok(frame.data.clone())
    }
}

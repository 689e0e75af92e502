//! In-process transport for tests and offline runs. Records what the
//! session sends and lets callers inject peer events.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use arcade_proto::SessionDescription;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{
    IceServer, PeerState, PeerTransport, TransportError, TransportEvent, TransportEvents,
    TransportFactory, VideoFrame,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct MockBehavior {
    pub fail_create: bool,
    pub reject_offer: bool,
    /// `close` never resolves, to exercise close timeouts.
    pub hang_on_close: bool,
}

pub struct MockTransport {
    behavior: MockBehavior,
    state: Mutex<PeerState>,
    frames: Mutex<Vec<VideoFrame>>,
    close_calls: AtomicUsize,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    ice_servers: Vec<IceServer>,
}

impl MockTransport {
    fn new(
        behavior: MockBehavior,
        ice_servers: Vec<IceServer>,
    ) -> (Arc<Self>, TransportEvents) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            behavior,
            state: Mutex::new(PeerState::New),
            frames: Mutex::new(Vec::new()),
            close_calls: AtomicUsize::new(0),
            events_tx,
            ice_servers,
        });
        (transport, events_rx)
    }

    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events_tx.send(event);
    }

    pub fn send_text(&self, text: &str) {
        self.emit(TransportEvent::ControlText(text.to_string()));
    }

    /// Moves the peer to `state` and reports it like a real connection would.
    pub fn set_state(&self, state: PeerState) {
        *self.state.lock() = state;
        self.emit(TransportEvent::StateChanged(state));
    }

    pub fn frames(&self) -> Vec<VideoFrame> {
        self.frames.lock().clone()
    }

    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    pub fn ice_servers(&self) -> &[IceServer] {
        &self.ice_servers
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn accept_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, TransportError> {
        if self.behavior.reject_offer || offer.sdp.trim().is_empty() {
            return Err(TransportError::InvalidOffer("unparseable sdp".into()));
        }
        *self.state.lock() = PeerState::Connecting;
        Ok(SessionDescription {
            sdp: format!("mock-answer-for:{}", offer.sdp.len()),
            kind: "answer".into(),
        })
    }

    async fn send_frame(&self, frame: VideoFrame) -> Result<(), TransportError> {
        if self.state().is_terminal() {
            return Err(TransportError::Closed);
        }
        self.frames.lock().push(frame);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        if self.behavior.hang_on_close {
            futures::future::pending::<()>().await;
        }
        self.set_state(PeerState::Closed);
        Ok(())
    }

    fn state(&self) -> PeerState {
        *self.state.lock()
    }
}

#[derive(Default)]
pub struct MockTransportFactory {
    behavior: Mutex<MockBehavior>,
    created: Mutex<Vec<Arc<MockTransport>>>,
}

impl MockTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(behavior: MockBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn created(&self) -> Vec<Arc<MockTransport>> {
        self.created.lock().clone()
    }

    pub fn last(&self) -> Option<Arc<MockTransport>> {
        self.created.lock().last().cloned()
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn create(
        &self,
        ice_servers: Vec<IceServer>,
    ) -> Result<(Arc<dyn PeerTransport>, TransportEvents), TransportError> {
        let behavior = *self.behavior.lock();
        if behavior.fail_create {
            return Err(TransportError::Setup("mock transport unavailable".into()));
        }
        let (transport, events) = MockTransport::new(behavior, ice_servers);
        self.created.lock().push(Arc::clone(&transport));
        Ok((transport, events))
    }
}

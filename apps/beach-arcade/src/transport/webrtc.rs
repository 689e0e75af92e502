use std::{sync::Arc, time::Duration};

use arcade_proto::SessionDescription;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_VP8};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::{data_channel_message::DataChannelMessage, RTCDataChannel};
use webrtc::ice_transport::ice_candidate_type::RTCIceCandidateType;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc_ice::udp_network::{EphemeralUDP, UDPNetwork};

use super::{
    FrameEncoder, IceServer, PassthroughEncoder, PeerState, PeerTransport, TransportError,
    TransportEvent, TransportEvents, TransportFactory, VideoFrame,
};

const ICE_GATHER_TIMEOUT: Duration = Duration::from_secs(5);
const VIDEO_TRACK_ID: &str = "video";
const VIDEO_STREAM_ID: &str = "beach-arcade";

/// Network knobs applied to every peer connection.
#[derive(Debug, Clone, Default)]
pub struct RtcSettings {
    pub port_range: Option<(u16, u16)>,
    pub public_ip: Option<String>,
}

fn to_setup_error(err: impl std::fmt::Display) -> TransportError {
    TransportError::Setup(err.to_string())
}

fn build_api(settings: &RtcSettings) -> Result<API, TransportError> {
    let mut setting = SettingEngine::default();
    if let Some((start, end)) = settings.port_range {
        match EphemeralUDP::new(start, end) {
            Ok(ephemeral) => setting.set_udp_network(UDPNetwork::Ephemeral(ephemeral)),
            Err(err) => warn!(
                target = "transport",
                port_start = start,
                port_end = end,
                error = %err,
                "invalid ICE UDP port range; using defaults"
            ),
        }
    }
    if let Some(ip) = &settings.public_ip {
        setting.set_nat_1to1_ips(vec![ip.clone()], RTCIceCandidateType::Host);
    }

    let mut media_engine = MediaEngine::default();
    media_engine
        .register_default_codecs()
        .map_err(to_setup_error)?;
    let mut registry = Registry::new();
    registry =
        register_default_interceptors(registry, &mut media_engine).map_err(to_setup_error)?;

    Ok(APIBuilder::new()
        .with_setting_engine(setting)
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build())
}

impl From<RTCPeerConnectionState> for PeerState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => PeerState::Connecting,
            RTCPeerConnectionState::Connected => PeerState::Connected,
            RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
            RTCPeerConnectionState::Failed => PeerState::Failed,
            RTCPeerConnectionState::Closed => PeerState::Closed,
            _ => PeerState::New,
        }
    }
}

pub struct RtcTransportFactory {
    api: API,
    encoder: Arc<dyn FrameEncoder>,
}

impl RtcTransportFactory {
    pub fn new(settings: &RtcSettings) -> Result<Self, TransportError> {
        Self::with_encoder(settings, Arc::new(PassthroughEncoder))
    }

    pub fn with_encoder(
        settings: &RtcSettings,
        encoder: Arc<dyn FrameEncoder>,
    ) -> Result<Self, TransportError> {
        Ok(Self {
            api: build_api(settings)?,
            encoder,
        })
    }
}

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    async fn create(
        &self,
        ice_servers: Vec<IceServer>,
    ) -> Result<(Arc<dyn PeerTransport>, TransportEvents), TransportError> {
        let config = RTCConfiguration {
            ice_servers: ice_servers
                .into_iter()
                .map(|server| RTCIceServer {
                    urls: server.urls,
                    username: server.username,
                    credential: server.credential,
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };
        let pc = Arc::new(
            self.api
                .new_peer_connection(config)
                .await
                .map_err(to_setup_error)?,
        );

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                ..Default::default()
            },
            VIDEO_TRACK_ID.to_owned(),
            VIDEO_STREAM_ID.to_owned(),
        ));
        let sender = pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(to_setup_error)?;
        // RTCP has to be drained for the interceptors to run.
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let state_tx = events_tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let _ = state_tx.send(TransportEvent::StateChanged(state.into()));
            Box::pin(async {})
        }));

        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let message_tx = events_tx.clone();
            Box::pin(async move {
                debug!(target = "transport", label = %dc.label(), "control channel opened");
                dc.on_message(Box::new(move |msg: DataChannelMessage| {
                    let event = if msg.is_string {
                        match String::from_utf8(msg.data.to_vec()) {
                            Ok(text) => TransportEvent::ControlText(text),
                            Err(_) => TransportEvent::ControlBinary(msg.data.len()),
                        }
                    } else {
                        TransportEvent::ControlBinary(msg.data.len())
                    };
                    let _ = message_tx.send(event);
                    Box::pin(async {})
                }));
            })
        }));

        let transport = RtcTransport {
            pc,
            track,
            encoder: Arc::clone(&self.encoder),
        };
        Ok((Arc::new(transport), events_rx))
    }
}

pub struct RtcTransport {
    pc: Arc<RTCPeerConnection>,
    track: Arc<TrackLocalStaticSample>,
    encoder: Arc<dyn FrameEncoder>,
}

#[async_trait]
impl PeerTransport for RtcTransport {
    async fn accept_offer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, TransportError> {
        let remote = RTCSessionDescription::offer(offer.sdp)
            .map_err(|e| TransportError::InvalidOffer(e.to_string()))?;
        self.pc
            .set_remote_description(remote)
            .await
            .map_err(|e| TransportError::InvalidOffer(e.to_string()))?;

        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| TransportError::Negotiation(e.to_string()))?;
        let mut gathered = self.pc.gathering_complete_promise().await;
        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| TransportError::Negotiation(e.to_string()))?;
        if tokio::time::timeout(ICE_GATHER_TIMEOUT, gathered.recv())
            .await
            .is_err()
        {
            warn!(target = "transport", "ICE gathering timed out; answering with partial candidates");
        }

        let local = self
            .pc
            .local_description()
            .await
            .ok_or_else(|| TransportError::Negotiation("no local description".into()))?;
        Ok(SessionDescription {
            sdp: local.sdp,
            kind: local.sdp_type.to_string(),
        })
    }

    async fn send_frame(&self, frame: VideoFrame) -> Result<(), TransportError> {
        if self.state().is_terminal() {
            return Err(TransportError::Closed);
        }
        let data = self.encoder.encode(&frame.frame)?;
        trace!(target = "transport", pts = frame.pts, bytes = data.len(), "writing sample");
        self.track
            .write_sample(&Sample {
                data,
                duration: frame.duration,
                ..Default::default()
            })
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.pc
            .close()
            .await
            .map_err(|e| TransportError::Close(e.to_string()))
    }

    fn state(&self) -> PeerState {
        self.pc.connection_state().into()
    }
}

use crate::config::Settings;
use crate::errors::EndpointError;
use crate::peer::endpoint::{
    ConnectionEndpoint, ConnectionStateHandler, EndpointResult, LocalCandidateHandler,
    RemoteTrackHandler,
};
use crate::peer::types::{
    Candidate, EndpointState, LocalTrack, RemoteTrack, SdpKind, ServerConfig, SessionDescription,
    TrackKind,
};
use crate::utils::add_ice_url_scheme;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;
use webrtc::{
    api::APIBuilder,
    ice_transport::ice_server::RTCIceServer,
    peer_connection::{
        configuration::RTCConfiguration, peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription, RTCPeerConnection,
    },
};

/// [`ConnectionEndpoint`] backed by a `webrtc` peer connection.
pub struct WebRtcEndpoint {
    pc: Arc<RTCPeerConnection>,
    local_tracks: Mutex<Vec<Arc<TrackLocalStaticSample>>>,
}

impl WebRtcEndpoint {
    pub async fn new(settings: &Settings) -> EndpointResult<Self> {
        let mut media = MediaEngine::default();
        media
            .register_default_codecs()
            .map_err(|e| EndpointError::new("register codecs", e))?;
        let registry = register_default_interceptors(Registry::new(), &mut media)
            .map_err(|e| EndpointError::new("register interceptors", e))?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let pc = api
            .new_peer_connection(rtc_config(settings))
            .await
            .map_err(|e| EndpointError::new("create peer connection", e))?;

        pc.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
            debug!(?state, "ICE gathering state changed");
            Box::pin(async {})
        }));

        Ok(Self {
            pc: Arc::new(pc),
            local_tracks: Mutex::new(Vec::new()),
        })
    }

    /// Sample writer of a track added with `add_local_track`, for the capture
    /// layer to push media into.
    pub fn local_track(&self, id: &str) -> Option<Arc<TrackLocalStaticSample>> {
        self.local_tracks
            .lock()
            .iter()
            .find(|t| t.id() == id)
            .cloned()
    }
}

/// Creates the peer connection configuration from user settings.
fn rtc_config(settings: &Settings) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: get_user_ice_servers(&settings.ice_servers),
        ice_candidate_pool_size: settings.ice_candidate_pool_size,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

pub fn get_user_ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, webrtc::Error> {
    match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.payload),
        SdpKind::Answer => RTCSessionDescription::answer(desc.payload),
    }
}

fn from_rtc(desc: RTCSessionDescription) -> EndpointResult<SessionDescription> {
    let kind = match desc.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        other => {
            return Err(EndpointError::new(
                "read description",
                format!("unsupported description type {other}"),
            ))
        }
    };
    Ok(SessionDescription {
        kind,
        payload: desc.sdp,
    })
}

/// Candidate in the browser `RTCIceCandidate.toJSON()` shape.
pub fn candidate_from_init(init: RTCIceCandidateInit) -> Candidate {
    Candidate::new()
        .with("candidate", init.candidate)
        .with("sdpMid", init.sdp_mid)
        .with("sdpMLineIndex", init.sdp_mline_index)
        .with("usernameFragment", init.username_fragment)
}

pub fn candidate_to_init(candidate: &Candidate) -> EndpointResult<RTCIceCandidateInit> {
    let line = candidate
        .get_str("candidate")
        .ok_or_else(|| EndpointError::new("read candidate", "missing `candidate` attribute"))?;
    let sdp_mline_index = match candidate.fields().get("sdpMLineIndex").and_then(|v| v.as_u64()) {
        Some(i) => Some(
            u16::try_from(i)
                .map_err(|_| EndpointError::new("read candidate", "sdpMLineIndex out of range"))?,
        ),
        None => None,
    };
    Ok(RTCIceCandidateInit {
        candidate: line.to_owned(),
        sdp_mid: candidate.get_str("sdpMid").map(str::to_owned),
        sdp_mline_index,
        username_fragment: candidate.get_str("usernameFragment").map(str::to_owned),
    })
}

fn endpoint_state(st: RTCPeerConnectionState) -> EndpointState {
    match st {
        RTCPeerConnectionState::Connecting => EndpointState::Connecting,
        RTCPeerConnectionState::Connected => EndpointState::Connected,
        RTCPeerConnectionState::Disconnected => EndpointState::Disconnected,
        RTCPeerConnectionState::Failed => EndpointState::Failed,
        RTCPeerConnectionState::Closed => EndpointState::Closed,
        _ => EndpointState::New,
    }
}

#[async_trait]
impl ConnectionEndpoint for WebRtcEndpoint {
    async fn add_local_track(&self, track: LocalTrack) -> EndpointResult<()> {
        let mime_type = match track.kind {
            TrackKind::Audio => MIME_TYPE_OPUS,
            TrackKind::Video => MIME_TYPE_VP8,
        };
        let local = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            track.id,
            track.stream_id,
        ));
        self.pc
            .add_track(Arc::clone(&local) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| EndpointError::new("add track", e))?;
        self.local_tracks.lock().push(local);
        Ok(())
    }

    fn on_remote_track(&self, handler: RemoteTrackHandler) {
        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let kind = match track.kind() {
                    RTPCodecType::Video => TrackKind::Video,
                    _ => TrackKind::Audio,
                };
                handler(RemoteTrack {
                    id: track.id(),
                    stream_id: track.stream_id(),
                    kind,
                });
                Box::pin(async {})
            },
        ));
    }

    async fn create_offer(&self) -> EndpointResult<SessionDescription> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| EndpointError::new("create offer", e))?;
        from_rtc(offer)
    }

    async fn create_answer(&self) -> EndpointResult<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| EndpointError::new("create answer", e))?;
        from_rtc(answer)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> EndpointResult<()> {
        let desc = to_rtc(desc).map_err(|e| EndpointError::new("parse local description", e))?;
        self.pc
            .set_local_description(desc)
            .await
            .map_err(|e| EndpointError::new("set local description", e))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> EndpointResult<()> {
        let desc = to_rtc(desc).map_err(|e| EndpointError::new("parse remote description", e))?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| EndpointError::new("set remote description", e))
    }

    async fn add_remote_candidate(&self, candidate: Candidate) -> EndpointResult<()> {
        let init = candidate_to_init(&candidate)?;
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| EndpointError::new("add ICE candidate", e))
    }

    fn on_local_candidate(&self, handler: LocalCandidateHandler) {
        self.pc
            .on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
                match cand {
                    Some(c) => match c.to_json() {
                        Ok(init) => handler(Some(candidate_from_init(init))),
                        Err(e) => warn!(error = %e, "failed to serialize local candidate"),
                    },
                    // None marks the end of gathering
                    None => handler(None),
                }
                Box::pin(async {})
            }));
    }

    fn on_connection_state(&self, handler: ConnectionStateHandler) {
        self.pc
            .on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
                info!(state = ?st, "peer connection state changed");
                handler(endpoint_state(st));
                Box::pin(async {})
            }));
    }

    async fn close(&self) -> EndpointResult<()> {
        self.pc
            .close()
            .await
            .map_err(|e| EndpointError::new("close peer connection", e))
    }
}

//! Peer connections backed by webrtc-rs

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use huddle_media::{LocalTrack, MediaKind};
use huddle_protocol::{IceCandidate, SdpType, SessionDescription};
use tokio::sync::Mutex;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::track::track_remote::TrackRemote;

use super::connection::{
    ConnectionEvent, ConnectionObserver, IceConnectionState, PeerConnection, PeerConnectionFactory,
    PeerConnectionState, RemoteTrack, SignalingState,
};
use crate::error::NegotiationError;

/// Creates webrtc-rs peer connections sharing one API instance
pub struct RtcPeerConnectionFactory {
    api: API,
    config: RTCConfiguration,
}

impl RtcPeerConnectionFactory {
    pub fn new(ice_servers: &[String]) -> Result<Self, NegotiationError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: ice_servers
                .iter()
                .map(|url| RTCIceServer {
                    urls: vec![url.clone()],
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        Ok(Self { api, config })
    }
}

#[async_trait]
impl PeerConnectionFactory for RtcPeerConnectionFactory {
    async fn create(&self, observer: ConnectionObserver) -> Result<Arc<dyn PeerConnection>, NegotiationError> {
        let pc = Arc::new(self.api.new_peer_connection(self.config.clone()).await?);
        register_callbacks(&pc, observer.clone());

        // Always offer to receive audio and video, even before we send any
        for kind in [MediaKind::Audio, MediaKind::Video] {
            pc.add_transceiver_from_kind(
                kind.codec_type(),
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await?;
        }

        tracing::debug!(
            "Created peer connection for {} (generation {})",
            observer.peer_id(),
            observer.generation()
        );

        Ok(Arc::new(RtcPeerConnection {
            pc,
            senders: Mutex::new(HashMap::new()),
        }))
    }
}

fn register_callbacks(pc: &Arc<RTCPeerConnection>, observer: ConnectionObserver) {
    let obs = observer.clone();
    pc.on_negotiation_needed(Box::new(move || {
        obs.emit(ConnectionEvent::NegotiationNeeded);
        Box::pin(async {})
    }));

    let obs = observer.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        if let Some(candidate) = candidate {
            match candidate.to_json() {
                Ok(init) => obs.emit(ConnectionEvent::LocalCandidate(IceCandidate {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid,
                    sdp_mline_index: init.sdp_mline_index,
                    username_fragment: init.username_fragment,
                })),
                Err(e) => tracing::warn!("Failed to serialize local ICE candidate: {}", e),
            }
        }
        Box::pin(async {})
    }));

    let obs = observer.clone();
    pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
        let state = match state {
            RTCIceConnectionState::Checking => IceConnectionState::Checking,
            RTCIceConnectionState::Connected => IceConnectionState::Connected,
            RTCIceConnectionState::Completed => IceConnectionState::Completed,
            RTCIceConnectionState::Disconnected => IceConnectionState::Disconnected,
            RTCIceConnectionState::Failed => IceConnectionState::Failed,
            RTCIceConnectionState::Closed => IceConnectionState::Closed,
            _ => IceConnectionState::New,
        };
        obs.emit(ConnectionEvent::IceStateChanged(state));
        Box::pin(async {})
    }));

    let obs = observer.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let state = match state {
            RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
            RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
            RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
            _ => PeerConnectionState::New,
        };
        obs.emit(ConnectionEvent::ConnectionStateChanged(state));
        Box::pin(async {})
    }));

    let obs = observer;
    pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
        match RemoteTrack::from_rtp(track) {
            Some(track) => obs.emit(ConnectionEvent::Track(track)),
            None => tracing::warn!("Ignoring remote track of unknown kind from {}", obs.peer_id()),
        }
        Box::pin(async {})
    }));
}

pub struct RtcPeerConnection {
    pc: Arc<RTCPeerConnection>,
    senders: Mutex<HashMap<MediaKind, Arc<RTCRtpSender>>>,
}

fn to_rtc(description: SessionDescription) -> Result<RTCSessionDescription, NegotiationError> {
    let desc = match description.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(description.sdp)?,
        SdpType::Answer => RTCSessionDescription::answer(description.sdp)?,
        SdpType::Pranswer => RTCSessionDescription::pranswer(description.sdp)?,
        SdpType::Rollback => {
            let mut desc = RTCSessionDescription::default();
            desc.sdp_type = RTCSdpType::Rollback;
            desc.sdp = description.sdp;
            desc
        }
    };
    Ok(desc)
}

fn from_rtc(description: RTCSessionDescription) -> Result<SessionDescription, NegotiationError> {
    let sdp_type = match description.sdp_type {
        RTCSdpType::Offer => SdpType::Offer,
        RTCSdpType::Answer => SdpType::Answer,
        RTCSdpType::Pranswer => SdpType::Pranswer,
        RTCSdpType::Rollback => SdpType::Rollback,
        RTCSdpType::Unspecified => {
            return Err(NegotiationError::InvalidState("unspecified SDP type".into()));
        }
    };
    Ok(SessionDescription {
        sdp_type,
        sdp: description.sdp,
    })
}

#[async_trait]
impl PeerConnection for RtcPeerConnection {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, NegotiationError> {
        let options = ice_restart.then(|| RTCOfferOptions {
            ice_restart: true,
            ..Default::default()
        });
        from_rtc(self.pc.create_offer(options).await?)
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        from_rtc(self.pc.create_answer(None).await?)
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), NegotiationError> {
        self.pc.set_local_description(to_rtc(description)?).await?;
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), NegotiationError> {
        self.pc.set_remote_description(to_rtc(description)?).await?;
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await?;
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        match self.pc.signaling_state() {
            RTCSignalingState::HaveLocalOffer => SignalingState::HaveLocalOffer,
            RTCSignalingState::HaveRemoteOffer => SignalingState::HaveRemoteOffer,
            RTCSignalingState::HaveLocalPranswer => SignalingState::HaveLocalPranswer,
            RTCSignalingState::HaveRemotePranswer => SignalingState::HaveRemotePranswer,
            RTCSignalingState::Closed => SignalingState::Closed,
            _ => SignalingState::Stable,
        }
    }

    async fn has_sender(&self, kind: MediaKind) -> bool {
        self.senders.lock().await.contains_key(&kind)
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<(), NegotiationError> {
        let mut senders = self.senders.lock().await;
        if senders.contains_key(&track.kind()) {
            return Err(NegotiationError::InvalidState(format!(
                "{} sender already exists",
                track.kind()
            )));
        }
        let sender = self.pc.add_track(track.rtp_track()).await?;
        senders.insert(track.kind(), sender);
        Ok(())
    }

    async fn replace_track(&self, kind: MediaKind, track: Option<&LocalTrack>) -> Result<(), NegotiationError> {
        let sender = self
            .senders
            .lock()
            .await
            .get(&kind)
            .cloned()
            .ok_or_else(|| NegotiationError::InvalidState(format!("no {} sender", kind)))?;
        sender.replace_track(track.map(|t| t.rtp_track())).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        self.pc.close().await?;
        Ok(())
    }
}

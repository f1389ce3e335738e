//! The call session: one channel's mesh of peers and our local media
//!
//! [`CallSession`] is the single owner of all call state. Signaling
//! messages, peer connection callbacks and user commands all arrive as
//! [`SessionEvent`]s and are handled one at a time, so no two handlers ever
//! touch the peer set or the local tracks concurrently.

mod driver;
mod events;

pub use driver::Call;
pub use events::{CallEvent, Command, Identity, Notice, PeerSummary, SessionEvent, SessionSnapshot};

use std::sync::Arc;

use huddle_media::{LocalStream, MediaDevices, MediaError};
use huddle_protocol::{MediaType, PeerInfo, SessionDescription, Signal, SignalMessage};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::NegotiationError;
use crate::health::{ConnectionHealthMonitor, HealthAction};
use crate::media::{LocalMediaState, MediaTrackController};
use crate::negotiation::{NegotiationCoordinator, OfferOutcome, QueuedOffer};
use crate::peer::{ConnectionEvent, PeerConnectionFactory, PeerConnectionState, PeerSessionManager};
use crate::signaling::{SignalSink, TransportEvent, TransportState};

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub channel_id: Uuid,
    pub local_id: Uuid,
    pub ice_restart_max_attempts: u32,
    pub screen_share_audio: bool,
}

/// The collaborators a session talks to
pub struct SessionIo {
    pub factory: Arc<dyn PeerConnectionFactory>,
    pub devices: Arc<dyn MediaDevices>,
    pub sink: Arc<dyn SignalSink>,
    /// Queue the session's own callbacks are fed back through
    pub loopback: mpsc::UnboundedSender<SessionEvent>,
    pub events: mpsc::UnboundedSender<CallEvent>,
}

pub struct CallSession {
    channel_id: Uuid,
    local_id: Uuid,
    peers: PeerSessionManager,
    negotiation: NegotiationCoordinator,
    health: ConnectionHealthMonitor,
    media: MediaTrackController,
    sink: Arc<dyn SignalSink>,
    loopback: mpsc::UnboundedSender<SessionEvent>,
    events: mpsc::UnboundedSender<CallEvent>,
    transport_state: TransportState,
    ended: bool,
}

impl CallSession {
    pub fn new(options: SessionOptions, io: SessionIo) -> Self {
        Self {
            channel_id: options.channel_id,
            local_id: options.local_id,
            peers: PeerSessionManager::new(options.local_id, io.factory, io.loopback.clone()),
            negotiation: NegotiationCoordinator::new(options.local_id, options.channel_id),
            health: ConnectionHealthMonitor::new(options.ice_restart_max_attempts),
            media: MediaTrackController::new(io.devices, options.screen_share_audio),
            sink: io.sink,
            loopback: io.loopback,
            events: io.events,
            transport_state: TransportState::Disconnected,
            ended: false,
        }
    }

    pub fn channel_id(&self) -> Uuid {
        self.channel_id
    }

    pub fn local_id(&self) -> Uuid {
        self.local_id
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    pub fn is_connected(&self) -> bool {
        self.transport_state == TransportState::Connected
    }

    pub fn peers(&self) -> &PeerSessionManager {
        &self.peers
    }

    pub fn media_state(&self) -> LocalMediaState {
        self.media.state()
    }

    pub fn local_stream(&self) -> LocalStream {
        self.media.local_stream()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let mut peers: Vec<PeerSummary> = self
            .peers
            .all_peers()
            .map(|p| PeerSummary {
                peer_id: p.id,
                display_name: p.display_name.clone(),
                has_stream: p.remote_stream.is_some(),
            })
            .collect();
        peers.sort_by(|a, b| a.display_name.cmp(&b.display_name).then(a.peer_id.cmp(&b.peer_id)));

        SessionSnapshot {
            channel_id: Some(self.channel_id),
            transport_state: self.transport_state,
            is_connected: self.is_connected(),
            peers,
            audio_enabled: self.media.audio_enabled(),
            video_enabled: self.media.video_enabled(),
            screen_sharing: self.media.screen_sharing(),
            local_stream: self.media.local_stream(),
        }
    }

    fn emit(&self, event: CallEvent) {
        let _ = self.events.send(event);
    }

    pub async fn handle(&mut self, event: SessionEvent) {
        if self.ended {
            tracing::debug!("Call ended, ignoring {:?}", event);
            return;
        }
        match event {
            SessionEvent::Transport(event) => self.on_transport_event(event).await,
            SessionEvent::Connection {
                peer_id,
                generation,
                event,
            } => self.on_connection_event(peer_id, generation, event).await,
            SessionEvent::Command(command) => self.on_command(command).await,
            SessionEvent::ScreenShareEnded { track_id } => {
                if self.media.screen_track_id() == Some(track_id.as_str()) {
                    tracing::info!("Screen share ended by the system");
                    self.stop_screen_share().await;
                }
            }
        }
    }

    async fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::StateChanged(state) => {
                tracing::debug!("Signaling {:?} for channel {}", state, self.channel_id);
                self.transport_state = state;
            }
            TransportEvent::Message(message) => self.on_signal(message).await,
            TransportEvent::Lost => {
                // The relay has already told everyone we left; the next
                // existing-peers rebuilds the mesh with our current tracks
                tracing::info!("Signaling lost, dropping {} peer connections", self.peers.len());
                for peer in self.peers.remove_all().await {
                    self.health.forget(peer.id);
                    self.emit(CallEvent::PeerLeft { peer_id: peer.id });
                }
            }
            TransportEvent::Ended => {
                tracing::warn!("Signaling for channel {} ended", self.channel_id);
                self.emit(CallEvent::Notice(Notice::NotConnected));
                self.teardown().await;
            }
        }
    }

    async fn on_signal(&mut self, message: SignalMessage) {
        if message.to.is_some_and(|to| to != self.local_id) {
            tracing::debug!("Dropping {:?} addressed to {:?}", message.kind, message.to);
            return;
        }
        let signal = match message.signal() {
            Ok(signal) => signal,
            Err(e) => {
                tracing::warn!("Dropping {:?} from {}: {}", message.kind, message.from, e);
                return;
            }
        };
        let from = message.from;

        match signal {
            Signal::ExistingPeers(peers) => {
                tracing::info!("{} participants already in channel {}", peers.len(), self.channel_id);
                for info in peers {
                    if info.user_id != self.local_id {
                        self.add_peer(&info, true).await;
                    }
                }
                self.announce_media();
            }
            Signal::PeerJoined(info) => {
                if info.user_id == self.local_id {
                    return;
                }
                if self.peers.contains(info.user_id) {
                    // Rejoined from another socket; its old connection is dead
                    tracing::info!("{} rejoined, replacing its connection", info.user_id);
                    self.drop_peer(info.user_id).await;
                }
                self.add_peer(&info, false).await;
            }
            Signal::PeerLeft { user_id } => self.drop_peer(user_id).await,
            Signal::Offer(offer) => self.on_remote_offer(from, offer).await,
            Signal::Answer(answer) => {
                let Some(peer) = self.peers.get_peer_mut(from) else {
                    tracing::warn!("Dropping answer from unknown peer {}", from);
                    return;
                };
                let result = self.negotiation.on_answer(peer, answer, &*self.sink).await;
                self.report(from, result);
            }
            Signal::IceCandidate(candidate) => {
                let Some(peer) = self.peers.get_peer_mut(from) else {
                    tracing::warn!("Dropping ICE candidate from unknown peer {}", from);
                    return;
                };
                let result = self.negotiation.on_candidate(peer, candidate).await;
                self.report(from, result);
            }
            Signal::MediaState {
                media_type,
                is_active,
            } => {
                tracing::debug!("{} media-state {} = {}", from, media_type, is_active);
            }
        }
    }

    /// Create a peer with our current tracks. The newcomer of a pair offers;
    /// a peer that joined after us sends the first offer itself.
    async fn add_peer(&mut self, info: &PeerInfo, we_offer: bool) {
        let tracks = self.media.active_tracks();
        match self.peers.create_peer(info.user_id, &info.username, &tracks).await {
            Ok(true) => {
                self.emit(CallEvent::PeerJoined {
                    peer_id: info.user_id,
                    display_name: info.username.clone(),
                });
                if we_offer {
                    self.offer(info.user_id).await;
                } else if let Some(peer) = self.peers.get_peer_mut(info.user_id) {
                    self.negotiation.await_offer(peer);
                }
            }
            Ok(false) => {}
            Err(e) => tracing::error!("Failed to create connection for {}: {}", info.user_id, e),
        }
    }

    async fn on_remote_offer(&mut self, from: Uuid, offer: SessionDescription) {
        let Some(peer) = self.peers.get_peer_mut(from) else {
            tracing::warn!("Dropping offer from unknown peer {}", from);
            return;
        };
        let outcome = self.negotiation.on_offer(peer, offer.clone(), &*self.sink).await;
        if !matches!(outcome, Ok(OfferOutcome::NeedsFreshConnection)) {
            self.report(from, outcome.map(|_| ()));
            return;
        }

        let tracks = self.media.active_tracks();
        if let Err(e) = self.peers.replace_connection(from, &tracks).await {
            tracing::error!("Failed to replace connection to {}: {}", from, e);
            return;
        }
        self.health.forget(from);
        let Some(peer) = self.peers.get_peer_mut(from) else {
            return;
        };
        // What our withdrawn offer carried goes out again once we have answered
        peer.queue_offer(QueuedOffer::Renegotiate);
        let result = self.negotiation.on_offer(peer, offer, &*self.sink).await;
        self.report(from, result.map(|_| ()));
    }

    async fn drop_peer(&mut self, peer_id: Uuid) {
        if self.peers.remove_peer(peer_id).await.is_some() {
            self.health.forget(peer_id);
            self.emit(CallEvent::PeerLeft { peer_id });
        }
    }

    async fn offer(&mut self, peer_id: Uuid) {
        let Some(peer) = self.peers.get_peer_mut(peer_id) else {
            return;
        };
        let result = self.negotiation.negotiation_needed(peer, &*self.sink).await;
        self.report(peer_id, result);
    }

    /// Negotiation failures stay with their peer; the connection is left for
    /// the health monitor to recover
    fn report(&self, peer_id: Uuid, result: Result<(), NegotiationError>) {
        match result {
            Ok(()) => {}
            Err(e) if e.is_not_connected() => {
                tracing::warn!("Cannot signal {}: not connected", peer_id);
                self.emit(CallEvent::Notice(Notice::NotConnected));
            }
            Err(e) => tracing::warn!("Negotiation with {} failed: {}", peer_id, e),
        }
    }

    async fn on_connection_event(&mut self, peer_id: Uuid, generation: u64, event: ConnectionEvent) {
        if !self.peers.is_current(peer_id, generation) {
            tracing::debug!("Ignoring {:?} from stale connection {} of {}", event, generation, peer_id);
            return;
        }

        match event {
            ConnectionEvent::NegotiationNeeded => self.offer(peer_id).await,
            ConnectionEvent::LocalCandidate(candidate) => {
                if let Err(e) = self.negotiation.send_candidate(peer_id, candidate, &*self.sink) {
                    tracing::debug!("Failed to send ICE candidate to {}: {}", peer_id, e);
                }
            }
            ConnectionEvent::IceStateChanged(state) => {
                tracing::debug!("ICE {:?} for {}", state, peer_id);
                match self.health.observe(peer_id, state) {
                    HealthAction::None => {}
                    HealthAction::RestartIce { attempt } => {
                        let Some(peer) = self.peers.get_peer_mut(peer_id) else {
                            return;
                        };
                        match self.negotiation.restart_ice(peer, &*self.sink).await {
                            Ok(true) => self.health.restart_sent(peer_id),
                            Ok(false) => {
                                tracing::debug!("ICE restart {} for {} is queued", attempt, peer_id);
                            }
                            Err(e) => self.report(peer_id, Err(e)),
                        }
                    }
                    HealthAction::GiveUp => {
                        self.drop_peer(peer_id).await;
                        self.emit(CallEvent::Notice(Notice::PeerUnreachable { peer_id }));
                    }
                }
            }
            ConnectionEvent::ConnectionStateChanged(state) => {
                tracing::debug!("Connection {:?} for {}", state, peer_id);
                if state == PeerConnectionState::Closed {
                    self.drop_peer(peer_id).await;
                }
            }
            ConnectionEvent::Track(track) => {
                let Some(peer) = self.peers.get_peer_mut(peer_id) else {
                    return;
                };
                tracing::info!("Received {} track {} from {}", track.kind(), track.id(), peer_id);
                if let Some(stream) = peer.attach_remote_track(track) {
                    self.emit(CallEvent::RemoteStream { peer_id, stream });
                }
            }
        }
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::EnableAudio => self.start_audio().await,
            Command::DisableAudio => self.stop_audio().await,
            Command::ToggleAudio if self.media.audio_enabled() => self.stop_audio().await,
            Command::ToggleAudio => self.start_audio().await,
            Command::EnableVideo => self.start_video().await,
            Command::DisableVideo => self.stop_video().await,
            Command::ToggleVideo if self.media.video_enabled() => self.stop_video().await,
            Command::ToggleVideo => self.start_video().await,
            Command::EnableScreenShare => self.start_screen_share().await,
            Command::DisableScreenShare => self.stop_screen_share().await,
            Command::ToggleScreenShare if self.media.screen_sharing() => self.stop_screen_share().await,
            Command::ToggleScreenShare => self.start_screen_share().await,
            Command::Leave => self.teardown().await,
        }
    }

    async fn start_audio(&mut self) {
        match self.media.enable_audio(&self.peers).await {
            Ok(()) => self.announce(MediaType::Audio, true),
            Err(e) => self.device_failed(Notice::MicrophoneUnavailable, e),
        }
    }

    async fn stop_audio(&mut self) {
        if self.media.audio_enabled() {
            self.media.disable_audio(&self.peers).await;
            self.announce(MediaType::Audio, false);
        }
    }

    async fn start_video(&mut self) {
        match self.media.enable_video(&self.peers).await {
            Ok(()) => self.announce(MediaType::Video, true),
            Err(e) => self.device_failed(Notice::CameraUnavailable, e),
        }
    }

    async fn stop_video(&mut self) {
        if self.media.video_enabled() {
            self.media.disable_video(&self.peers).await;
            self.announce(MediaType::Video, false);
        }
    }

    async fn start_screen_share(&mut self) {
        match self.media.enable_screen_share(&self.peers).await {
            Ok(track) => {
                let loopback = self.loopback.clone();
                tokio::spawn(async move {
                    track.ended().await;
                    let _ = loopback.send(SessionEvent::ScreenShareEnded {
                        track_id: track.id().to_string(),
                    });
                });
                self.announce(MediaType::Screen, true);
            }
            Err(e) => self.device_failed(Notice::ScreenShareUnavailable, e),
        }
    }

    async fn stop_screen_share(&mut self) {
        if self.media.disable_screen_share(&self.peers).await {
            self.announce(MediaType::Screen, false);
        }
    }

    fn device_failed(&self, notice: fn(String) -> Notice, error: MediaError) {
        tracing::warn!("{}", error);
        self.emit(CallEvent::Notice(notice(error.to_string())));
    }

    /// Tell the relay about a media change; skipped while disconnected
    fn announce(&self, media_type: MediaType, is_active: bool) {
        if !self.sink.is_connected() {
            return;
        }
        let result = SignalMessage::new(
            self.channel_id,
            self.local_id,
            None,
            Signal::MediaState {
                media_type,
                is_active,
            },
        )
        .map_err(Into::into)
        .and_then(|message| self.sink.send(message));

        if let Err(e) = result {
            tracing::debug!("Failed to announce {} media-state: {}", media_type, e);
        }
    }

    fn announce_media(&self) {
        if self.media.audio_enabled() {
            self.announce(MediaType::Audio, true);
        }
        if self.media.video_enabled() {
            self.announce(MediaType::Video, true);
        }
        if self.media.screen_sharing() {
            self.announce(MediaType::Screen, true);
        }
    }

    /// Close every peer and stop every local track. Idempotent.
    pub async fn teardown(&mut self) {
        if self.ended {
            return;
        }
        tracing::info!("Leaving call in channel {}", self.channel_id);
        self.peers.remove_all().await;
        self.health.clear();
        self.media.stop_all();
        self.ended = true;
        self.emit(CallEvent::Ended);
    }
}

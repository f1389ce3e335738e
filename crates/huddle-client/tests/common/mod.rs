//! In-memory stand-ins for the peer connection, device and signaling seams

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use huddle_client::error::{NegotiationError, TransportError};
use huddle_client::peer::{
    ConnectionEvent, ConnectionObserver, PeerConnection, PeerConnectionFactory, PeerConnectionState,
    SignalingState,
};
use huddle_client::session::{CallEvent, CallSession, Command, SessionEvent, SessionIo, SessionOptions};
use huddle_client::signaling::{SignalSink, TransportEvent, TransportState};
use huddle_media::{DisplayCapture, LocalTrack, MediaDevices, MediaError, MediaKind, TrackSource};
use huddle_protocol::{IceCandidate, PeerInfo, SdpType, SessionDescription, Signal, SignalKind, SignalMessage};
use tokio::sync::mpsc;
use uuid::Uuid;

pub const CHANNEL: Uuid = Uuid::from_u128(0xC0FFEE);

pub fn peer_info(id: Uuid, name: &str) -> PeerInfo {
    PeerInfo {
        user_id: id,
        username: name.to_string(),
    }
}

pub fn candidate(n: u32) -> IceCandidate {
    IceCandidate {
        candidate: format!("candidate:{} 1 udp 2122260223 10.0.0.{} 5000{} typ host", n, n, n),
        sdp_mid: Some("0".into()),
        sdp_mline_index: Some(0),
        username_fragment: None,
    }
}

struct FakeState {
    signaling: SignalingState,
    remote: Option<SessionDescription>,
    senders: HashMap<MediaKind, Option<LocalTrack>>,
    candidates: Vec<IceCandidate>,
    offers_created: usize,
    ice_restarts: usize,
    negotiation_needed: usize,
    closed: bool,
}

impl Default for FakeState {
    fn default() -> Self {
        Self {
            signaling: SignalingState::Stable,
            remote: None,
            senders: HashMap::new(),
            candidates: Vec::new(),
            offers_created: 0,
            ice_restarts: 0,
            negotiation_needed: 0,
            closed: false,
        }
    }
}

/// A peer connection that enforces the signaling state machine of a
/// webrtc-rs one without doing any networking. Like webrtc-rs it accepts a
/// new local offer over a pending one and refuses to apply a rollback.
pub struct FakeConnection {
    observer: ConnectionObserver,
    state: Mutex<FakeState>,
}

impl FakeConnection {
    fn new(observer: ConnectionObserver) -> Self {
        Self {
            observer,
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn generation(&self) -> u64 {
        self.observer.generation()
    }

    /// Fire a connection callback as the WebRTC stack would
    pub fn emit(&self, event: ConnectionEvent) {
        self.observer.emit(event);
    }

    pub fn state(&self) -> SignalingState {
        self.state.lock().unwrap().signaling
    }

    pub fn sender_track(&self, kind: MediaKind) -> Option<LocalTrack> {
        self.state.lock().unwrap().senders.get(&kind).cloned().flatten()
    }

    pub fn has_sender_of(&self, kind: MediaKind) -> bool {
        self.state.lock().unwrap().senders.contains_key(&kind)
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.state.lock().unwrap().remote.clone()
    }

    pub fn candidates(&self) -> Vec<IceCandidate> {
        self.state.lock().unwrap().candidates.clone()
    }

    pub fn offers_created(&self) -> usize {
        self.state.lock().unwrap().offers_created
    }

    pub fn ice_restarts(&self) -> usize {
        self.state.lock().unwrap().ice_restarts
    }

    pub fn negotiation_needed_count(&self) -> usize {
        self.state.lock().unwrap().negotiation_needed
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    fn invalid(what: &str, state: SignalingState) -> NegotiationError {
        NegotiationError::InvalidState(format!("{} in {:?}", what, state))
    }
}

#[async_trait]
impl PeerConnection for FakeConnection {
    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, NegotiationError> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(NegotiationError::Closed);
        }
        state.offers_created += 1;
        if ice_restart {
            state.ice_restarts += 1;
        }
        let mut kinds: Vec<String> = state.senders.keys().map(|k| k.to_string()).collect();
        kinds.sort();
        Ok(SessionDescription::offer(format!(
            "offer {} [{}]",
            state.offers_created,
            kinds.join(",")
        )))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        let state = self.state.lock().unwrap();
        if state.signaling != SignalingState::HaveRemoteOffer {
            return Err(Self::invalid("create_answer", state.signaling));
        }
        Ok(SessionDescription::answer("answer"))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), NegotiationError> {
        let mut state = self.state.lock().unwrap();
        state.signaling = match (description.sdp_type, state.signaling) {
            (SdpType::Offer, SignalingState::Stable | SignalingState::HaveLocalOffer) => {
                SignalingState::HaveLocalOffer
            }
            (SdpType::Answer, SignalingState::HaveRemoteOffer) => SignalingState::Stable,
            (_, current) => return Err(Self::invalid("set_local_description", current)),
        };
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), NegotiationError> {
        let mut state = self.state.lock().unwrap();
        state.signaling = match (description.sdp_type, state.signaling) {
            (SdpType::Offer, SignalingState::Stable) => SignalingState::HaveRemoteOffer,
            (SdpType::Answer, SignalingState::HaveLocalOffer) => SignalingState::Stable,
            (_, current) => return Err(Self::invalid("set_remote_description", current)),
        };
        state.remote = Some(description);
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.state.lock().unwrap().remote.is_some()
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        let mut state = self.state.lock().unwrap();
        if state.remote.is_none() {
            return Err(NegotiationError::InvalidState("no remote description".into()));
        }
        state.candidates.push(candidate);
        Ok(())
    }

    fn signaling_state(&self) -> SignalingState {
        self.state()
    }

    async fn has_sender(&self, kind: MediaKind) -> bool {
        self.has_sender_of(kind)
    }

    async fn add_track(&self, track: &LocalTrack) -> Result<(), NegotiationError> {
        {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return Err(NegotiationError::Closed);
            }
            if state.senders.contains_key(&track.kind()) {
                return Err(NegotiationError::InvalidState("sender exists".into()));
            }
            state.senders.insert(track.kind(), Some(track.clone()));
            state.negotiation_needed += 1;
        }
        self.observer.emit(ConnectionEvent::NegotiationNeeded);
        Ok(())
    }

    async fn replace_track(&self, kind: MediaKind, track: Option<&LocalTrack>) -> Result<(), NegotiationError> {
        let mut state = self.state.lock().unwrap();
        match state.senders.get_mut(&kind) {
            Some(slot) => {
                *slot = track.cloned();
                Ok(())
            }
            None => Err(NegotiationError::InvalidState(format!("no {} sender", kind))),
        }
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        {
            let mut state = self.state.lock().unwrap();
            state.closed = true;
            state.signaling = SignalingState::Closed;
        }
        self.observer
            .emit(ConnectionEvent::ConnectionStateChanged(PeerConnectionState::Closed));
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeFactory {
    connections: Mutex<Vec<(Uuid, Arc<FakeConnection>)>>,
}

impl FakeFactory {
    pub fn connections_for(&self, peer_id: Uuid) -> Vec<Arc<FakeConnection>> {
        self.connections
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == peer_id)
            .map(|(_, c)| c.clone())
            .collect()
    }

    /// The most recent connection created for `peer_id`
    pub fn connection(&self, peer_id: Uuid) -> Arc<FakeConnection> {
        self.connections_for(peer_id)
            .pop()
            .unwrap_or_else(|| panic!("no connection for {}", peer_id))
    }

    pub fn live_connections_for(&self, peer_id: Uuid) -> usize {
        self.connections_for(peer_id)
            .iter()
            .filter(|c| !c.is_closed())
            .count()
    }

    pub fn all(&self) -> Vec<Arc<FakeConnection>> {
        self.connections
            .lock()
            .unwrap()
            .iter()
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn created(&self) -> usize {
        self.connections.lock().unwrap().len()
    }
}

#[async_trait]
impl PeerConnectionFactory for FakeFactory {
    async fn create(&self, observer: ConnectionObserver) -> Result<Arc<dyn PeerConnection>, NegotiationError> {
        let peer_id = observer.peer_id();
        let connection = Arc::new(FakeConnection::new(observer));
        self.connections
            .lock()
            .unwrap()
            .push((peer_id, connection.clone()));
        Ok(connection)
    }
}

/// Devices that hand out headless tracks and remember every one of them
#[derive(Default)]
pub struct FakeDevices {
    pub deny_microphone: AtomicBool,
    pub deny_camera: AtomicBool,
    pub deny_display: AtomicBool,
    opened: Mutex<Vec<LocalTrack>>,
}

impl FakeDevices {
    fn open(&self, source: TrackSource, deny: &AtomicBool) -> Result<LocalTrack, MediaError> {
        if deny.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied(source));
        }
        let track = LocalTrack::new(source);
        self.opened.lock().unwrap().push(track.clone());
        Ok(track)
    }

    pub fn opened(&self, source: TrackSource) -> Vec<LocalTrack> {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.source() == source)
            .cloned()
            .collect()
    }

    pub fn live_tracks(&self, kind: MediaKind) -> usize {
        self.opened
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.kind() == kind && t.is_live())
            .count()
    }

    pub fn all_stopped(&self) -> bool {
        self.opened.lock().unwrap().iter().all(|t| !t.is_live())
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn open_microphone(&self) -> Result<LocalTrack, MediaError> {
        self.open(TrackSource::Microphone, &self.deny_microphone)
    }

    async fn open_camera(&self) -> Result<LocalTrack, MediaError> {
        self.open(TrackSource::Camera, &self.deny_camera)
    }

    async fn open_display(&self, with_audio: bool) -> Result<DisplayCapture, MediaError> {
        let video = self.open(TrackSource::Screen, &self.deny_display)?;
        let audio = if with_audio {
            Some(self.open(TrackSource::SystemAudio, &AtomicBool::new(false))?)
        } else {
            None
        };
        Ok(DisplayCapture { video, audio })
    }
}

#[derive(Default)]
pub struct RecordingSink {
    connected: AtomicBool,
    sent: Mutex<Vec<SignalMessage>>,
}

impl RecordingSink {
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    pub fn take(&self) -> Vec<SignalMessage> {
        std::mem::take(&mut *self.sent.lock().unwrap())
    }
}

impl SignalSink for RecordingSink {
    fn send(&self, message: SignalMessage) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// One participant's session wired to fakes, driven event by event
pub struct Harness {
    pub local_id: Uuid,
    pub session: CallSession,
    pub factory: Arc<FakeFactory>,
    pub devices: Arc<FakeDevices>,
    pub sink: Arc<RecordingSink>,
    loopback: mpsc::UnboundedReceiver<SessionEvent>,
    events: mpsc::UnboundedReceiver<CallEvent>,
}

impl Harness {
    pub fn new(local_id: Uuid) -> Self {
        Self::with_restart_limit(local_id, 3)
    }

    pub fn with_restart_limit(local_id: Uuid, max_restarts: u32) -> Self {
        let factory = Arc::new(FakeFactory::default());
        let devices = Arc::new(FakeDevices::default());
        let sink = Arc::new(RecordingSink::default());
        let (loopback_tx, loopback) = mpsc::unbounded_channel();
        let (events_tx, events) = mpsc::unbounded_channel();

        let session = CallSession::new(
            SessionOptions {
                channel_id: CHANNEL,
                local_id,
                ice_restart_max_attempts: max_restarts,
                screen_share_audio: true,
            },
            SessionIo {
                factory: factory.clone(),
                devices: devices.clone(),
                sink: sink.clone(),
                loopback: loopback_tx,
                events: events_tx,
            },
        );

        Self {
            local_id,
            session,
            factory,
            devices,
            sink,
            loopback,
            events,
        }
    }

    /// Bring the signaling transport up
    pub async fn connect(&mut self) {
        self.sink.set_connected(true);
        self.transport(TransportEvent::StateChanged(TransportState::Connected))
            .await;
    }

    pub async fn transport(&mut self, event: TransportEvent) {
        self.session.handle(SessionEvent::Transport(event)).await;
        self.settle().await;
    }

    pub async fn deliver(&mut self, message: SignalMessage) {
        self.transport(TransportEvent::Message(message)).await;
    }

    /// Deliver a signal as the relay would stamp it
    pub async fn signal(&mut self, from: Uuid, to: Option<Uuid>, signal: Signal) {
        let message = SignalMessage::new(CHANNEL, from, to, signal).unwrap();
        self.deliver(message).await;
    }

    pub async fn signal_to_me(&mut self, from: Uuid, signal: Signal) {
        let to = Some(self.local_id);
        self.signal(from, to, signal).await;
    }

    pub async fn command(&mut self, command: Command) {
        self.session.handle(SessionEvent::Command(command)).await;
        self.settle().await;
    }

    /// Handle everything the session queued for itself, including events
    /// from spawned watchers
    pub async fn settle(&mut self) {
        loop {
            for _ in 0..4 {
                tokio::task::yield_now().await;
            }
            match self.loopback.try_recv() {
                Ok(event) => self.session.handle(event).await,
                Err(_) => break,
            }
        }
    }

    pub fn take_sent(&self) -> Vec<SignalMessage> {
        self.sink.take()
    }

    pub fn drain_events(&mut self) -> Vec<CallEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn of_kind(messages: &[SignalMessage], kind: SignalKind) -> Vec<SignalMessage> {
    messages.iter().filter(|m| m.kind == kind).cloned().collect()
}

pub fn addressed(messages: &[SignalMessage], kind: SignalKind, to: Uuid) -> usize {
    messages
        .iter()
        .filter(|m| m.kind == kind && m.to == Some(to))
        .count()
}

/// Deliver the addressed messages each side sent to the other until
/// nothing is left in flight
pub async fn exchange(a: &mut Harness, b: &mut Harness) {
    for _ in 0..20 {
        let from_a = a.take_sent();
        let from_b = b.take_sent();
        if from_a.is_empty() && from_b.is_empty() {
            return;
        }
        let b_id = b.local_id;
        for message in from_a.into_iter().filter(|m| m.to == Some(b_id)) {
            b.deliver(message).await;
        }
        let a_id = a.local_id;
        for message in from_b.into_iter().filter(|m| m.to == Some(a_id)) {
            a.deliver(message).await;
        }
    }
    panic!("signaling did not settle");
}

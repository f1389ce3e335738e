use std::sync::Arc;

use huddle_media::MediaDevices;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::events::{CallEvent, Command, Identity, SessionEvent, SessionSnapshot};
use super::{CallSession, SessionIo, SessionOptions};
use crate::config::ClientConfig;
use crate::error::TransportError;
use crate::peer::PeerConnectionFactory;
use crate::signaling::{SignalSink, SignalingTransport};

struct ActiveCall {
    channel_id: Uuid,
    loopback: mpsc::UnboundedSender<SessionEvent>,
    task: JoinHandle<()>,
}

/// Entry point for the UI layer: joins and leaves calls and forwards user
/// commands. Each joined call runs as its own task owning a [`CallSession`];
/// at most one call is active at a time.
pub struct Call {
    config: ClientConfig,
    identity: Identity,
    factory: Arc<dyn PeerConnectionFactory>,
    devices: Arc<dyn MediaDevices>,
    events: mpsc::UnboundedSender<CallEvent>,
    snapshot: Arc<watch::Sender<SessionSnapshot>>,
    active: Option<ActiveCall>,
}

impl Call {
    pub fn new(
        config: ClientConfig,
        identity: Identity,
        factory: Arc<dyn PeerConnectionFactory>,
        devices: Arc<dyn MediaDevices>,
    ) -> (Self, mpsc::UnboundedReceiver<CallEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (snapshot, _) = watch::channel(SessionSnapshot::default());
        let call = Self {
            config,
            identity,
            factory,
            devices,
            events,
            snapshot: Arc::new(snapshot),
            active: None,
        };
        (call, events_rx)
    }

    /// Current state of the call, updated after every event it handles
    pub fn snapshot(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn channel_id(&self) -> Option<Uuid> {
        self.active
            .as_ref()
            .filter(|a| !a.task.is_finished())
            .map(|a| a.channel_id)
    }

    /// Follow the UI's selection: be in the call for `channel_id` while
    /// `enabled`, and in no call otherwise
    pub async fn set_channel(&mut self, channel_id: Uuid, enabled: bool) -> Result<(), TransportError> {
        if !enabled {
            self.leave().await;
            return Ok(());
        }
        if self.channel_id() == Some(channel_id) {
            return Ok(());
        }
        self.join(channel_id).await
    }

    /// Join the call for `channel_id`, leaving any call in progress first
    pub async fn join(&mut self, channel_id: Uuid) -> Result<(), TransportError> {
        self.leave().await;

        let url = self
            .config
            .call_url(channel_id, self.identity.user_id, &self.identity.username);
        let (transport_tx, mut transport_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(SignalingTransport::connect(
            url,
            self.config.reconnect_policy(),
            transport_tx,
        )?);

        let (loopback, mut loopback_rx) = mpsc::unbounded_channel();
        let sink: Arc<dyn SignalSink> = transport.clone();
        let mut session = CallSession::new(
            SessionOptions {
                channel_id,
                local_id: self.identity.user_id,
                ice_restart_max_attempts: self.config.ice_restart_max_attempts,
                screen_share_audio: self.config.screen_share_audio,
            },
            SessionIo {
                factory: self.factory.clone(),
                devices: self.devices.clone(),
                sink,
                loopback: loopback.clone(),
                events: self.events.clone(),
            },
        );

        tracing::info!("Joining call in channel {} as {}", channel_id, self.identity.username);
        let snapshot = self.snapshot.clone();
        snapshot.send_replace(session.snapshot());

        let task = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    Some(event) = transport_rx.recv() => SessionEvent::Transport(event),
                    Some(event) = loopback_rx.recv() => event,
                    else => break,
                };
                session.handle(event).await;
                snapshot.send_replace(session.snapshot());
                if session.is_ended() {
                    break;
                }
            }

            session.teardown().await;
            drop(session);
            transport.close(true);
            if let Ok(transport) = Arc::try_unwrap(transport) {
                transport.closed().await;
            }
            snapshot.send_replace(SessionSnapshot::default());
            tracing::info!("Left call in channel {}", channel_id);
        });

        self.active = Some(ActiveCall {
            channel_id,
            loopback,
            task,
        });
        Ok(())
    }

    /// Leave the current call and wait until it is fully torn down
    pub async fn leave(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = active.loopback.send(SessionEvent::Command(Command::Leave));
            if let Err(e) = active.task.await {
                tracing::error!("Call task for channel {} failed: {}", active.channel_id, e);
            }
        }
    }

    /// Forward a user command to the running call; returns false if there
    /// is none
    pub fn command(&self, command: Command) -> bool {
        match &self.active {
            Some(active) => active.loopback.send(SessionEvent::Command(command)).is_ok(),
            None => false,
        }
    }

    pub fn toggle_audio(&self) -> bool {
        self.command(Command::ToggleAudio)
    }

    pub fn toggle_video(&self) -> bool {
        self.command(Command::ToggleVideo)
    }

    pub fn toggle_screen_share(&self) -> bool {
        self.command(Command::ToggleScreenShare)
    }
}

impl Drop for Call {
    fn drop(&mut self) {
        // The task tears the call down on its own
        if let Some(active) = self.active.take() {
            let _ = active.loopback.send(SessionEvent::Command(Command::Leave));
        }
    }
}

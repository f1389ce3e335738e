use futures_util::{SinkExt, StreamExt};
use huddle_protocol::SignalMessage;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::Utf8Bytes;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::reconnect::{ReconnectPolicy, Reconnector};
use crate::error::TransportError;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    StateChanged(TransportState),
    Message(SignalMessage),
    /// The socket closed without being asked to; a reconnect follows
    Lost,
    /// No further reconnects: the policy gave up or the relay closed us normally
    Ended,
}

/// Outbound side of signaling as seen by the call session
pub trait SignalSink: Send + Sync {
    fn send(&self, message: SignalMessage) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;
}

enum Closed {
    Intentional,
    ByRelay,
    Unexpected,
}

/// Persistent signaling socket for one call with automatic reconnect.
///
/// Inbound messages, state changes and losses are delivered on the event
/// channel given to [`SignalingTransport::connect`]. Malformed inbound
/// messages are logged and dropped.
pub struct SignalingTransport {
    outgoing: mpsc::UnboundedSender<String>,
    close: mpsc::UnboundedSender<bool>,
    state: watch::Receiver<TransportState>,
    task: JoinHandle<()>,
}

impl SignalingTransport {
    pub fn connect(
        url: String,
        policy: ReconnectPolicy,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Self, TransportError> {
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(TransportError::InvalidUrl(url));
        }

        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (close, close_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(TransportState::Disconnected);

        let task = tokio::spawn(run(url, policy, events, state_tx, outgoing_rx, close_rx));

        Ok(Self {
            outgoing,
            close,
            state,
            task,
        })
    }

    pub fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    /// Close the socket. An intentional close never reconnects; an
    /// unintentional one behaves like a dropped connection.
    pub fn close(&self, intentional: bool) {
        let _ = self.close.send(intentional);
    }

    /// Wait for the transport task to finish after an intentional close
    pub async fn closed(self) {
        let _ = self.task.await;
    }
}

impl SignalSink for SignalingTransport {
    fn send(&self, message: SignalMessage) -> Result<(), TransportError> {
        if self.state() != TransportState::Connected {
            return Err(TransportError::NotConnected);
        }
        let text = message.to_json()?;
        self.outgoing
            .send(text)
            .map_err(|_| TransportError::NotConnected)
    }

    fn is_connected(&self) -> bool {
        self.state() == TransportState::Connected
    }
}

async fn run(
    url: String,
    policy: ReconnectPolicy,
    events: mpsc::UnboundedSender<TransportEvent>,
    state: watch::Sender<TransportState>,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    mut close: mpsc::UnboundedReceiver<bool>,
) {
    let set_state = |new: TransportState| {
        if state.send_if_modified(|current| std::mem::replace(current, new) != new) {
            let _ = events.send(TransportEvent::StateChanged(new));
        }
    };
    let mut reconnector = Reconnector::new(policy);

    loop {
        set_state(TransportState::Connecting);
        tracing::info!("Connecting to signaling server {}", url);

        let connected = tokio::select! {
            result = connect_async(url.as_str()) => Some(result),
            request = close.recv() => {
                if request != Some(false) {
                    set_state(TransportState::Disconnected);
                    return;
                }
                tracing::info!("Abandoning signaling connect attempt");
                None
            }
        };

        match connected {
            Some(Ok((ws, _))) => {
                reconnector.connected();
                // Anything queued for the previous socket is stale
                while outgoing.try_recv().is_ok() {}
                set_state(TransportState::Connected);
                tracing::info!("Signaling connected");

                let outcome = pump(ws, &events, &mut outgoing, &mut close).await;
                set_state(TransportState::Disconnected);
                match outcome {
                    Closed::Intentional => {
                        tracing::info!("Signaling closed");
                        return;
                    }
                    Closed::ByRelay => {
                        tracing::info!("Signaling closed by the relay");
                        let _ = events.send(TransportEvent::Ended);
                        return;
                    }
                    Closed::Unexpected => {
                        tracing::warn!("Signaling connection lost");
                        let _ = events.send(TransportEvent::Lost);
                    }
                }
            }
            Some(Err(e)) => {
                tracing::warn!("Failed to connect to signaling server: {}", e);
                set_state(TransportState::Disconnected);
            }
            None => set_state(TransportState::Disconnected),
        }

        let Some(delay) = reconnector.next_attempt() else {
            tracing::warn!(
                "Giving up on signaling after {} reconnect attempts",
                reconnector.attempts() - 1
            );
            let _ = events.send(TransportEvent::Ended);
            return;
        };
        tracing::info!(
            "Reconnecting in {:?} (attempt {})",
            delay,
            reconnector.attempts()
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            request = close.recv() => {
                if request != Some(false) {
                    return;
                }
            }
        }
    }
}

async fn pump(
    ws: WsStream,
    events: &mpsc::UnboundedSender<TransportEvent>,
    outgoing: &mut mpsc::UnboundedReceiver<String>,
    close: &mut mpsc::UnboundedReceiver<bool>,
) -> Closed {
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => match SignalMessage::from_json(&text) {
                    Ok(message) => {
                        let _ = events.send(TransportEvent::Message(message));
                    }
                    Err(e) => {
                        tracing::warn!("Dropping malformed signaling message: {}", e);
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    let normal = frame
                        .as_ref()
                        .is_some_and(|f| f.code == CloseCode::Normal);
                    return if normal { Closed::ByRelay } else { Closed::Unexpected };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!("Signaling socket error: {}", e);
                    return Closed::Unexpected;
                }
                None => return Closed::Unexpected,
            },
            message = outgoing.recv() => match message {
                Some(text) => {
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send signaling message: {}", e);
                        return Closed::Unexpected;
                    }
                }
                None => {
                    let _ = write.close().await;
                    return Closed::Intentional;
                }
            },
            request = close.recv() => {
                let intentional = request.unwrap_or(true);
                let frame = CloseFrame {
                    code: if intentional { CloseCode::Normal } else { CloseCode::Away },
                    reason: Utf8Bytes::from_static(if intentional { "leaving call" } else { "reconnecting" }),
                };
                let _ = write.send(Message::Close(Some(frame))).await;
                let _ = write.close().await;
                return if intentional { Closed::Intentional } else { Closed::Unexpected };
            }
        }
    }
}

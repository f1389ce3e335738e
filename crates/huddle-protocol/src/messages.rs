use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::types::{IceCandidate, MediaType, PeerInfo, SessionDescription};

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed signal: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported signal type")]
    UnsupportedType,
}

/// Value of the `type` field
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    ExistingPeers,
    PeerJoined,
    PeerLeft,
    Offer,
    Answer,
    IceCandidate,
    MediaState,
    #[serde(other)]
    Unknown,
}

/// Envelope exchanged over the signaling socket.
///
/// The payload is kept as raw JSON so that a malformed payload for one signal
/// never prevents the envelope itself from being routed or logged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SignalMessage {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    #[serde(default)]
    pub channel_id: Uuid,
    #[serde(default)]
    pub from: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

/// Typed view of a signal payload
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    /// Sent once to a joining client, listing everyone already present
    ExistingPeers(Vec<PeerInfo>),
    PeerJoined(PeerInfo),
    PeerLeft { user_id: Uuid },
    Offer(SessionDescription),
    Answer(SessionDescription),
    IceCandidate(IceCandidate),
    /// Presence broadcast to the relay; never consumed by negotiation
    MediaState { media_type: MediaType, is_active: bool },
}

#[derive(Serialize, Deserialize)]
struct ExistingPeersPayload {
    #[serde(default)]
    peers: Vec<PeerInfo>,
}

#[derive(Serialize, Deserialize)]
struct PeerLeftPayload {
    user_id: Uuid,
}

#[derive(Serialize, Deserialize)]
struct SdpPayload {
    sdp: SessionDescription,
}

#[derive(Serialize, Deserialize)]
struct CandidatePayload {
    candidate: IceCandidate,
}

#[derive(Serialize, Deserialize)]
struct MediaStatePayload {
    media_type: MediaType,
    is_active: bool,
}

impl Signal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Signal::ExistingPeers(_) => SignalKind::ExistingPeers,
            Signal::PeerJoined(_) => SignalKind::PeerJoined,
            Signal::PeerLeft { .. } => SignalKind::PeerLeft,
            Signal::Offer(_) => SignalKind::Offer,
            Signal::Answer(_) => SignalKind::Answer,
            Signal::IceCandidate(_) => SignalKind::IceCandidate,
            Signal::MediaState { .. } => SignalKind::MediaState,
        }
    }

    fn payload(self) -> Result<Value, ProtocolError> {
        let value = match self {
            Signal::ExistingPeers(peers) => serde_json::to_value(ExistingPeersPayload { peers })?,
            Signal::PeerJoined(info) => serde_json::to_value(info)?,
            Signal::PeerLeft { user_id } => serde_json::to_value(PeerLeftPayload { user_id })?,
            Signal::Offer(sdp) | Signal::Answer(sdp) => serde_json::to_value(SdpPayload { sdp })?,
            Signal::IceCandidate(candidate) => {
                serde_json::to_value(CandidatePayload { candidate })?
            }
            Signal::MediaState {
                media_type,
                is_active,
            } => serde_json::to_value(MediaStatePayload {
                media_type,
                is_active,
            })?,
        };
        Ok(value)
    }
}

impl SignalMessage {
    /// Build an envelope from a typed signal
    pub fn new(
        channel_id: Uuid,
        from: Uuid,
        to: Option<Uuid>,
        signal: Signal,
    ) -> Result<Self, ProtocolError> {
        Ok(Self {
            kind: signal.kind(),
            channel_id,
            from,
            to,
            payload: signal.payload()?,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode the payload according to `type`
    pub fn signal(&self) -> Result<Signal, ProtocolError> {
        let payload = self.payload.clone();
        let signal = match self.kind {
            SignalKind::ExistingPeers => {
                // The relay may send `null` rather than an empty list
                let payload = if payload.is_null() {
                    Value::Object(Default::default())
                } else {
                    payload
                };
                let p: ExistingPeersPayload = serde_json::from_value(payload)?;
                Signal::ExistingPeers(p.peers)
            }
            SignalKind::PeerJoined => Signal::PeerJoined(serde_json::from_value(payload)?),
            SignalKind::PeerLeft => {
                let p: PeerLeftPayload = serde_json::from_value(payload)?;
                Signal::PeerLeft { user_id: p.user_id }
            }
            SignalKind::Offer => {
                let p: SdpPayload = serde_json::from_value(payload)?;
                Signal::Offer(p.sdp)
            }
            SignalKind::Answer => {
                let p: SdpPayload = serde_json::from_value(payload)?;
                Signal::Answer(p.sdp)
            }
            SignalKind::IceCandidate => {
                let p: CandidatePayload = serde_json::from_value(payload)?;
                Signal::IceCandidate(p.candidate)
            }
            SignalKind::MediaState => {
                let p: MediaStatePayload = serde_json::from_value(payload)?;
                Signal::MediaState {
                    media_type: p.media_type,
                    is_active: p.is_active,
                }
            }
            SignalKind::Unknown => return Err(ProtocolError::UnsupportedType),
        };
        Ok(signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SdpType;
    use serde_json::json;

    #[test]
    fn test_existing_peers_from_relay() {
        let text = json!({
            "type": "existing-peers",
            "channel_id": "7f1c1f8e-8f0a-4b65-9f55-0d3f3d1b2a10",
            "from": "00000000-0000-0000-0000-000000000000",
            "payload": { "peers": [
                { "user_id": "0b8f7e0c-94a4-4a53-9b8a-1c2d3e4f5a6b", "username": "ada" }
            ]}
        })
        .to_string();

        let msg = SignalMessage::from_json(&text).unwrap();
        assert_eq!(msg.kind, SignalKind::ExistingPeers);
        assert!(msg.to.is_none());

        match msg.signal().unwrap() {
            Signal::ExistingPeers(peers) => {
                assert_eq!(peers.len(), 1);
                assert_eq!(peers[0].username, "ada");
            }
            other => panic!("unexpected signal {:?}", other),
        }
    }

    #[test]
    fn test_existing_peers_null_payload_is_empty() {
        let msg = SignalMessage::from_json(r#"{"type":"existing-peers","payload":null}"#).unwrap();
        assert_eq!(msg.signal().unwrap(), Signal::ExistingPeers(vec![]));
    }

    #[test]
    fn test_browser_offer_payload() {
        let text = json!({
            "type": "offer",
            "channel_id": "7f1c1f8e-8f0a-4b65-9f55-0d3f3d1b2a10",
            "from": "0b8f7e0c-94a4-4a53-9b8a-1c2d3e4f5a6b",
            "to": "5c6d7e8f-0000-4000-8000-000000000001",
            "payload": { "sdp": { "type": "offer", "sdp": "v=0\r\n" } }
        })
        .to_string();

        let msg = SignalMessage::from_json(&text).unwrap();
        let Signal::Offer(desc) = msg.signal().unwrap() else {
            panic!("expected offer");
        };
        assert_eq!(desc.sdp_type, SdpType::Offer);
        assert_eq!(desc.sdp, "v=0\r\n");
    }

    #[test]
    fn test_candidate_uses_browser_field_names() {
        let msg = SignalMessage::new(
            Uuid::nil(),
            Uuid::nil(),
            Some(Uuid::new_v4()),
            Signal::IceCandidate(IceCandidate {
                candidate: "candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host".into(),
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
                username_fragment: None,
            }),
        )
        .unwrap();

        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "ice-candidate");
        assert_eq!(value["payload"]["candidate"]["sdpMid"], "0");
        assert_eq!(value["payload"]["candidate"]["sdpMLineIndex"], 0);
        assert!(value["payload"]["candidate"].get("usernameFragment").is_none());
    }

    #[test]
    fn test_malformed_payload_is_an_error_not_a_panic() {
        let msg = SignalMessage::from_json(r#"{"type":"answer","payload":{"sdp":42}}"#).unwrap();
        assert!(matches!(msg.signal(), Err(ProtocolError::Json(_))));
    }

    #[test]
    fn test_unknown_type_is_kept_but_unsupported() {
        let msg = SignalMessage::from_json(r#"{"type":"join","payload":{}}"#).unwrap();
        assert_eq!(msg.kind, SignalKind::Unknown);
        assert!(matches!(msg.signal(), Err(ProtocolError::UnsupportedType)));
    }

    #[test]
    fn test_media_state_kind_and_payload() {
        let msg = SignalMessage::new(
            Uuid::nil(),
            Uuid::nil(),
            None,
            Signal::MediaState {
                media_type: MediaType::Screen,
                is_active: true,
            },
        )
        .unwrap();
        assert_eq!(msg.kind, SignalKind::MediaState);
        assert_eq!(msg.payload, json!({ "media_type": "screen", "is_active": true }));
    }
}

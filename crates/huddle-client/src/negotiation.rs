//! Offer/answer/candidate exchange per peer
//!
//! Perfect negotiation with a fixed role per pair: the participant with the
//! smaller id is polite. When both sides offer at once, the impolite side
//! ignores the incoming offer and waits for its answer. The polite side
//! cannot withdraw its own offer (webrtc-rs has no local rollback), so it
//! answers on a fresh connection and offers again once stable.
//!
//! Only the newcomer offers when a pair first meets; the participant already
//! in the channel waits for that offer instead of racing it.

use huddle_media::MediaKind;
use huddle_protocol::{IceCandidate, SessionDescription, Signal, SignalMessage};
use uuid::Uuid;

use crate::error::{NegotiationError, TransportError};
use crate::peer::{Peer, SignalingState};
use crate::signaling::SignalSink;

/// Remote candidates held per peer until its first description arrives
pub const MAX_PENDING_CANDIDATES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Idle,
    /// The peer joined after us and sends the first offer
    WaitingForOffer,
    /// Creating and applying a local offer
    MakingOffer,
    /// Our offer is out; the peer's answer has not arrived yet
    AwaitingAnswer,
    /// We ignored a colliding offer and are waiting for the answer to ours
    IgnoringOffer,
}

/// An offer requested while another one was outstanding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuedOffer {
    Renegotiate,
    IceRestart,
}

/// What became of an incoming offer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferOutcome {
    Answered,
    /// Colliding offer dropped on the impolite side
    Ignored,
    /// A local offer is applied and cannot be withdrawn; the offer must be
    /// answered on a new connection
    NeedsFreshConnection,
}

pub struct NegotiationCoordinator {
    local_id: Uuid,
    channel_id: Uuid,
}

impl NegotiationCoordinator {
    pub fn new(local_id: Uuid, channel_id: Uuid) -> Self {
        Self {
            local_id,
            channel_id,
        }
    }

    pub fn is_polite(&self, peer_id: Uuid) -> bool {
        self.local_id < peer_id
    }

    fn send(&self, sink: &dyn SignalSink, to: Uuid, signal: Signal) -> Result<(), NegotiationError> {
        let message = SignalMessage::new(self.channel_id, self.local_id, Some(to), signal)
            .map_err(TransportError::from)?;
        sink.send(message)?;
        Ok(())
    }

    /// Leave the first offer to a peer that joined after us
    pub fn await_offer(&self, peer: &mut Peer) {
        if peer.negotiation == NegotiationState::Idle {
            tracing::debug!("Waiting for {} to offer first", peer.id);
            peer.negotiation = NegotiationState::WaitingForOffer;
        }
    }

    /// Senders changed, or the peer should get our current media: offer now,
    /// or once the exchange in progress completes
    pub async fn negotiation_needed(&self, peer: &mut Peer, sink: &dyn SignalSink) -> Result<(), NegotiationError> {
        self.request_offer(peer, QueuedOffer::Renegotiate, sink).await.map(|_| ())
    }

    /// Offer with fresh ICE credentials. An offer still waiting for its
    /// answer is superseded rather than waited on, since that answer may
    /// never come. Returns whether the restart offer went out.
    pub async fn restart_ice(&self, peer: &mut Peer, sink: &dyn SignalSink) -> Result<bool, NegotiationError> {
        self.request_offer(peer, QueuedOffer::IceRestart, sink).await
    }

    async fn request_offer(
        &self,
        peer: &mut Peer,
        offer: QueuedOffer,
        sink: &dyn SignalSink,
    ) -> Result<bool, NegotiationError> {
        let signaling = peer.connection.signaling_state();
        // HaveLocalOffer with nothing outstanding is an offer that never got sent
        let can_offer = match peer.negotiation {
            NegotiationState::Idle => {
                matches!(signaling, SignalingState::Stable | SignalingState::HaveLocalOffer)
            }
            NegotiationState::WaitingForOffer
            | NegotiationState::AwaitingAnswer
            | NegotiationState::IgnoringOffer => {
                offer == QueuedOffer::IceRestart
                    && matches!(signaling, SignalingState::Stable | SignalingState::HaveLocalOffer)
            }
            NegotiationState::MakingOffer => false,
        };

        if !can_offer {
            tracing::debug!(
                "Queueing {:?} for {} ({:?}, {:?})",
                offer,
                peer.id,
                peer.negotiation,
                signaling
            );
            peer.queue_offer(offer);
            return Ok(false);
        }

        if offer == QueuedOffer::Renegotiate {
            let senders = sender_kinds(peer).await;
            if peer.offered_senders.as_ref() == Some(&senders) {
                tracing::debug!("Senders to {} unchanged since our last offer", peer.id);
                return Ok(false);
            }
        }

        self.make_offer(peer, offer == QueuedOffer::IceRestart, sink).await?;
        Ok(true)
    }

    async fn make_offer(&self, peer: &mut Peer, ice_restart: bool, sink: &dyn SignalSink) -> Result<(), NegotiationError> {
        let superseded = matches!(
            peer.negotiation,
            NegotiationState::AwaitingAnswer | NegotiationState::IgnoringOffer
        );
        peer.negotiation = NegotiationState::MakingOffer;
        let senders = sender_kinds(peer).await;

        let result = async {
            let offer = peer.connection.create_offer(ice_restart).await?;
            peer.connection.set_local_description(offer.clone()).await?;
            self.send(sink, peer.id, Signal::Offer(offer))
        }
        .await;

        match result {
            Ok(()) => {
                peer.negotiation = NegotiationState::AwaitingAnswer;
                peer.offered_senders = Some(senders);
                // This offer carries every change queued so far
                if ice_restart || peer.queued_offer == Some(QueuedOffer::Renegotiate) {
                    peer.queued_offer = None;
                }
                if ice_restart {
                    peer.pending_candidates.clear();
                }
                tracing::info!(
                    "Sent {}offer to {}{}",
                    if ice_restart { "ICE restart " } else { "" },
                    peer.id,
                    if superseded { ", superseding the unanswered one" } else { "" }
                );
                Ok(())
            }
            Err(e) => {
                // An applied but unsent offer is replaced by the next one
                peer.negotiation = NegotiationState::Idle;
                Err(e)
            }
        }
    }

    /// Perform an offer queued behind the exchange that just completed
    async fn after_stable(&self, peer: &mut Peer, sink: &dyn SignalSink) -> Result<(), NegotiationError> {
        if peer.connection.signaling_state() != SignalingState::Stable {
            return Ok(());
        }
        match peer.queued_offer.take() {
            Some(offer) => {
                tracing::debug!("Performing queued {:?} for {}", offer, peer.id);
                self.request_offer(peer, offer, sink).await.map(|_| ())
            }
            None => Ok(()),
        }
    }

    pub async fn on_offer(
        &self,
        peer: &mut Peer,
        offer: SessionDescription,
        sink: &dyn SignalSink,
    ) -> Result<OfferOutcome, NegotiationError> {
        let offer_outstanding = matches!(
            peer.negotiation,
            NegotiationState::MakingOffer | NegotiationState::AwaitingAnswer | NegotiationState::IgnoringOffer
        );

        if offer_outstanding && !peer.polite {
            peer.negotiation = NegotiationState::IgnoringOffer;
            tracing::info!("Ignoring colliding offer from {}", peer.id);
            return Ok(OfferOutcome::Ignored);
        }

        let signaling = peer.connection.signaling_state();
        if signaling != SignalingState::Stable {
            tracing::info!(
                "Offer from {} collides with our {:?}, answering on a fresh connection",
                peer.id,
                signaling
            );
            return Ok(OfferOutcome::NeedsFreshConnection);
        }

        peer.negotiation = NegotiationState::Idle;
        peer.connection.set_remote_description(offer).await?;
        self.flush_candidates(peer).await;

        let answer = peer.connection.create_answer().await?;
        peer.connection.set_local_description(answer.clone()).await?;
        self.send(sink, peer.id, Signal::Answer(answer))?;
        tracing::info!("Sent answer to {}", peer.id);

        self.after_stable(peer, sink).await?;
        Ok(OfferOutcome::Answered)
    }

    pub async fn on_answer(
        &self,
        peer: &mut Peer,
        answer: SessionDescription,
        sink: &dyn SignalSink,
    ) -> Result<(), NegotiationError> {
        let awaiting = matches!(
            peer.negotiation,
            NegotiationState::AwaitingAnswer | NegotiationState::IgnoringOffer
        );
        if !awaiting || peer.connection.signaling_state() != SignalingState::HaveLocalOffer {
            tracing::debug!(
                "Dropping answer from {}: no offer outstanding ({:?}, {:?})",
                peer.id,
                peer.negotiation,
                peer.connection.signaling_state()
            );
            return Ok(());
        }

        let applied = peer.connection.set_remote_description(answer).await;
        peer.negotiation = NegotiationState::Idle;
        applied?;
        tracing::debug!("Applied answer from {}", peer.id);

        self.flush_candidates(peer).await;
        self.after_stable(peer, sink).await
    }

    pub async fn on_candidate(&self, peer: &mut Peer, candidate: IceCandidate) -> Result<(), NegotiationError> {
        if !peer.connection.has_remote_description().await {
            if peer.pending_candidates.len() >= MAX_PENDING_CANDIDATES {
                tracing::warn!(
                    "Dropping ICE candidate from {}: {} already waiting for its description",
                    peer.id,
                    MAX_PENDING_CANDIDATES
                );
                return Ok(());
            }
            tracing::debug!("Queueing ICE candidate from {} until its description arrives", peer.id);
            peer.pending_candidates.push(candidate);
            return Ok(());
        }

        match peer.connection.add_ice_candidate(candidate).await {
            Ok(()) => Ok(()),
            Err(e) if peer.negotiation == NegotiationState::IgnoringOffer => {
                tracing::debug!("Dropped candidate for ignored offer from {}: {}", peer.id, e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn flush_candidates(&self, peer: &mut Peer) {
        let pending = std::mem::take(&mut peer.pending_candidates);
        if pending.is_empty() {
            return;
        }
        tracing::debug!("Applying {} queued ICE candidates from {}", pending.len(), peer.id);
        for candidate in pending {
            if let Err(e) = peer.connection.add_ice_candidate(candidate).await {
                tracing::warn!("Failed to add queued ICE candidate from {}: {}", peer.id, e);
            }
        }
    }

    pub fn send_candidate(
        &self,
        peer_id: Uuid,
        candidate: IceCandidate,
        sink: &dyn SignalSink,
    ) -> Result<(), NegotiationError> {
        self.send(sink, peer_id, Signal::IceCandidate(candidate))
    }
}

async fn sender_kinds(peer: &Peer) -> Vec<MediaKind> {
    let mut kinds = Vec::with_capacity(2);
    for kind in [MediaKind::Audio, MediaKind::Video] {
        if peer.connection.has_sender(kind).await {
            kinds.push(kind);
        }
    }
    kinds
}

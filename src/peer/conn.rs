//! Driver of a single peer connection.

use std::sync::Arc;

use derive_more::{Display, From};
use failure::Fail;
use futures::channel::mpsc;

use crate::{
    conf::{IceServer, Retry},
    log::prelude::*,
    media::{MediaTrack, RemoteStream},
    platform::{Sdp, TransportError, TransportEvent, TransportFactory},
    proto::{IceCandidate, ParticipantId, SafeKey},
    relay::RelayError,
    signalling::{Role, SignalingChannel},
};

use super::{FailureOutcome, PeerPhase, PeerStateMachine};

/// Error of driving a peer connection.
///
/// Contained within the failing peer's state machine: it never aborts
/// sibling peers or the overall session.
#[derive(Debug, Display, Fail, From)]
pub enum ConnError {
    /// Native transport operation failed.
    #[display(fmt = "transport error: {}", _0)]
    Transport(TransportError),

    /// Signal could not be published to the relay.
    #[display(fmt = "signaling unavailable: {}", _0)]
    Signaling(RelayError),
}

/// Owner and driver of one [`PeerStateMachine`].
///
/// Performs the asynchronous effects around the machine's transitions:
/// building the native transport, attaching local tracks, exchanging
/// descriptions and applying candidates. One manager exists per remote
/// participant; a manager never touches another peer's state.
pub struct ConnectionManager {
    machine: PeerStateMachine,

    /// Sender of native transport events, injected into every transport
    /// this manager creates (one channel spans all retry attempts).
    events_tx: mpsc::UnboundedSender<TransportEvent>,

    /// Subscription generation this manager belongs to, used by the room
    /// to drop events of subscriptions that outlived their peer entry.
    generation: u64,
}

impl ConnectionManager {
    /// Creates a new manager with an [`PeerPhase::Idle`] machine.
    pub fn new(
        remote_id: ParticipantId,
        remote_key: SafeKey,
        role: Role,
        events_tx: mpsc::UnboundedSender<TransportEvent>,
        generation: u64,
    ) -> Self {
        Self {
            machine: PeerStateMachine::new(remote_id, remote_key, role),
            events_tx,
            generation,
        }
    }

    /// Returns raw ID of the remote participant.
    #[inline]
    pub fn remote_id(&self) -> &ParticipantId {
        self.machine.remote_id()
    }

    /// Returns relay-safe key of the remote participant.
    #[inline]
    pub fn remote_key(&self) -> &SafeKey {
        self.machine.remote_key()
    }

    /// Returns current [`PeerPhase`] of the machine.
    #[inline]
    pub fn phase(&self) -> PeerPhase {
        self.machine.phase()
    }

    /// Returns the number of consecutive failures observed so far.
    #[inline]
    pub fn retry_count(&self) -> u32 {
        self.machine.retry_count()
    }

    /// Returns the remote media stream, if one has been received.
    #[inline]
    pub fn remote_stream(&self) -> Option<&Arc<dyn RemoteStream>> {
        self.machine.remote_stream()
    }

    /// Returns subscription generation of this manager.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Builds the native transport and runs the role-specific start of
    /// negotiation: the initiator publishes an offer, the responder arms
    /// itself for the inbound one.
    ///
    /// Valid from `Idle` (first attempt) and `Retrying` (reconnection);
    /// a reconnection re-enters `Creating` with the failure counter
    /// already incremented and the old native handle discarded.
    pub async fn begin(
        &mut self,
        factory: &Arc<dyn TransportFactory>,
        ice_servers: &[IceServer],
        local_tracks: &[Arc<dyn MediaTrack>],
        signaling: &SignalingChannel,
    ) -> Result<(), ConnError> {
        let transport = factory.create(
            self.machine.remote_id(),
            ice_servers,
            self.events_tx.clone(),
        )?;
        for track in local_tracks {
            transport.add_track(Arc::clone(track));
        }

        let buffered = match self.machine.begin_creating(Arc::clone(&transport))
        {
            Some(buffered) => buffered,
            None => {
                // whoever scheduled us lost the race against teardown
                transport.close();
                return Ok(());
            }
        };
        // flush candidates that arrived before the transport existed
        for candidate in buffered {
            transport.add_ice_candidate(&candidate).await?;
        }

        match self.machine.role() {
            Role::Initiator => {
                let sdp = transport.create_and_set_offer().await?;
                signaling.send_offer(self.machine.remote_key(), sdp).await?;
                self.machine.mark_offer_sent();
                info!(
                    "Sent offer [peer = {}, attempt = {}]",
                    self.machine.remote_id(),
                    self.machine.retry_count(),
                );
            }
            Role::Responder => {
                self.machine.mark_awaiting_offer();
                if let Some(offer) = self.machine.take_pending_offer() {
                    self.handle_offer(offer, signaling).await?;
                }
            }
        }
        Ok(())
    }

    /// Processes an inbound offer: applies it as the remote description,
    /// generates an answer and publishes it.
    ///
    /// An offer arriving mid-retry is kept and replayed once the machine
    /// re-enters `AwaitingOffer`; in any other phase it is dropped.
    pub async fn handle_offer(
        &mut self,
        sdp: String,
        signaling: &SignalingChannel,
    ) -> Result<(), ConnError> {
        match self.machine.phase() {
            PeerPhase::AwaitingOffer => {}
            // A superseding offer while negotiated or mid-retry means the
            // initiator restarted; keep it for the next attempt.
            PeerPhase::Creating
            | PeerPhase::Retrying
            | PeerPhase::Failed
            | PeerPhase::AnswerExchanged
            | PeerPhase::Connected => {
                self.machine.store_pending_offer(sdp);
                return Ok(());
            }
            phase => {
                debug!(
                    "Ignoring offer [peer = {}, phase = {}]",
                    self.machine.remote_id(),
                    phase,
                );
                return Ok(());
            }
        }
        let transport = match self.machine.transport() {
            Some(t) => Arc::clone(t),
            None => return Ok(()),
        };
        transport.set_remote_description(Sdp::Offer(sdp)).await?;
        let answer = transport.create_and_set_answer().await?;
        signaling
            .send_answer(self.machine.remote_key(), answer)
            .await?;
        self.machine.mark_answer_exchanged();
        info!("Sent answer [peer = {}]", self.machine.remote_id());
        Ok(())
    }

    /// Processes the inbound answer matching a previously sent offer.
    pub async fn handle_answer(&mut self, sdp: String) -> Result<(), ConnError> {
        if self.machine.phase() != PeerPhase::OfferSent {
            debug!(
                "Ignoring answer [peer = {}, phase = {}]",
                self.machine.remote_id(),
                self.machine.phase(),
            );
            return Ok(());
        }
        let transport = match self.machine.transport() {
            Some(t) => Arc::clone(t),
            None => return Ok(()),
        };
        transport.set_remote_description(Sdp::Answer(sdp)).await?;
        self.machine.mark_answer_exchanged();
        Ok(())
    }

    /// Applies a remote candidate to the native connection, or buffers it
    /// until one exists.
    pub async fn apply_candidate(
        &mut self,
        candidate: IceCandidate,
    ) -> Result<(), ConnError> {
        if self.machine.phase() == PeerPhase::Closed {
            return Ok(());
        }
        match self.machine.transport() {
            Some(transport) => {
                let transport = Arc::clone(transport);
                transport.add_ice_candidate(&candidate).await?;
            }
            None => self.machine.buffer_candidate(candidate),
        }
        Ok(())
    }

    /// Records that the native layer reported an established media path.
    pub fn on_connected(&mut self) {
        if self.machine.mark_connected() {
            info!(
                "Peer connected [peer = {}, retries = {}]",
                self.machine.remote_id(),
                self.machine.retry_count(),
            );
        }
    }

    /// Remembers the remote media stream reported by the native layer.
    pub fn on_remote_stream(&mut self, stream: Arc<dyn RemoteStream>) {
        self.machine.set_remote_stream(stream);
    }

    /// Records a reported transport failure, discarding the native handle.
    ///
    /// Returns whether a reconnection attempt should be scheduled after
    /// `retry.delay`, or the machine closed terminally.
    pub fn on_failure(&mut self, retry: &Retry) -> FailureOutcome {
        let outcome = self.machine.mark_failed(retry.max_retries);
        match outcome {
            FailureOutcome::WillRetry => warn!(
                "Peer transport failed [peer = {}, failures = {}], \
                 retrying in {:?}",
                self.machine.remote_id(),
                self.machine.retry_count(),
                retry.delay,
            ),
            FailureOutcome::Terminal => warn!(
                "Peer transport failed terminally [peer = {}, failures = {}]",
                self.machine.remote_id(),
                self.machine.retry_count(),
            ),
            FailureOutcome::Ignored => {}
        }
        outcome
    }

    /// Synchronously closes this connection, releasing the native handle
    /// and the remote stream reference.
    pub fn close(&mut self) {
        self.machine.close();
    }
}

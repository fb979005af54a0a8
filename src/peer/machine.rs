//! Per-peer connection state machine.
//!
//! One [`PeerStateMachine`] exists per remote participant at any time. It
//! is exclusively owned by its [`ConnectionManager`] and driven through
//! explicit, total transitions: invalid transitions are ignored and
//! reported to the caller instead of panicking, so every event source can
//! be fed into the machine unconditionally.
//!
//! [`ConnectionManager`]: crate::peer::ConnectionManager

use std::{sync::Arc, time::Instant};

use derive_more::Display;

use crate::{
    media::RemoteStream,
    platform::PeerTransport,
    proto::{IceCandidate, ParticipantId, SafeKey},
    signalling::Role,
};

/// Phase of a peer connection's lifecycle.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum PeerPhase {
    /// Peer is known, no connection attempt has started yet.
    Idle,

    /// Native connection is being built and local tracks attached.
    Creating,

    /// Initiator has published its offer and awaits the answer.
    OfferSent,

    /// Responder awaits the initiator's offer.
    AwaitingOffer,

    /// Both descriptions are applied; media path is negotiating.
    AnswerExchanged,

    /// Native layer reported an established media path.
    Connected,

    /// Native layer reported a broken transport.
    Failed,

    /// A reconnection attempt is scheduled.
    Retrying,

    /// Terminal: closed gracefully or after exhausting retries.
    Closed,
}

/// Outcome of reporting a transport failure to the machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailureOutcome {
    /// A reconnection attempt should be scheduled after the configured
    /// delay.
    WillRetry,

    /// Retries are exhausted; the machine is closed terminally.
    Terminal,

    /// The failure arrived in a phase where it carries no meaning and was
    /// ignored.
    Ignored,
}

/// Mutable context accompanying a peer connection through all its phases.
pub struct PeerContext {
    /// Raw ID of the remote participant.
    remote_id: ParticipantId,

    /// Relay-safe key of the remote participant.
    remote_key: SafeKey,

    /// Local side's role for this pair, fixed by initiator election.
    role: Role,

    /// Number of consecutive transport failures observed.
    retry_count: u32,

    /// Instant at which the last reconnection attempt started.
    last_retry_at: Option<Instant>,

    /// Handle to the native connection, once created.
    transport: Option<Arc<dyn PeerTransport>>,

    /// Remote media stream, once received.
    remote_stream: Option<Arc<dyn RemoteStream>>,

    /// Candidates received before the native connection existed.
    buffered_candidates: Vec<IceCandidate>,

    /// Offer received while the machine could not process it (mid-retry),
    /// kept until the next transition into [`PeerPhase::AwaitingOffer`].
    pending_offer: Option<String>,
}

/// State machine of a single peer connection.
pub struct PeerStateMachine {
    phase: PeerPhase,
    context: PeerContext,
}

impl PeerStateMachine {
    /// Creates a new machine in [`PeerPhase::Idle`].
    pub fn new(
        remote_id: ParticipantId,
        remote_key: SafeKey,
        role: Role,
    ) -> Self {
        Self {
            phase: PeerPhase::Idle,
            context: PeerContext {
                remote_id,
                remote_key,
                role,
                retry_count: 0,
                last_retry_at: None,
                transport: None,
                remote_stream: None,
                buffered_candidates: Vec::new(),
                pending_offer: None,
            },
        }
    }

    /// Returns the current [`PeerPhase`].
    #[inline]
    pub fn phase(&self) -> PeerPhase {
        self.phase
    }

    /// Returns raw ID of the remote participant.
    #[inline]
    pub fn remote_id(&self) -> &ParticipantId {
        &self.context.remote_id
    }

    /// Returns relay-safe key of the remote participant.
    #[inline]
    pub fn remote_key(&self) -> &SafeKey {
        &self.context.remote_key
    }

    /// Returns the local side's [`Role`] for this pair.
    #[inline]
    pub fn role(&self) -> Role {
        self.context.role
    }

    /// Returns the number of consecutive failures observed so far.
    #[inline]
    pub fn retry_count(&self) -> u32 {
        self.context.retry_count
    }

    /// Returns the instant the last reconnection attempt started at.
    #[inline]
    pub fn last_retry_at(&self) -> Option<Instant> {
        self.context.last_retry_at
    }

    /// Returns the native transport handle, if one exists.
    #[inline]
    pub fn transport(&self) -> Option<&Arc<dyn PeerTransport>> {
        self.context.transport.as_ref()
    }

    /// Returns the remote media stream, if one has been received.
    #[inline]
    pub fn remote_stream(&self) -> Option<&Arc<dyn RemoteStream>> {
        self.context.remote_stream.as_ref()
    }

    /// `Idle`/`Retrying` → `Creating`: adopts the freshly built native
    /// `transport` and returns all candidates buffered while no transport
    /// existed, for immediate application.
    ///
    /// Returns [`None`] without effect in any other phase.
    pub fn begin_creating(
        &mut self,
        transport: Arc<dyn PeerTransport>,
    ) -> Option<Vec<IceCandidate>> {
        match self.phase {
            PeerPhase::Idle => {}
            PeerPhase::Retrying => {
                self.context.last_retry_at = Some(Instant::now());
            }
            _ => return None,
        }
        self.phase = PeerPhase::Creating;
        self.context.transport = Some(transport);
        Some(self.context.buffered_candidates.drain(..).collect())
    }

    /// `Creating` → `OfferSent` (initiator side).
    pub fn mark_offer_sent(&mut self) -> bool {
        self.advance(PeerPhase::Creating, PeerPhase::OfferSent)
    }

    /// `Creating` → `AwaitingOffer` (responder side).
    pub fn mark_awaiting_offer(&mut self) -> bool {
        self.advance(PeerPhase::Creating, PeerPhase::AwaitingOffer)
    }

    /// `OfferSent`/`AwaitingOffer` → `AnswerExchanged`.
    pub fn mark_answer_exchanged(&mut self) -> bool {
        match self.phase {
            PeerPhase::OfferSent | PeerPhase::AwaitingOffer => {
                self.phase = PeerPhase::AnswerExchanged;
                true
            }
            _ => false,
        }
    }

    /// Any negotiating phase → `Connected`, as reported (never asserted)
    /// by the native layer.
    pub fn mark_connected(&mut self) -> bool {
        match self.phase {
            PeerPhase::OfferSent
            | PeerPhase::AwaitingOffer
            | PeerPhase::AnswerExchanged => {
                self.phase = PeerPhase::Connected;
                true
            }
            _ => false,
        }
    }

    /// Reports a transport failure.
    ///
    /// From any active phase this discards the native handle and the
    /// remote stream, increments the failure counter and either parks the
    /// machine in [`PeerPhase::Retrying`] (counter below `max_retries`) or
    /// closes it terminally.
    pub fn mark_failed(&mut self, max_retries: u32) -> FailureOutcome {
        match self.phase {
            // Idle/Retrying failures cover a factory that errored before
            // any native handle existed.
            PeerPhase::Idle
            | PeerPhase::Creating
            | PeerPhase::OfferSent
            | PeerPhase::AwaitingOffer
            | PeerPhase::AnswerExchanged
            | PeerPhase::Connected
            | PeerPhase::Retrying => {}
            PeerPhase::Failed | PeerPhase::Closed => {
                return FailureOutcome::Ignored;
            }
        }
        self.phase = PeerPhase::Failed;
        self.context.retry_count += 1;
        self.release_transport();
        if self.context.retry_count < max_retries {
            self.phase = PeerPhase::Retrying;
            FailureOutcome::WillRetry
        } else {
            self.phase = PeerPhase::Closed;
            FailureOutcome::Terminal
        }
    }

    /// Stores a candidate that arrived before the native connection
    /// existed, to be flushed by the next [`PeerStateMachine::begin_creating()`].
    pub fn buffer_candidate(&mut self, candidate: IceCandidate) {
        self.context.buffered_candidates.push(candidate);
    }

    /// Stores an offer that cannot be processed in the current phase.
    pub fn store_pending_offer(&mut self, sdp: String) {
        self.context.pending_offer = Some(sdp);
    }

    /// Takes the pending offer, if any.
    pub fn take_pending_offer(&mut self) -> Option<String> {
        self.context.pending_offer.take()
    }

    /// Remembers the received remote media stream.
    pub fn set_remote_stream(&mut self, stream: Arc<dyn RemoteStream>) {
        self.context.remote_stream = Some(stream);
    }

    /// Any phase → `Closed`: synchronously releases the native handle and
    /// the remote stream reference.
    ///
    /// Returns only after resources are released, so a subsequent
    /// `Creating` for the same peer cannot race the old handle.
    pub fn close(&mut self) {
        self.release_transport();
        self.context.buffered_candidates.clear();
        self.context.pending_offer = None;
        self.phase = PeerPhase::Closed;
    }

    fn advance(&mut self, from: PeerPhase, to: PeerPhase) -> bool {
        if self.phase == from {
            self.phase = to;
            true
        } else {
            false
        }
    }

    fn release_transport(&mut self) {
        if let Some(transport) = self.context.transport.take() {
            transport.close();
        }
        self.context.remote_stream = None;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;

    use crate::platform::{Sdp, TransportError};

    use super::*;

    #[derive(Default)]
    struct StubTransport {
        closed: AtomicBool,
    }

    #[async_trait]
    impl PeerTransport for StubTransport {
        fn add_track(&self, _: Arc<dyn crate::media::MediaTrack>) {}

        async fn create_and_set_offer(
            &self,
        ) -> Result<String, TransportError> {
            Ok("offer".into())
        }

        async fn create_and_set_answer(
            &self,
        ) -> Result<String, TransportError> {
            Ok("answer".into())
        }

        async fn set_remote_description(
            &self,
            _: Sdp,
        ) -> Result<(), TransportError> {
            Ok(())
        }

        async fn add_ice_candidate(
            &self,
            _: &IceCandidate,
        ) -> Result<(), TransportError> {
            Ok(())
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn machine(role: Role) -> PeerStateMachine {
        let id = ParticipantId::from("bob");
        let key = SafeKey::from(&id);
        PeerStateMachine::new(id, key, role)
    }

    fn transport() -> Arc<StubTransport> {
        Arc::new(StubTransport::default())
    }

    #[test]
    fn initiator_happy_path() {
        let mut m = machine(Role::Initiator);
        assert_eq!(m.phase(), PeerPhase::Idle);

        assert!(m.begin_creating(transport()).is_some());
        assert!(m.mark_offer_sent());
        assert!(m.mark_answer_exchanged());
        assert!(m.mark_connected());
        assert_eq!(m.phase(), PeerPhase::Connected);
        assert_eq!(m.retry_count(), 0);
    }

    #[test]
    fn responder_happy_path() {
        let mut m = machine(Role::Responder);

        assert!(m.begin_creating(transport()).is_some());
        assert!(m.mark_awaiting_offer());
        assert!(m.mark_answer_exchanged());
        assert!(m.mark_connected());
        assert_eq!(m.phase(), PeerPhase::Connected);
    }

    #[test]
    fn invalid_transitions_are_ignored() {
        let mut m = machine(Role::Initiator);

        assert!(!m.mark_offer_sent());
        assert!(!m.mark_answer_exchanged());
        assert!(!m.mark_connected());
        assert_eq!(m.phase(), PeerPhase::Idle);

        m.close();
        assert_eq!(m.mark_failed(3), FailureOutcome::Ignored);
        assert_eq!(m.phase(), PeerPhase::Closed);
    }

    #[test]
    fn failure_before_transport_exists_still_counts() {
        let mut m = machine(Role::Initiator);

        assert_eq!(m.mark_failed(3), FailureOutcome::WillRetry);
        assert_eq!(m.phase(), PeerPhase::Retrying);
        assert_eq!(m.retry_count(), 1);
    }

    #[test]
    fn failure_below_cap_schedules_retry_and_discards_transport() {
        let mut m = machine(Role::Initiator);
        let t = transport();
        m.begin_creating(t.clone());
        m.mark_offer_sent();
        m.mark_answer_exchanged();
        m.mark_connected();

        assert_eq!(m.mark_failed(3), FailureOutcome::WillRetry);
        assert_eq!(m.phase(), PeerPhase::Retrying);
        assert_eq!(m.retry_count(), 1);
        assert!(t.closed.load(Ordering::SeqCst));
        assert!(m.transport().is_none());
    }

    #[test]
    fn exactly_max_retries_failures_reach_terminal_state() {
        let mut m = machine(Role::Initiator);

        for failure in 1..=3 {
            assert!(m.begin_creating(transport()).is_some());
            m.mark_offer_sent();
            let outcome = m.mark_failed(3);
            if failure < 3 {
                assert_eq!(outcome, FailureOutcome::WillRetry);
                assert_eq!(m.phase(), PeerPhase::Retrying);
            } else {
                assert_eq!(outcome, FailureOutcome::Terminal);
                assert_eq!(m.phase(), PeerPhase::Closed);
            }
        }
        assert_eq!(m.retry_count(), 3);

        // terminal state accepts no further transitions
        assert!(m.begin_creating(transport()).is_none());
        assert_eq!(m.mark_failed(3), FailureOutcome::Ignored);
    }

    #[test]
    fn retry_restart_records_attempt_instant() {
        let mut m = machine(Role::Initiator);
        m.begin_creating(transport());
        m.mark_offer_sent();
        m.mark_failed(3);
        assert!(m.last_retry_at().is_none());

        m.begin_creating(transport());
        assert!(m.last_retry_at().is_some());
        assert_eq!(m.phase(), PeerPhase::Creating);
    }

    #[test]
    fn candidates_buffered_before_transport_are_flushed_once() {
        let mut m = machine(Role::Responder);
        let candidate = IceCandidate {
            candidate: "candidate:0".into(),
            sdp_m_line_index: Some(0),
            sdp_mid: None,
        };
        m.buffer_candidate(candidate.clone());

        let flushed = m.begin_creating(transport()).unwrap();
        assert_eq!(flushed, vec![candidate]);

        m.mark_awaiting_offer();
        m.mark_failed(3);
        let flushed = m.begin_creating(transport()).unwrap();
        assert!(flushed.is_empty());
    }

    #[test]
    fn close_is_terminal_and_releases_resources() {
        let mut m = machine(Role::Initiator);
        let t = transport();
        m.begin_creating(t.clone());
        m.mark_offer_sent();

        m.close();

        assert_eq!(m.phase(), PeerPhase::Closed);
        assert!(t.closed.load(Ordering::SeqCst));
        assert!(m.transport().is_none());
        assert!(m.begin_creating(transport()).is_none());
    }
}

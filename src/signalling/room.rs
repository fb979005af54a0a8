//! Room lifecycle coordination.
//!
//! A [`Room`] is the single logical owner of everything bound to one room
//! ID: the presence registry, the signaling channel and every per-peer
//! connection manager. It drives all state transitions from one serial
//! event loop, so per-peer machines never race each other, and performs a
//! full teardown (media, connections, presence, subscriptions) before the
//! loop exits or a new room is wired up.

use std::{collections::HashMap, sync::Arc};

use derive_more::{Display, From};
use failure::Fail;
use futures::{
    channel::{mpsc, oneshot},
    future::BoxFuture,
    select,
    stream::{BoxStream, FuturesUnordered, SelectAll},
    FutureExt as _, StreamExt as _,
};
use tokio::sync::watch;

use crate::{
    conf::Conf,
    log::prelude::*,
    media::{
        MediaConstraints, MediaManager, MediaManagerError, RemoteStream,
    },
    peer::{
        ConnError, ConnectionManager, FailureOutcome, PeerPhase,
        PeerRepository,
    },
    platform::{
        MediaDevices, TransportEvent, TransportFactory, TransportState,
    },
    proto::{Participant, ParticipantId, RoomId, SafeKey, Signal},
    relay::RelayChannel,
};

use super::{elect, PresenceService, SignalingChannel};

/// Error of a [`RoomHandle`] operation.
#[derive(Debug, Display, Fail, From)]
pub enum RoomError {
    /// Local media could not be acquired; the room stays in its pre-start
    /// state.
    #[display(fmt = "{}", _0)]
    Media(MediaManagerError),

    /// The [`Room`] behind this handle is gone.
    #[display(fmt = "room is in detached state")]
    #[from(ignore)]
    Detached,

    /// Operation requires an active voice session.
    #[display(fmt = "voice is not active")]
    #[from(ignore)]
    VoiceNotActive,
}

/// Observable state of a single peer connection.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PeerInfo {
    /// Current lifecycle phase of the connection.
    pub phase: PeerPhase,

    /// Number of consecutive transport failures observed.
    pub retry_count: u32,
}

/// Observable state of a [`Room`], published after every handled event.
#[derive(Clone, Debug, Default)]
pub struct RoomSnapshot {
    /// Indicator whether the local voice session is active.
    pub is_voice_active: bool,

    /// Indicator whether local audio is muted.
    pub is_muted: bool,

    /// Indicator whether a relay operation has failed since the session
    /// started. Connections to peers may be impossible while degraded,
    /// but the local media session keeps working.
    pub is_signaling_degraded: bool,

    /// Remote participants currently present in the room, ordered by ID.
    pub participants: Vec<Participant>,

    /// Per-peer connection state, keyed by raw participant ID.
    pub peers: HashMap<ParticipantId, PeerInfo>,

    /// Remote media streams of connected peers.
    pub remote_streams: HashMap<ParticipantId, Arc<dyn RemoteStream>>,
}

/// Operation requested through a [`RoomHandle`].
enum Command {
    StartVoice {
        constraints: MediaConstraints,
        done: oneshot::Sender<Result<(), RoomError>>,
    },
    StopVoice {
        done: oneshot::Sender<()>,
    },
    ToggleMute {
        done: oneshot::Sender<Result<bool, RoomError>>,
    },
    ToggleVideo {
        done: oneshot::Sender<Result<bool, RoomError>>,
    },
    Close {
        done: oneshot::Sender<()>,
    },
}

/// Event delivered into the room's serial loop.
///
/// Every event carries the teardown `epoch` it was subscribed under;
/// events of a bygone epoch are discarded, so in-flight subscriptions and
/// timers cannot resurrect state after teardown began. Per-peer events
/// additionally carry the subscription `generation` of their peer entry,
/// so a removed-and-rediscovered peer never consumes its predecessor's
/// events.
enum RoomEvent {
    Presence {
        epoch: u64,
        roster: HashMap<SafeKey, Participant>,
    },
    Signal {
        epoch: u64,
        generation: u64,
        from: SafeKey,
        signal: Signal,
    },
    Transport {
        epoch: u64,
        generation: u64,
        from: SafeKey,
        event: TransportEvent,
    },
    RetryTimer {
        epoch: u64,
        generation: u64,
        peer: SafeKey,
    },
}

impl RoomEvent {
    fn epoch(&self) -> u64 {
        match self {
            Self::Presence { epoch, .. }
            | Self::Signal { epoch, .. }
            | Self::Transport { epoch, .. }
            | Self::RetryTimer { epoch, .. } => *epoch,
        }
    }
}

/// Handle to a running [`Room`].
///
/// Cheap to clone; all operations are serialized through the room's event
/// loop. Once the room is gone every operation fails with
/// [`RoomError::Detached`].
#[derive(Clone)]
pub struct RoomHandle {
    commands: mpsc::UnboundedSender<Command>,
    snapshot_rx: watch::Receiver<RoomSnapshot>,
}

impl RoomHandle {
    /// Starts an audio-only session: acquires the local capture device,
    /// publishes presence and begins connecting to discovered peers.
    ///
    /// On [`RoomError::Media`] nothing is started and the room stays in
    /// its pre-start state.
    pub async fn start_voice(&self) -> Result<(), RoomError> {
        self.request(|done| Command::StartVoice {
            constraints: MediaConstraints::voice(),
            done,
        })
        .await?
    }

    /// Same as [`RoomHandle::start_voice()`], but acquires a video track
    /// alongside audio.
    pub async fn start_video(&self) -> Result<(), RoomError> {
        self.request(|done| Command::StartVoice {
            constraints: MediaConstraints::video(),
            done,
        })
        .await?
    }

    /// Stops the session: closes every peer connection, removes presence
    /// and releases the capture device. No-op if nothing is active.
    pub async fn stop_voice(&self) -> Result<(), RoomError> {
        self.request(|done| Command::StopVoice { done }).await
    }

    /// Flips local audio mute, returning the new muted state.
    ///
    /// Only toggles track enablement and republishes presence; no
    /// signaling round happens for existing connections.
    pub async fn toggle_mute(&self) -> Result<bool, RoomError> {
        self.request(|done| Command::ToggleMute { done }).await?
    }

    /// Flips local video enablement, returning the new enabled state.
    pub async fn toggle_video(&self) -> Result<bool, RoomError> {
        self.request(|done| Command::ToggleVideo { done }).await?
    }

    /// Tears the room down completely and stops its event loop.
    pub async fn close(&self) -> Result<(), RoomError> {
        self.request(|done| Command::Close { done }).await
    }

    /// Returns the latest published [`RoomSnapshot`].
    pub fn snapshot(&self) -> RoomSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Waits until a new [`RoomSnapshot`] is published.
    pub async fn changed(&mut self) -> Result<(), RoomError> {
        self.snapshot_rx
            .changed()
            .await
            .map_err(|_| RoomError::Detached)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, RoomError> {
        let (done, rx) = oneshot::channel();
        self.commands
            .unbounded_send(make(done))
            .map_err(|_| RoomError::Detached)?;
        rx.await.map_err(|_| RoomError::Detached)
    }
}

/// Top-level coordinator of one room's media mesh.
pub struct Room {
    id: RoomId,
    local: Participant,
    conf: Conf,
    factory: Arc<dyn TransportFactory>,
    media: MediaManager,
    presence: PresenceService,
    signaling: SignalingChannel,
    peers: PeerRepository,

    /// Last observed remote roster.
    roster: HashMap<SafeKey, Participant>,

    voice_active: bool,
    degraded: bool,

    /// Teardown epoch; bumped on every teardown to invalidate in-flight
    /// events and timers.
    epoch: u64,

    /// Source of per-peer subscription generations.
    next_generation: u64,

    commands: mpsc::UnboundedReceiver<Command>,
    events: SelectAll<BoxStream<'static, RoomEvent>>,
    timers: FuturesUnordered<BoxFuture<'static, RoomEvent>>,
    snapshot_tx: watch::Sender<RoomSnapshot>,
}

impl Room {
    /// Creates a new [`Room`] bound to the provided room ID together with
    /// its [`RoomHandle`].
    ///
    /// The returned [`Room`] must be driven via [`Room::run()`] (usually
    /// on a spawned task) for the handle to make progress.
    pub fn new(
        id: RoomId,
        local: Participant,
        relay: Arc<dyn RelayChannel>,
        devices: Arc<dyn MediaDevices>,
        factory: Arc<dyn TransportFactory>,
        conf: Conf,
    ) -> (Self, RoomHandle) {
        let local_key = local.safe_key();
        let (cmd_tx, cmd_rx) = mpsc::unbounded();
        let (snapshot_tx, snapshot_rx) =
            watch::channel(RoomSnapshot::default());
        let presence = PresenceService::new(
            Arc::clone(&relay),
            id.clone(),
            local.clone(),
        );
        let signaling =
            SignalingChannel::new(relay, id.clone(), local_key);
        let room = Self {
            id,
            local,
            conf,
            factory,
            media: MediaManager::new(devices),
            presence,
            signaling,
            peers: PeerRepository::new(),
            roster: HashMap::new(),
            voice_active: false,
            degraded: false,
            epoch: 0,
            next_generation: 0,
            commands: cmd_rx,
            events: SelectAll::new(),
            timers: FuturesUnordered::new(),
            snapshot_tx,
        };
        let handle = RoomHandle {
            commands: cmd_tx,
            snapshot_rx,
        };
        (room, handle)
    }

    /// Runs the room's event loop until the room is closed or every
    /// [`RoomHandle`] is dropped. Tears everything down before returning.
    pub async fn run(mut self) {
        info!("Room started [id = {}, local = {}]", self.id, self.local.id);
        loop {
            enum Turn {
                Command(Option<Command>),
                Event(RoomEvent),
            }
            let turn = select! {
                cmd = self.commands.next() => Turn::Command(cmd),
                ev = self.events.select_next_some() => Turn::Event(ev),
                ev = self.timers.select_next_some() => Turn::Event(ev),
            };
            match turn {
                Turn::Command(Some(Command::Close { done })) => {
                    self.teardown().await;
                    self.publish_snapshot();
                    let _ = done.send(());
                    break;
                }
                Turn::Command(Some(cmd)) => self.handle_command(cmd).await,
                Turn::Command(None) => {
                    self.teardown().await;
                    self.publish_snapshot();
                    break;
                }
                Turn::Event(ev) => self.handle_event(ev).await,
            }
            self.publish_snapshot();
        }
        info!("Room stopped [id = {}]", self.id);
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::StartVoice { constraints, done } => {
                let _ = done.send(self.start_voice(constraints).await);
            }
            Command::StopVoice { done } => {
                self.teardown().await;
                let _ = done.send(());
            }
            Command::ToggleMute { done } => {
                let _ = done.send(self.toggle_mute().await);
            }
            Command::ToggleVideo { done } => {
                let _ = done.send(self.toggle_video());
            }
            // handled in `run()`
            Command::Close { done } => {
                let _ = done.send(());
            }
        }
    }

    async fn handle_event(&mut self, ev: RoomEvent) {
        if ev.epoch() != self.epoch {
            return;
        }
        match ev {
            RoomEvent::Presence { roster, .. } => {
                self.handle_presence(roster).await;
            }
            RoomEvent::Signal {
                generation,
                from,
                signal,
                ..
            } => self.handle_signal(generation, from, signal).await,
            RoomEvent::Transport {
                generation,
                from,
                event,
                ..
            } => self.handle_transport(generation, from, event).await,
            RoomEvent::RetryTimer {
                generation, peer, ..
            } => self.handle_retry(generation, peer).await,
        }
    }

    async fn start_voice(
        &mut self,
        constraints: MediaConstraints,
    ) -> Result<(), RoomError> {
        if self.voice_active {
            return Ok(());
        }
        self.media.start(constraints).await?;
        if let Err(e) = self.presence.publish().await {
            warn!("Failed to publish presence: {}", e);
            self.degraded = true;
        }
        let epoch = self.epoch;
        self.events.push(
            self.presence
                .subscribe()
                .map(move |roster| RoomEvent::Presence { epoch, roster })
                .boxed(),
        );
        self.voice_active = true;
        info!("Voice started [room = {}]", self.id);
        Ok(())
    }

    async fn toggle_mute(&mut self) -> Result<bool, RoomError> {
        if !self.voice_active {
            return Err(RoomError::VoiceNotActive);
        }
        let muted = self.media.toggle_mute();
        if let Err(e) = self.presence.publish_muted(muted).await {
            warn!("Failed to republish presence: {}", e);
            self.degraded = true;
        }
        Ok(muted)
    }

    fn toggle_video(&mut self) -> Result<bool, RoomError> {
        if !self.voice_active {
            return Err(RoomError::VoiceNotActive);
        }
        Ok(self.media.toggle_video())
    }

    /// Diffs the new roster against known peers: departed peers are
    /// closed and removed, newly discovered ones get a connection manager
    /// and a connection attempt.
    async fn handle_presence(
        &mut self,
        roster: HashMap<SafeKey, Participant>,
    ) {
        let departed: Vec<SafeKey> = self
            .peers
            .keys()
            .filter(|k| !roster.contains_key(*k))
            .cloned()
            .collect();
        for key in departed {
            if let Some(mut manager) = self.peers.remove(&key) {
                info!("Peer left [peer = {}]", manager.remote_id());
                manager.close();
            }
            if let Err(e) = self.signaling.clear_authored(&key).await {
                debug!("Failed to clear signals of departed peer: {}", e);
            }
        }

        let arrived: Vec<(SafeKey, Participant)> = roster
            .iter()
            .filter(|(k, _)| !self.peers.contains(k))
            .map(|(k, p)| (k.clone(), p.clone()))
            .collect();
        for (key, participant) in arrived {
            self.spawn_connection(key, participant).await;
        }

        self.roster = roster;
    }

    /// Creates a connection manager for a newly discovered peer, wires
    /// its signal and transport subscriptions into the event loop and
    /// starts negotiation.
    async fn spawn_connection(&mut self, key: SafeKey, remote: Participant) {
        let role = elect(&self.local.id, &remote.id);
        let epoch = self.epoch;
        let generation = self.next_generation;
        self.next_generation += 1;

        let (events_tx, events_rx) = mpsc::unbounded();
        let from = key.clone();
        self.events.push(
            events_rx
                .map(move |event| RoomEvent::Transport {
                    epoch,
                    generation,
                    from: from.clone(),
                    event,
                })
                .boxed(),
        );
        let from = key.clone();
        self.events.push(
            self.signaling
                .signals_from(&key)
                .map(move |signal| RoomEvent::Signal {
                    epoch,
                    generation,
                    from: from.clone(),
                    signal,
                })
                .boxed(),
        );

        info!(
            "Discovered peer [peer = {}, role = {:?}]",
            remote.id, role,
        );
        let mut manager = ConnectionManager::new(
            remote.id,
            key.clone(),
            role,
            events_tx,
            generation,
        );
        let tracks = self.media.local_tracks();
        if let Err(e) = manager
            .begin(
                &self.factory,
                &self.conf.ice.servers,
                &tracks,
                &self.signaling,
            )
            .await
        {
            warn!(
                "Failed to start connection [peer = {}]: {}",
                manager.remote_id(),
                e,
            );
            self.note_relay_degradation(&e);
            if manager.on_failure(&self.conf.retry)
                == FailureOutcome::WillRetry
            {
                self.schedule_retry(key.clone(), generation);
            }
        }
        self.peers.insert(key, manager);
    }

    async fn handle_signal(
        &mut self,
        generation: u64,
        from: SafeKey,
        signal: Signal,
    ) {
        let result = match self.peers.get_mut(&from) {
            Some(manager) if manager.generation() == generation => {
                match signal {
                    Signal::Offer { sdp } => {
                        manager.handle_offer(sdp, &self.signaling).await
                    }
                    Signal::Answer { sdp } => manager.handle_answer(sdp).await,
                    Signal::Candidate { candidate } => {
                        manager.apply_candidate(candidate).await
                    }
                }
            }
            _ => return,
        };
        if let Err(e) = result {
            warn!("Signal handling failed [peer = {}]: {}", from, e);
            self.note_relay_degradation(&e);
            self.fail_peer(&from).await;
        }
    }

    async fn handle_transport(
        &mut self,
        generation: u64,
        from: SafeKey,
        event: TransportEvent,
    ) {
        match event {
            TransportEvent::IceCandidateDiscovered(candidate) => {
                if !self.manager_matches(&from, generation) {
                    return;
                }
                if let Err(e) =
                    self.signaling.send_candidate(&from, candidate).await
                {
                    warn!("Failed to publish candidate: {}", e);
                    self.degraded = true;
                }
            }
            TransportEvent::NewRemoteStream(stream) => {
                if let Some(manager) = self.peers.get_mut(&from) {
                    if manager.generation() == generation {
                        manager.on_remote_stream(stream);
                    }
                }
            }
            TransportEvent::ConnectionStateChanged(state) => match state {
                TransportState::Connected => {
                    if let Some(manager) = self.peers.get_mut(&from) {
                        if manager.generation() == generation {
                            manager.on_connected();
                        }
                    }
                }
                TransportState::Disconnected | TransportState::Failed => {
                    // One breakage usually surfaces as `Disconnected`
                    // followed by `Failed`, both queued before the handle
                    // is discarded; the second report must not burn
                    // another attempt from the retry budget.
                    let fresh_failure =
                        self.peers.get_mut(&from).map_or(false, |m| {
                            m.generation() == generation
                                && m.phase() != PeerPhase::Retrying
                        });
                    if fresh_failure {
                        self.fail_peer(&from).await;
                    }
                }
                TransportState::Connecting => {}
            },
        }
    }

    /// Re-runs negotiation for a peer whose retry delay elapsed.
    ///
    /// The stale offer/answer/candidates authored locally are cleared
    /// first, so the discarded native handle's descriptions cannot
    /// satisfy the new attempt.
    async fn handle_retry(&mut self, generation: u64, peer: SafeKey) {
        match self.peers.get_mut(&peer) {
            Some(manager)
                if manager.generation() == generation
                    && manager.phase() == PeerPhase::Retrying => {}
            _ => return,
        }
        if let Err(e) = self.signaling.clear_authored(&peer).await {
            debug!("Failed to clear stale signals: {}", e);
            self.degraded = true;
        }
        let tracks = self.media.local_tracks();
        let result = match self.peers.get_mut(&peer) {
            Some(manager) => {
                manager
                    .begin(
                        &self.factory,
                        &self.conf.ice.servers,
                        &tracks,
                        &self.signaling,
                    )
                    .await
            }
            None => return,
        };
        if let Err(e) = result {
            warn!("Reconnection attempt failed [peer = {}]: {}", peer, e);
            self.note_relay_degradation(&e);
            self.fail_peer(&peer).await;
        }
    }

    /// Records a transport failure for `key`, scheduling a delayed
    /// reconnection while the failure counter allows one.
    async fn fail_peer(&mut self, key: &SafeKey) {
        let (outcome, generation) = match self.peers.get_mut(key) {
            Some(manager) => (
                manager.on_failure(&self.conf.retry),
                manager.generation(),
            ),
            None => return,
        };
        if outcome == FailureOutcome::WillRetry {
            self.schedule_retry(key.clone(), generation);
        }
    }

    fn schedule_retry(&mut self, peer: SafeKey, generation: u64) {
        let epoch = self.epoch;
        let delay = self.conf.retry.delay;
        self.timers.push(
            async move {
                tokio::time::sleep(delay).await;
                RoomEvent::RetryTimer {
                    epoch,
                    generation,
                    peer,
                }
            }
            .boxed(),
        );
    }

    fn manager_matches(&mut self, key: &SafeKey, generation: u64) -> bool {
        self.peers
            .get_mut(key)
            .map_or(false, |m| m.generation() == generation)
    }

    fn note_relay_degradation(&mut self, err: &ConnError) {
        if matches!(err, ConnError::Signaling(_)) {
            self.degraded = true;
        }
    }

    /// Complete teardown: closes every peer connection, drops all
    /// subscriptions and timers, removes presence and releases the local
    /// capture device.
    ///
    /// Bumps the teardown epoch first, so any event or timer still in
    /// flight is discarded instead of resurrecting state.
    async fn teardown(&mut self) {
        self.epoch += 1;
        let mut drained: Vec<(SafeKey, ConnectionManager)> =
            self.peers.drain().collect();
        for (_, manager) in &mut drained {
            manager.close();
        }
        self.events = SelectAll::new();
        self.timers = FuturesUnordered::new();
        for (key, _) in &drained {
            if let Err(e) = self.signaling.clear_authored(key).await {
                debug!("Failed to clear signals on teardown: {}", e);
            }
        }
        if self.voice_active {
            if let Err(e) = self.presence.close().await {
                warn!("Failed to remove presence record: {}", e);
            }
        }
        self.media.stop();
        self.roster.clear();
        self.voice_active = false;
        self.degraded = false;
        if !drained.is_empty() {
            info!(
                "Torn down room [id = {}, peers = {}]",
                self.id,
                drained.len(),
            );
        }
    }

    fn publish_snapshot(&self) {
        let mut participants: Vec<Participant> =
            self.roster.values().cloned().collect();
        participants.sort_by(|a, b| a.id.cmp(&b.id));

        let mut peers = HashMap::new();
        let mut remote_streams = HashMap::new();
        for (_, manager) in self.peers.iter() {
            peers.insert(
                manager.remote_id().clone(),
                PeerInfo {
                    phase: manager.phase(),
                    retry_count: manager.retry_count(),
                },
            );
            if let Some(stream) = manager.remote_stream() {
                remote_streams.insert(
                    manager.remote_id().clone(),
                    Arc::clone(stream),
                );
            }
        }

        let _ = self.snapshot_tx.send(RoomSnapshot {
            is_voice_active: self.voice_active,
            is_muted: self.media.is_muted(),
            is_signaling_degraded: self.degraded,
            participants,
            peers,
            remote_streams,
        });
    }
}

//! Test doubles for the relay store, capture devices and transports.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use futures::{channel::mpsc, StreamExt as _};
use serde_json::Value;

use argo::{
    conf::{Conf, IceServer, Retry},
    media::{MediaConstraints, MediaKind, MediaTrack, RemoteStream},
    platform::{
        DeviceError, MediaDevices, PeerTransport, Sdp, TransportError,
        TransportEvent, TransportFactory, TransportState,
    },
    proto::{IceCandidate, Participant, ParticipantId},
    relay::{Key, RelayChannel, RelayError},
    signalling::{RoomHandle, RoomSnapshot},
    Mesh,
};

pub fn init_logging() {
    argo::log::init();
}

/// Builds a [`Conf`] with a short retry delay, so reconnection tests do
/// not sleep for seconds.
pub fn test_conf() -> Conf {
    Conf {
        retry: Retry {
            max_retries: 3,
            delay: Duration::from_millis(50),
        },
        ..Conf::default()
    }
}

pub fn participant(id: &str) -> Participant {
    Participant {
        id: ParticipantId::from(id),
        display_name: id.to_owned(),
        is_muted: false,
    }
}

// ===== In-memory relay =====================================================

#[derive(Default)]
struct RelayInner {
    values: HashMap<String, Value>,
    lists: HashMap<String, Vec<Value>>,
    value_subs: HashMap<String, Vec<mpsc::UnboundedSender<Option<Value>>>>,
    child_subs:
        HashMap<String, Vec<mpsc::UnboundedSender<HashMap<String, Value>>>>,
    list_subs: HashMap<String, Vec<mpsc::UnboundedSender<Value>>>,
}

impl RelayInner {
    /// Direct children of `prefix` among the stored plain values.
    fn children_of(&self, prefix: &str) -> HashMap<String, Value> {
        let prefix = format!("{}/", prefix);
        self.values
            .iter()
            .filter_map(|(k, v)| {
                let rest = k.strip_prefix(&prefix)?;
                if rest.contains('/') {
                    None
                } else {
                    Some((rest.to_owned(), v.clone()))
                }
            })
            .collect()
    }

    fn notify_value(&mut self, key: &str) {
        let current = self.values.get(key).cloned();
        if let Some(subs) = self.value_subs.get_mut(key) {
            subs.retain(|tx| tx.unbounded_send(current.clone()).is_ok());
        }
    }

    fn notify_children(&mut self, key: &str) {
        if let Some(parent) = key.rfind('/').map(|i| key[..i].to_owned()) {
            let map = self.children_of(&parent);
            if let Some(subs) = self.child_subs.get_mut(&parent) {
                subs.retain(|tx| tx.unbounded_send(map.clone()).is_ok());
            }
        }
    }
}

/// Shared in-memory [`RelayChannel`], standing in for the external
/// real-time store. All rooms in a test must share one instance.
#[derive(Clone, Default)]
pub struct MemoryRelay(Arc<Mutex<RelayInner>>);

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the raw value stored at `key`, if any.
    pub fn value_at(&self, key: &str) -> Option<Value> {
        self.0.lock().unwrap().values.get(key).cloned()
    }

    /// Returns the list stored at `key`.
    pub fn list_at(&self, key: &str) -> Vec<Value> {
        self.0
            .lock()
            .unwrap()
            .lists
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// All stored keys (plain values and lists).
    pub fn keys(&self) -> Vec<String> {
        let inner = self.0.lock().unwrap();
        inner
            .values
            .keys()
            .chain(inner.lists.keys())
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RelayChannel for MemoryRelay {
    async fn put(&self, key: &Key, value: Value) -> Result<(), RelayError> {
        let mut inner = self.0.lock().unwrap();
        inner.values.insert(key.to_string(), value);
        inner.notify_value(key.as_str());
        inner.notify_children(key.as_str());
        Ok(())
    }

    async fn remove(&self, key: &Key) -> Result<(), RelayError> {
        let mut inner = self.0.lock().unwrap();
        let had_value = inner.values.remove(key.as_str()).is_some();
        inner.lists.remove(key.as_str());
        if had_value {
            inner.notify_value(key.as_str());
            inner.notify_children(key.as_str());
        }
        Ok(())
    }

    async fn append(&self, key: &Key, value: Value) -> Result<(), RelayError> {
        let mut inner = self.0.lock().unwrap();
        inner
            .lists
            .entry(key.to_string())
            .or_default()
            .push(value.clone());
        if let Some(subs) = inner.list_subs.get_mut(key.as_str()) {
            subs.retain(|tx| tx.unbounded_send(value.clone()).is_ok());
        }
        Ok(())
    }

    fn watch(&self, key: &Key) -> futures::stream::BoxStream<'static, Option<Value>> {
        let (tx, rx) = mpsc::unbounded();
        let mut inner = self.0.lock().unwrap();
        let _ = tx.unbounded_send(inner.values.get(key.as_str()).cloned());
        inner
            .value_subs
            .entry(key.to_string())
            .or_default()
            .push(tx);
        rx.boxed()
    }

    fn watch_children(
        &self,
        key: &Key,
    ) -> futures::stream::BoxStream<'static, HashMap<String, Value>> {
        let (tx, rx) = mpsc::unbounded();
        let mut inner = self.0.lock().unwrap();
        let _ = tx.unbounded_send(inner.children_of(key.as_str()));
        inner
            .child_subs
            .entry(key.to_string())
            .or_default()
            .push(tx);
        rx.boxed()
    }

    fn watch_list(&self, key: &Key) -> futures::stream::BoxStream<'static, Value> {
        let (tx, rx) = mpsc::unbounded();
        self.0
            .lock()
            .unwrap()
            .list_subs
            .entry(key.to_string())
            .or_default()
            .push(tx);
        rx.boxed()
    }
}

// ===== Fake capture devices ================================================

pub struct FakeTrack {
    kind: MediaKind,
    enabled: AtomicBool,
    pub stopped: AtomicBool,
}

impl FakeTrack {
    fn new(kind: MediaKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        })
    }
}

impl MediaTrack for FakeTrack {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// [`MediaDevices`] double handing out [`FakeTrack`]s, or failing with a
/// preconfigured [`DeviceError`].
#[derive(Default)]
pub struct FakeDevices {
    fail_with: Mutex<Option<DeviceError>>,
    created: Mutex<Vec<Arc<FakeTrack>>>,
}

impl FakeDevices {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(err: DeviceError) -> Arc<Self> {
        let devices = Self::default();
        *devices.fail_with.lock().unwrap() = Some(err);
        Arc::new(devices)
    }

    /// Tracks handed out so far, in creation order.
    pub fn created(&self) -> Vec<Arc<FakeTrack>> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn acquire(
        &self,
        constraints: MediaConstraints,
    ) -> Result<Vec<Arc<dyn MediaTrack>>, DeviceError> {
        if let Some(err) = self.fail_with.lock().unwrap().clone() {
            return Err(err);
        }
        let mut tracks: Vec<Arc<FakeTrack>> = Vec::new();
        if constraints.audio {
            tracks.push(FakeTrack::new(MediaKind::Audio));
        }
        if constraints.video {
            tracks.push(FakeTrack::new(MediaKind::Video));
        }
        self.created.lock().unwrap().extend(tracks.iter().cloned());
        Ok(tracks
            .into_iter()
            .map(|t| t as Arc<dyn MediaTrack>)
            .collect())
    }
}

// ===== Mock transports =====================================================

#[derive(Debug)]
pub struct FakeStream(pub String);

impl RemoteStream for FakeStream {
    fn id(&self) -> String {
        self.0.clone()
    }
}

/// Scripted [`PeerTransport`]: records every call and lets the test fire
/// events through the connection's event channel.
pub struct MockTransport {
    remote: ParticipantId,
    events: mpsc::UnboundedSender<TransportEvent>,
    closed: AtomicBool,
    pub tracks_added: Mutex<usize>,
    pub remote_descriptions: Mutex<Vec<Sdp>>,
    pub candidates_applied: Mutex<Vec<IceCandidate>>,
}

impl MockTransport {
    /// Emits an event unless this handle has been closed; closed handles
    /// must stay silent.
    fn emit(&self, event: TransportEvent) {
        if !self.closed.load(Ordering::SeqCst) {
            let _ = self.events.unbounded_send(event);
        }
    }

    pub fn fire_connected(&self) {
        self.emit(TransportEvent::ConnectionStateChanged(
            TransportState::Connected,
        ));
    }

    pub fn fire_disconnected(&self) {
        self.emit(TransportEvent::ConnectionStateChanged(
            TransportState::Disconnected,
        ));
    }

    pub fn fire_failed(&self) {
        self.emit(TransportEvent::ConnectionStateChanged(
            TransportState::Failed,
        ));
    }

    pub fn fire_candidate(&self, candidate: IceCandidate) {
        self.emit(TransportEvent::IceCandidateDiscovered(candidate));
    }

    pub fn fire_remote_stream(&self, id: &str) {
        self.emit(TransportEvent::NewRemoteStream(Arc::new(FakeStream(
            id.to_owned(),
        ))));
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    fn add_track(&self, _track: Arc<dyn MediaTrack>) {
        *self.tracks_added.lock().unwrap() += 1;
    }

    async fn create_and_set_offer(&self) -> Result<String, TransportError> {
        Ok(format!("offer-for-{}", self.remote))
    }

    async fn create_and_set_answer(&self) -> Result<String, TransportError> {
        Ok(format!("answer-for-{}", self.remote))
    }

    async fn set_remote_description(
        &self,
        sdp: Sdp,
    ) -> Result<(), TransportError> {
        self.remote_descriptions.lock().unwrap().push(sdp);
        Ok(())
    }

    async fn add_ice_candidate(
        &self,
        candidate: &IceCandidate,
    ) -> Result<(), TransportError> {
        self.candidates_applied.lock().unwrap().push(candidate.clone());
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct FactoryInner {
    created: Vec<(ParticipantId, Arc<MockTransport>, Instant)>,
    attempts: Vec<(ParticipantId, Instant)>,
    fail_creates: HashMap<ParticipantId, u32>,
}

/// [`TransportFactory`] double recording every creation with its
/// timestamp, and optionally failing the next N creations per remote.
#[derive(Default)]
pub struct MockFactory(Mutex<FactoryInner>);

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes the next `n` creations towards `remote` fail.
    pub fn fail_creates(&self, remote: &ParticipantId, n: u32) {
        self.0
            .lock()
            .unwrap()
            .fail_creates
            .insert(remote.clone(), n);
    }

    /// Latest transport created towards `remote`.
    pub fn transport_to(
        &self,
        remote: &ParticipantId,
    ) -> Option<Arc<MockTransport>> {
        self.0
            .lock()
            .unwrap()
            .created
            .iter()
            .rev()
            .find(|(id, _, _)| id == remote)
            .map(|(_, t, _)| Arc::clone(t))
    }

    /// Number of transports created towards `remote` so far.
    pub fn created_count(&self, remote: &ParticipantId) -> usize {
        self.0
            .lock()
            .unwrap()
            .created
            .iter()
            .filter(|(id, _, _)| id == remote)
            .count()
    }

    /// Instants of every creation attempt towards `remote`, failed ones
    /// included, in order.
    pub fn attempt_times(&self, remote: &ParticipantId) -> Vec<Instant> {
        self.0
            .lock()
            .unwrap()
            .attempts
            .iter()
            .filter(|(id, _)| id == remote)
            .map(|(_, at)| *at)
            .collect()
    }
}

impl TransportFactory for MockFactory {
    fn create(
        &self,
        remote: &ParticipantId,
        _ice_servers: &[IceServer],
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn PeerTransport>, TransportError> {
        let mut inner = self.0.lock().unwrap();
        inner.attempts.push((remote.clone(), Instant::now()));
        if let Some(left) = inner.fail_creates.get_mut(remote) {
            if *left > 0 {
                *left -= 1;
                return Err(TransportError::CreateFailed(
                    "scripted failure".into(),
                ));
            }
        }
        let transport = Arc::new(MockTransport {
            remote: remote.clone(),
            events,
            closed: AtomicBool::new(false),
            tracks_added: Mutex::new(0),
            remote_descriptions: Mutex::new(Vec::new()),
            candidates_applied: Mutex::new(Vec::new()),
        });
        inner
            .created
            .push((remote.clone(), Arc::clone(&transport), Instant::now()));
        Ok(transport)
    }
}

// ===== Harness =============================================================

/// One side of a mesh session under test.
pub struct TestClient {
    pub mesh: Mesh,
    pub devices: Arc<FakeDevices>,
    pub factory: Arc<MockFactory>,
}

impl TestClient {
    pub fn new(relay: &MemoryRelay) -> Self {
        Self::with_devices(relay, FakeDevices::new())
    }

    pub fn with_devices(
        relay: &MemoryRelay,
        devices: Arc<FakeDevices>,
    ) -> Self {
        let factory = MockFactory::new();
        let mesh = Mesh::new(
            Arc::new(relay.clone()),
            Arc::clone(&devices) as Arc<dyn MediaDevices>,
            Arc::clone(&factory) as Arc<dyn TransportFactory>,
            test_conf(),
        );
        Self {
            mesh,
            devices,
            factory,
        }
    }
}

/// Polls the room's published snapshots until `pred` holds, panicking
/// after 5 seconds.
pub async fn wait_for<F>(handle: &mut RoomHandle, mut pred: F) -> RoomSnapshot
where
    F: FnMut(&RoomSnapshot) -> bool,
{
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            let snapshot = handle.snapshot();
            if pred(&snapshot) {
                return snapshot;
            }
            handle.changed().await.expect("room loop gone");
        }
    })
    .await
    .expect("condition not reached within 5s")
}

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use ssc_call::config::Settings;
use ssc_call::errors::EndpointError;
use ssc_call::peer::endpoint::{
    ConnectionStateHandler, EndpointResult, LocalCandidateHandler, RemoteTrackHandler,
};
use ssc_call::peer::{
    CallState, Candidate, ConnectionEndpoint, EndpointState, LocalTrack, MediaSource, RemoteTrack,
    SdpKind, SessionDescription, SessionEvent, TrackKind,
};
use ssc_call::store::{
    AddedDocument, Fields, MemoryStore, NegotiationStore, Precondition, StoreError, StoreResult,
    Subscription,
};
use ssc_call::NegotiationCoordinator;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Default)]
struct Handlers {
    local_candidate: Option<Arc<LocalCandidateHandler>>,
    remote_track: Option<Arc<RemoteTrackHandler>>,
    state: Option<Arc<ConnectionStateHandler>>,
}

#[derive(Default)]
struct Recorded {
    local_tracks: Vec<LocalTrack>,
    local: Option<SessionDescription>,
    remote: Vec<SessionDescription>,
    candidates: Vec<Candidate>,
    closed: bool,
    connected: bool,
}

/// Scripted endpoint: discovers `candidates` when its local description is
/// set, rejects remote candidates before a remote description, and reports
/// `Connected` once both descriptions are in place.
pub struct MockEndpoint {
    sdp: String,
    candidates: Vec<Candidate>,
    handlers: Mutex<Handlers>,
    recorded: Mutex<Recorded>,
}

impl MockEndpoint {
    pub fn new(sdp: &str, candidates: Vec<Candidate>) -> Arc<Self> {
        Arc::new(Self {
            sdp: sdp.to_owned(),
            candidates,
            handlers: Mutex::new(Handlers::default()),
            recorded: Mutex::new(Recorded::default()),
        })
    }

    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        self.recorded.lock().remote.clone()
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.recorded.lock().local.clone()
    }

    pub fn applied_candidates(&self) -> Vec<Candidate> {
        self.recorded.lock().candidates.clone()
    }

    pub fn local_tracks(&self) -> Vec<LocalTrack> {
        self.recorded.lock().local_tracks.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.recorded.lock().closed
    }

    /// Reports a transport state change as the real transport would.
    pub fn fire_state(&self, st: EndpointState) {
        let handler = self.handlers.lock().state.clone();
        if let Some(h) = handler {
            h(st);
        }
    }

    fn maybe_connect(&self) {
        let fire = {
            let mut rec = self.recorded.lock();
            let ready = rec.local.is_some() && !rec.remote.is_empty() && !rec.connected;
            if ready {
                rec.connected = true;
            }
            ready
        };
        if fire {
            self.fire_state(EndpointState::Connected);
            let handler = self.handlers.lock().remote_track.clone();
            if let Some(h) = handler {
                h(RemoteTrack {
                    id: "remote-audio".into(),
                    stream_id: "remote".into(),
                    kind: TrackKind::Audio,
                });
            }
        }
    }
}

#[async_trait]
impl ConnectionEndpoint for MockEndpoint {
    async fn add_local_track(&self, track: LocalTrack) -> EndpointResult<()> {
        self.recorded.lock().local_tracks.push(track);
        Ok(())
    }

    fn on_remote_track(&self, handler: RemoteTrackHandler) {
        self.handlers.lock().remote_track = Some(Arc::new(handler));
    }

    async fn create_offer(&self) -> EndpointResult<SessionDescription> {
        Ok(SessionDescription::offer(self.sdp.clone()))
    }

    async fn create_answer(&self) -> EndpointResult<SessionDescription> {
        let rec = self.recorded.lock();
        match rec.remote.last() {
            Some(d) if d.kind == SdpKind::Offer => Ok(SessionDescription::answer(self.sdp.clone())),
            _ => Err(EndpointError::new("create answer", "no remote offer")),
        }
    }

    async fn set_local_description(&self, desc: SessionDescription) -> EndpointResult<()> {
        self.recorded.lock().local = Some(desc);
        let handler = self.handlers.lock().local_candidate.clone();
        if let Some(h) = handler {
            for c in &self.candidates {
                h(Some(c.clone()));
            }
            h(None);
        }
        self.maybe_connect();
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> EndpointResult<()> {
        self.recorded.lock().remote.push(desc);
        self.maybe_connect();
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: Candidate) -> EndpointResult<()> {
        let mut rec = self.recorded.lock();
        if rec.remote.is_empty() {
            return Err(EndpointError::new(
                "add ICE candidate",
                "remote description not set",
            ));
        }
        rec.candidates.push(candidate);
        Ok(())
    }

    fn on_local_candidate(&self, handler: LocalCandidateHandler) {
        self.handlers.lock().local_candidate = Some(Arc::new(handler));
    }

    fn on_connection_state(&self, handler: ConnectionStateHandler) {
        self.handlers.lock().state = Some(Arc::new(handler));
    }

    async fn close(&self) -> EndpointResult<()> {
        self.recorded.lock().closed = true;
        self.fire_state(EndpointState::Closed);
        Ok(())
    }
}

/// Media source yielding one audio and one video track, or failing.
pub struct FakeCamera {
    pub fail: bool,
}

#[async_trait]
impl MediaSource for FakeCamera {
    async fn capture(&self) -> Result<Vec<LocalTrack>, String> {
        if self.fail {
            return Err("camera busy".into());
        }
        Ok(vec![
            LocalTrack {
                id: "mic".into(),
                stream_id: "local".into(),
                kind: TrackKind::Audio,
            },
            LocalTrack {
                id: "cam".into(),
                stream_id: "local".into(),
                kind: TrackKind::Video,
            },
        ])
    }
}

pub fn host_candidate(n: u8) -> Candidate {
    Candidate::new()
        .with(
            "candidate",
            format!("candidate:{n} 1 udp 2122260223 192.0.2.{n} 5000{n} typ host"),
        )
        .with("sdpMid", "0")
        .with("sdpMLineIndex", 0)
}

pub fn test_settings() -> Settings {
    Settings {
        grace_period_ms: 100,
        ..Default::default()
    }
}

pub struct Peer {
    pub endpoint: Arc<MockEndpoint>,
    pub coordinator: NegotiationCoordinator,
    pub events: broadcast::Receiver<SessionEvent>,
}

/// Coordinator over `store` with local media already open.
pub async fn peer(store: &Arc<MemoryStore>, sdp: &str, candidates: Vec<Candidate>) -> Peer {
    peer_on(store.clone(), sdp, candidates).await
}

pub async fn peer_on(
    store: Arc<dyn NegotiationStore>,
    sdp: &str,
    candidates: Vec<Candidate>,
) -> Peer {
    let endpoint = MockEndpoint::new(sdp, candidates);
    let coordinator = NegotiationCoordinator::new(store, endpoint.clone(), &test_settings());
    let events = coordinator.subscribe_events();
    coordinator
        .open_local_media(&FakeCamera { fail: false })
        .await
        .unwrap();
    Peer {
        endpoint,
        coordinator,
        events,
    }
}

/// Store operations that [`FlakyStore`] can fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    SetFields,
    SubscribeDocument,
    SubscribeAdded,
}

/// [`MemoryStore`] wrapper whose next call of an armed operation fails with
/// `Unavailable`.
pub struct FlakyStore {
    pub inner: MemoryStore,
    armed: Mutex<HashSet<StoreOp>>,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryStore::new(),
            armed: Mutex::new(HashSet::new()),
        })
    }

    pub fn fail_once(&self, op: StoreOp) {
        self.armed.lock().insert(op);
    }

    fn check(&self, op: StoreOp) -> StoreResult<()> {
        if self.armed.lock().remove(&op) {
            return Err(StoreError::Unavailable(format!("{op:?} dropped")));
        }
        Ok(())
    }
}

#[async_trait]
impl NegotiationStore for FlakyStore {
    async fn create_document(&self, collection: &str) -> StoreResult<String> {
        self.inner.create_document(collection).await
    }

    async fn get_document(&self, collection: &str, id: &str) -> StoreResult<Option<Fields>> {
        self.inner.get_document(collection, id).await
    }

    async fn set_fields(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
        precondition: Precondition,
    ) -> StoreResult<()> {
        self.check(StoreOp::SetFields)?;
        self.inner.set_fields(collection, id, fields, precondition).await
    }

    async fn add_document(&self, collection: &str, fields: Fields) -> StoreResult<String> {
        self.inner.add_document(collection, fields).await
    }

    async fn subscribe_document(
        &self,
        collection: &str,
        id: &str,
    ) -> StoreResult<Subscription<Fields>> {
        self.check(StoreOp::SubscribeDocument)?;
        self.inner.subscribe_document(collection, id).await
    }

    async fn subscribe_added(&self, collection: &str) -> StoreResult<Subscription<AddedDocument>> {
        self.check(StoreOp::SubscribeAdded)?;
        self.inner.subscribe_added(collection).await
    }
}

pub async fn wait_for_state(coordinator: &NegotiationCoordinator, expected: CallState) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let state = coordinator.state().await;
        if state == expected {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {expected:?}, still {state:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn wait_for_event(events: &mut broadcast::Receiver<SessionEvent>, expected: SessionEvent) {
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(evt) if evt == expected => return,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await;
    assert!(found.is_ok(), "event {expected:?} not received");
}

/// Lets spawned listeners drain what is already queued.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

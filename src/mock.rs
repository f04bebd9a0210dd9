//! In-memory collaborators for tests
//!
//! [`MockNetwork`] links [`MockTransport`]s the way a real network links
//! peer connections: once the caller commits the callee's answer, the
//! caller's data channel is paired with a fresh one on the callee side and
//! both report open.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::capture::MediaCapture;
use crate::config::{Config, MediaConstraints};
use crate::error::{SessionError, TransportError};
use crate::peer::transport::{DataChannel, MediaTransport, TransportFactory};
use crate::peer::types::{
    Candidate, ChannelEvent, ConnectionState, MediaSource, MediaTrack, SdpType,
    SessionDescription, SourceKind, TrackKind, TransportEvent,
};
use crate::session::{EventTx, SessionEvent};
use crate::signaling::{SignalingChannel, SignalingMessage};
use crate::sink::Sink;
use crate::utils::random_id;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// Registry of live mock transports, keyed by id
pub struct MockNetwork {
    peers: Mutex<HashMap<String, EventTx>>,
    /// Host candidates each transport gathers
    candidates_per_peer: usize,
    /// Never report the end of gathering
    stall_gathering: AtomicBool,
}

impl MockNetwork {
    pub fn new() -> Arc<Self> {
        Self::with_candidates(2)
    }

    pub fn with_candidates(candidates_per_peer: usize) -> Arc<Self> {
        Arc::new(Self {
            peers: Mutex::new(HashMap::new()),
            candidates_per_peer,
            stall_gathering: AtomicBool::new(false),
        })
    }

    /// Gather candidates but never signal the end of gathering
    pub fn stall_gathering(&self) {
        self.stall_gathering.store(true, Ordering::SeqCst);
    }

    pub fn transport(self: &Arc<Self>, events: EventTx) -> MockTransport {
        let id = random_id();
        lock(&self.peers).insert(id.clone(), events.clone());
        MockTransport {
            id,
            network: Arc::clone(self),
            events,
            state: Mutex::new(TransportState::default()),
            close_count: AtomicUsize::new(0),
        }
    }

    fn events_for(&self, id: &str) -> Option<EventTx> {
        lock(&self.peers).get(id).cloned()
    }
}

#[derive(Default)]
struct TransportState {
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    gathered: Vec<Candidate>,
    remote_candidates: Vec<Candidate>,
    tracks: Vec<String>,
    channel: Option<Arc<MockDataChannel>>,
}

pub struct MockTransport {
    id: String,
    network: Arc<MockNetwork>,
    events: EventTx,
    state: Mutex<TransportState>,
    close_count: AtomicUsize,
}

impl MockTransport {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }

    pub fn track_ids(&self) -> Vec<String> {
        lock(&self.state).tracks.clone()
    }

    pub fn remote_candidates(&self) -> Vec<Candidate> {
        lock(&self.state).remote_candidates.clone()
    }

    fn describe(&self, sdp_type: SdpType, label: Option<&str>) -> SessionDescription {
        let mut sdp = format!(
            "v=0\r\no=mock {}\r\na=fingerprint:sha-256 {}\r\n",
            self.id,
            self.id.to_uppercase()
        );
        if let Some(label) = label {
            sdp.push_str(&format!("a=channel:{}\r\n", label));
        }
        SessionDescription { sdp_type, sdp }
    }

    fn post(&self, event: TransportEvent) {
        let _ = self.events.send(SessionEvent::Transport(event));
    }

    fn peer_of(desc: &SessionDescription) -> Option<String> {
        desc.sdp
            .lines()
            .find_map(|l| l.trim().strip_prefix("o=mock "))
            .map(|id| id.trim().to_string())
    }

    // The caller has the answer: pair the channels and report both open
    fn connect_to(&self, peer: &str) -> Result<(), TransportError> {
        let peer_events = self
            .network
            .events_for(peer)
            .ok_or_else(|| TransportError::ConnectionFailed(format!("no mock peer {}", peer)))?;
        self.post(TransportEvent::ConnectionState(ConnectionState::Connected));
        let _ = peer_events.send(SessionEvent::Transport(TransportEvent::ConnectionState(
            ConnectionState::Connected,
        )));

        let ours = lock(&self.state).channel.clone();
        if let Some(ours) = ours {
            let theirs = MockDataChannel::new(ours.label(), peer_events.clone());
            theirs.link(self.events.clone());
            ours.link(peer_events.clone());
            let _ = peer_events.send(SessionEvent::Transport(TransportEvent::RemoteDataChannel(
                theirs,
            )));
            let _ = peer_events.send(SessionEvent::Channel(ChannelEvent::Open));
            let _ = self.events.send(SessionEvent::Channel(ChannelEvent::Open));
        }
        Ok(())
    }
}

#[async_trait]
impl MediaTransport for MockTransport {
    async fn add_track(
        &self,
        _source: &MediaSource,
        track: &Arc<MediaTrack>,
    ) -> Result<(), TransportError> {
        lock(&self.state).tracks.push(track.id.clone());
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let label = lock(&self.state).channel.as_ref().map(|c| c.label().to_string());
        Ok(self.describe(SdpType::Offer, label.as_deref()))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        if lock(&self.state).remote.is_none() {
            return Err(TransportError::Codec("no remote offer to answer".into()));
        }
        Ok(self.describe(SdpType::Answer, None))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        let gathered: Vec<Candidate> = (0..self.network.candidates_per_peer)
            .map(|i| {
                Candidate::new(format!(
                    "candidate:{} 1 udp 2122 10.0.0.{} {} typ host",
                    i + 1,
                    i + 1,
                    5000 + i
                ))
            })
            .collect();
        {
            let mut state = lock(&self.state);
            state.local = Some(desc);
            state.gathered = gathered.clone();
        }
        for c in gathered {
            self.post(TransportEvent::LocalCandidate(Some(c)));
        }
        if !self.network.stall_gathering.load(Ordering::SeqCst) {
            self.post(TransportEvent::LocalCandidate(None));
        }
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError> {
        let peer = Self::peer_of(&desc)
            .ok_or_else(|| TransportError::Codec("remote description names no peer".into()))?;
        let is_answer = desc.sdp_type == SdpType::Answer;
        lock(&self.state).remote = Some(desc);
        if is_answer {
            self.connect_to(&peer)?;
        }
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let state = lock(&self.state);
        state.local.as_ref().map(|local| {
            let mut desc = local.clone();
            for c in &state.gathered {
                desc.sdp.push_str(&format!("a={}\r\n", c.candidate));
            }
            desc
        })
    }

    async fn add_remote_candidate(&self, candidate: Candidate) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        if state.remote.is_none() {
            return Err(TransportError::Codec("no remote description".into()));
        }
        state.remote_candidates.push(candidate);
        Ok(())
    }

    async fn create_data_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn DataChannel>, TransportError> {
        let channel = MockDataChannel::new(label, self.events.clone());
        lock(&self.state).channel = Some(Arc::clone(&channel));
        Ok(channel)
    }

    async fn close(&self) {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        lock(&self.network.peers).remove(&self.id);
    }
}

/// Hands out [`MockTransport`]s and keeps them for inspection
pub struct MockTransportFactory {
    network: Arc<MockNetwork>,
    created: Mutex<Vec<Arc<MockTransport>>>,
    pub fail: bool,
}

impl MockTransportFactory {
    pub fn new(network: Arc<MockNetwork>) -> Self {
        Self {
            network,
            created: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn created(&self) -> Vec<Arc<MockTransport>> {
        lock(&self.created).clone()
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    async fn create_session(
        &self,
        _config: &Config,
        events: EventTx,
    ) -> Result<Arc<dyn MediaTransport>, TransportError> {
        if self.fail {
            return Err(TransportError::ConnectionFailed("mock factory refused".into()));
        }
        let transport = Arc::new(self.network.transport(events));
        lock(&self.created).push(Arc::clone(&transport));
        Ok(transport)
    }
}

/// Data channel whose far end is another call's event queue
pub struct MockDataChannel {
    label: String,
    events: EventTx,
    peer: Mutex<Option<EventTx>>,
    sent: Mutex<Vec<String>>,
    closed: AtomicBool,
    close_count: AtomicUsize,
}

impl MockDataChannel {
    pub fn new(label: &str, events: EventTx) -> Arc<Self> {
        Arc::new(Self {
            label: label.to_string(),
            events,
            peer: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            close_count: AtomicUsize::new(0),
        })
    }

    pub fn link(&self, peer: EventTx) {
        *lock(&self.peer) = Some(peer);
    }

    pub fn sent(&self) -> Vec<String> {
        lock(&self.sent).clone()
    }

    pub fn close_count(&self) -> usize {
        self.close_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataChannel for MockDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("data channel closed".into()));
        }
        lock(&self.sent).push(text.to_string());
        if let Some(peer) = lock(&self.peer).as_ref() {
            let _ = peer.send(SessionEvent::Channel(ChannelEvent::Message(text.to_string())));
        }
        Ok(())
    }

    async fn close(&self) {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.events.send(SessionEvent::Channel(ChannelEvent::Closed));
        if let Some(peer) = lock(&self.peer).take() {
            let _ = peer.send(SessionEvent::Channel(ChannelEvent::Closed));
        }
    }
}

/// Capture with switchable failures
#[derive(Debug, Default, Clone, Copy)]
pub struct MockCapture {
    pub camera_fails: bool,
    pub screen_fails: bool,
}

#[async_trait]
impl MediaCapture for MockCapture {
    async fn camera(&self, constraints: MediaConstraints) -> Result<MediaSource, SessionError> {
        if self.camera_fails {
            return Err(SessionError::CapabilityUnavailable("no camera".into()));
        }
        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(MediaTrack::new("mock-audio", TrackKind::Audio));
        }
        if constraints.video {
            tracks.push(MediaTrack::new("mock-video", TrackKind::Video));
        }
        Ok(MediaSource::new("mock-camera", SourceKind::Camera, tracks))
    }

    async fn screen(&self, _constraints: MediaConstraints) -> Result<MediaSource, SessionError> {
        if self.screen_fails {
            return Err(SessionError::CapabilityUnavailable("screen capture denied".into()));
        }
        Ok(MediaSource::new(
            "mock-screen",
            SourceKind::Screen,
            vec![MediaTrack::new("mock-screen-video", TrackKind::Video)],
        ))
    }
}

/// Sink that remembers everything written to it
#[derive(Default)]
pub struct RecordingSink {
    lines: Mutex<Vec<String>>,
    local: Mutex<Vec<MediaSource>>,
    remote: Mutex<Vec<MediaSource>>,
    clears: AtomicUsize,
}

impl RecordingSink {
    pub fn lines(&self) -> Vec<String> {
        lock(&self.lines).clone()
    }

    pub fn count(&self, line: &str) -> usize {
        lock(&self.lines).iter().filter(|l| *l == line).count()
    }

    pub fn contains(&self, needle: &str) -> bool {
        lock(&self.lines).iter().any(|l| l.contains(needle))
    }

    pub fn local_media(&self) -> Vec<MediaSource> {
        lock(&self.local).clone()
    }

    pub fn remote_media(&self) -> Vec<MediaSource> {
        lock(&self.remote).clone()
    }

    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

impl Sink for RecordingSink {
    fn line(&self, text: &str) {
        lock(&self.lines).push(text.to_string());
    }

    fn show_local(&self, source: &MediaSource) {
        lock(&self.local).push(source.clone());
    }

    fn show_remote(&self, source: &MediaSource) {
        lock(&self.remote).push(source.clone());
    }

    fn clear_media(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
    }
}

/// Signaling channel that records what is sent and never receives
#[derive(Default)]
pub struct RecordingSignaling {
    sent: Mutex<Vec<SignalingMessage>>,
    joined: Mutex<Vec<String>>,
}

impl RecordingSignaling {
    pub fn sent(&self) -> Vec<SignalingMessage> {
        lock(&self.sent).clone()
    }

    pub fn joined(&self) -> Vec<String> {
        lock(&self.joined).clone()
    }
}

#[async_trait]
impl SignalingChannel for RecordingSignaling {
    async fn join(&self, room: &str) -> Result<(), TransportError> {
        lock(&self.joined).push(room.to_string());
        Ok(())
    }

    async fn send(&self, msg: SignalingMessage) -> Result<(), TransportError> {
        lock(&self.sent).push(msg);
        Ok(())
    }

    async fn recv(&self) -> Result<SignalingMessage, TransportError> {
        std::future::pending().await
    }

    async fn close(&self) {}
}

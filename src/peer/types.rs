use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::transport::DataChannel;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SdpType::Offer => write!(f, "offer"),
            SdpType::Answer => write!(f, "answer"),
        }
    }
}

/// Negotiated capabilities of one side, opaque to the core
///
/// Serialises the way browsers serialise `RTCSessionDescription`:
/// `{"type": "offer", "sdp": "v=0..."}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Candidates already embedded in the description (`a=candidate:` lines)
    pub fn embedded_candidates(&self) -> Vec<Candidate> {
        self.sdp
            .lines()
            .filter_map(|line| line.trim().strip_prefix("a="))
            .filter(|attr| attr.starts_with("candidate:"))
            .map(|attr| Candidate::new(attr))
            .collect()
    }
}

/// ICE candidate for WebRTC connection establishment
///
/// An empty `candidate` string marks the end of gathering on the sending side.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Candidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
}

impl Candidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
        }
    }

    pub fn end_of_candidates() -> Self {
        Self {
            candidate: String::new(),
            sdp_mid: None,
            sdp_mline_index: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.candidate.trim().is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// One capturable track; stopping is idempotent
#[derive(Debug)]
pub struct MediaTrack {
    pub id: String,
    pub kind: TrackKind,
    stopped: AtomicBool,
}

impl MediaTrack {
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            kind,
            stopped: AtomicBool::new(false),
        })
    }

    /// Returns true only for the call that actually stopped the track
    pub fn stop(&self) -> bool {
        !self.stopped.swap(true, Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Camera,
    Screen,
    Remote,
}

/// A stream of tracks, either captured locally or arriving from the peer
#[derive(Debug, Clone)]
pub struct MediaSource {
    pub id: String,
    pub kind: SourceKind,
    pub tracks: Vec<Arc<MediaTrack>>,
}

impl MediaSource {
    pub fn new(id: impl Into<String>, kind: SourceKind, tracks: Vec<Arc<MediaTrack>>) -> Self {
        Self {
            id: id.into(),
            kind,
            tracks,
        }
    }

    /// Stop every track, returns how many were still running
    pub fn stop_all(&self) -> usize {
        self.tracks.iter().filter(|t| t.stop()).count()
    }
}

/// Connection state reported by the media transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Events raised by the media-transport engine
pub enum TransportEvent {
    /// A local candidate was gathered, `None` once gathering is complete
    LocalCandidate(Option<Candidate>),
    RemoteTrack(MediaSource),
    RemoteDataChannel(Arc<dyn DataChannel>),
    ConnectionState(ConnectionState),
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(c).finish(),
            TransportEvent::RemoteTrack(s) => f.debug_tuple("RemoteTrack").field(&s.id).finish(),
            TransportEvent::RemoteDataChannel(dc) => {
                f.debug_tuple("RemoteDataChannel").field(&dc.label()).finish()
            }
            TransportEvent::ConnectionState(s) => {
                f.debug_tuple("ConnectionState").field(s).finish()
            }
        }
    }
}

/// Events raised by a data channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Open,
    Message(String),
    Closed,
}

/// Data channel lifecycle as seen by the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Closed,
    Opening,
    Open,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn description_uses_browser_field_names() {
        let desc = SessionDescription::offer("v=0\r\n");
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["type"], "offer");
        assert_eq!(json["sdp"], "v=0\r\n");
    }

    #[test]
    fn candidate_accepts_browser_json() {
        let c: Candidate = serde_json::from_str(
            r#"{"candidate":"candidate:1 1 udp 2122 10.0.0.1 5000 typ host","sdpMid":"0","sdpMLineIndex":0}"#,
        )
        .unwrap();
        assert_eq!(c.sdp_mline_index, Some(0));
        assert!(!c.is_terminal());

        let end: Candidate = serde_json::from_str(r#"{"candidate":""}"#).unwrap();
        assert!(end.is_terminal());
    }

    #[test]
    fn embedded_candidates_are_extracted() {
        let desc = SessionDescription::offer(
            "v=0\r\na=candidate:1 1 udp 1 10.0.0.1 5000 typ host\r\na=mid:0\r\na=candidate:2 1 udp 1 1.2.3.4 6000 typ srflx\r\n",
        );
        let found = desc.embedded_candidates();
        assert_eq!(found.len(), 2);
        assert!(found[1].candidate.contains("srflx"));
    }

    #[test]
    fn tracks_stop_once() {
        let track = MediaTrack::new("cam", TrackKind::Video);
        let source = MediaSource::new("local", SourceKind::Camera, vec![track.clone()]);
        assert_eq!(source.stop_all(), 1);
        assert_eq!(source.stop_all(), 0);
        assert!(track.is_stopped());
    }
}

pub mod connection;
pub mod data_channel;
pub mod ice;
pub mod transport;
pub mod types;

pub use connection::{WebRtcFactory, WebRtcTransport};
pub use transport::{DataChannel, MediaTransport, TransportFactory};
pub use types::{
    Candidate, ChannelEvent, ChannelState, ConnectionState, MediaSource, MediaTrack, SdpType,
    SessionDescription, SourceKind, TrackKind, TransportEvent,
};

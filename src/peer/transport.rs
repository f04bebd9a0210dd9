//! Media transport abstraction
//!
//! The negotiation core only talks to these traits. Production code backs
//! them with the `webrtc` crate ([`super::connection`]); tests use the
//! in-memory versions in [`crate::mock`].

use async_trait::async_trait;
use std::sync::Arc;

use super::types::{Candidate, MediaSource, MediaTrack, SessionDescription};
use crate::config::Config;
use crate::error::TransportError;
use crate::session::EventTx;

/// One peer connection
///
/// Engine events (gathered candidates, remote tracks, remote data channels,
/// connection state) are posted to the [`EventTx`] handed to
/// [`TransportFactory::create_session`].
#[async_trait]
pub trait MediaTransport: Send + Sync {
    async fn add_track(
        &self,
        source: &MediaSource,
        track: &Arc<MediaTrack>,
    ) -> Result<(), TransportError>;

    async fn create_offer(&self) -> Result<SessionDescription, TransportError>;

    async fn create_answer(&self) -> Result<SessionDescription, TransportError>;

    /// Commit a local description; this starts candidate gathering
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError>;

    async fn set_remote_description(&self, desc: SessionDescription)
        -> Result<(), TransportError>;

    /// Current local description including candidates gathered so far
    async fn local_description(&self) -> Option<SessionDescription>;

    async fn add_remote_candidate(&self, candidate: Candidate) -> Result<(), TransportError>;

    /// Create an ordered, reliable data channel. Its events are wired up
    /// before this returns, so none can be missed.
    async fn create_data_channel(&self, label: &str)
        -> Result<Arc<dyn DataChannel>, TransportError>;

    async fn close(&self);
}

/// Data channel for peer-to-peer text messages
#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;

    async fn send_text(&self, text: &str) -> Result<(), TransportError>;

    async fn close(&self);
}

/// Creates peer connections for new calls
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create_session(
        &self,
        config: &Config,
        events: EventTx,
    ) -> Result<Arc<dyn MediaTransport>, TransportError>;
}

//! UI sink: where the call renders media and text
//!
//! The core only writes here; a sink never feeds anything back.

use std::io::Write;

use crate::peer::types::MediaSource;

pub trait Sink: Send + Sync {
    /// A line for the text output area
    fn line(&self, text: &str);

    fn show_local(&self, source: &MediaSource);

    fn show_remote(&self, source: &MediaSource);

    /// Detach both local and remote media
    fn clear_media(&self);
}

/// Line prefix for messages from the peer
pub const PEER_PREFIX: &str = "PEER: ";
/// Line prefix for our own messages
pub const SELF_PREFIX: &str = "        ME: ";

/// Terminal sink for the command-line client
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSink;

impl Sink for ConsoleSink {
    fn line(&self, text: &str) {
        let mut out = std::io::stdout().lock();
        let _ = writeln!(out, "{}", text);
    }

    fn show_local(&self, source: &MediaSource) {
        self.line(&format!(
            "[local media: {:?} {} with {} track(s)]",
            source.kind,
            source.id,
            source.tracks.len()
        ));
    }

    fn show_remote(&self, source: &MediaSource) {
        self.line(&format!(
            "[remote media: {} with {} track(s)]",
            source.id,
            source.tracks.len()
        ));
    }

    fn clear_media(&self) {
        self.line("[media detached]");
    }
}

//! Data channel bootstrap
//!
//! The caller creates the channel before its offer; the callee receives it
//! from the transport once negotiation succeeds. On open each side sends
//! [`READY_SENTINEL`] so the peer can see the channel works end to end.
//!
//! Text sent before the channel is open is queued and flushed, in order,
//! right after the sentinel.

use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::peer::transport::DataChannel;
use crate::peer::types::ChannelState;
use crate::session::{Role, Session};
use crate::sink::{Sink, PEER_PREFIX, SELF_PREFIX};

pub const READY_SENTINEL: &str = "*** Channel is ready ***";
pub const CLOSED_NOTICE: &str = "*** Channel is closed ***";

#[derive(Default)]
pub struct ChannelBootstrap {
    channel: Option<Arc<dyn DataChannel>>,
    outbox: VecDeque<String>,
    released: bool,
}

impl ChannelBootstrap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_channel(&self) -> bool {
        self.channel.is_some()
    }

    pub fn queued(&self) -> usize {
        self.outbox.len()
    }

    /// Caller side: the channel we created ahead of the offer
    pub fn created(
        &mut self,
        session: &mut Session,
        channel: Arc<dyn DataChannel>,
    ) -> Result<(), SessionError> {
        if session.role() != Some(Role::Caller) {
            return Err(SessionError::invalid_state("only the caller creates the channel"));
        }
        self.install(session, channel)
    }

    /// Callee side: the channel the caller's offer announced
    pub fn received(
        &mut self,
        session: &mut Session,
        channel: Arc<dyn DataChannel>,
    ) -> Result<(), SessionError> {
        if session.role() != Some(Role::Callee) {
            return Err(SessionError::invalid_state(format!(
                "unexpected remote data channel {}",
                channel.label()
            )));
        }
        self.install(session, channel)
    }

    fn install(
        &mut self,
        session: &mut Session,
        channel: Arc<dyn DataChannel>,
    ) -> Result<(), SessionError> {
        if self.channel.is_some() || self.released {
            return Err(SessionError::invalid_state(format!(
                "data channel {} arrived but one is already set",
                channel.label()
            )));
        }
        debug!(label = %channel.label(), "data channel attached");
        self.channel = Some(channel);
        session.set_data_channel_state(ChannelState::Opening);
        Ok(())
    }

    pub async fn on_open(&mut self, session: &mut Session) -> Result<(), SessionError> {
        let channel = match &self.channel {
            Some(c) => Arc::clone(c),
            None => return Err(SessionError::invalid_state("open without a data channel")),
        };
        if !session.is_negotiated() {
            return Err(SessionError::invalid_state(
                "data channel opened before negotiation completed",
            ));
        }
        session.set_data_channel_state(ChannelState::Open);
        info!(label = %channel.label(), "data channel is open");
        channel.send_text(READY_SENTINEL).await?;
        while let Some(text) = self.outbox.pop_front() {
            channel.send_text(&text).await?;
        }
        Ok(())
    }

    pub fn on_message(&self, session: &Session, text: &str, sink: &dyn Sink) {
        if session.is_closed() {
            return;
        }
        sink.line(&format!("{}{}", PEER_PREFIX, text));
    }

    pub fn on_closed(&mut self, session: &mut Session) {
        if session.data_channel_state() != ChannelState::Closed {
            debug!("data channel closed by transport");
            session.set_data_channel_state(ChannelState::Closed);
        }
    }

    /// Send user text, or queue it until the channel opens
    pub async fn send(
        &mut self,
        session: &Session,
        text: &str,
        sink: &dyn Sink,
    ) -> Result<(), SessionError> {
        if session.is_closed() || self.released {
            return Err(SessionError::invalid_state("call has ended"));
        }
        sink.line(&format!("{}{}", SELF_PREFIX, text));
        match (&self.channel, session.data_channel_state()) {
            (Some(channel), ChannelState::Open) => {
                channel.send_text(text).await?;
            }
            _ => {
                debug!("data channel not open yet, queueing message");
                self.outbox.push_back(text.to_string());
            }
        }
        Ok(())
    }

    /// Close and forget the channel. Safe to call repeatedly; the closed
    /// notice is written on the first call only.
    ///
    /// Returns how many queued messages never made it onto the channel.
    pub async fn release(&mut self, session: &mut Session, sink: &dyn Sink) -> usize {
        if self.released {
            return 0;
        }
        self.released = true;
        let dropped = self.outbox.len();
        if dropped > 0 {
            warn!(dropped, "data channel never opened, queued messages dropped");
        }
        self.outbox.clear();
        if let Some(channel) = self.channel.take() {
            channel.close().await;
        }
        session.set_data_channel_state(ChannelState::Closed);
        sink.line(CLOSED_NOTICE);
        dropped
    }
}

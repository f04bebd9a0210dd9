//! Signaling channel adapter
//!
//! Wraps the room-based relay: join a room, emit signaling messages to the
//! other member, and receive the relay's notifications in arrival order.

pub mod wire;
pub mod ws;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::TransportError;
use crate::peer::types::{Candidate, SessionDescription};

/// Messages exchanged through the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingMessage {
    /// We are the first member of the room
    Created(String),
    /// We joined a room that already had one member
    Joined(String),
    /// The room already has two members
    Full(String),
    /// A second member joined our room, we are the caller
    NewPeer(String),
    Invite(SessionDescription),
    Ok(SessionDescription),
    IceCandidate(Candidate),
    Bye(String),
}

impl SignalingMessage {
    pub fn event_name(&self) -> &'static str {
        match self {
            SignalingMessage::Created(_) => wire::EVENT_CREATED,
            SignalingMessage::Joined(_) => wire::EVENT_JOINED,
            SignalingMessage::Full(_) => wire::EVENT_FULL,
            SignalingMessage::NewPeer(_) => wire::EVENT_NEW_PEER,
            SignalingMessage::Invite(_) => wire::EVENT_INVITE,
            SignalingMessage::Ok(_) => wire::EVENT_OK,
            SignalingMessage::IceCandidate(_) => wire::EVENT_ICE_CANDIDATE,
            SignalingMessage::Bye(_) => wire::EVENT_BYE,
        }
    }

    /// Peer-to-peer messages the relay passes through to the other member.
    /// Membership notifications only ever originate from the relay.
    pub fn is_forwardable(&self) -> bool {
        matches!(
            self,
            SignalingMessage::Invite(_)
                | SignalingMessage::Ok(_)
                | SignalingMessage::IceCandidate(_)
                | SignalingMessage::Bye(_)
        )
    }
}

/// Connection to the signaling relay
///
/// One connection per call, reused for the call's whole lifetime. Messages
/// are delivered in the relay's order; a dropped connection surfaces as
/// [`TransportError::Disconnected`] from [`recv`](SignalingChannel::recv)
/// instead of silently ending the stream.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Ask the relay to put us in `room`
    async fn join(&self, room: &str) -> Result<(), TransportError>;

    /// Send a message to the other member of our room
    async fn send(&self, msg: SignalingMessage) -> Result<(), TransportError>;

    /// Next message from the relay
    async fn recv(&self) -> Result<SignalingMessage, TransportError>;

    /// Drop the relay connection
    async fn close(&self);
}

#[async_trait]
impl<T: SignalingChannel + ?Sized> SignalingChannel for Arc<T> {
    async fn join(&self, room: &str) -> Result<(), TransportError> {
        (**self).join(room).await
    }

    async fn send(&self, msg: SignalingMessage) -> Result<(), TransportError> {
        (**self).send(msg).await
    }

    async fn recv(&self) -> Result<SignalingMessage, TransportError> {
        (**self).recv().await
    }

    async fn close(&self) {
        (**self).close().await
    }
}

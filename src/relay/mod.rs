//! Room-based signaling relay
//!
//! [`RoomHub`] holds the relay-side view of rooms: who is in which room and
//! which membership notification each joiner gets. Rooms hold at most two
//! members. [`MemoryRelay`] connects a call to a hub in the same process;
//! [`server`] exposes a hub over WebSockets.

pub mod server;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, info};

use crate::error::TransportError;
use crate::signaling::{SignalingChannel, SignalingMessage};
use crate::utils::random_id;

/// Maximum members per room
pub const ROOM_CAPACITY: usize = 2;

pub type PeerId = String;

/// Result of a join request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Created,
    Joined,
    Full,
}

struct Member {
    room: Option<String>,
    tx: mpsc::UnboundedSender<SignalingMessage>,
}

#[derive(Default)]
struct HubState {
    rooms: HashMap<String, Vec<PeerId>>,
    members: HashMap<PeerId, Member>,
}

impl HubState {
    fn deliver(&self, peer: &str, msg: SignalingMessage) {
        if let Some(member) = self.members.get(peer) {
            if member.tx.send(msg).is_err() {
                debug!(peer, "relay member went away before delivery");
            }
        }
    }

    // Removes `peer` from its room and returns the member left behind, if any
    fn leave_room(&mut self, peer: &str) -> Option<(String, Option<PeerId>)> {
        let room = self.members.get_mut(peer)?.room.take()?;
        let remaining = match self.rooms.get_mut(&room) {
            Some(occupants) => {
                occupants.retain(|p| p != peer);
                occupants.first().cloned()
            }
            None => None,
        };
        if remaining.is_none() {
            self.rooms.remove(&room);
        }
        Some((room, remaining))
    }
}

#[derive(Default)]
pub struct RoomHub {
    state: Mutex<HubState>,
}

impl RoomHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a new connection; messages for it arrive on the receiver
    pub fn register(&self) -> (PeerId, mpsc::UnboundedReceiver<SignalingMessage>) {
        let peer = random_id();
        let (tx, rx) = mpsc::unbounded_channel();
        self.state()
            .members
            .insert(peer.clone(), Member { room: None, tx });
        (peer, rx)
    }

    /// Put `peer` in `room`.
    ///
    /// The first member gets `created`. The second gets `joined` and the first
    /// is told `new_peer`, which makes it the caller. Anyone after that gets
    /// `full` and the room is left untouched.
    pub fn join(&self, peer: &str, room: &str) -> Result<JoinOutcome, TransportError> {
        let mut state = self.state();
        if !state.members.contains_key(peer) {
            return Err(TransportError::NotConnected);
        }
        let already_here = state
            .members
            .get(peer)
            .and_then(|m| m.room.as_deref())
            .map(|r| r == room)
            .unwrap_or(false);
        if already_here {
            // Repeat the original answer so the client is not left waiting
            let first = state
                .rooms
                .get(room)
                .and_then(|o| o.first())
                .map(|p| p == peer)
                .unwrap_or(false);
            debug!(peer, room, "repeated join, resending membership");
            return Ok(if first {
                state.deliver(peer, SignalingMessage::Created(room.into()));
                JoinOutcome::Created
            } else {
                state.deliver(peer, SignalingMessage::Joined(room.into()));
                JoinOutcome::Joined
            });
        }
        if let Some((old_room, _)) = state.leave_room(peer) {
            debug!(peer, %old_room, "switching rooms");
        }

        let occupants = state.rooms.get(room).cloned().unwrap_or_default();
        let outcome = match occupants.len() {
            0 => JoinOutcome::Created,
            n if n < ROOM_CAPACITY => JoinOutcome::Joined,
            _ => JoinOutcome::Full,
        };

        match outcome {
            JoinOutcome::Full => {
                info!(peer, room, "room full");
                state.deliver(peer, SignalingMessage::Full(room.into()));
            }
            JoinOutcome::Created | JoinOutcome::Joined => {
                state
                    .rooms
                    .entry(room.to_string())
                    .or_default()
                    .push(peer.to_string());
                if let Some(member) = state.members.get_mut(peer) {
                    member.room = Some(room.to_string());
                }
                if outcome == JoinOutcome::Created {
                    info!(peer, room, "room created");
                    state.deliver(peer, SignalingMessage::Created(room.into()));
                } else {
                    info!(peer, room, "room joined");
                    state.deliver(peer, SignalingMessage::Joined(room.into()));
                    for other in occupants {
                        state.deliver(&other, SignalingMessage::NewPeer(room.into()));
                    }
                }
            }
        }
        Ok(outcome)
    }

    /// Pass a peer-to-peer message to the other member of the sender's room.
    /// A `bye` also takes the sender out of the room.
    pub fn forward(&self, from: &str, msg: SignalingMessage) -> Result<(), TransportError> {
        if !msg.is_forwardable() {
            return Err(TransportError::SendFailed(format!(
                "{} is reserved for the relay",
                msg.event_name()
            )));
        }
        let mut state = self.state();
        let room = state
            .members
            .get(from)
            .ok_or(TransportError::NotConnected)?
            .room
            .clone()
            .ok_or(TransportError::NotConnected)?;
        let others: Vec<PeerId> = state
            .rooms
            .get(&room)
            .map(|o| o.iter().filter(|p| p.as_str() != from).cloned().collect())
            .unwrap_or_default();
        if others.is_empty() {
            debug!(from, %room, event = msg.event_name(), "no one to forward to");
        }
        let is_bye = matches!(msg, SignalingMessage::Bye(_));
        for other in &others {
            state.deliver(other, msg.clone());
        }
        if is_bye {
            state.leave_room(from);
        }
        Ok(())
    }

    /// Connection closed. With `notify`, the member left behind gets a `bye`.
    pub fn leave(&self, peer: &str, notify: bool) {
        let mut state = self.state();
        if let Some((room, Some(remaining))) = state.leave_room(peer) {
            if notify {
                state.deliver(&remaining, SignalingMessage::Bye(room));
            }
        }
        state.members.remove(peer);
    }

    pub fn room_members(&self, room: &str) -> Vec<PeerId> {
        self.state().rooms.get(room).cloned().unwrap_or_default()
    }

    pub fn room_count(&self) -> usize {
        self.state().rooms.len()
    }

    /// Open an in-process connection to this hub
    pub fn connect(self: &Arc<Self>) -> MemoryRelay {
        let (peer, rx) = self.register();
        MemoryRelay {
            hub: Arc::clone(self),
            peer,
            rx: AsyncMutex::new(rx),
            connected: AtomicBool::new(true),
        }
    }
}

/// In-process relay connection
pub struct MemoryRelay {
    hub: Arc<RoomHub>,
    peer: PeerId,
    rx: AsyncMutex<mpsc::UnboundedReceiver<SignalingMessage>>,
    connected: AtomicBool,
}

impl MemoryRelay {
    pub fn peer_id(&self) -> &str {
        &self.peer
    }

    /// Simulate the relay dropping this connection
    pub fn sever(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.hub.leave(&self.peer, true);
    }
}

#[async_trait]
impl SignalingChannel for MemoryRelay {
    async fn join(&self, room: &str) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.hub.join(&self.peer, room).map(|_| ())
    }

    async fn send(&self, msg: SignalingMessage) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        self.hub.forward(&self.peer, msg)
    }

    async fn recv(&self) -> Result<SignalingMessage, TransportError> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(TransportError::Disconnected)
    }

    async fn close(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.hub.leave(&self.peer, false);
        }
    }
}

//! Per-call session state
//!
//! One [`Session`] exists per active call. It is owned by the
//! [`Call`](crate::call::Call) and passed by reference into the room
//! coordinator, the negotiator and the data channel bootstrap, so every
//! mutation happens on the call's single event loop.

use tokio::sync::mpsc;

use crate::error::{SessionError, TransportError};
use crate::negotiation::NegotiationState;
use crate::peer::types::{Candidate, ChannelEvent, ChannelState, SessionDescription, TransportEvent};
use crate::signaling::SignalingMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Caller,
    Callee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Negotiating,
    Active,
    Closing,
    Closed,
}

/// What the relay has told us about the room so far
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Joining,
    /// First in the room, waiting for a peer
    Alone,
    /// Second in the room, waiting for the peer's invite
    Paired,
}

/// User actions fed into the call loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    HangUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    GatheringTimeout,
    PeerWaitTimeout,
    /// Carries the grace generation it was armed for
    DisconnectGrace(u64),
}

/// Everything the call loop reacts to, funnelled through one channel
#[derive(Debug)]
pub enum SessionEvent {
    Signal(SignalingMessage),
    SignalingLost(TransportError),
    Transport(TransportEvent),
    Channel(ChannelEvent),
    Command(Command),
    Timer(Timer),
}

pub type EventTx = mpsc::UnboundedSender<SessionEvent>;
pub type EventRx = mpsc::UnboundedReceiver<SessionEvent>;

pub fn event_channel() -> (EventTx, EventRx) {
    mpsc::unbounded_channel()
}

#[derive(Debug, Clone)]
pub struct Session {
    room: String,
    role: Option<Role>,
    state: SessionState,
    membership: Membership,
    negotiation: NegotiationState,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
    pending_local_candidates: Vec<Candidate>,
    remote_candidates: Vec<Candidate>,
    remote_gathering_complete: bool,
    data_channel_state: ChannelState,
    fingerprint: Option<String>,
}

impl Session {
    pub fn new(room: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            role: None,
            state: SessionState::Created,
            membership: Membership::Joining,
            negotiation: NegotiationState::Idle,
            local_description: None,
            remote_description: None,
            pending_local_candidates: Vec::new(),
            remote_candidates: Vec::new(),
            remote_gathering_complete: false,
            data_channel_state: ChannelState::Closed,
            fingerprint: None,
        }
    }

    pub fn room(&self) -> &str {
        &self.room
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// The role is fixed for the lifetime of the session
    pub fn assign_role(&mut self, role: Role) -> Result<(), SessionError> {
        match self.role {
            Some(current) => Err(SessionError::invalid_state(format!(
                "role already assigned as {:?}",
                current
            ))),
            None => {
                self.role = Some(role);
                Ok(())
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, SessionState::Closing | SessionState::Closed)
    }

    pub fn membership(&self) -> Membership {
        self.membership
    }

    pub(crate) fn set_membership(&mut self, membership: Membership) {
        self.membership = membership;
    }

    pub fn negotiation(&self) -> NegotiationState {
        self.negotiation
    }

    pub(crate) fn set_negotiation(&mut self, state: NegotiationState) {
        self.negotiation = state;
    }

    pub fn local_description(&self) -> Option<&SessionDescription> {
        self.local_description.as_ref()
    }

    pub fn remote_description(&self) -> Option<&SessionDescription> {
        self.remote_description.as_ref()
    }

    pub fn set_local_description(&mut self, desc: SessionDescription) -> Result<(), SessionError> {
        if self.local_description.is_some() {
            return Err(SessionError::invalid_state(
                "local description already committed",
            ));
        }
        self.local_description = Some(desc);
        Ok(())
    }

    pub fn set_remote_description(&mut self, desc: SessionDescription) -> Result<(), SessionError> {
        if self.remote_description.is_some() {
            return Err(SessionError::invalid_state(
                "remote description already committed",
            ));
        }
        self.remote_description = Some(desc);
        Ok(())
    }

    /// Both descriptions are committed
    pub fn is_negotiated(&self) -> bool {
        self.local_description.is_some() && self.remote_description.is_some()
    }

    pub fn pending_local_candidates(&self) -> &[Candidate] {
        &self.pending_local_candidates
    }

    pub(crate) fn push_local_candidate(&mut self, candidate: Candidate) {
        self.pending_local_candidates.push(candidate);
    }

    pub fn remote_candidates(&self) -> &[Candidate] {
        &self.remote_candidates
    }

    pub fn remote_gathering_complete(&self) -> bool {
        self.remote_gathering_complete
    }

    /// Record a candidate streamed by the peer.
    ///
    /// Returns `Ok(true)` when the candidate is new and must be handed to the
    /// transport, `Ok(false)` for duplicates and end-of-candidates markers.
    pub fn add_remote_candidate(&mut self, candidate: Candidate) -> Result<bool, SessionError> {
        if self.remote_description.is_none() {
            return Err(SessionError::invalid_state(
                "candidate received before remote description",
            ));
        }
        if candidate.is_terminal() {
            self.remote_gathering_complete = true;
            return Ok(false);
        }
        if self.remote_candidates.contains(&candidate) {
            return Ok(false);
        }
        self.remote_candidates.push(candidate);
        Ok(true)
    }

    pub fn data_channel_state(&self) -> ChannelState {
        self.data_channel_state
    }

    pub(crate) fn set_data_channel_state(&mut self, state: ChannelState) {
        self.data_channel_state = state;
    }

    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    pub(crate) fn set_fingerprint(&mut self, fingerprint: Option<String>) {
        self.fingerprint = fingerprint;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(n: u8) -> Candidate {
        Candidate::new(format!("candidate:{n} 1 udp 2122 10.0.0.{n} 5000 typ host"))
    }

    #[test]
    fn descriptions_are_set_once() {
        let mut session = Session::new("r1");
        session
            .set_local_description(SessionDescription::offer("v=0"))
            .unwrap();
        let err = session
            .set_local_description(SessionDescription::offer("v=1"))
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidState(_)));
        assert_eq!(session.local_description().unwrap().sdp, "v=0");

        session
            .set_remote_description(SessionDescription::answer("v=0"))
            .unwrap();
        assert!(session
            .set_remote_description(SessionDescription::answer("v=2"))
            .is_err());
        assert!(session.is_negotiated());
    }

    #[test]
    fn candidates_before_remote_description_are_rejected() {
        let mut session = Session::new("r1");
        let err = session.add_remote_candidate(host(1)).unwrap_err();
        assert!(matches!(err, SessionError::InvalidState(_)));
        assert!(session.remote_candidates().is_empty());
    }

    #[test]
    fn duplicate_candidates_are_a_no_op() {
        let mut session = Session::new("r1");
        session
            .set_remote_description(SessionDescription::offer("v=0"))
            .unwrap();
        assert!(session.add_remote_candidate(host(1)).unwrap());
        assert!(!session.add_remote_candidate(host(1)).unwrap());
        assert!(session.add_remote_candidate(host(2)).unwrap());
        assert_eq!(session.remote_candidates().len(), 2);

        assert!(!session
            .add_remote_candidate(Candidate::end_of_candidates())
            .unwrap());
        assert!(session.remote_gathering_complete());
        assert_eq!(session.remote_candidates().len(), 2);
    }

    #[test]
    fn role_is_fixed() {
        let mut session = Session::new("r1");
        session.assign_role(Role::Caller).unwrap();
        assert!(session.assign_role(Role::Callee).is_err());
        assert_eq!(session.role(), Some(Role::Caller));
    }
}

//! Room coordinator: turns relay membership notifications into roles
//!
//! The first member of a room waits. The second one waits too, for the
//! invite. The relay tells the first member about the second with
//! `new_peer`, and that member becomes the caller.

use tracing::{info, warn};

use crate::error::SessionError;
use crate::session::{Membership, Role, Session, SessionState};
use crate::signaling::SignalingMessage;

/// What the call should do after a membership notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomAction {
    Wait,
    /// Start negotiating as the caller
    BecomeCaller,
}

fn check_room(session: &Session, room: &str, event: &str) -> Result<(), SessionError> {
    if !room.is_empty() && room != session.room() {
        return Err(SessionError::invalid_state(format!(
            "{} for room {} but session is in {}",
            event,
            room,
            session.room()
        )));
    }
    Ok(())
}

/// Apply a membership notification (`created`, `joined`, `full`,
/// `new_peer`) to the session.
///
/// `full` comes back as [`SessionError::RoomFull`]; any other message is
/// not a membership notification and is rejected as invalid state.
pub fn on_membership(
    session: &mut Session,
    msg: &SignalingMessage,
) -> Result<RoomAction, SessionError> {
    match msg {
        SignalingMessage::Created(room) => {
            check_room(session, room, "created")?;
            expect_joining(session, "created")?;
            info!(room = %session.room(), "created room, waiting for a peer");
            session.set_membership(Membership::Alone);
            Ok(RoomAction::Wait)
        }
        SignalingMessage::Joined(room) => {
            check_room(session, room, "joined")?;
            expect_joining(session, "joined")?;
            info!(room = %session.room(), "joined room, waiting for the invite");
            session.set_membership(Membership::Paired);
            Ok(RoomAction::Wait)
        }
        SignalingMessage::Full(room) => {
            warn!(%room, "room is full");
            let room = if room.is_empty() {
                session.room().to_string()
            } else {
                room.clone()
            };
            Err(SessionError::RoomFull(room))
        }
        SignalingMessage::NewPeer(room) => {
            check_room(session, room, "new_peer")?;
            if session.membership() != Membership::Alone
                || session.state() != SessionState::Created
            {
                return Err(SessionError::invalid_state(format!(
                    "new_peer while {:?} and {:?}",
                    session.membership(),
                    session.state()
                )));
            }
            session.assign_role(Role::Caller)?;
            session.set_membership(Membership::Paired);
            info!(room = %session.room(), "peer arrived, calling");
            Ok(RoomAction::BecomeCaller)
        }
        other => Err(SessionError::invalid_state(format!(
            "{} is not a room notification",
            other.event_name()
        ))),
    }
}

fn expect_joining(session: &Session, event: &str) -> Result<(), SessionError> {
    if session.membership() != Membership::Joining {
        return Err(SessionError::invalid_state(format!(
            "{} while already {:?}",
            event,
            session.membership()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_member_becomes_caller_on_new_peer() {
        let mut a = Session::new("r1");
        assert_eq!(
            on_membership(&mut a, &SignalingMessage::Created("r1".into())).unwrap(),
            RoomAction::Wait
        );
        assert_eq!(a.membership(), Membership::Alone);
        assert_eq!(
            on_membership(&mut a, &SignalingMessage::NewPeer("r1".into())).unwrap(),
            RoomAction::BecomeCaller
        );
        assert_eq!(a.role(), Some(Role::Caller));
        assert_eq!(a.membership(), Membership::Paired);
    }

    #[test]
    fn joiner_waits_without_a_role() {
        let mut b = Session::new("r1");
        assert_eq!(
            on_membership(&mut b, &SignalingMessage::Joined("r1".into())).unwrap(),
            RoomAction::Wait
        );
        assert_eq!(b.role(), None);

        let err = on_membership(&mut b, &SignalingMessage::NewPeer("r1".into())).unwrap_err();
        assert!(matches!(err, SessionError::InvalidState(_)));
        assert_eq!(b.role(), None);
    }

    #[test]
    fn full_room_is_fatal() {
        let mut c = Session::new("r1");
        let err = on_membership(&mut c, &SignalingMessage::Full("r1".into())).unwrap_err();
        assert_eq!(err, SessionError::RoomFull("r1".into()));
        assert!(err.is_fatal());
    }

    #[test]
    fn notifications_for_other_rooms_are_discarded() {
        let mut a = Session::new("r1");
        let err = on_membership(&mut a, &SignalingMessage::Created("r2".into())).unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(a.membership(), Membership::Joining);
    }

    #[test]
    fn duplicate_new_peer_is_rejected() {
        let mut a = Session::new("r1");
        on_membership(&mut a, &SignalingMessage::Created("r1".into())).unwrap();
        on_membership(&mut a, &SignalingMessage::NewPeer("r1".into())).unwrap();
        assert!(on_membership(&mut a, &SignalingMessage::NewPeer("r1".into())).is_err());
        assert_eq!(a.role(), Some(Role::Caller));
    }
}

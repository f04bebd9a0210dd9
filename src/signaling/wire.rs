//! JSON framing of relay events
//!
//! Every frame is `{"event": <name>, "data": <payload>}`, the shape a
//! socket.io style relay uses for `emit(event, payload)`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::SignalingMessage;
use crate::error::TransportError;

pub const EVENT_JOIN: &str = "join";
pub const EVENT_CREATED: &str = "created";
pub const EVENT_JOINED: &str = "joined";
pub const EVENT_FULL: &str = "full";
pub const EVENT_NEW_PEER: &str = "new_peer";
pub const EVENT_INVITE: &str = "invite";
pub const EVENT_OK: &str = "ok";
pub const EVENT_ICE_CANDIDATE: &str = "ice_candidate";
pub const EVENT_BYE: &str = "bye";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

/// A decoded frame: either a join request or a signaling message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Join(String),
    Message(SignalingMessage),
}

fn codec_err(event: &str, err: impl std::fmt::Display) -> TransportError {
    TransportError::Codec(format!("{}: {}", event, err))
}

// Room payloads may be absent (e.g. a bare `bye`)
fn room_of(data: &Value) -> String {
    match data {
        Value::String(s) => s.clone(),
        _ => String::new(),
    }
}

pub fn encode_join(room: &str) -> Result<String, TransportError> {
    let env = Envelope {
        event: EVENT_JOIN.into(),
        data: Value::String(room.into()),
    };
    serde_json::to_string(&env).map_err(|e| codec_err(EVENT_JOIN, e))
}

pub fn encode(msg: &SignalingMessage) -> Result<String, TransportError> {
    let event = msg.event_name();
    let data = match msg {
        SignalingMessage::Created(room)
        | SignalingMessage::Joined(room)
        | SignalingMessage::Full(room)
        | SignalingMessage::NewPeer(room)
        | SignalingMessage::Bye(room) => Value::String(room.clone()),
        SignalingMessage::Invite(desc) | SignalingMessage::Ok(desc) => {
            serde_json::to_value(desc).map_err(|e| codec_err(event, e))?
        }
        SignalingMessage::IceCandidate(c) => {
            serde_json::to_value(c).map_err(|e| codec_err(event, e))?
        }
    };
    let env = Envelope {
        event: event.into(),
        data,
    };
    serde_json::to_string(&env).map_err(|e| codec_err(event, e))
}

pub fn decode(text: &str) -> Result<Frame, TransportError> {
    let env: Envelope = serde_json::from_str(text).map_err(|e| codec_err("frame", e))?;
    let event = env.event.as_str();
    let msg = match event {
        EVENT_JOIN => {
            let room = room_of(&env.data);
            if room.is_empty() {
                return Err(codec_err(event, "missing room"));
            }
            return Ok(Frame::Join(room));
        }
        EVENT_CREATED => SignalingMessage::Created(room_of(&env.data)),
        EVENT_JOINED => SignalingMessage::Joined(room_of(&env.data)),
        EVENT_FULL => SignalingMessage::Full(room_of(&env.data)),
        EVENT_NEW_PEER => SignalingMessage::NewPeer(room_of(&env.data)),
        EVENT_BYE => SignalingMessage::Bye(room_of(&env.data)),
        EVENT_INVITE => SignalingMessage::Invite(
            serde_json::from_value(env.data).map_err(|e| codec_err(event, e))?,
        ),
        EVENT_OK => SignalingMessage::Ok(
            serde_json::from_value(env.data).map_err(|e| codec_err(event, e))?,
        ),
        EVENT_ICE_CANDIDATE => SignalingMessage::IceCandidate(
            serde_json::from_value(env.data).map_err(|e| codec_err(event, e))?,
        ),
        other => return Err(codec_err(other, "unknown event")),
    };
    Ok(Frame::Message(msg))
}

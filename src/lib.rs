pub mod call;
pub mod capture;
pub mod channel;
pub mod config;
pub mod error;
pub mod logger;
pub mod mock;
pub mod negotiation;
pub mod peer;
pub mod relay;
pub mod room;
pub mod session;
pub mod signaling;
pub mod sink;
pub mod utils;

pub use call::{Call, CallHandle, Teardown};
pub use config::{Config, LogConfig, MediaConstraints, ServerConfig};
pub use error::{SessionError, TransportError};
pub use session::{Role, Session, SessionState};
pub use signaling::{SignalingChannel, SignalingMessage};

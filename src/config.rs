use crate::error::SessionError;
use crate::utils::add_ice_url_scheme;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use webrtc::ice_transport::ice_server::RTCIceServer;

// Debug builds log by default, release builds stay quiet unless asked to.
#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true;

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false;

pub const DEFAULT_STUN_SERVERS: [&str; 2] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
];

/// ICE server configuration
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub id: String,
    pub r#type: String, // 'stun' or 'turn'
    pub url: String,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), SessionError> {
        if self.url.is_empty() {
            return Err(SessionError::Config(format!(
                "ICE server {} has an empty URL",
                self.id
            )));
        }
        if self.r#type == "turn" && (self.username.is_none() || self.credential.is_none()) {
            return Err(SessionError::Config(format!(
                "TURN server {} requires username and credential",
                self.id
            )));
        }
        Ok(())
    }

    pub fn to_rtc(&self) -> RTCIceServer {
        RTCIceServer {
            urls: vec![add_ice_url_scheme(self)],
            username: self.username.clone().unwrap_or_default(),
            credential: self.credential.clone().unwrap_or_default(),
        }
    }
}

pub fn default_ice_servers() -> Vec<ServerConfig> {
    DEFAULT_STUN_SERVERS
        .iter()
        .enumerate()
        .map(|(i, url)| ServerConfig {
            id: format!("default-stun-{}", i),
            r#type: "stun".into(),
            url: (*url).into(),
            username: None,
            credential: None,
        })
        .collect()
}

/// What to ask the capture device for
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

impl MediaConstraints {
    pub fn none() -> Self {
        Self {
            audio: false,
            video: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.audio && !self.video
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    pub enabled: bool,
    /// Default filter directive, `RUST_LOG` takes precedence
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: LOGGING_ENABLED,
            filter: "roomcall_lib=debug,roomcall=debug,webrtc=warn".into(),
        }
    }
}

/// Configuration for one call
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    /// Relay WebSocket URL
    pub signaling_url: String,
    /// Room to join, a random one is generated when absent
    pub room: Option<String>,
    pub ice_servers: Vec<ServerConfig>,
    /// Caller sends its offer after this long even if gathering has not finished (ms)
    pub gather_timeout_ms: u64,
    /// Give up when nobody joins the room within this long (ms)
    pub peer_wait_timeout_ms: Option<u64>,
    /// How long a disconnected transport may take to come back (ms)
    pub disconnect_grace_ms: u64,
    /// Stream the callee's own candidates as `ice_candidate` messages
    pub stream_callee_candidates: bool,
    pub channel_label: String,
    pub media: MediaConstraints,
    pub log: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            signaling_url: "ws://127.0.0.1:8080".into(),
            room: None,
            ice_servers: default_ice_servers(),
            gather_timeout_ms: 10_000,
            peer_wait_timeout_ms: None,
            disconnect_grace_ms: 10_000,
            stream_callee_candidates: false,
            channel_label: "chat".into(),
            media: MediaConstraints::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), SessionError> {
        let url = url::Url::parse(&self.signaling_url)
            .map_err(|e| SessionError::Config(format!("bad signaling URL: {}", e)))?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(SessionError::Config(format!(
                "signaling URL must use ws or wss, got {}",
                url.scheme()
            )));
        }
        if let Some(room) = &self.room {
            if room.trim().is_empty() {
                return Err(SessionError::Config("room name is empty".into()));
            }
        }
        if self.channel_label.is_empty() {
            return Err(SessionError::Config("data channel label is empty".into()));
        }
        for server in &self.ice_servers {
            server.validate()?;
        }
        Ok(())
    }

    pub fn gather_timeout(&self) -> Duration {
        Duration::from_millis(self.gather_timeout_ms)
    }

    pub fn peer_wait_timeout(&self) -> Option<Duration> {
        self.peer_wait_timeout_ms.map(Duration::from_millis)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }

    pub fn rtc_ice_servers(&self) -> Vec<RTCIceServer> {
        self.ice_servers.iter().map(ServerConfig::to_rtc).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.rtc_ice_servers().len(), 2);
        assert_eq!(config.gather_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn turn_without_credentials_is_rejected() {
        let mut config = Config::default();
        config.ice_servers.push(ServerConfig {
            id: "relay".into(),
            r#type: "turn".into(),
            url: "turn.example.org:3478".into(),
            username: Some("user".into()),
            credential: None,
        });
        assert!(matches!(config.validate(), Err(SessionError::Config(_))));
    }

    #[test]
    fn signaling_url_must_be_websocket() {
        let config = Config {
            signaling_url: "http://relay.example.org".into(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn ice_servers_load_from_json() {
        let json = r#"[{"id":"t","type":"turn","url":"turn.example.org","username":"u","credential":"c"}]"#;
        let servers: Vec<ServerConfig> = serde_json::from_str(json).unwrap();
        let rtc = servers[0].to_rtc();
        assert_eq!(rtc.urls, vec!["turn:turn.example.org".to_string()]);
        assert_eq!(rtc.username, "u");
    }
}

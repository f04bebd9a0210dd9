//! Local media capture
//!
//! Camera first, screen capture when the camera is unavailable.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::config::MediaConstraints;
use crate::error::SessionError;
use crate::peer::types::{MediaSource, MediaTrack, SourceKind, TrackKind};
use crate::utils::random_id;

#[async_trait]
pub trait MediaCapture: Send + Sync {
    async fn camera(&self, constraints: MediaConstraints) -> Result<MediaSource, SessionError>;

    async fn screen(&self, constraints: MediaConstraints) -> Result<MediaSource, SessionError>;
}

/// Acquire local media for a call.
///
/// `Ok(None)` when no media was requested. Fails with
/// [`SessionError::CapabilityUnavailable`] only when both camera and screen
/// capture fail.
pub async fn acquire(
    capture: &dyn MediaCapture,
    constraints: MediaConstraints,
) -> Result<Option<MediaSource>, SessionError> {
    if constraints.is_empty() {
        info!("no local media requested");
        return Ok(None);
    }
    let camera_err = match capture.camera(constraints).await {
        Ok(source) => return Ok(Some(source)),
        Err(e) => e,
    };
    warn!("camera capture failed ({}), trying screen capture", camera_err);
    match capture.screen(constraints).await {
        Ok(source) => Ok(Some(source)),
        Err(screen_err) => Err(SessionError::CapabilityUnavailable(format!(
            "camera: {}; screen: {}",
            camera_err, screen_err
        ))),
    }
}

fn tracks_for(constraints: MediaConstraints) -> Vec<std::sync::Arc<MediaTrack>> {
    let mut tracks = Vec::new();
    if constraints.audio {
        tracks.push(MediaTrack::new(format!("audio-{}", random_id()), TrackKind::Audio));
    }
    if constraints.video {
        tracks.push(MediaTrack::new(format!("video-{}", random_id()), TrackKind::Video));
    }
    tracks
}

/// Capture without devices: hands out silent tracks so the transport still
/// negotiates audio and video.
#[derive(Debug, Default, Clone, Copy)]
pub struct SyntheticCapture;

#[async_trait]
impl MediaCapture for SyntheticCapture {
    async fn camera(&self, constraints: MediaConstraints) -> Result<MediaSource, SessionError> {
        Ok(MediaSource::new(
            format!("camera-{}", random_id()),
            SourceKind::Camera,
            tracks_for(constraints),
        ))
    }

    async fn screen(&self, constraints: MediaConstraints) -> Result<MediaSource, SessionError> {
        let constraints = MediaConstraints {
            audio: false,
            video: constraints.video || constraints.audio,
        };
        Ok(MediaSource::new(
            format!("screen-{}", random_id()),
            SourceKind::Screen,
            tracks_for(constraints),
        ))
    }
}

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use super::data_channel::attach_dc;
use super::ice;
use super::transport::{DataChannel, MediaTransport, TransportFactory};
use super::types::{
    Candidate, ConnectionState, MediaSource, MediaTrack, SdpType, SessionDescription, SourceKind,
    TrackKind, TransportEvent,
};
use crate::config::Config;
use crate::error::TransportError;
use crate::logger::dump_candidate;
use crate::session::{EventTx, SessionEvent};

fn engine_err(e: webrtc::Error) -> TransportError {
    TransportError::ConnectionFailed(e.to_string())
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, TransportError> {
    let rtc = match desc.sdp_type {
        SdpType::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpType::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    rtc.map_err(|e| TransportError::Codec(e.to_string()))
}

fn from_rtc(desc: RTCSessionDescription) -> Option<SessionDescription> {
    match desc.sdp_type {
        RTCSdpType::Offer => Some(SessionDescription::offer(desc.sdp)),
        RTCSdpType::Answer => Some(SessionDescription::answer(desc.sdp)),
        other => {
            warn!("unexpected description type {:?}", other);
            None
        }
    }
}

fn map_state(st: RTCPeerConnectionState) -> ConnectionState {
    match st {
        RTCPeerConnectionState::Connecting => ConnectionState::Connecting,
        RTCPeerConnectionState::Connected => ConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => ConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => ConnectionState::Failed,
        RTCPeerConnectionState::Closed => ConnectionState::Closed,
        _ => ConnectionState::New,
    }
}

/// Builds the peer connection configuration from the call config
fn rtc_config(config: &Config) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: config.rtc_ice_servers(),
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

/// Peer connection backed by the `webrtc` crate
pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    events: EventTx,
}

impl WebRtcTransport {
    pub async fn new(config: &Config, events: EventTx) -> Result<Self, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(engine_err)?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(engine_err)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();
        let pc = Arc::new(
            api.new_peer_connection(rtc_config(config))
                .await
                .map_err(engine_err)?,
        );

        pc.on_ice_candidate(Box::new({
            let events = events.clone();
            move |cand: Option<RTCIceCandidate>| {
                match cand {
                    Some(c) => {
                        if let Some(c) = ice::from_rtc(&c) {
                            dump_candidate("LOCAL", &c);
                            let _ = events.send(SessionEvent::Transport(
                                TransportEvent::LocalCandidate(Some(c)),
                            ));
                        }
                    }
                    None => {
                        debug!("ICE candidate gathering completed");
                        let _ = events
                            .send(SessionEvent::Transport(TransportEvent::LocalCandidate(None)));
                    }
                }
                Box::pin(async {})
            }
        }));

        pc.on_ice_gathering_state_change(Box::new(move |state| {
            debug!("ICE gathering state changed to: {:?}", state);
            Box::pin(async {})
        }));

        pc.on_peer_connection_state_change(Box::new({
            let events = events.clone();
            move |st: RTCPeerConnectionState| {
                info!("peer connection state changed to: {:?}", st);
                let _ = events.send(SessionEvent::Transport(TransportEvent::ConnectionState(
                    map_state(st),
                )));
                Box::pin(async {})
            }
        }));

        pc.on_data_channel(Box::new({
            let events = events.clone();
            move |dc: Arc<RTCDataChannel>| {
                let channel: Arc<dyn DataChannel> = attach_dc(&dc, events.clone());
                let _ = events.send(SessionEvent::Transport(TransportEvent::RemoteDataChannel(
                    channel,
                )));
                Box::pin(async {})
            }
        }));

        pc.on_track(Box::new({
            let events = events.clone();
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let kind = match track.kind() {
                    RTPCodecType::Audio => TrackKind::Audio,
                    _ => TrackKind::Video,
                };
                let source = MediaSource::new(
                    track.stream_id(),
                    SourceKind::Remote,
                    vec![MediaTrack::new(track.id(), kind)],
                );
                let _ = events.send(SessionEvent::Transport(TransportEvent::RemoteTrack(source)));
                Box::pin(async {})
            }
        }));

        Ok(Self { pc, events })
    }
}

#[async_trait]
impl MediaTransport for WebRtcTransport {
    async fn add_track(
        &self,
        source: &MediaSource,
        track: &Arc<MediaTrack>,
    ) -> Result<(), TransportError> {
        let mime_type = match track.kind {
            TrackKind::Audio => MIME_TYPE_OPUS,
            TrackKind::Video => MIME_TYPE_VP8,
        };
        let local = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: mime_type.to_owned(),
                ..Default::default()
            },
            track.id.clone(),
            source.id.clone(),
        ));
        self.pc
            .add_track(local as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(engine_err)?;
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        let offer = self.pc.create_offer(None).await.map_err(engine_err)?;
        from_rtc(offer).ok_or_else(|| TransportError::Codec("offer has no type".into()))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let answer = self.pc.create_answer(None).await.map_err(engine_err)?;
        from_rtc(answer).ok_or_else(|| TransportError::Codec("answer has no type".into()))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        self.pc
            .set_local_description(to_rtc(desc)?)
            .await
            .map_err(engine_err)
    }

    async fn set_remote_description(
        &self,
        desc: SessionDescription,
    ) -> Result<(), TransportError> {
        self.pc
            .set_remote_description(to_rtc(desc)?)
            .await
            .map_err(engine_err)
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.pc.local_description().await.and_then(from_rtc)
    }

    async fn add_remote_candidate(&self, candidate: Candidate) -> Result<(), TransportError> {
        dump_candidate("REMOTE", &candidate);
        self.pc
            .add_ice_candidate(ice::to_init(candidate))
            .await
            .map_err(engine_err)
    }

    async fn create_data_channel(
        &self,
        label: &str,
    ) -> Result<Arc<dyn DataChannel>, TransportError> {
        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let dc = self
            .pc
            .create_data_channel(label, Some(init))
            .await
            .map_err(engine_err)?;
        Ok(attach_dc(&dc, self.events.clone()))
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!("closing peer connection failed: {}", e);
        }
    }
}

/// Creates `webrtc` crate peer connections
#[derive(Debug, Default, Clone, Copy)]
pub struct WebRtcFactory;

#[async_trait]
impl TransportFactory for WebRtcFactory {
    async fn create_session(
        &self,
        config: &Config,
        events: EventTx,
    ) -> Result<Arc<dyn MediaTransport>, TransportError> {
        let transport = WebRtcTransport::new(config, events).await?;
        Ok(Arc::new(transport))
    }
}

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;

use super::transport::DataChannel;
use super::types::ChannelEvent;
use crate::error::TransportError;
use crate::session::{EventTx, SessionEvent};

/// Data channel backed by the `webrtc` crate
pub struct WebRtcDataChannel {
    dc: Arc<RTCDataChannel>,
    label: String,
}

/// Wire the channel's open/message/close callbacks into the call's event
/// queue. Must run right after the channel is created or received so no
/// early event is dropped.
pub fn attach_dc(dc: &Arc<RTCDataChannel>, events: EventTx) -> Arc<WebRtcDataChannel> {
    let label = dc.label().to_string();
    debug!(%label, "attaching data channel handlers");

    dc.on_open(Box::new({
        let events = events.clone();
        let label = label.clone();
        move || {
            debug!(%label, "data channel open");
            let _ = events.send(SessionEvent::Channel(ChannelEvent::Open));
            Box::pin(async {})
        }
    }));

    dc.on_message(Box::new({
        let events = events.clone();
        move |msg: DataChannelMessage| {
            let text = String::from_utf8_lossy(&msg.data).into_owned();
            if !msg.is_string {
                debug!("binary data channel message, {} bytes", msg.data.len());
            }
            let _ = events.send(SessionEvent::Channel(ChannelEvent::Message(text)));
            Box::pin(async {})
        }
    }));

    dc.on_close(Box::new({
        let label = label.clone();
        move || {
            debug!(%label, "data channel closed");
            let _ = events.send(SessionEvent::Channel(ChannelEvent::Closed));
            Box::pin(async {})
        }
    }));

    Arc::new(WebRtcDataChannel {
        dc: Arc::clone(dc),
        label,
    })
}

#[async_trait]
impl DataChannel for WebRtcDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        self.dc
            .send_text(text.to_owned())
            .await
            .map(|_| ())
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&self) {
        if let Err(e) = self.dc.close().await {
            warn!(label = %self.label, "closing data channel failed: {}", e);
        }
    }
}

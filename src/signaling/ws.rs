use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

use super::wire::{self, Frame};
use super::{SignalingChannel, SignalingMessage};
use crate::error::TransportError;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Relay connection over a WebSocket
pub struct WebSocketSignaling {
    send_tx: Mutex<Option<mpsc::UnboundedSender<String>>>,
    inbound_rx: AsyncMutex<mpsc::UnboundedReceiver<Result<SignalingMessage, TransportError>>>,
    closed: AtomicBool,
    writer: Mutex<Option<JoinHandle<()>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketSignaling {
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{}: {}", url, e)))?;
        debug!(url, "signaling websocket connected");
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let (send_tx, mut send_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let writer = tokio::spawn(async move {
            while let Some(text) = send_rx.recv().await {
                if let Err(e) = ws_write.send(Message::text(text)).await {
                    warn!("signaling websocket write failed: {}", e);
                    break;
                }
            }
            if let Err(e) = ws_write.close().await {
                debug!("signaling websocket close: {}", e);
            }
        });

        let reader = tokio::spawn(async move {
            while let Some(msg) = ws_read.next().await {
                let msg = match msg {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!("signaling websocket error: {}", e);
                        let _ = inbound_tx.send(Err(TransportError::ConnectionFailed(e.to_string())));
                        return;
                    }
                };
                match msg {
                    Message::Text(_) | Message::Binary(_) => {
                        let text = match msg.to_text() {
                            Ok(text) => text,
                            Err(e) => {
                                warn!("dropping non-utf8 signaling frame: {}", e);
                                continue;
                            }
                        };
                        match wire::decode(text) {
                            Ok(Frame::Message(m)) => {
                                if inbound_tx.send(Ok(m)).is_err() {
                                    return;
                                }
                            }
                            Ok(Frame::Join(_)) => warn!("relay sent a join frame, ignoring"),
                            Err(e) => warn!("dropping undecodable signaling frame: {}", e),
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            debug!("signaling websocket closed by relay");
            let _ = inbound_tx.send(Err(TransportError::Disconnected));
        });

        Ok(Self {
            send_tx: Mutex::new(Some(send_tx)),
            inbound_rx: AsyncMutex::new(inbound_rx),
            closed: AtomicBool::new(false),
            writer: Mutex::new(Some(writer)),
            reader: Mutex::new(Some(reader)),
        })
    }

    fn push(&self, text: String) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::NotConnected);
        }
        let tx = self.send_tx.lock().ok().and_then(|guard| guard.clone());
        match tx {
            Some(tx) => tx.send(text).map_err(|_| TransportError::Disconnected),
            None => Err(TransportError::NotConnected),
        }
    }
}

#[async_trait]
impl SignalingChannel for WebSocketSignaling {
    async fn join(&self, room: &str) -> Result<(), TransportError> {
        debug!(room, "joining room");
        self.push(wire::encode_join(room)?)
    }

    async fn send(&self, msg: SignalingMessage) -> Result<(), TransportError> {
        debug!(event = msg.event_name(), "sending signaling message");
        self.push(wire::encode(&msg)?)
    }

    async fn recv(&self) -> Result<SignalingMessage, TransportError> {
        let mut rx = self.inbound_rx.lock().await;
        match rx.recv().await {
            Some(result) => result,
            None => Err(TransportError::Disconnected),
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Dropping the last sender lets the writer drain its queue and
        // send a Close frame.
        let sender = self.send_tx.lock().ok().and_then(|mut guard| guard.take());
        drop(sender);
        let writer = self.writer.lock().ok().and_then(|mut guard| guard.take());
        if let Some(mut writer) = writer {
            if tokio::time::timeout(FLUSH_TIMEOUT, &mut writer).await.is_err() {
                warn!("signaling writer did not flush in time, aborting");
                writer.abort();
            }
        }
        let reader = self.reader.lock().ok().and_then(|mut guard| guard.take());
        if let Some(reader) = reader {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    #[tokio::test]
    async fn close_flushes_queued_frames_and_sends_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let mut texts = Vec::new();
            let mut saw_close = false;
            while let Some(Ok(msg)) = ws.next().await {
                match msg {
                    Message::Text(t) => texts.push(t.as_str().to_string()),
                    Message::Close(_) => {
                        saw_close = true;
                        break;
                    }
                    _ => {}
                }
            }
            (texts, saw_close)
        });

        let client = WebSocketSignaling::connect(&url).await.unwrap();
        client.join("r1").await.unwrap();
        client.send(SignalingMessage::Bye("r1".into())).await.unwrap();
        client.close().await;

        let (texts, saw_close) = server.await.unwrap();
        assert_eq!(texts.len(), 2);
        assert_eq!(
            wire::decode(&texts[1]).unwrap(),
            Frame::Message(SignalingMessage::Bye("r1".into()))
        );
        assert!(saw_close);
        assert!(matches!(
            client.send(SignalingMessage::Bye("r1".into())).await,
            Err(TransportError::NotConnected)
        ));
    }
}

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::RoomHub;
use crate::signaling::wire::{self, Frame};

/// Accept relay connections until the listener fails
pub async fn serve(listener: TcpListener, hub: Arc<RoomHub>) -> std::io::Result<()> {
    info!("relay listening on {}", listener.local_addr()?);
    loop {
        let (stream, addr) = listener.accept().await?;
        let hub = Arc::clone(&hub);
        tokio::spawn(async move {
            handle_connection(stream, addr, hub).await;
        });
    }
}

async fn handle_connection(stream: TcpStream, addr: SocketAddr, hub: Arc<RoomHub>) {
    let ws = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%addr, "websocket handshake failed: {}", e);
            return;
        }
    };
    let (mut ws_write, mut ws_read) = ws.split();
    let (peer, mut outbound) = hub.register();
    debug!(%addr, %peer, "relay client connected");

    let writer_peer = peer.clone();
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            let text = match wire::encode(&msg) {
                Ok(text) => text,
                Err(e) => {
                    warn!(peer = %writer_peer, "cannot encode {}: {}", msg.event_name(), e);
                    continue;
                }
            };
            if ws_write.send(Message::text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = ws_read.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                debug!(%peer, "relay client read error: {}", e);
                break;
            }
        };
        if msg.is_close() {
            break;
        }
        if !(msg.is_text() || msg.is_binary()) {
            continue;
        }
        let text = match msg.to_text() {
            Ok(text) => text,
            Err(_) => continue,
        };
        let result = match wire::decode(text) {
            Ok(Frame::Join(room)) => hub.join(&peer, &room).map(|_| ()),
            Ok(Frame::Message(m)) => hub.forward(&peer, m),
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!(%peer, "rejected relay frame: {}", e);
        }
    }

    debug!(%peer, "relay client disconnected");
    hub.leave(&peer, true);
    writer.abort();
}

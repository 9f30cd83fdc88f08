use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::net::message::Message;
use crate::net::registry::ChannelHandle;
use crate::net::router::{MessageRouter, ServerContext};

/// WebSocket listener for worker and client connections.
///
/// Each accepted socket gets two tasks: a reader that decodes frames and
/// feeds the router, and a writer that drains the connection's outbound
/// channel. The outbound channel's sender is what the registry hands to the
/// enforcer.
pub struct SocketServer {
    addr: SocketAddr,
    ctx: Arc<ServerContext>,
}

impl SocketServer {
    pub fn new(addr: SocketAddr, ctx: Arc<ServerContext>) -> Self {
        Self { addr, ctx }
    }

    /// Accept connections until the shutdown token fires.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        tracing::info!(addr = %self.addr, "Listening for worker connections");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Listener stopping");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let ctx = self.ctx.clone();
                            tokio::spawn(async move {
                                handle_connection(ctx, stream, peer).await;
                            });
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Drive one connection from handshake to disconnect.
async fn handle_connection(ctx: Arc<ServerContext>, stream: TcpStream, peer: SocketAddr) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!(peer = %peer, error = %e, "WebSocket handshake failed");
            return;
        }
    };

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
    let channel = ChannelHandle::new(outbound_tx);
    let connection_id = channel.connection_id();
    tracing::info!(peer = %peer, connection = %connection_id, "Connection opened");

    let (mut sink, mut frames) = ws.split();

    // Writer: serialize queued messages onto the socket. Ends when every
    // sender clone (local handle + any registry binding) is gone.
    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize outbound message");
                    continue;
                }
            };
            if let Err(e) = sink.send(WsMessage::Text(text)).await {
                tracing::debug!(error = %e, "Outbound socket write failed");
                break;
            }
        }
    });

    let router = MessageRouter::new(ctx.clone());
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => {
                let message = match serde_json::from_str::<Message>(&text) {
                    Ok(message) => message,
                    Err(e) => {
                        // Fatal for this frame only; the connection stays up.
                        tracing::warn!(
                            connection = %connection_id,
                            error = %e,
                            "Discarding malformed message"
                        );
                        continue;
                    }
                };
                if let Err(e) = router.dispatch(&channel, message).await {
                    tracing::warn!(
                        connection = %connection_id,
                        error = %e,
                        "Message handling failed"
                    );
                }
            }
            Ok(WsMessage::Binary(_)) => {
                tracing::warn!(connection = %connection_id, "Discarding unexpected binary frame");
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {} // ping/pong handled by the protocol layer
            Err(e) => {
                tracing::debug!(connection = %connection_id, error = %e, "Read failed");
                break;
            }
        }
    }

    // If this connection pledged, drop its binding; a binding already
    // superseded by a reconnect stays.
    ctx.registry.unregister(connection_id);
    drop(channel);
    let _ = writer.await;
    tracing::info!(peer = %peer, connection = %connection_id, "Connection closed");
}

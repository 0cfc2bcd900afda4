use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

use crate::error::{AppError, AppResult};

/// A live duplex link to the server: text frames out, text frames in.
///
/// The inbound half closing is the disconnect signal; the connection manager
/// owns what happens next.
pub struct TransportLink {
    pub outbound: UnboundedSender<String>,
    pub inbound: UnboundedReceiver<String>,
}

/// Seam between the connection manager and the actual channel. The wire
/// encoding is the transport's business; anything framed, ordered and
/// bidirectional satisfies the contract.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a fresh link, presenting the bearer credential obtained from the
    /// auth handshake.
    async fn open(&self, url: &str, token: &str) -> AppResult<TransportLink>;
}

/// WebSocket transport over tokio-tungstenite.
#[derive(Default)]
pub struct WsTransport;

#[async_trait]
impl Transport for WsTransport {
    async fn open(&self, url: &str, token: &str) -> AppResult<TransportLink> {
        let request_url = format!("{url}?token={token}");
        let (stream, _response) = connect_async(request_url)
            .await
            .map_err(|e| AppError::Transport(format!("websocket connect: {e}")))?;

        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = unbounded_channel::<String>();
        let (in_tx, in_rx) = unbounded_channel::<String>();

        // Write pump: frames queued by the manager go onto the socket.
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if let Err(e) = sink.send(WsMessage::Text(frame.into())).await {
                    tracing::warn!(error = %e, "websocket write failed");
                    break;
                }
            }
        });

        // Read pump: dropping in_tx on exit closes the inbound half, which
        // the manager treats as a transport error.
        tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => {
                        if in_tx.send(text.to_string()).is_err() {
                            break;
                        }
                    }
                    Ok(WsMessage::Close(reason)) => {
                        tracing::info!(?reason, "websocket closed by server");
                        break;
                    }
                    Ok(_) => {} // ping/pong handled by the protocol layer
                    Err(e) => {
                        tracing::warn!(error = %e, "websocket read failed");
                        break;
                    }
                }
            }
        });

        Ok(TransportLink {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

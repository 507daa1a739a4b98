//! Push Transport
//!
//! The connection manager talks to the wire through a [`Connector`], which
//! hands back a [`TransportLink`]: a pair of channels carrying outbound text
//! and inbound [`TransportEvent`]s. Dropping the link closes the socket.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Why the connection went away
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// Close code from the remote side, if it sent one
    pub code: Option<u16>,
    pub reason: String,
    /// Whether a close handshake was received
    pub clean: bool,
}

impl CloseInfo {
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: None,
            reason: reason.into(),
            clean: false,
        }
    }
}

/// Transport-level failures; recoverable through the reconnect policy
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Failed to connect to {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("Connection error: {0}")]
    Io(String),

    #[error("Timed out connecting after {0:?}")]
    ConnectTimeout(Duration),

    #[error("No frames received for {0:?}")]
    IdleTimeout(Duration),
}

/// Events delivered by a live link, in arrival order
#[derive(Debug)]
pub enum TransportEvent {
    Frame(String),
    Closed(CloseInfo),
    Failed(TransportError),
}

/// One physical connection
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<String>,
    pub inbound: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Opens physical connections for the connection manager
#[async_trait]
pub trait Connector: Send + Sync {
    /// Where this connector points, for logging
    fn endpoint(&self) -> &str;

    async fn open(&self) -> Result<TransportLink, TransportError>;
}

/// WebSocket connector for the engine's push endpoint
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Connector for WsConnector {
    fn endpoint(&self) -> &str {
        &self.url
    }

    async fn open(&self) -> Result<TransportLink, TransportError> {
        let (stream, _response) =
            connect_async(self.url.as_str())
                .await
                .map_err(|e| TransportError::Connect {
                    endpoint: self.url.clone(),
                    reason: e.to_string(),
                })?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<TransportEvent>();

        tokio::spawn(pump(stream, outbound_rx, inbound_tx));

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

/// Forward frames between the socket and the link channels until either
/// side goes away
async fn pump(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut outbound: mpsc::UnboundedReceiver<String>,
    inbound: mpsc::UnboundedSender<TransportEvent>,
) {
    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            out = outbound.recv() => match out {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text.into())).await {
                        let _ = inbound.send(TransportEvent::Failed(TransportError::Io(e.to_string())));
                        break;
                    }
                }
                None => {
                    // Link dropped by the manager
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if inbound.send(TransportEvent::Frame(text.as_str().to_owned())).is_err() {
                        let _ = sink.close().await;
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let info = match frame {
                        Some(frame) => CloseInfo {
                            code: Some(u16::from(frame.code)),
                            reason: frame.reason.as_str().to_owned(),
                            clean: true,
                        },
                        None => CloseInfo {
                            code: None,
                            reason: String::new(),
                            clean: true,
                        },
                    };
                    let _ = inbound.send(TransportEvent::Closed(info));
                    break;
                }
                Some(Ok(_)) => {
                    // Protocol pings are answered by tungstenite; binary frames are not part of the protocol
                }
                Some(Err(e)) => {
                    let _ = inbound.send(TransportEvent::Failed(TransportError::Io(e.to_string())));
                    break;
                }
                None => {
                    let _ = inbound.send(TransportEvent::Closed(CloseInfo::abnormal("stream ended")));
                    break;
                }
            }
        }
    }

    tracing::trace!("Transport pump finished");
}

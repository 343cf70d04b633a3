//! Transport seam between the session and the network.
//!
//! The session only needs text frames in and out; `WsConnector` provides them
//! over a tokio-tungstenite WebSocket.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::error::GatewayError;

/// One live connection carrying text frames.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, text: String) -> Result<(), GatewayError>;
    /// Next inbound text frame. `None` once the peer has closed. Must be cancel-safe.
    async fn recv(&mut self) -> Option<Result<String, GatewayError>>;
    /// Close from our side. Errors are ignored; the transport is dropped afterwards.
    async fn close(&mut self);
}

/// Opens a fresh transport for every (re)connect.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn Transport>, GatewayError>;
}

/// Connects to a WebSocket URL (`ws://` or `wss://`).
#[derive(Debug, Clone)]
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
    async fn connect(&self) -> Result<Box<dyn Transport>, GatewayError> {
        log::debug!("opening websocket to {}", self.url);
        let (ws, _) = tokio_tungstenite::connect_async(self.url.as_str()).await?;
        Ok(Box::new(WsTransport { ws }))
    }
}

struct WsTransport {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<(), GatewayError> {
        self.ws.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, GatewayError>> {
        loop {
            let msg = match self.ws.next().await? {
                Ok(msg) => msg,
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    return None
                }
                Err(e) => return Some(Err(e.into())),
            };
            match msg {
                Message::Text(text) => return Some(Ok(text)),
                Message::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => {
                        log::warn!("dropping non-UTF-8 binary frame (compression is not negotiated)");
                    }
                },
                Message::Close(frame) => {
                    log::debug!("websocket close frame: {:?}", frame);
                    return None;
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.ws.close(None).await {
            log::debug!("websocket close: {}", e);
        }
    }
}

#[cfg(test)]
pub(crate) mod memory {
    //! In-memory connector for session tests. Each `connect` hands the test a
    //! `ServerEnd` for the new connection.

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// Test-side view of one connection.
    pub struct ServerEnd {
        /// Frames to deliver to the client. Drop to close the connection.
        pub to_client: mpsc::UnboundedSender<String>,
        /// Frames the client sent. Yields `None` once the client closed.
        pub from_client: mpsc::UnboundedReceiver<String>,
    }

    impl ServerEnd {
        pub fn push(&self, text: &str) {
            let _ = self.to_client.send(text.to_string());
        }

        pub async fn next_json(&mut self) -> Option<serde_json::Value> {
            let text = self.from_client.recv().await?;
            Some(serde_json::from_str(&text).expect("client sent invalid JSON"))
        }
    }

    pub struct MemoryConnector {
        ends: mpsc::UnboundedSender<ServerEnd>,
        failures_left: AtomicUsize,
        attempts: AtomicUsize,
    }

    impl MemoryConnector {
        /// Connector plus the receiver of server ends, one per successful connect.
        pub fn new() -> (Self, mpsc::UnboundedReceiver<ServerEnd>) {
            let (ends, rx) = mpsc::unbounded_channel();
            let connector = Self {
                ends,
                failures_left: AtomicUsize::new(0),
                attempts: AtomicUsize::new(0),
            };
            (connector, rx)
        }

        /// Fail the next `n` connect calls.
        pub fn fail_next(&self, n: usize) {
            self.failures_left.store(n, Ordering::SeqCst);
        }

        pub fn attempts(&self) -> usize {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Connector for MemoryConnector {
        async fn connect(&self) -> Result<Box<dyn Transport>, GatewayError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(GatewayError::Transport("connection refused".to_string()));
            }
            let (to_client, inbound) = mpsc::unbounded_channel();
            let (outbound, from_client) = mpsc::unbounded_channel();
            let _ = self.ends.send(ServerEnd {
                to_client,
                from_client,
            });
            Ok(Box::new(MemoryTransport {
                inbound,
                outbound: Some(outbound),
            }))
        }
    }

    struct MemoryTransport {
        inbound: mpsc::UnboundedReceiver<String>,
        outbound: Option<mpsc::UnboundedSender<String>>,
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn send(&mut self, text: String) -> Result<(), GatewayError> {
            let Some(tx) = &self.outbound else {
                return Err(GatewayError::Transport("closed".to_string()));
            };
            tx.send(text)
                .map_err(|_| GatewayError::Transport("peer gone".to_string()))
        }

        async fn recv(&mut self) -> Option<Result<String, GatewayError>> {
            self.inbound.recv().await.map(Ok)
        }

        async fn close(&mut self) {
            self.outbound = None;
        }
    }
}

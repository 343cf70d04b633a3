//! Gateway error taxonomy.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Inbound text that is not a valid envelope. Dropped; the connection stays up.
    #[error("malformed gateway message: {0}")]
    MalformedMessage(String),
    /// The transport failed or closed. Ends the connection; the session reconnects.
    #[error("gateway transport error: {0}")]
    Transport(String),
    /// The server closed the socket right after identify.
    #[error("gateway closed the connection after identify; token may be invalid")]
    AuthenticationRejected,
    /// No hello arrived within the handshake deadline.
    #[error("no hello from gateway within {0:?}")]
    HelloTimeout(Duration),
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::MalformedMessage(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for GatewayError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        GatewayError::Transport(e.to_string())
    }
}

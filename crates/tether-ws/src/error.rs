//! Error types for tether-ws.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Errors reported by a WebSocket connection through `on_error`.
#[derive(Debug, Error)]
pub enum WsError {
    /// The opening handshake failed.
    #[error("websocket handshake failed: {0}")]
    Handshake(#[source] tungstenite::Error),

    /// Reading or writing an established connection failed.
    #[error("websocket transport error: {0}")]
    Transport(#[source] tungstenite::Error),

    /// The address or construction arguments do not form a valid request.
    #[error("invalid websocket request: {0}")]
    InvalidRequest(String),
}

//! WebSocket implementation of the tether socket contract.
//!
//! Every [`WsConnector::connect`] spawns one task that owns the connection.
//! The [`WsSocket`] handed back to the agent only forwards commands to that
//! task, so `send` and `close` never block.

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tether::{CloseFrame, Connector, EventSender, Payload, Socket};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{HeaderName, HeaderValue, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as WsCloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::WsError;

/// How long a local close waits for the peer's close frame.
pub const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Close code reported when the peer's close frame carried no status.
const NO_STATUS_RECEIVED: u16 = 1005;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Extra handshake parameters applied to every connection attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WsArgs {
    /// Subprotocols offered in `Sec-WebSocket-Protocol`.
    pub protocols: Vec<String>,
    /// Additional request headers.
    pub headers: Vec<(String, String)>,
}

impl WsArgs {
    /// Empty arguments.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer a subprotocol.
    #[must_use]
    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocols.push(protocol.into());
        self
    }

    /// Add a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Builds [`WsSocket`]s over `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl WsConnector {
    /// Create a connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Connector for WsConnector {
    type Socket = WsSocket;
    type Error = WsError;
    type Args = WsArgs;

    fn connect(&mut self, address: &str, args: Option<&WsArgs>, events: EventSender<WsError>) -> WsSocket {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let request = build_request(address, args);
        debug!(%address, generation = events.generation(), "spawning websocket task");
        tokio::spawn(run_connection(request, commands_rx, events));
        WsSocket { commands: commands_tx }
    }
}

#[derive(Debug)]
enum Command {
    Send(Payload),
    Close,
}

/// Handle to one WebSocket connection. Dropping it closes the connection.
#[derive(Debug)]
pub struct WsSocket {
    commands: mpsc::UnboundedSender<Command>,
}

impl Socket for WsSocket {
    fn send(&mut self, payload: Payload) {
        if self.commands.send(Command::Send(payload)).is_err() {
            debug!("websocket task has exited, dropping message");
        }
    }

    fn close(&mut self) {
        let _ = self.commands.send(Command::Close);
    }
}

/// Convert a payload into a WebSocket data frame.
#[must_use]
pub fn to_message(payload: Payload) -> Message {
    match payload {
        Payload::Text(text) => Message::Text(text.into()),
        Payload::Binary(bytes) => Message::Binary(bytes.into()),
    }
}

/// Build the handshake request for `address`.
///
/// # Errors
///
/// Returns [`WsError::InvalidRequest`] for a malformed address, protocol or
/// header.
pub fn build_request(address: &str, args: Option<&WsArgs>) -> Result<Request, WsError> {
    let mut request = address
        .into_client_request()
        .map_err(|e| WsError::InvalidRequest(format!("bad address '{address}': {e}")))?;

    let Some(args) = args else {
        return Ok(request);
    };

    let headers = request.headers_mut();
    if !args.protocols.is_empty() {
        let value = HeaderValue::from_str(&args.protocols.join(", "))
            .map_err(|e| WsError::InvalidRequest(format!("bad protocol list: {e}")))?;
        headers.insert(SEC_WEBSOCKET_PROTOCOL, value);
    }
    for (name, value) in &args.headers {
        let header = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| WsError::InvalidRequest(format!("bad header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| WsError::InvalidRequest(format!("bad value for header '{name}': {e}")))?;
        headers.append(header, value);
    }

    Ok(request)
}

fn fail(events: &EventSender<WsError>, error: WsError) {
    let reason = error.to_string();
    warn!(generation = events.generation(), %reason, "websocket failed");
    events.error(error);
    events.close(CloseFrame::abnormal(reason));
}

/// Resolves once a close is requested or the socket handle is dropped.
async fn close_requested(commands: &mut mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = commands.recv().await {
        if matches!(command, Command::Close) {
            return;
        }
    }
}

async fn run_connection(
    request: Result<Request, WsError>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: EventSender<WsError>,
) {
    let request = match request {
        Ok(request) => request,
        Err(e) => {
            fail(&events, e);
            return;
        }
    };

    let stream = tokio::select! {
        result = tokio_tungstenite::connect_async(request) => match result {
            Ok((stream, _)) => stream,
            Err(e) => {
                fail(&events, WsError::Handshake(e));
                return;
            }
        },
        () = close_requested(&mut commands) => {
            debug!(generation = events.generation(), "closed before handshake completed");
            events.close(CloseFrame::normal("closed while connecting"));
            return;
        }
    };

    if !events.open() {
        return;
    }

    let (mut write, mut read) = stream.split();
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send(payload)) => {
                    if let Err(e) = write.send(to_message(payload)).await {
                        fail(&events, WsError::Transport(e));
                        return;
                    }
                }
                Some(Command::Close) | None => {
                    close_handshake(write, read, &events).await;
                    return;
                }
            },
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    events.message(Payload::Text(text.to_string()));
                }
                Some(Ok(Message::Binary(bytes))) => {
                    events.message(Payload::Binary(bytes.to_vec()));
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame.map_or((NO_STATUS_RECEIVED, String::new()), |frame| {
                        (u16::from(frame.code), frame.reason.to_string())
                    });
                    // Flushes the close reply tungstenite queued for us.
                    let _ = write.close().await;
                    events.close(CloseFrame { code, reason, clean: true });
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    fail(&events, WsError::Transport(e));
                    return;
                }
                None => {
                    events.close(CloseFrame::abnormal("connection ended without a close frame"));
                    return;
                }
            }
        }
    }
}

async fn close_handshake(
    mut write: SplitSink<WsStream, Message>,
    mut read: SplitStream<WsStream>,
    events: &EventSender<WsError>,
) {
    let frame = WsCloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    };
    if let Err(e) = write.send(Message::Close(Some(frame))).await {
        fail(events, WsError::Transport(e));
        return;
    }

    let clean = tokio::time::timeout(CLOSE_HANDSHAKE_TIMEOUT, peer_close_reply(&mut read))
        .await
        .unwrap_or(false);
    if !clean {
        debug!(generation = events.generation(), "peer did not finish the close handshake");
    }

    events.close(CloseFrame {
        code: CloseFrame::NORMAL,
        reason: String::new(),
        clean,
    });
}

/// Reads until the peer answers our close frame. Data frames still in flight
/// are discarded. Returns `false` if the stream ends or fails first.
async fn peer_close_reply(read: &mut SplitStream<WsStream>) -> bool {
    while let Some(Ok(message)) = read.next().await {
        if message.is_close() {
            return true;
        }
    }
    false
}

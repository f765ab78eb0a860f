//! Agent integration tests.
//!
//! Runs a `ReliableSocket<WsConnector>` against a real WebSocket server on
//! the loopback interface.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tether::{AgentConfig, CloseFrame, EvictionPolicy, Payload, ReconnectPolicy, ReliableSocket};
use tether_ws::{CLOSE_HANDSHAKE_TIMEOUT, WsArgs, WsConnector, WsError};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::LocalSet;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame as WsCloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async, accept_hdr_async};

const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Test Helpers - Mock Server
// ============================================================================

/// A WebSocket server bound to an ephemeral port.
struct MockServer {
    listener: TcpListener,
    addr: SocketAddr,
}

impl MockServer {
    async fn new() -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        Ok(Self { listener, addr })
    }

    fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    async fn accept(&self) -> WebSocketStream<TcpStream> {
        let (stream, _) = timeout(WAIT, self.listener.accept())
            .await
            .expect("timed out waiting for a connection")
            .expect("accept failed");
        accept_async(stream).await.expect("handshake failed")
    }
}

async fn next_frame(ws: &mut WebSocketStream<TcpStream>) -> Message {
    timeout(WAIT, ws.next())
        .await
        .expect("timed out waiting for a frame")
        .expect("stream ended")
        .expect("websocket error")
}

// ============================================================================
// Test Helpers - Agent Observation
// ============================================================================

#[derive(Debug, PartialEq)]
enum Seen {
    Open,
    Reconnect,
    Message(Payload),
    Error,
    Disconnect(u16, u32),
    Close(u16, bool),
}

fn observe(agent: &ReliableSocket<WsConnector>) -> mpsc::UnboundedReceiver<Seen> {
    let (tx, rx) = mpsc::unbounded_channel();

    let events = tx.clone();
    agent.on_open(move || {
        let _ = events.send(Seen::Open);
    });
    let events = tx.clone();
    agent.on_reconnect(move || {
        let _ = events.send(Seen::Reconnect);
    });
    let events = tx.clone();
    agent.on_message(move |payload: &Payload| {
        let _ = events.send(Seen::Message(payload.clone()));
    });
    let events = tx.clone();
    agent.on_error(move |_: &WsError| {
        let _ = events.send(Seen::Error);
    });
    let events = tx.clone();
    agent.on_disconnect(move |frame: &CloseFrame, attempts| {
        let _ = events.send(Seen::Disconnect(frame.code, attempts));
    });
    agent.on_close(move |frame: &CloseFrame| {
        let _ = tx.send(Seen::Close(frame.code, frame.clean));
    });

    rx
}

async fn next_seen(rx: &mut mpsc::UnboundedReceiver<Seen>) -> Seen {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a callback")
        .expect("callback channel closed")
}

fn test_config() -> AgentConfig {
    AgentConfig::default()
        .without_heartbeat()
        .with_reconnect(ReconnectPolicy::fixed(Duration::from_millis(50)))
        .with_buffer(8, EvictionPolicy::EvictOldest)
}

// ============================================================================
// Delivery Tests
// ============================================================================

#[tokio::test]
async fn test_buffered_message_delivered_on_open() {
    let server = MockServer::new().await.expect("failed to bind mock server");

    LocalSet::new()
        .run_until(async move {
            let agent =
                ReliableSocket::new(server.url(), test_config(), WsConnector::new()).expect("valid config");
            let mut seen = observe(&agent);
            assert!(agent.send("queued"));

            let mut ws = server.accept().await;
            assert_eq!(next_seen(&mut seen).await, Seen::Open);
            assert_eq!(next_frame(&mut ws).await, Message::Text("queued".into()));

            assert!(agent.send("direct"));
            assert_eq!(next_frame(&mut ws).await, Message::Text("direct".into()));

            ws.send(Message::Text("echo".into())).await.expect("server send");
            ws.send(Message::Binary(vec![1u8, 2].into())).await.expect("server send");
            assert_eq!(next_seen(&mut seen).await, Seen::Message(Payload::from("echo")));
            assert_eq!(next_seen(&mut seen).await, Seen::Message(Payload::from(vec![1u8, 2])));
        })
        .await;
}

#[tokio::test]
async fn test_heartbeat_reaches_server() {
    let server = MockServer::new().await.expect("failed to bind mock server");

    LocalSet::new()
        .run_until(async move {
            let config = test_config().with_heartbeat(Duration::from_millis(20), "ping");
            let agent = ReliableSocket::new(server.url(), config, WsConnector::new()).expect("valid config");
            let mut seen = observe(&agent);

            let mut ws = server.accept().await;
            assert_eq!(next_seen(&mut seen).await, Seen::Open);
            assert_eq!(next_frame(&mut ws).await, Message::Text("ping".into()));
            assert_eq!(next_frame(&mut ws).await, Message::Text("ping".into()));
        })
        .await;
}

// ============================================================================
// Reconnect Tests
// ============================================================================

#[tokio::test]
async fn test_server_close_triggers_reconnect() {
    let server = MockServer::new().await.expect("failed to bind mock server");

    LocalSet::new()
        .run_until(async move {
            let agent =
                ReliableSocket::new(server.url(), test_config(), WsConnector::new()).expect("valid config");
            let mut seen = observe(&agent);

            let mut ws = server.accept().await;
            assert_eq!(next_seen(&mut seen).await, Seen::Open);

            ws.close(Some(WsCloseFrame {
                code: CloseCode::Away,
                reason: "restarting".into(),
            }))
            .await
            .expect("server close");
            assert_eq!(next_seen(&mut seen).await, Seen::Disconnect(1001, 1));

            assert!(agent.send("while away"));

            let mut ws = server.accept().await;
            assert_eq!(next_seen(&mut seen).await, Seen::Reconnect);
            assert_eq!(next_frame(&mut ws).await, Message::Text("while away".into()));
            assert_eq!(agent.attempts(), 0);
        })
        .await;
}

#[tokio::test]
async fn test_refused_connection_reports_error_and_disconnect() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        listener.local_addr().expect("local addr")
    };

    LocalSet::new()
        .run_until(async move {
            let config = test_config().with_reconnect(ReconnectPolicy::fixed(Duration::from_secs(60)));
            let agent =
                ReliableSocket::new(format!("ws://{addr}"), config, WsConnector::new()).expect("valid config");
            let mut seen = observe(&agent);

            assert_eq!(next_seen(&mut seen).await, Seen::Error);
            assert_eq!(next_seen(&mut seen).await, Seen::Disconnect(CloseFrame::ABNORMAL, 1));
            assert!(!agent.is_open());
        })
        .await;
}

// ============================================================================
// Shutdown Tests
// ============================================================================

#[tokio::test]
async fn test_close_performs_handshake() {
    let server = MockServer::new().await.expect("failed to bind mock server");

    LocalSet::new()
        .run_until(async move {
            let agent =
                ReliableSocket::new(server.url(), test_config(), WsConnector::new()).expect("valid config");
            let mut seen = observe(&agent);

            let mut ws = server.accept().await;
            assert_eq!(next_seen(&mut seen).await, Seen::Open);

            agent.close();
            match next_frame(&mut ws).await {
                Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Normal),
                other => panic!("expected close frame, got {other:?}"),
            }
            // Keep polling so the server flushes its close reply.
            assert!(timeout(WAIT, ws.next()).await.expect("timed out").is_none());

            assert_eq!(next_seen(&mut seen).await, Seen::Close(CloseFrame::NORMAL, true));
            timeout(WAIT, agent.closed()).await.expect("agent did not close");
            assert!(!agent.send("late"));
        })
        .await;
}

#[tokio::test]
async fn test_close_is_clean_while_peer_holds_connection() {
    let server = MockServer::new().await.expect("failed to bind mock server");

    LocalSet::new()
        .run_until(async move {
            let agent =
                ReliableSocket::new(server.url(), test_config(), WsConnector::new()).expect("valid config");
            let mut seen = observe(&agent);

            let mut ws = server.accept().await;
            assert_eq!(next_seen(&mut seen).await, Seen::Open);

            let started = Instant::now();
            agent.close();
            assert!(next_frame(&mut ws).await.is_close());
            // Sends the queued close reply without polling for EOF.
            ws.flush().await.expect("server flush");

            let closed = timeout(Duration::from_secs(1), next_seen(&mut seen))
                .await
                .expect("close reported after the peer's reply");
            assert_eq!(closed, Seen::Close(CloseFrame::NORMAL, true));
            assert!(started.elapsed() < CLOSE_HANDSHAKE_TIMEOUT);

            // Server side still open at this point.
            drop(ws);
        })
        .await;
}

// ============================================================================
// Handshake Argument Tests
// ============================================================================

#[tokio::test]
async fn test_args_reach_server() {
    let server = MockServer::new().await.expect("failed to bind mock server");

    LocalSet::new()
        .run_until(async move {
            let args = WsArgs::new()
                .protocol("chat")
                .header("X-Tether-Client", "integration");
            let agent = ReliableSocket::with_args(server.url(), test_config(), WsConnector::new(), args)
                .expect("valid config");
            let mut seen = observe(&agent);

            let (stream, _) = timeout(WAIT, server.listener.accept())
                .await
                .expect("timed out waiting for a connection")
                .expect("accept failed");

            let mut protocol = None;
            let mut client_header = None;
            let callback = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
                protocol = request
                    .headers()
                    .get("sec-websocket-protocol")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                client_header = request
                    .headers()
                    .get("x-tether-client")
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                response
                    .headers_mut()
                    .insert("sec-websocket-protocol", HeaderValue::from_static("chat"));
                Ok(response)
            };
            let _ws = accept_hdr_async(stream, callback).await.expect("handshake failed");

            assert_eq!(protocol.as_deref(), Some("chat"));
            assert_eq!(client_header.as_deref(), Some("integration"));
            assert_eq!(next_seen(&mut seen).await, Seen::Open);
        })
        .await;
}

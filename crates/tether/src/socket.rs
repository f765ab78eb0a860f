//! The socket primitive an agent drives.
//!
//! A [`Connector`] builds one [`Socket`] per connection attempt. The socket
//! reports its lifecycle through the [`EventSender`] it was handed, as a
//! closed set of [`SocketEvent`]s:
//!
//! - `Error` any number of times, at any point after construction
//! - `Open` at most once
//! - `Message` any number of times, only after `Open`
//! - `Close` at most once, after `Open` or straight after a failed attempt
//!
//! Events are queued and processed on the agent's next turn, never inside
//! the call that produced them.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// A message travelling over the socket in either direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    /// UTF-8 text.
    Text(String),
    /// Raw bytes.
    Binary(Vec<u8>),
}

impl Payload {
    /// Length of the payload in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.len(),
            Self::Binary(bytes) => bytes.len(),
        }
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The text of a text payload.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Binary(bytes)
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Self::Binary(bytes.to_vec())
    }
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => f.write_str(text),
            Self::Binary(bytes) => write!(f, "<{} bytes>", bytes.len()),
        }
    }
}

/// Details of a socket closing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFrame {
    /// Close status code.
    pub code: u16,
    /// Human-readable reason.
    pub reason: String,
    /// Whether the close handshake completed.
    pub clean: bool,
}

impl CloseFrame {
    /// Normal closure.
    pub const NORMAL: u16 = 1000;
    /// Connection dropped without a close handshake.
    pub const ABNORMAL: u16 = 1006;

    /// A clean close with the normal status code.
    #[must_use]
    pub fn normal(reason: impl Into<String>) -> Self {
        Self {
            code: Self::NORMAL,
            reason: reason.into(),
            clean: true,
        }
    }

    /// An unclean close with the abnormal status code.
    #[must_use]
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: Self::ABNORMAL,
            reason: reason.into(),
            clean: false,
        }
    }
}

impl fmt::Display for CloseFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "code {}", self.code)
        } else {
            write!(f, "code {}: {}", self.code, self.reason)
        }
    }
}

/// Lifecycle signals emitted by a socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent<E> {
    /// The socket is ready for `send`.
    Open,
    /// A message arrived from the peer.
    Message(Payload),
    /// A transport error. Informational; a `Close` follows if fatal.
    Error(E),
    /// The socket is gone.
    Close(CloseFrame),
}

/// Events tagged with the generation of the socket that produced them.
pub(crate) type TaggedEvent<E> = (u64, SocketEvent<E>);

/// Handle through which a socket reports its lifecycle to the agent.
///
/// Every emit returns `false` once the agent has gone away, which a socket
/// implementation can use to stop early.
#[derive(Debug)]
pub struct EventSender<E> {
    generation: u64,
    tx: mpsc::UnboundedSender<TaggedEvent<E>>,
}

impl<E> Clone for EventSender<E> {
    fn clone(&self) -> Self {
        Self {
            generation: self.generation,
            tx: self.tx.clone(),
        }
    }
}

impl<E> EventSender<E> {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<TaggedEvent<E>>) -> Self {
        Self { generation, tx }
    }

    /// A standalone sender and its receiving end, for driving a
    /// [`Connector`] without an agent.
    #[must_use]
    pub fn channel(generation: u64) -> (Self, mpsc::UnboundedReceiver<(u64, SocketEvent<E>)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(generation, tx), rx)
    }

    /// Generation of the socket this sender belongs to.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Emit an event.
    pub fn emit(&self, event: SocketEvent<E>) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }

    /// Report that the socket opened.
    pub fn open(&self) -> bool {
        self.emit(SocketEvent::Open)
    }

    /// Deliver an inbound message.
    pub fn message(&self, payload: impl Into<Payload>) -> bool {
        self.emit(SocketEvent::Message(payload.into()))
    }

    /// Report a transport error.
    pub fn error(&self, error: E) -> bool {
        self.emit(SocketEvent::Error(error))
    }

    /// Report that the socket closed.
    pub fn close(&self, frame: CloseFrame) -> bool {
        self.emit(SocketEvent::Close(frame))
    }

    /// Whether the agent is still listening.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// A single physical connection.
pub trait Socket {
    /// Write a payload. Only called while the socket is open.
    fn send(&mut self, payload: Payload);

    /// Begin closing. A `Close` event is expected to follow.
    fn close(&mut self);
}

/// Factory for sockets, one per connection attempt.
pub trait Connector {
    /// The socket type produced.
    type Socket: Socket + 'static;
    /// Transport error reported through `SocketEvent::Error`.
    type Error: fmt::Debug + fmt::Display + 'static;
    /// Implementation-specific construction arguments, passed through verbatim.
    type Args: 'static;

    /// Start connecting to `address`.
    ///
    /// Must not block. Progress, including construction failure, is reported
    /// through `events`.
    fn connect(
        &mut self,
        address: &str,
        args: Option<&Self::Args>,
        events: EventSender<Self::Error>,
    ) -> Self::Socket;
}

/// Where the agent connects to.
pub enum Address {
    /// A fixed address.
    Literal(String),
    /// Resolved afresh before every attempt; `None` means "not ready yet".
    Resolver(Box<dyn FnMut() -> Option<String>>),
}

impl Address {
    /// Build a resolver address.
    pub fn resolver<F>(resolve: F) -> Self
    where
        F: FnMut() -> Option<String> + 'static,
    {
        Self::Resolver(Box::new(resolve))
    }

    pub(crate) fn resolve(&mut self) -> Option<String> {
        match self {
            Self::Literal(address) => Some(address.clone()),
            Self::Resolver(resolve) => resolve(),
        }
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(address) => f.debug_tuple("Literal").field(address).finish(),
            Self::Resolver(_) => f.write_str("Resolver(..)"),
        }
    }
}

impl From<&str> for Address {
    fn from(address: &str) -> Self {
        Self::Literal(address.to_string())
    }
}

impl From<String> for Address {
    fn from(address: String) -> Self {
        Self::Literal(address)
    }
}

//! # tether
//!
//! A reliable socket agent. Wraps any socket [`Connector`] and keeps the
//! connection alive: reconnects with a configurable backoff, sends
//! heartbeats while open, and holds outbound messages in a bounded buffer
//! until the next successful open.
//!
//! ```ignore
//! use tether::{AgentConfig, ReliableSocket};
//!
//! let local = tokio::task::LocalSet::new();
//! local.run_until(async {
//!     let agent = ReliableSocket::new("ws://localhost:3030", AgentConfig::default(), connector)?;
//!     agent.on_message(|payload| println!("{payload}"));
//!     agent.send("hello");
//!     # Ok::<_, tether::TetherError>(())
//! }).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod agent;
pub mod buffer;
pub mod config;
pub mod error;
mod events;
#[cfg(test)]
mod mock;
pub mod socket;
pub mod state;
mod timer;

pub use agent::{ReliableSocket, WeakReliableSocket};
pub use buffer::{BoundedBuffer, EvictionPolicy};
pub use config::{AgentConfig, MAX_BUFFER_CAPACITY, ReconnectPolicy};
pub use error::{TetherError, TetherResult};
pub use socket::{Address, CloseFrame, Connector, EventSender, Payload, Socket, SocketEvent};
pub use state::ConnectionState;

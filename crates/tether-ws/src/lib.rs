//! # tether-ws
//!
//! WebSocket [`Connector`](tether::Connector) for tether agents, built on
//! `tokio-tungstenite`.
//!
//! ```ignore
//! use tether::{AgentConfig, ReliableSocket};
//! use tether_ws::{WsArgs, WsConnector};
//!
//! let args = WsArgs::new().protocol("chat");
//! let agent = ReliableSocket::with_args("ws://localhost:3030", AgentConfig::default(), WsConnector::new(), args)?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod connector;
pub mod error;

pub use connector::{CLOSE_HANDSHAKE_TIMEOUT, WsArgs, WsConnector, WsSocket, build_request, to_message};
pub use error::WsError;

//! Command-line argument parsing with clap.

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use tether::{AgentConfig, EvictionPolicy};
use tether_ws::WsArgs;

/// Tether - a WebSocket pipe that survives restarts.
#[derive(Parser, Debug, Clone)]
#[command(name = "tether")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Emit logs as JSON.
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Connect, send stdin lines, print received messages.
    Connect(ConnectArgs),

    /// Write the default configuration as TOML.
    InitConfig {
        /// File to write; stdout when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Arguments for `tether connect`.
#[derive(Args, Debug, Clone)]
pub struct ConnectArgs {
    /// WebSocket URL.
    #[arg(env = "TETHER_URL")]
    pub url: String,

    /// TOML configuration file.
    #[arg(short, long, env = "TETHER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Subprotocol to offer; repeatable.
    #[arg(long = "protocol", value_name = "PROTOCOL")]
    pub protocols: Vec<String>,

    /// Extra request header as `NAME:VALUE`; repeatable.
    #[arg(long = "header", value_name = "NAME:VALUE")]
    pub headers: Vec<String>,

    /// Heartbeat interval in milliseconds, 0 to disable.
    #[arg(long)]
    pub heartbeat_ms: Option<u64>,

    /// Number of messages kept while disconnected.
    #[arg(long)]
    pub buffer: Option<usize>,

    /// Buffer policy when full: `ring_buffer` or `fixed_queue`.
    #[arg(long)]
    pub eviction: Option<EvictionPolicy>,
}

impl ConnectArgs {
    /// Load the configuration file (or defaults) and apply flag overrides.
    pub fn agent_config(&self) -> anyhow::Result<AgentConfig> {
        let mut config = match &self.config {
            Some(path) => AgentConfig::from_file(path)?,
            None => AgentConfig::default(),
        };

        if let Some(heartbeat_ms) = self.heartbeat_ms {
            config.heartbeat_interval_ms = heartbeat_ms;
        }
        if let Some(capacity) = self.buffer {
            config.buffer_capacity = capacity;
        }
        if let Some(eviction) = self.eviction {
            config.eviction = eviction;
        }

        config.validate()?;
        Ok(config)
    }

    /// Handshake arguments from `--protocol` and `--header`.
    pub fn ws_args(&self) -> anyhow::Result<WsArgs> {
        let mut args = WsArgs::new();
        for protocol in &self.protocols {
            args = args.protocol(protocol.trim());
        }
        for header in &self.headers {
            let (name, value) = parse_header(header)?;
            args = args.header(name, value);
        }
        Ok(args)
    }
}

/// Split `NAME:VALUE`, trimming whitespace around both halves.
pub fn parse_header(raw: &str) -> anyhow::Result<(String, String)> {
    let (name, value) = raw
        .split_once(':')
        .with_context(|| format!("header '{raw}' is not in NAME:VALUE form"))?;
    let name = name.trim();
    if name.is_empty() {
        bail!("header '{raw}' has an empty name");
    }
    Ok((name.to_string(), value.trim().to_string()))
}

//! tether - a WebSocket pipe that survives restarts.
//!
//! Sends each stdin line to the server and prints every message received.
//! Lines typed while the connection is down are buffered and delivered once
//! it comes back.

mod cli;

use std::path::PathBuf;

use clap::Parser;
use tether::{AgentConfig, CloseFrame, Payload, ReliableSocket};
use tether_ws::{WsArgs, WsConnector, WsError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::LocalSet;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::cli::{Cli, Commands, ConnectArgs};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs)?;

    match cli.command {
        Commands::Connect(args) => connect(args).await?,
        Commands::InitConfig { output } => init_config(output)?,
    }

    Ok(())
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("tether=info".parse()?)
        .add_directive("tether_ws=info".parse()?);

    // Logs go to stderr so stdout carries only received messages.
    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }
    Ok(())
}

async fn connect(args: ConnectArgs) -> anyhow::Result<()> {
    let config = args.agent_config()?;
    let ws_args = args.ws_args()?;
    info!(
        url = %args.url,
        heartbeat_ms = config.heartbeat_interval_ms,
        buffer = config.buffer_capacity,
        eviction = %config.eviction,
        "starting tether"
    );

    LocalSet::new()
        .run_until(run_session(args.url, config, ws_args))
        .await
}

async fn run_session(url: String, config: AgentConfig, ws_args: WsArgs) -> anyhow::Result<()> {
    let agent = ReliableSocket::with_args(url, config, WsConnector::new(), ws_args)?;

    agent.on_open(|| info!("connected"));
    agent.on_reconnect(|| info!("reconnected"));
    agent.on_error(|error: &WsError| warn!(%error, "connection error"));
    agent.on_disconnect(|frame: &CloseFrame, attempts| warn!(%frame, attempts, "disconnected"));
    agent.on_close(|frame: &CloseFrame| info!(%frame, "closed"));
    agent.on_message(|payload: &Payload| println!("{payload}"));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => {
                    if !agent.send(line) {
                        warn!("buffer full, message dropped");
                    }
                }
                None => {
                    info!("end of input, closing");
                    break;
                }
            },
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("interrupted, closing");
                break;
            }
        }
    }

    agent.close();
    agent.closed().await;
    Ok(())
}

fn init_config(output: Option<PathBuf>) -> anyhow::Result<()> {
    let rendered = AgentConfig::default().to_toml()?;

    match output {
        Some(path) => {
            std::fs::write(&path, rendered)?;
            println!("Config written to {}", path.display());
            println!();
            println!("Then run:");
            println!("  tether connect <URL> --config {}", path.display());
        }
        None => print!("{rendered}"),
    }

    Ok(())
}

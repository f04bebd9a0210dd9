use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpListener;
use tracing::{info, warn};

use roomcall_lib::capture::SyntheticCapture;
use roomcall_lib::config::{Config, LogConfig, MediaConstraints, ServerConfig};
use roomcall_lib::peer::WebRtcFactory;
use roomcall_lib::relay::{server, RoomHub};
use roomcall_lib::signaling::ws::WebSocketSignaling;
use roomcall_lib::sink::ConsoleSink;
use roomcall_lib::{logger, Call, SessionState};

#[derive(Parser)]
#[command(name = "roomcall", version, about = "Two-party calls over a room relay")]
struct Cli {
    /// Log negotiation details to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join a room and talk to whoever else joins it
    Call {
        /// Relay WebSocket URL
        #[arg(long, env = "ROOMCALL_SERVER", default_value = "ws://127.0.0.1:8080")]
        server: String,
        /// Room name; a random one is generated when omitted
        #[arg(long, env = "ROOMCALL_ROOM")]
        room: Option<String>,
        /// JSON file with a list of STUN/TURN servers
        #[arg(long)]
        ice_servers: Option<PathBuf>,
        /// Do not capture audio or video
        #[arg(long)]
        no_media: bool,
        /// Give up if nobody joins within this many seconds
        #[arg(long)]
        wait: Option<u64>,
        /// Stream our candidates separately when answering
        #[arg(long)]
        trickle: bool,
    },
    /// Run the room relay
    Relay {
        #[arg(long, env = "ROOMCALL_LISTEN", default_value = "127.0.0.1:8080")]
        listen: String,
    },
}

fn secs_to_ms(secs: u64) -> u64 {
    secs.saturating_mul(1000)
}

fn load_ice_servers(path: &PathBuf) -> Result<Vec<ServerConfig>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let servers: Vec<ServerConfig> =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    for server in &servers {
        server
            .validate()
            .with_context(|| format!("ICE server {}", server.id))?;
    }
    Ok(servers)
}

async fn run_call(config: Config) -> Result<()> {
    let signaling = WebSocketSignaling::connect(&config.signaling_url)
        .await
        .with_context(|| format!("connecting to {}", config.signaling_url))?;
    let mut call = Call::new(
        config,
        Arc::new(signaling),
        Arc::new(WebRtcFactory),
        Arc::new(SyntheticCapture),
        Arc::new(ConsoleSink),
    );
    println!("room: {}", call.room());
    println!("type a line to send it, /quit to hang up");

    let handle = call.handle();
    let input = tokio::spawn({
        let handle = handle.clone();
        async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                tokio::select! {
                    line = lines.next_line() => match line {
                        Ok(Some(line)) if line.trim() == "/quit" => break,
                        Ok(Some(line)) => {
                            if let Err(e) = handle.send(line) {
                                warn!("{}", e);
                                break;
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!("stdin: {}", e);
                            break;
                        }
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            handle.hang_up();
        }
    });

    let result = call.run().await;
    input.abort();
    if handle.state() != SessionState::Closed {
        warn!("call loop ended before the session closed");
    }
    result.context("call ended with an error")
}

async fn run_relay(listen: &str) -> Result<()> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding {}", listen))?;
    info!("relay listening on {}", listener.local_addr()?);
    let hub = RoomHub::new();
    tokio::select! {
        res = server::serve(listener, hub) => res.context("relay stopped")?,
        _ = tokio::signal::ctrl_c() => info!("relay shutting down"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut log = LogConfig::default();
    if cli.verbose {
        log.enabled = true;
    }
    logger::init(&log);

    match cli.command {
        Commands::Call {
            server,
            room,
            ice_servers,
            no_media,
            wait,
            trickle,
        } => {
            let mut config = Config {
                signaling_url: server,
                room,
                stream_callee_candidates: trickle,
                peer_wait_timeout_ms: wait.map(secs_to_ms),
                log,
                ..Config::default()
            };
            if let Some(path) = &ice_servers {
                config.ice_servers = load_ice_servers(path)?;
            }
            if no_media {
                config.media = MediaConstraints::none();
            }
            if let Err(e) = config.validate() {
                bail!("invalid configuration: {}", e);
            }
            run_call(config).await
        }
        Commands::Relay { listen } => run_relay(&listen).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn huge_wait_saturates() {
        assert_eq!(secs_to_ms(30), 30_000);
        assert_eq!(secs_to_ms(u64::MAX), u64::MAX);
    }

    #[test]
    fn call_flags_parse() {
        let cli = Cli::try_parse_from([
            "roomcall", "call", "--room", "r1", "--wait", "18446744073709551615",
        ])
        .unwrap();
        match cli.command {
            Commands::Call { room, wait, .. } => {
                assert_eq!(room.as_deref(), Some("r1"));
                assert_eq!(wait.map(secs_to_ms), Some(u64::MAX));
            }
            _ => panic!("expected call"),
        }
    }
}

mod connect;
mod scan;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use netsync::NetConfig;

#[derive(Parser)]
#[command(name = "netsync-client")]
#[command(about = "netsync test client")]
struct Args {
    /// RON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Join a server and log what arrives.
    Connect {
        /// Server address (e.g. 127.0.0.1:27015).
        server: SocketAddr,

        /// Stop after this many seconds; runs until disconnected otherwise.
        #[arg(short, long)]
        duration: Option<u64>,

        /// Ask the avatar to fire every this many seconds.
        #[arg(long)]
        fire_every: Option<f32>,

        #[arg(long, default_value_t = 0.0, help = "Outgoing packet loss percentage (0-100)")]
        loss: f32,
    },
    /// List servers on the local network and the configured rendezvous
    /// addresses.
    Scan {
        /// Extra servers to query directly.
        #[arg(short, long)]
        query: Vec<SocketAddr>,

        #[arg(long)]
        no_broadcast: bool,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => {
            NetConfig::load(path).with_context(|| format!("loading {}", path.display()))?
        }
        None => NetConfig::default(),
    };
    config.validate()?;

    match args.command {
        Command::Connect {
            server,
            duration,
            fire_every,
            loss,
        } => connect::run(
            config,
            server,
            connect::Options {
                duration: duration.map(Duration::from_secs),
                fire_every: fire_every.map(Duration::from_secs_f32),
                loss,
            },
        ),
        Command::Scan {
            query,
            no_broadcast,
        } => {
            if no_broadcast {
                config.discovery_broadcast = false;
            }
            scan::run(&config, &query)
        }
    }
}

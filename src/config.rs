//! Command-line and environment configuration.

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

/// Signaling relay for peer-to-peer connections.
///
/// Peers join a named room over a WebSocket and exchange offers, answers and
/// ICE candidates with the other members of that room.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info", env = "RELAY_LOG", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the relay server
    Server(ServerArgs),
    /// Join a room and log the signaling traffic relayed to it
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// WebSocket listen address
    #[arg(long, default_value = "0.0.0.0:3000", env = "RELAY_LISTEN")]
    pub listen: SocketAddr,

    /// Health-check HTTP listen address
    #[arg(long, default_value = "0.0.0.0:3001", env = "RELAY_HEALTH_LISTEN")]
    pub health_listen: SocketAddr,

    /// Do not serve the health-check endpoint
    #[arg(long, default_value_t = false, env = "RELAY_NO_HEALTH")]
    pub no_health: bool,

    /// Seconds of silence before a connection is pinged
    #[arg(long, default_value_t = 25, env = "RELAY_PING_INTERVAL")]
    pub ping_interval: u64,

    /// Seconds to wait for any answer to a ping before dropping the connection
    #[arg(long, default_value_t = 60, env = "RELAY_PING_TIMEOUT")]
    pub ping_timeout: u64,

    /// Largest accepted inbound frame, in bytes
    #[arg(long, default_value_t = 1 << 20, env = "RELAY_MAX_FRAME_SIZE")]
    pub max_frame_size: usize,

    /// Events queued per connection before further ones are dropped
    #[arg(long, default_value_t = 128, env = "RELAY_OUTBOX_CAPACITY")]
    pub outbox_capacity: usize,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Relay WebSocket URL
    #[arg(long, default_value = "ws://127.0.0.1:3000", env = "RELAY_URL")]
    pub url: String,

    /// Room to join
    #[arg(long)]
    pub room: String,

    /// JSON session description to offer once another peer is ready
    #[arg(long)]
    pub offer: Option<String>,
}

/// Settings consumed by [`crate::server::RelayServer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub listen: SocketAddr,
    pub health_listen: Option<SocketAddr>,
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    pub max_frame_size: usize,
    pub outbox_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        RelayConfig {
            listen: SocketAddr::from(([0, 0, 0, 0], 3000)),
            health_listen: Some(SocketAddr::from(([0, 0, 0, 0], 3001))),
            ping_interval: Duration::from_secs(25),
            ping_timeout: Duration::from_secs(60),
            max_frame_size: 1 << 20,
            outbox_capacity: 128,
        }
    }
}

impl From<ServerArgs> for RelayConfig {
    fn from(args: ServerArgs) -> Self {
        RelayConfig {
            listen: args.listen,
            health_listen: (!args.no_health).then_some(args.health_listen),
            ping_interval: Duration::from_secs(args.ping_interval),
            ping_timeout: Duration::from_secs(args.ping_timeout),
            max_frame_size: args.max_frame_size,
            // A zero-capacity channel would panic.
            outbox_capacity: args.outbox_capacity.max(1),
        }
    }
}

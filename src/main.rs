use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

use room_relay::{
    client,
    config::{Cli, Command},
    util::init_log,
    RelayConfig, RelayServer,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_log(&cli.log_level);

    match cli.command {
        Command::Server(args) => {
            info!("Starting relay server...");
            let server = RelayServer::bind(RelayConfig::from(args)).await?;
            server.run(shutdown_signal()).await?;
            info!("Relay stopped");
        }
        Command::Client(args) => {
            info!("Starting signaling client...");
            client::run(args).await?;
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C, running until killed: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Ctrl-C received");
}

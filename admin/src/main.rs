use std::{error::Error, io, net::SocketAddr, time::Duration};

use clap::{Parser, Subcommand};
use lib::{constants::DEFAULT_ADAPTER_PORT, protocol::AdapterKey};
use tokio::net::TcpListener;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "w1remote-admin", about = "Operator tools for 1-wire remote agents")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print a new random adapter key
    Keygen,
    /// Wait for one agent to connect, query it and print its report as JSON
    Probe {
        /// Address to listen on for the agent
        #[arg(long, default_value_t = SocketAddr::from(([0, 0, 0, 0], DEFAULT_ADAPTER_PORT)))]
        listen: SocketAddr,

        /// Adapter key shared with the agent, as 64 hex characters
        #[arg(long)]
        key: String,

        /// Seconds to wait for each step
        #[arg(long, default_value_t = 60)]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt().with_writer(io::stderr).init();

    match Cli::parse().command {
        Command::Keygen => {
            println!("{}", AdapterKey::generate().to_hex());
        }
        Command::Probe {
            listen,
            key,
            timeout,
        } => {
            let key = AdapterKey::from_hex(&key)?;
            let listener = TcpListener::bind(listen).await?;
            info!("waiting for an agent on {}", listener.local_addr()?);
            let report =
                w1remote_admin::probe(&listener, &key, Duration::from_secs(timeout)).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

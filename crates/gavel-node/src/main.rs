//! gavel-node - peer-replicated auction node
//!
//! Runs a participant that answers auction RPCs and gossips state changes to
//! its peers, and offers a one-shot client for talking to a running node.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use gavel_node::{proto, Node, NodeConfig, NodeError};
use gavel_p2p::TcpTransport;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "gavel-node")]
#[command(about = "Decentralized auction node")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node
    Run {
        /// Path to config file
        #[arg(short, long, env = "GAVEL_CONFIG", default_value = "gavel.toml")]
        config: PathBuf,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "gavel.toml")]
        output: PathBuf,

        /// Participant name
        #[arg(long)]
        name: String,

        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:7400")]
        listen: SocketAddr,
    },

    /// Send one request to a running node and print the response
    Request {
        /// Node address
        #[arg(long)]
        addr: SocketAddr,

        /// Method name (openAuction, makeBid, closeAuction, ...)
        #[arg(long)]
        method: String,

        /// JSON payload
        #[arg(long, default_value = "{}")]
        payload: String,
    },
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("gavel=info".parse()?);
    tracing_subscriber::registry()
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .with(filter)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            let config = NodeConfig::from_file(&config)?;
            init_tracing(config.log.json)?;
            run_node(config).await?;
        }

        Commands::InitConfig {
            output,
            name,
            listen,
        } => {
            init_tracing(false)?;
            init_config(output, name, listen)?;
        }

        Commands::Request {
            addr,
            method,
            payload,
        } => {
            init_tracing(false)?;
            send_request(addr, &method, &payload).await?;
        }
    }

    Ok(())
}

async fn run_node(config: NodeConfig) -> anyhow::Result<()> {
    let node = Node::build(config)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("received ctrl-c, shutting down"),
            Err(e) => warn!(error = %e, "failed to listen for ctrl-c, shutting down"),
        }
        let _ = shutdown_tx.send(true);
    });

    node.run(shutdown_rx).await?;
    Ok(())
}

fn init_config(output: PathBuf, name: String, listen: SocketAddr) -> anyhow::Result<()> {
    let mut config = NodeConfig::new(name, listen);
    config.data_dir = Some(PathBuf::from(format!("./{}-data", config.name)));
    config.validate()?;
    config.save(&output)?;

    println!("Config written to {}", output.display());
    println!();
    println!("Add bootstrap peers to the file, then run:");
    println!("  gavel-node run --config {}", output.display());

    Ok(())
}

async fn send_request(addr: SocketAddr, method: &str, payload: &str) -> anyhow::Result<()> {
    let body = TcpTransport::anonymous()
        .request(addr, method, payload.as_bytes())
        .await?;

    if proto::is_ok(&body) {
        println!("OK");
        return Ok(());
    }

    match proto::parse_response::<serde_json::Value>(&body) {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(NodeError::Remote(remote)) => anyhow::bail!("{}: {}", remote.code, remote.message),
        Err(e) => {
            println!("{}", String::from_utf8_lossy(&body));
            Err(e.into())
        }
    }
}

//! MessageU - Secure message client
//!
//! Registers with a MessageU server, exchanges keys with other users and
//! sends them end-to-end encrypted text and files.

mod config;
mod console;
mod crypto;
mod messaging;
mod network;
mod protocol;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::io::BufReader;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use config::{Config, IdentityFile};
use console::Console;
use messaging::Messenger;
use network::{ProtocolClient, Transport, PACKET_SIZE};

/// MessageU - Secure message client
#[derive(Parser)]
#[command(name = "messageu")]
#[command(author = "MessageU Contributors")]
#[command(version = "0.1.0")]
#[command(about = "End-to-end encrypted messages through a MessageU server", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the interactive client (default)
    Run {
        /// Server address file, overrides the configured one
        #[arg(short, long)]
        server_info: Option<PathBuf>,

        /// Identity file, overrides the configured one
        #[arg(short, long)]
        identity: Option<PathBuf>,
    },

    /// Show current configuration
    Config {
        /// Generate sample configuration
        #[arg(long)]
        generate: bool,

        /// Write the configuration here instead of printing it
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show protocol information
    Info,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default().unwrap_or_default()
    };

    // Logs go to stderr, stdout belongs to the menu
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    match cli.command.unwrap_or(Commands::Run {
        server_info: None,
        identity: None,
    }) {
        Commands::Run {
            server_info,
            identity,
        } => {
            run_client(config, server_info, identity).await?;
        }
        Commands::Config { generate, output } => {
            if generate {
                let sample = config::generate_sample_config()?;
                if let Some(path) = output {
                    std::fs::write(&path, &sample)?;
                    println!("Configuration written to: {}", path.display());
                } else {
                    println!("{}", sample);
                }
            } else if let Some(path) = output {
                config.save(&path)?;
                println!("Configuration written to: {}", path.display());
            } else {
                println!("{}", toml::to_string_pretty(&config)?);
            }
        }
        Commands::Info => {
            print_protocol_info();
        }
    }

    Ok(())
}

/// Run the interactive client
async fn run_client(
    config: Config,
    server_info: Option<PathBuf>,
    identity: Option<PathBuf>,
) -> anyhow::Result<()> {
    let server_info = server_info.unwrap_or(config.files.server_info);
    let identity = identity.unwrap_or(config.files.identity);

    let address = config::load_server_address(&server_info)?;
    tracing::info!("Using server {} from {}", address, server_info.display());

    let client = ProtocolClient::new(Transport::with_address(address));
    let store = IdentityFile::new(identity);
    tracing::debug!("Identity file {}", store.path().display());
    let mut messenger = Messenger::new(client, store);
    if !messenger.load_identity()? {
        tracing::info!("No identity stored yet, register to get one");
    }

    let mut console = Console::new(
        messenger,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    );
    console.run().await?;

    Ok(())
}

/// Print protocol information
fn print_protocol_info() {
    println!("MessageU Protocol Information");
    println!("=============================\n");

    println!("Client Version: {}", protocol::CLIENT_VERSION);
    println!("Packet Size: {} bytes", PACKET_SIZE);
    println!("Request Header: {} bytes", protocol::REQUEST_HEADER_SIZE);
    println!("Response Header: {} bytes", protocol::RESPONSE_HEADER_SIZE);
    println!("Public Key: {} bytes", protocol::PUBLIC_KEY_SIZE);
    println!("Symmetric Key: {} bytes", protocol::SYMMETRIC_KEY_SIZE);
    println!("Max Username: {} characters", protocol::MAX_USERNAME_LEN);
}

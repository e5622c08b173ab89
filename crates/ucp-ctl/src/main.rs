//! ucp — command-line client for the UCP secure file copy server.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ucp_core::config::UcpConfig;

mod cmd;

#[derive(Parser)]
#[command(name = "ucp", about = "Secure file copy client", version)]
struct Cli {
    /// Server host name or address.
    #[arg(long, global = true)]
    host: Option<String>,

    /// Server port.
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Remote account to log in as (default: the current user).
    #[arg(long, global = true)]
    user: Option<String>,

    /// Directory holding the client keys.
    #[arg(long, global = true)]
    ucp_directory: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload a local file to the server.
    Send {
        #[arg(long)]
        local_file: PathBuf,
        #[arg(long)]
        remote_file: String,
    },
    /// Download a file from the server.
    Recv {
        #[arg(long)]
        remote_file: String,
        #[arg(long)]
        local_file: PathBuf,
    },
    /// Create the client key pair.
    Keygen {
        /// Replace existing keys.
        #[arg(long)]
        force: bool,
        /// Key size in bits.
        #[arg(long, default_value_t = ucp_core::wire::RSA_KEY_BITS)]
        bits: usize,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(Cli::parse()).await {
        eprintln!("ucp: {e:#}");
        std::process::exit(ucp_core::wire::EXIT_ERROR);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = UcpConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        let mut config = UcpConfig::default();
        config.apply_overrides(|name| std::env::var(name).ok());
        config
    });
    if let Some(host) = cli.host {
        config.client.host = host;
    }
    if let Some(port) = cli.port {
        config.client.port = port;
    }
    if let Some(user) = cli.user {
        config.client.user = Some(user);
    }
    if let Some(dir) = cli.ucp_directory {
        config.client.ucp_directory = dir;
    }

    match cli.command {
        Command::Send {
            local_file,
            remote_file,
        } => cmd::send::cmd_send(&config.client, &local_file, &remote_file).await,
        Command::Recv {
            remote_file,
            local_file,
        } => cmd::recv::cmd_recv(&config.client, &remote_file, &local_file).await,
        Command::Keygen { force, bits } => cmd::keygen::cmd_keygen(&config.client, bits, force),
    }
}

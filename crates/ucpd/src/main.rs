//! ucpd — UCP secure file copy server.
//!
//! Listens for clients, authenticates them against local accounts and hands
//! each transfer to a `ucp-proxy` helper running as the account.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;

use ucp_core::config::UcpConfig;
use ucp_core::crypto;
use ucp_core::keys::{self, KeyPaths};
use ucp_core::wire::RSA_KEY_BITS;
use ucp_services::account::{shadow_is_readable, OsServices};
use ucp_services::{OsHelperSpawner, ProxySettings};

mod listener;

use listener::ConnectionListener;

#[derive(Parser)]
#[command(name = "ucpd", about = "UCP secure file copy server", version)]
struct Args {
    /// Generate the server key pair in the UCP directory and exit.
    #[arg(long)]
    generate_keys: bool,

    /// Replace existing keys when generating.
    #[arg(long, requires = "generate_keys")]
    force: bool,

    /// Directory holding the server keys.
    #[arg(long)]
    ucp_directory: Option<PathBuf>,

    /// Address to accept connections on.
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Helper program spawned for each transfer.
    #[arg(long)]
    helper: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    // Load config
    let config_path = UcpConfig::file_path();
    if let Err(e) = UcpConfig::write_default_if_missing(&config_path) {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let mut config = UcpConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        let mut config = UcpConfig::default();
        config.apply_overrides(|name| std::env::var(name).ok());
        config
    });
    if let Some(dir) = args.ucp_directory {
        config.server.ucp_directory = dir;
    }
    if let Some(addr) = args.listen {
        config.server.listen_addr = addr;
    }
    if let Some(helper) = args.helper {
        config.server.helper_program = helper;
    }
    let server = config.server;

    if args.generate_keys {
        let paths = keys::generate_keys(&server.ucp_directory, RSA_KEY_BITS, args.force)
            .context("failed to generate server keys")?;
        println!("private key: {}", paths.private_key.display());
        println!("public key:  {}", paths.public_key.display());
        return Ok(());
    }

    // Keys
    let paths = KeyPaths::in_directory(&server.ucp_directory);
    let private_key = keys::load_private_key(&paths.private_key)
        .context("failed to load server key (run with --generate-keys first)")?;
    tracing::info!(
        fingerprint = %crypto::fingerprint(&private_key.to_public_key()),
        path = %paths.private_key.display(),
        "server key loaded"
    );

    if !shadow_is_readable(&server.shadow_path) {
        tracing::warn!(
            path = %server.shadow_path.display(),
            "shadow database not readable, password logins will fail"
        );
    }

    let services = Arc::new(OsServices::new(private_key, server.shadow_path.clone()));
    let spawner = Arc::new(OsHelperSpawner::new(server.helper_program.clone()));
    let settings = ProxySettings {
        socket_dir: server.socket_dir.clone(),
        connect_timeout: Duration::from_secs(server.helper_connect_timeout_secs),
    };

    let tcp = TcpListener::bind(server.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", server.listen_addr))?;
    tracing::info!(
        addr = %server.listen_addr,
        helper = %server.helper_program.display(),
        "ucpd listening"
    );

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    ConnectionListener::new(tcp, services, spawner, settings, shutdown_rx)
        .run()
        .await;

    tracing::info!("shutting down");
    Ok(())
}

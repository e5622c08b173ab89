//! ucp-proxy — per-transfer helper, started by ucpd under the account's
//! credentials.
//!
//! Connects back to the server's rendezvous socket and performs the file
//! I/O for exactly one transfer.
//!
//! Exit status: 0 success, 1 transfer failure, 2 rendezvous unreachable.
//! Failures are reported on stderr as a single line starting with
//! "ucp-proxy error: ".

use std::path::PathBuf;

use clap::Parser;
use tokio::net::UnixStream;
use tracing_subscriber::EnvFilter;
use ucp_core::wire::{EXIT_ERROR, EXIT_SOCKET, EXIT_SUCCESS, HELPER_ERROR_PREFIX};
use ucp_core::{Codec, Framed};
use ucp_services::helper;

#[derive(Parser)]
#[command(name = "ucp-proxy", about = "UCP file transfer helper", version)]
struct Args {
    /// Rendezvous socket created by the server.
    #[arg(long)]
    socket_path: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let args = Args::parse();

    let stream = match UnixStream::connect(&args.socket_path).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!(
                "{HELPER_ERROR_PREFIX}cannot connect to {}: {e}",
                args.socket_path.display()
            );
            std::process::exit(EXIT_SOCKET);
        }
    };

    let mut channel = Codec::new(Framed::new(stream));
    match helper::serve(&mut channel).await {
        Ok(stats) => {
            tracing::debug!(chunks = stats.chunks, bytes = stats.bytes, "transfer complete");
            std::process::exit(EXIT_SUCCESS);
        }
        Err(e) => {
            eprintln!("{HELPER_ERROR_PREFIX}{e}");
            std::process::exit(EXIT_ERROR);
        }
    }
}

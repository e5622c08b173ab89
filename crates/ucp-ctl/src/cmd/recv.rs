//! `ucp recv`: download a remote file.

use std::path::Path;

use anyhow::Result;

use ucp_core::config::ClientConfig;
use ucp_services::session::{self, Credentials};

use super::session::{dial, load_key, user_name, TerminalPrompt};

pub async fn cmd_recv(config: &ClientConfig, remote: &str, local: &Path) -> Result<()> {
    let private_key = load_key(config)?;
    let user = user_name(config)?;
    let stream = dial(config).await?;

    let mut prompt = TerminalPrompt;
    let stats = session::download(
        stream,
        Credentials {
            private_key,
            user: &user,
            prompt: &mut prompt,
        },
        remote,
        local,
    )
    .await?;

    println!(
        "{}@{}:{} -> {} ({} bytes, {} chunks)",
        user,
        config.host,
        remote,
        local.display(),
        stats.bytes,
        stats.chunks
    );
    Ok(())
}

//! `ucp send`: upload a local file.

use std::path::Path;

use anyhow::{bail, Context, Result};

use ucp_core::config::ClientConfig;
use ucp_services::session::{self, Credentials};

use super::session::{dial, load_key, user_name, TerminalPrompt};

pub async fn cmd_send(config: &ClientConfig, local: &Path, remote: &str) -> Result<()> {
    let mut file = tokio::fs::File::open(local)
        .await
        .with_context(|| format!("failed to open {}", local.display()))?;
    let metadata = file.metadata().await?;
    if !metadata.is_file() {
        bail!("{} is not a regular file", local.display());
    }

    let private_key = load_key(config)?;
    let user = user_name(config)?;
    let stream = dial(config).await?;

    let mut prompt = TerminalPrompt;
    let stats = session::upload(
        stream,
        Credentials {
            private_key,
            user: &user,
            prompt: &mut prompt,
        },
        &mut file,
        metadata.len(),
        remote,
    )
    .await?;

    println!(
        "{} -> {}@{}:{} ({} bytes, {} chunks)",
        local.display(),
        user,
        config.host,
        remote,
        stats.bytes,
        stats.chunks
    );
    Ok(())
}

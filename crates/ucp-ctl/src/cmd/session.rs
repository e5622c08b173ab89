//! Pieces shared by `send` and `recv`: key loading, dialing, and the
//! terminal password prompt.

use std::io;

use anyhow::{bail, Context, Result};
use rsa::RsaPrivateKey;
use tokio::net::TcpStream;
use zeroize::Zeroizing;

use ucp_core::config::ClientConfig;
use ucp_core::keys::{self, KeyPaths};
use ucp_services::PasswordPrompt;

/// Reads the password from the controlling terminal without echo.
pub struct TerminalPrompt;

impl PasswordPrompt for TerminalPrompt {
    fn prompt(&mut self, user: &str) -> io::Result<Zeroizing<String>> {
        let question = format!("Password for {user}: ");
        tokio::task::block_in_place(|| rpassword::prompt_password(question)).map(Zeroizing::new)
    }
}

pub fn load_key(config: &ClientConfig) -> Result<RsaPrivateKey> {
    let paths = KeyPaths::in_directory(&config.ucp_directory);
    keys::load_private_key(&paths.private_key)
        .context("failed to load client key (run `ucp keygen` first)")
}

/// The remote account name: configured, else the local user.
pub fn user_name(config: &ClientConfig) -> Result<String> {
    if let Some(user) = &config.user {
        return Ok(user.clone());
    }
    match nix::unistd::User::from_uid(nix::unistd::getuid()) {
        Ok(Some(user)) => Ok(user.name),
        Ok(None) => bail!("current user has no passwd entry, use --user"),
        Err(e) => Err(e).context("failed to look up current user"),
    }
}

pub async fn dial(config: &ClientConfig) -> Result<TcpStream> {
    if config.host.is_empty() {
        bail!("no server given, use --host or UCP_HOST");
    }
    let stream = TcpStream::connect((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("failed to connect to {}:{}", config.host, config.port))?;
    stream.set_nodelay(true).ok();
    tracing::debug!(host = %config.host, port = config.port, "connected");
    Ok(stream)
}

//! `ucp keygen`: create the client key pair.

use anyhow::{Context, Result};

use ucp_core::config::ClientConfig;
use ucp_core::crypto;
use ucp_core::keys;

pub fn cmd_keygen(config: &ClientConfig, bits: usize, force: bool) -> Result<()> {
    let paths = keys::generate_keys(&config.ucp_directory, bits, force)
        .with_context(|| format!("failed to generate keys in {}", config.ucp_directory.display()))?;
    let key = keys::load_private_key(&paths.private_key)?;

    println!("private key: {}", paths.private_key.display());
    println!("public key:  {}", paths.public_key.display());
    println!("fingerprint: {}", crypto::fingerprint(&key.to_public_key()));
    println!("append the public key to ~/.ucp/authorized_keys on the server");
    Ok(())
}

//! On-disk key storage.
//!
//! A UCP directory holds:
//!   private-key.pem   PKCS#1 PEM, mode 0400
//!   public-key        the authorized-keys line for this key
//!   authorized_keys   (server accounts only) one accepted key per line

use std::fs::{DirBuilder, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey, LineEnding};
use rsa::RsaPrivateKey;

use crate::crypto::{self, CryptoError};

pub const PRIVATE_KEY_FILE: &str = "private-key.pem";
pub const PUBLIC_KEY_FILE: &str = "public-key";
pub const AUTHORIZED_KEYS_FILE: &str = "authorized_keys";
/// Per-account directory name under the home directory.
pub const UCP_DIRECTORY_NAME: &str = ".ucp";

/// Paths written by [`generate_keys`].
#[derive(Debug, Clone)]
pub struct KeyPaths {
    pub private_key: PathBuf,
    pub public_key: PathBuf,
}

impl KeyPaths {
    pub fn in_directory(dir: &Path) -> Self {
        Self {
            private_key: dir.join(PRIVATE_KEY_FILE),
            public_key: dir.join(PUBLIC_KEY_FILE),
        }
    }
}

/// Create `dir` if needed and write a fresh key pair into it.
///
/// Existing keys are left alone unless `force` is set.
pub fn generate_keys(dir: &Path, bits: usize, force: bool) -> Result<KeyPaths, KeyError> {
    let paths = KeyPaths::in_directory(dir);
    if !force && (paths.private_key.exists() || paths.public_key.exists()) {
        return Err(KeyError::Exists(dir.to_path_buf()));
    }

    DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
        .map_err(|e| KeyError::Io(dir.to_path_buf(), e))?;

    let key = crypto::generate_private_key(bits)?;
    let pem = key
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| KeyError::Pem(paths.private_key.clone(), e.to_string()))?;

    // A read-only file cannot be truncated in place
    if force {
        remove_if_present(&paths.private_key)?;
        remove_if_present(&paths.public_key)?;
    }

    write_new(&paths.private_key, pem.as_bytes(), 0o400)?;
    let line = crypto::authorized_key_line(&key.to_public_key());
    write_new(&paths.public_key, line.as_bytes(), 0o644)?;

    tracing::info!(
        dir = %dir.display(),
        bits,
        fingerprint = %crypto::fingerprint(&key.to_public_key()),
        "generated key pair"
    );
    Ok(paths)
}

/// Load a PKCS#1 PEM private key.
pub fn load_private_key(path: &Path) -> Result<RsaPrivateKey, KeyError> {
    let pem = std::fs::read_to_string(path).map_err(|e| KeyError::Io(path.to_path_buf(), e))?;
    RsaPrivateKey::from_pkcs1_pem(&pem).map_err(|e| KeyError::Pem(path.to_path_buf(), e.to_string()))
}

fn write_new(path: &Path, contents: &[u8], mode: u32) -> Result<(), KeyError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(path)
        .map_err(|e| KeyError::Io(path.to_path_buf(), e))?;
    file.write_all(contents)
        .map_err(|e| KeyError::Io(path.to_path_buf(), e))
}

fn remove_if_present(path: &Path) -> Result<(), KeyError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(KeyError::Io(path.to_path_buf(), e)),
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("{0}: {1}")]
    Io(PathBuf, std::io::Error),

    #[error("{0}: invalid PEM key: {1}")]
    Pem(PathBuf, String),

    #[error("keys already exist in {0} (use --force to replace them)")]
    Exists(PathBuf),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

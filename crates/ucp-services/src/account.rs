//! Local account services — the server's view of the host's users.
//!
//! The authorization state machine and the proxy depend only on the
//! `AccountServices` trait. `OsServices` backs it with the passwd and
//! shadow databases; tests supply their own implementation.

use std::path::{Path, PathBuf};

use rsa::RsaPrivateKey;
use thiserror::Error;
use ucp_core::keys::{AUTHORIZED_KEYS_FILE, UCP_DIRECTORY_NAME};

/// A resolved local account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
    pub home: PathBuf,
}

impl Account {
    pub fn authorized_keys_path(&self) -> PathBuf {
        self.home.join(UCP_DIRECTORY_NAME).join(AUTHORIZED_KEYS_FILE)
    }
}

/// Everything the server needs to know about the host.
pub trait AccountServices: Send + Sync {
    /// The server's own private key, used for the handshake.
    fn private_key(&self) -> RsaPrivateKey;

    /// Resolve a claimed user name. `Ok(None)` means no such account.
    fn lookup_user(&self, name: &str) -> Result<Option<Account>, ServiceError>;

    /// Raw bytes of the account's authorized-keys store. A missing store
    /// is empty, not an error.
    fn authorized_keys(&self, account: &Account) -> Result<Vec<u8>, ServiceError>;

    /// Check a password for the account.
    fn verify_password(&self, account: &Account, password: &str) -> Result<(), ServiceError>;
}

// ── OS-backed implementation ──────────────────────────────────────────────────

pub struct OsServices {
    private_key: RsaPrivateKey,
    shadow_path: PathBuf,
}

impl OsServices {
    pub fn new(private_key: RsaPrivateKey, shadow_path: impl Into<PathBuf>) -> Self {
        Self {
            private_key,
            shadow_path: shadow_path.into(),
        }
    }
}

impl AccountServices for OsServices {
    fn private_key(&self) -> RsaPrivateKey {
        self.private_key.clone()
    }

    fn lookup_user(&self, name: &str) -> Result<Option<Account>, ServiceError> {
        let user = nix::unistd::User::from_name(name)
            .map_err(|e| ServiceError::Lookup(name.to_string(), e))?;
        Ok(user.map(|u| Account {
            name: u.name,
            uid: u.uid.as_raw(),
            gid: u.gid.as_raw(),
            home: u.dir,
        }))
    }

    fn authorized_keys(&self, account: &Account) -> Result<Vec<u8>, ServiceError> {
        let path = account.authorized_keys_path();
        match std::fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(ServiceError::Read(path, e)),
        }
    }

    fn verify_password(&self, account: &Account, password: &str) -> Result<(), ServiceError> {
        let shadow = std::fs::read_to_string(&self.shadow_path)
            .map_err(|e| ServiceError::Read(self.shadow_path.clone(), e))?;
        let hash = shadow_hash(&shadow, &account.name)
            .ok_or_else(|| ServiceError::NoPasswordEntry(account.name.clone()))?;
        check_hash(hash, password)
    }
}

/// The password hash field of `name`'s shadow entry.
fn shadow_hash<'a>(shadow: &'a str, name: &str) -> Option<&'a str> {
    shadow.lines().find_map(|line| {
        let mut fields = line.splitn(3, ':');
        (fields.next()? == name).then(|| fields.next()).flatten()
    })
}

fn check_hash(hash: &str, password: &str) -> Result<(), ServiceError> {
    // Empty, "*" and "!"-prefixed hashes are locked accounts
    if hash.is_empty() || hash.starts_with('!') || hash.starts_with('*') {
        return Err(ServiceError::Locked);
    }
    if pwhash::unix::verify(password, hash) {
        Ok(())
    } else {
        Err(ServiceError::IncorrectPassword)
    }
}

/// Whether the shadow database can be opened. Without it every password
/// check fails.
pub fn shadow_is_readable(path: &Path) -> bool {
    std::fs::File::open(path).is_ok()
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to look up user '{0}': {1}")]
    Lookup(String, nix::Error),

    #[error("failed to read {0}: {1}")]
    Read(PathBuf, std::io::Error),

    #[error("no password entry for '{0}'")]
    NoPasswordEntry(String),

    #[error("account is locked")]
    Locked,

    #[error("incorrect password")]
    IncorrectPassword,
}

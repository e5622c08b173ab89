//! UCP integration test harness.
//!
//! Drives a real client session against a real server session over an
//! in-memory stream. Transfers go through the `ucp-proxy` binary, which
//! must already be built:
//!
//!   cargo build -p ucp-services
//!   cargo test --test integration
//!
//! Tests that need the helper skip themselves when it is missing.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use rsa::RsaPrivateKey;
use tokio::io::duplex;
use tokio::process::Child;
use zeroize::Zeroizing;

use ucp_core::crypto;
use ucp_services::session::{self, Credentials, ServedTransfer, SessionError};
use ucp_services::{
    Account, AccountServices, HelperSpawner, OsHelperSpawner, PasswordPrompt, ProxySettings,
    ServiceError,
};

mod sessions;
mod transfers;

// ── Harness ───────────────────────────────────────────────────────────────────

pub fn server_key() -> RsaPrivateKey {
    keys().0.clone()
}

pub fn client_key() -> RsaPrivateKey {
    keys().1.clone()
}

fn keys() -> &'static (RsaPrivateKey, RsaPrivateKey) {
    static KEYS: OnceLock<(RsaPrivateKey, RsaPrivateKey)> = OnceLock::new();
    KEYS.get_or_init(|| {
        (
            crypto::generate_private_key(1024).unwrap(),
            crypto::generate_private_key(1024).unwrap(),
        )
    })
}

/// Path of the helper binary, next to this test executable's target dir.
pub fn helper_binary() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    // target/<profile>/deps/integration-<hash>
    let profile_dir = exe.parent()?.parent()?;
    let helper = profile_dir.join("ucp-proxy");
    helper.is_file().then_some(helper)
}

/// Accounts backed by the invoking user, with a scratch home directory so
/// relative paths stay inside the test's temp dir.
pub struct TestAccounts {
    users: HashMap<String, (Account, Vec<u8>, String)>,
}

impl TestAccounts {
    pub fn new() -> Self {
        Self {
            users: HashMap::new(),
        }
    }

    /// Add an account named `name` that maps to the current uid/gid.
    pub fn with_user(mut self, name: &str, home: &Path, key_listed: bool, password: &str) -> Self {
        let me = nix::unistd::User::from_uid(nix::unistd::geteuid())
            .unwrap()
            .unwrap();
        let account = Account {
            name: name.to_string(),
            uid: me.uid.as_raw(),
            gid: me.gid.as_raw(),
            home: home.to_path_buf(),
        };
        let store = if key_listed {
            crypto::authorized_key_line(&client_key().to_public_key()).into_bytes()
        } else {
            Vec::new()
        };
        self.users
            .insert(name.to_string(), (account, store, password.to_string()));
        self
    }
}

impl AccountServices for TestAccounts {
    fn private_key(&self) -> RsaPrivateKey {
        server_key()
    }

    fn lookup_user(&self, name: &str) -> Result<Option<Account>, ServiceError> {
        Ok(self.users.get(name).map(|(account, _, _)| account.clone()))
    }

    fn authorized_keys(&self, account: &Account) -> Result<Vec<u8>, ServiceError> {
        Ok(self.users[&account.name].1.clone())
    }

    fn verify_password(&self, account: &Account, password: &str) -> Result<(), ServiceError> {
        if self.users[&account.name].2 == password {
            Ok(())
        } else {
            Err(ServiceError::IncorrectPassword)
        }
    }
}

/// Answers password prompts from a script and counts them.
pub struct Prompt {
    answers: Vec<String>,
    pub asked: usize,
}

impl Prompt {
    pub fn answering(answers: &[&str]) -> Self {
        Self {
            answers: answers.iter().rev().map(|a| a.to_string()).collect(),
            asked: 0,
        }
    }
}

impl PasswordPrompt for Prompt {
    fn prompt(&mut self, _user: &str) -> io::Result<Zeroizing<String>> {
        self.asked += 1;
        self.answers
            .pop()
            .map(Zeroizing::new)
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no more answers"))
    }
}

/// Refuses to start helpers.
pub struct NoHelper;

impl HelperSpawner for NoHelper {
    fn spawn(&self, _account: &Account, _socket_path: &Path) -> io::Result<Child> {
        Err(io::Error::new(io::ErrorKind::PermissionDenied, "helpers disabled"))
    }
}

pub fn proxy_settings(socket_dir: &Path) -> ProxySettings {
    ProxySettings {
        socket_dir: socket_dir.to_path_buf(),
        connect_timeout: Duration::from_secs(10),
    }
}

pub fn real_helper() -> Option<OsHelperSpawner> {
    match helper_binary() {
        Some(path) => Some(OsHelperSpawner::new(path)),
        None => {
            eprintln!("SKIP: ucp-proxy not built, run cargo build -p ucp-services first");
            None
        }
    }
}

/// What the client asks for.
pub enum Request<'a> {
    Upload { data: &'a [u8], remote: &'a str },
    Download { remote: &'a str, local: &'a Path },
}

pub struct Outcome {
    pub server: Result<ServedTransfer, SessionError>,
    pub client: Result<ucp_core::TransferStats, SessionError>,
}

/// Run one server session and one client session against each other.
pub async fn run_session<H: HelperSpawner>(
    accounts: &TestAccounts,
    spawner: &H,
    settings: &ProxySettings,
    user: &str,
    prompt: &mut Prompt,
    request: Request<'_>,
) -> Outcome {
    let (server_io, client_io) = duplex(256 * 1024);
    let server = session::serve(server_io, accounts, spawner, settings);
    let credentials = Credentials {
        private_key: client_key(),
        user,
        prompt,
    };

    let (server, client) = match request {
        Request::Upload { data, remote } => {
            let mut source = data;
            let client = session::upload(client_io, credentials, &mut source, data.len() as u64, remote);
            tokio::join!(server, client)
        }
        Request::Download { remote, local } => {
            let client = session::download(client_io, credentials, remote, local);
            tokio::join!(server, client)
        }
    };
    Outcome { server, client }
}

//! Shared test doubles.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use rsa::{RsaPrivateKey, RsaPublicKey};
use ucp_core::crypto;
use zeroize::Zeroizing;

use crate::account::{Account, AccountServices, ServiceError};
use crate::auth::PasswordPrompt;

fn keys() -> &'static (RsaPrivateKey, RsaPrivateKey) {
    static KEYS: OnceLock<(RsaPrivateKey, RsaPrivateKey)> = OnceLock::new();
    KEYS.get_or_init(|| {
        (
            crypto::generate_private_key(1024).unwrap(),
            crypto::generate_private_key(1024).unwrap(),
        )
    })
}

pub fn server_key() -> RsaPrivateKey {
    keys().0.clone()
}

pub fn client_key() -> RsaPrivateKey {
    keys().1.clone()
}

struct FakeUser {
    account: Account,
    authorized_keys: Vec<u8>,
    password: String,
}

/// In-memory accounts. Counts authorized-keys reads.
pub struct FakeServices {
    users: HashMap<String, FakeUser>,
    key_checks: AtomicUsize,
}

impl FakeServices {
    pub fn new() -> Self {
        Self {
            users: HashMap::new(),
            key_checks: AtomicUsize::new(0),
        }
    }

    pub fn with_user(mut self, name: &str, listed_key: Option<RsaPublicKey>, password: &str) -> Self {
        let uid = 1000 + self.users.len() as u32;
        self.users.insert(
            name.to_string(),
            FakeUser {
                account: Account {
                    name: name.to_string(),
                    uid,
                    gid: uid,
                    home: std::env::temp_dir(),
                },
                authorized_keys: listed_key
                    .map(|k| crypto::authorized_key_line(&k).into_bytes())
                    .unwrap_or_default(),
                password: password.to_string(),
            },
        );
        self
    }

    pub fn key_checks(&self) -> usize {
        self.key_checks.load(Ordering::SeqCst)
    }
}

impl AccountServices for FakeServices {
    fn private_key(&self) -> RsaPrivateKey {
        server_key()
    }

    fn lookup_user(&self, name: &str) -> Result<Option<Account>, ServiceError> {
        Ok(self.users.get(name).map(|u| u.account.clone()))
    }

    fn authorized_keys(&self, account: &Account) -> Result<Vec<u8>, ServiceError> {
        self.key_checks.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .users
            .get(&account.name)
            .map(|u| u.authorized_keys.clone())
            .unwrap_or_default())
    }

    fn verify_password(&self, account: &Account, password: &str) -> Result<(), ServiceError> {
        match self.users.get(&account.name) {
            Some(u) if u.password == password => Ok(()),
            _ => Err(ServiceError::IncorrectPassword),
        }
    }
}

/// Answers prompts from a fixed list and counts how often it was asked.
pub struct ScriptedPrompt {
    answers: VecDeque<String>,
    pub asked: usize,
}

impl ScriptedPrompt {
    pub fn new(answers: &[&str]) -> Self {
        Self {
            answers: answers.iter().map(|a| a.to_string()).collect(),
            asked: 0,
        }
    }
}

impl PasswordPrompt for ScriptedPrompt {
    fn prompt(&mut self, _user: &str) -> std::io::Result<Zeroizing<String>> {
        self.asked += 1;
        self.answers
            .pop_front()
            .map(Zeroizing::new)
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "no scripted answer"))
    }
}

//! Cryptographic primitives for UCP.
//!
//! Provides:
//!   1. RSA key generation and PKCS#1 DER encoding of public keys
//!   2. Blockwise RSA-OAEP for the handshake layer
//!   3. AES-256 session keys for the symmetric layer
//!   4. The authorized-keys line format and key fingerprints
//!
//! Session key material derives ZeroizeOnDrop and is wiped from memory
//! when dropped. There is no unsafe code in this module.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs1::{DecodeRsaPublicKey, EncodeRsaPublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::wire::{SessionKeyRecord, AES_KEY_SIZE, IV_BLOCK_SIZE};

/// OAEP overhead with SHA-256: two digests plus two bytes.
const OAEP_OVERHEAD: usize = 2 * 32 + 2;

// ── RSA Keys ──────────────────────────────────────────────────────────────────

pub fn generate_private_key(bits: usize) -> Result<RsaPrivateKey, CryptoError> {
    RsaPrivateKey::new(&mut OsRng, bits).map_err(CryptoError::Rsa)
}

/// PKCS#1 DER encoding of a public key, as carried in the handshake.
pub fn public_key_to_der(key: &RsaPublicKey) -> Result<Vec<u8>, CryptoError> {
    key.to_pkcs1_der()
        .map(|doc| doc.as_bytes().to_vec())
        .map_err(|e| CryptoError::Encoding(e.to_string()))
}

pub fn public_key_from_der(der: &[u8]) -> Result<RsaPublicKey, CryptoError> {
    RsaPublicKey::from_pkcs1_der(der).map_err(|e| CryptoError::Encoding(e.to_string()))
}

/// Short hex fingerprint for logs. Not part of the protocol.
pub fn fingerprint(key: &RsaPublicKey) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&key.n().to_bytes_be());
    hasher.update(&key.e().to_bytes_be());
    hex::encode(&hasher.finalize().as_bytes()[..8])
}

// ── OAEP ──────────────────────────────────────────────────────────────────────

/// Largest plaintext block one OAEP operation accepts for this key.
pub fn oaep_block_len(key: &RsaPublicKey) -> usize {
    key.size().saturating_sub(OAEP_OVERHEAD)
}

/// Encrypt to `key`, splitting the payload into OAEP-sized blocks.
///
/// The ciphertext is the concatenation of one modulus-sized block per
/// plaintext block. An empty payload encrypts as one empty block.
pub fn encrypt_oaep(key: &RsaPublicKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let block_len = oaep_block_len(key);
    if block_len == 0 {
        return Err(CryptoError::KeyTooSmall(key.size()));
    }

    let mut out = Vec::with_capacity((plaintext.len() / block_len + 1) * key.size());
    if plaintext.is_empty() {
        out.extend(key.encrypt(&mut OsRng, Oaep::new::<Sha256>(), &[])?);
        return Ok(out);
    }
    for block in plaintext.chunks(block_len) {
        out.extend(key.encrypt(&mut OsRng, Oaep::new::<Sha256>(), block)?);
    }
    Ok(out)
}

pub fn decrypt_oaep(key: &RsaPrivateKey, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let block_len = key.size();
    if ciphertext.is_empty() || ciphertext.len() % block_len != 0 {
        return Err(CryptoError::CiphertextLength(ciphertext.len()));
    }

    let mut out = Vec::with_capacity(ciphertext.len());
    for block in ciphertext.chunks(block_len) {
        out.extend(key.decrypt(Oaep::new::<Sha256>(), block)?);
    }
    Ok(out)
}

// ── Session Key ───────────────────────────────────────────────────────────────

/// Symmetric key and IV for one connection.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKey {
    key: [u8; AES_KEY_SIZE],
    iv: [u8; IV_BLOCK_SIZE],
}

impl SessionKey {
    /// Fresh random key and IV from the OS generator.
    pub fn generate() -> Self {
        let mut key = [0u8; AES_KEY_SIZE];
        let mut iv = [0u8; IV_BLOCK_SIZE];
        OsRng.fill_bytes(&mut key);
        OsRng.fill_bytes(&mut iv);
        Self { key, iv }
    }

    /// Accept session material from the peer. Lengths must be exact.
    pub fn from_record(record: &SessionKeyRecord) -> Result<Self, CryptoError> {
        let key: [u8; AES_KEY_SIZE] = record
            .key
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidSessionKey)?;
        let iv: [u8; IV_BLOCK_SIZE] = record
            .initialization_vector
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidSessionKey)?;
        Ok(Self { key, iv })
    }

    pub fn to_record(&self) -> SessionKeyRecord {
        SessionKeyRecord {
            key: self.key.to_vec(),
            initialization_vector: self.iv.to_vec(),
            client_ack: false,
        }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }
}

// ── Authorized Keys ───────────────────────────────────────────────────────────

/// Render a public key as one authorized-keys line, newline included:
///
///   ssh-rsa <base64(string "ssh-rsa" | mpint e | mpint n)>\n
///
/// The server compares this text byte-for-byte (newline stripped) against
/// each line of the account's authorized_keys file.
pub fn authorized_key_line(key: &RsaPublicKey) -> String {
    let mut blob = Vec::new();
    put_string(&mut blob, b"ssh-rsa");
    put_mpint(&mut blob, &key.e().to_bytes_be());
    put_mpint(&mut blob, &key.n().to_bytes_be());
    format!("ssh-rsa {}\n", BASE64.encode(blob))
}

fn put_string(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(data);
}

fn put_mpint(out: &mut Vec<u8>, magnitude: &[u8]) {
    // Positive integers with the high bit set get a leading zero byte
    if magnitude.first().is_some_and(|b| b & 0x80 != 0) {
        out.extend_from_slice(&(magnitude.len() as u32 + 1).to_be_bytes());
        out.push(0);
        out.extend_from_slice(magnitude);
    } else {
        put_string(out, magnitude);
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("RSA operation failed: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("key encoding error: {0}")]
    Encoding(String),

    #[error("RSA key of {0} bytes is too small for OAEP")]
    KeyTooSmall(usize),

    #[error("ciphertext length {0} is not a whole number of RSA blocks")]
    CiphertextLength(usize),

    #[error("session key must be 32 bytes with a 16 byte IV")]
    InvalidSessionKey,
}

// ── Test Keys ─────────────────────────────────────────────────────────────────

/// Two 1024-bit keys shared by every test in the crate.
#[cfg(test)]
pub(crate) fn test_keys() -> (RsaPrivateKey, RsaPrivateKey) {
    use std::sync::OnceLock;
    static KEYS: OnceLock<(RsaPrivateKey, RsaPrivateKey)> = OnceLock::new();
    KEYS.get_or_init(|| {
        (
            generate_private_key(1024).unwrap(),
            generate_private_key(1024).unwrap(),
        )
    })
    .clone()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! Message channels — the layered connection stack.
//!
//! Every layer speaks the same contract: write one whole message, read one
//! whole message. Layers compose by ownership:
//!
//!   Codec ─▶ Symmetric ─▶ Framed ─▶ stream      (after the handshake)
//!   Codec ─▶ Asymmetric ─▶ Framed ─▶ stream     (during the handshake)
//!   Codec ─▶ Framed ─▶ unix socket              (server <-> helper)
//!
//! Transforming layers (encryption) hand the transformed payload to the
//! inner layer; framing is always at the bottom.

use std::future::Future;

use aes::Aes256;
use cfb_mode::{BufDecryptor, BufEncryptor};
use cfb_mode::cipher::KeyIvInit;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::crypto::{self, CryptoError, SessionKey};
use crate::frame::FrameError;
use crate::wire::Conversation;

/// One whole message in, one whole message out.
pub trait MessageChannel: Send {
    /// Write `payload` as a single message. Returns the payload length.
    fn write_message(
        &mut self,
        payload: &[u8],
    ) -> impl Future<Output = Result<usize, ChannelError>> + Send;

    /// Read the next message into `dest`, replacing its contents.
    fn read_message(
        &mut self,
        dest: &mut Vec<u8>,
    ) -> impl Future<Output = Result<usize, ChannelError>> + Send;
}

// ── Asymmetric Layer ──────────────────────────────────────────────────────────

/// RSA-OAEP layer, used only while the session key is exchanged.
///
/// Outgoing payloads are encrypted to the peer's public key, incoming ones
/// decrypted with our private key.
pub struct Asymmetric<C> {
    inner: C,
    peer_key: RsaPublicKey,
    own_key: RsaPrivateKey,
}

impl<C> Asymmetric<C> {
    pub fn new(inner: C, peer_key: RsaPublicKey, own_key: RsaPrivateKey) -> Self {
        Self {
            inner,
            peer_key,
            own_key,
        }
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

impl<C: MessageChannel> MessageChannel for Asymmetric<C> {
    async fn write_message(&mut self, payload: &[u8]) -> Result<usize, ChannelError> {
        let ciphertext = crypto::encrypt_oaep(&self.peer_key, payload)?;
        self.inner.write_message(&ciphertext).await?;
        Ok(payload.len())
    }

    async fn read_message(&mut self, dest: &mut Vec<u8>) -> Result<usize, ChannelError> {
        let mut ciphertext = Vec::new();
        self.inner.read_message(&mut ciphertext).await?;
        let plaintext = crypto::decrypt_oaep(&self.own_key, &ciphertext)?;
        dest.clear();
        dest.extend_from_slice(&plaintext);
        Ok(dest.len())
    }
}

// ── Symmetric Layer ───────────────────────────────────────────────────────────

/// AES-256-CFB layer carrying everything after the handshake.
///
/// Each direction keeps its own stream state, so ciphertext for message N
/// depends on every message before it in that direction. Both peers must
/// build the layer from the same session key at the same point in the
/// conversation.
pub struct Symmetric<C> {
    inner: C,
    encryptor: BufEncryptor<Aes256>,
    decryptor: BufDecryptor<Aes256>,
}

impl<C> Symmetric<C> {
    pub fn new(inner: C, session: &SessionKey) -> Result<Self, CryptoError> {
        let encryptor = BufEncryptor::<Aes256>::new_from_slices(session.key(), session.iv())
            .map_err(|_| CryptoError::InvalidSessionKey)?;
        let decryptor = BufDecryptor::<Aes256>::new_from_slices(session.key(), session.iv())
            .map_err(|_| CryptoError::InvalidSessionKey)?;
        Ok(Self {
            inner,
            encryptor,
            decryptor,
        })
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

impl<C: MessageChannel> MessageChannel for Symmetric<C> {
    async fn write_message(&mut self, payload: &[u8]) -> Result<usize, ChannelError> {
        let mut ciphertext = payload.to_vec();
        self.encryptor.encrypt(&mut ciphertext);
        self.inner.write_message(&ciphertext).await?;
        Ok(payload.len())
    }

    async fn read_message(&mut self, dest: &mut Vec<u8>) -> Result<usize, ChannelError> {
        self.inner.read_message(dest).await?;
        self.decryptor.decrypt(dest);
        Ok(dest.len())
    }
}

// ── Typed Codec ───────────────────────────────────────────────────────────────

/// Serialize a record to a message payload.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, ChannelError> {
    Ok(bincode::serialize(value)?)
}

/// Deserialize a message payload. A payload that does not decode as `T` is
/// a protocol error.
pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ChannelError> {
    Ok(bincode::deserialize(payload)?)
}

/// Typed records on top of any message channel.
pub struct Codec<C> {
    inner: C,
    scratch: Vec<u8>,
}

impl<C> Codec<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            scratch: Vec::new(),
        }
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

impl<C: MessageChannel> Codec<C> {
    pub async fn send<T: Serialize + Sync + ?Sized>(&mut self, value: &T) -> Result<(), ChannelError> {
        let payload = encode(value)?;
        self.inner.write_message(&payload).await?;
        Ok(())
    }

    pub async fn recv<T: DeserializeOwned>(&mut self) -> Result<T, ChannelError> {
        self.inner.read_message(&mut self.scratch).await?;
        decode(&self.scratch)
    }

    /// Receive a token and insist it is `expected`.
    pub async fn expect(&mut self, expected: Conversation) -> Result<(), ChannelError> {
        let received: Conversation = self.recv().await?;
        if received != expected {
            return Err(ChannelError::UnexpectedToken { expected, received });
        }
        Ok(())
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("malformed record: {0}")]
    Decode(#[from] bincode::Error),

    #[error("expected {expected}, received {received}")]
    UnexpectedToken {
        expected: Conversation,
        received: Conversation,
    },
}

impl ChannelError {
    /// The peer went away cleanly between messages.
    pub fn is_closed(&self) -> bool {
        matches!(self, ChannelError::Frame(FrameError::Closed))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

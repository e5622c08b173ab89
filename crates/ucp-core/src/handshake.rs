//! Session establishment — RSA bootstrap, then AES for everything else.
//!
//! Server (accept)                          Client (connect)
//!   ── PublicKeyRecord (plain) ──────────▶
//!   ◀── PublicKeyRecord (OAEP to server) ──
//!   ── SessionKeyRecord (OAEP to client) ─▶
//!   ◀── SessionKeyRecord{ack} (AES) ───────
//!
//! Any failure aborts the connection. Nothing negotiated here is reused
//! for a retry; the client redials.

use rsa::{RsaPrivateKey, RsaPublicKey};
use thiserror::Error;

use crate::channel::{self, Asymmetric, ChannelError, Codec, MessageChannel, Symmetric};
use crate::crypto::{self, CryptoError, SessionKey};
use crate::frame::{ByteStream, Framed};
use crate::wire::{PublicKeyRecord, SessionKeyRecord};

/// The stack every post-handshake message travels through.
pub type SecureChannel<S> = Codec<Symmetric<Framed<S>>>;

/// Server side. Returns the secure channel and the client's public key,
/// which authorization checks against the account's authorized keys.
pub async fn accept<S: ByteStream>(
    stream: S,
    private_key: RsaPrivateKey,
) -> Result<(SecureChannel<S>, RsaPublicKey), HandshakeError> {
    let own_public = private_key.to_public_key();

    // 1. Our public key, in the clear.
    let mut plain = Codec::new(Framed::new(stream));
    plain
        .send(&PublicKeyRecord {
            der: crypto::public_key_to_der(&own_public)?,
        })
        .await?;

    // 2. The client's key arrives encrypted to us. We cannot build the
    //    asymmetric layer until we know it, so decrypt this one by hand.
    let mut framed = plain.into_inner();
    let mut ciphertext = Vec::new();
    framed.read_message(&mut ciphertext).await?;
    let record: PublicKeyRecord = channel::decode(&crypto::decrypt_oaep(&private_key, &ciphertext)?)?;
    let client_key = crypto::public_key_from_der(&record.der)?;
    tracing::debug!(client_key = %crypto::fingerprint(&client_key), "received client key");

    // 3-4. Session key over the asymmetric layer.
    let session = SessionKey::generate();
    let mut asymmetric = Codec::new(Asymmetric::new(framed, client_key.clone(), private_key));
    asymmetric.send(&session.to_record()).await?;

    // 5-6. Acknowledgment over the symmetric layer.
    let framed = asymmetric.into_inner().into_inner();
    let mut secure = Codec::new(Symmetric::new(framed, &session)?);
    let ack: SessionKeyRecord = secure.recv().await?;
    if !ack.client_ack {
        return Err(HandshakeError::ClientAesKeyAck);
    }

    tracing::debug!("session established");
    Ok((secure, client_key))
}

/// Client side. Returns the secure channel and the server's public key.
pub async fn connect<S: ByteStream>(
    stream: S,
    private_key: RsaPrivateKey,
) -> Result<(SecureChannel<S>, RsaPublicKey), HandshakeError> {
    let own_public = private_key.to_public_key();

    let mut plain = Codec::new(Framed::new(stream));
    let record: PublicKeyRecord = plain.recv().await?;
    let server_key = crypto::public_key_from_der(&record.der)?;
    tracing::debug!(server_key = %crypto::fingerprint(&server_key), "received server key");

    let mut asymmetric = Codec::new(Asymmetric::new(plain.into_inner(), server_key.clone(), private_key));
    asymmetric
        .send(&PublicKeyRecord {
            der: crypto::public_key_to_der(&own_public)?,
        })
        .await?;

    let record: SessionKeyRecord = asymmetric.recv().await?;
    let session = SessionKey::from_record(&record).map_err(|_| HandshakeError::InvalidSessionKey {
        key_len: record.key.len(),
        iv_len: record.initialization_vector.len(),
    })?;

    let framed = asymmetric.into_inner().into_inner();
    let mut secure = Codec::new(Symmetric::new(framed, &session)?);
    secure.send(&SessionKeyRecord::acknowledgment()).await?;

    tracing::debug!("session established");
    Ok((secure, server_key))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("client didn't acknowledge receipt of AES keys")]
    ClientAesKeyAck,

    #[error("invalid session key: {key_len} byte key, {iv_len} byte IV")]
    InvalidSessionKey { key_len: usize, iv_len: usize },
}

// ── Tests ─────────────────────────────────────────────────────────────────────

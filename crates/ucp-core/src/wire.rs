//! UCP wire format — every record and token exchanged between peers.
//!
//! These types ARE the protocol. The framed transport carries opaque
//! payloads; the typed codec turns the records below into those payloads.
//! Changing a field, a variant order or a token string is a breaking change
//! for every deployed client and helper.
//!
//! The frame header is #[repr(C)] with explicit little-endian fields and
//! uses zerocopy derives for allocation-free encoding. There is no unsafe
//! code in this module.

use std::fmt;

use serde::{Deserialize, Serialize};
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes};
use zeroize::{Zeroize, ZeroizeOnDrop};

// ── Frame Header ──────────────────────────────────────────────────────────────

/// Precedes every message on the framed transport.
///
/// Wire size: 24 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct FrameHeader {
    /// Length of the payload in bytes, not including this header.
    pub length: U64<LittleEndian>,

    /// MD5 digest of the payload bytes.
    /// Verified by the receiver after the whole payload is assembled.
    pub checksum: [u8; 16],
}

assert_eq_size!(FrameHeader, [u8; 24]);

impl FrameHeader {
    pub fn new(length: u64, checksum: [u8; 16]) -> Self {
        Self {
            length: U64::new(length),
            checksum,
        }
    }

    pub fn payload_len(&self) -> u64 {
        self.length.get()
    }
}

// ── Conversation Tokens ───────────────────────────────────────────────────────

/// Control markers exchanged as typed values. The receiver switches on them;
/// a token out of sequence is a protocol error, never skipped.
///
/// On the wire each token is its string name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Conversation {
    UserNameRequest,
    FileTransferInformationRequest,
    FileTransferStart,
    FileTransferMore,
    FileTransferComplete,
    FileTransferAbort,
    FileTransferFail,
}

impl Conversation {
    pub fn as_str(self) -> &'static str {
        match self {
            Conversation::UserNameRequest => "USER_NAME",
            Conversation::FileTransferInformationRequest => "REQUEST_FILE_TRANSFER_INFORMATION",
            Conversation::FileTransferStart => "FILE_TRANSFER_START",
            Conversation::FileTransferMore => "FILE_TRANSFER_MORE",
            Conversation::FileTransferComplete => "FILE_TRANSFER_COMPLETE",
            Conversation::FileTransferAbort => "FILE_TRANSFER_ABORT",
            Conversation::FileTransferFail => "FILE_TRANSFER_FAIL",
        }
    }
}

impl fmt::Display for Conversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Conversation> for String {
    fn from(token: Conversation) -> String {
        token.as_str().to_string()
    }
}

impl TryFrom<String> for Conversation {
    type Error = WireError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "USER_NAME" => Ok(Conversation::UserNameRequest),
            "REQUEST_FILE_TRANSFER_INFORMATION" => Ok(Conversation::FileTransferInformationRequest),
            "FILE_TRANSFER_START" => Ok(Conversation::FileTransferStart),
            "FILE_TRANSFER_MORE" => Ok(Conversation::FileTransferMore),
            "FILE_TRANSFER_COMPLETE" => Ok(Conversation::FileTransferComplete),
            "FILE_TRANSFER_ABORT" => Ok(Conversation::FileTransferAbort),
            "FILE_TRANSFER_FAIL" => Ok(Conversation::FileTransferFail),
            _ => Err(WireError::UnknownConversation(value)),
        }
    }
}

// ── Handshake Records ─────────────────────────────────────────────────────────

/// An RSA public key, PKCS#1 DER encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKeyRecord {
    pub der: Vec<u8>,
}

/// Symmetric session material, server -> client over the asymmetric layer.
///
/// The client answers over the symmetric layer with an empty key and IV
/// and `client_ack` set.
#[derive(Debug, Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeyRecord {
    pub key: Vec<u8>,
    pub initialization_vector: Vec<u8>,
    #[zeroize(skip)]
    pub client_ack: bool,
}

impl SessionKeyRecord {
    pub fn acknowledgment() -> Self {
        Self {
            key: Vec::new(),
            initialization_vector: Vec::new(),
            client_ack: true,
        }
    }
}

// ── Authorization Records ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthorizationCode {
    Authorized,
    PasswordRequired,
    NonexistentUser,
    IncorrectPassword,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAuthorizationResponse {
    pub code: AuthorizationCode,
    /// Human-readable; carried to the client on rejection.
    pub description: String,
}

impl UserAuthorizationResponse {
    pub fn new(code: AuthorizationCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }
}

// ── Transfer Records ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferDirection {
    /// The server is the source; the client downloads.
    SendToClient,
    /// The client is the source; the server stores the upload.
    ReceiveFromClient,
}

/// The negotiated description of one transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferInfo {
    pub direction: TransferDirection,
    pub file_name: String,
    pub file_size: u64,
    pub error: Option<String>,
}

impl TransferInfo {
    pub fn new(direction: TransferDirection, file_name: impl Into<String>, file_size: u64) -> Self {
        Self {
            direction,
            file_name: file_name.into(),
            file_size,
            error: None,
        }
    }

    pub fn with_error(mut self, error: impl fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// One bounded slice of file bytes.
///
/// `error` reports a source-side I/O failure without tearing down the
/// transport; a chunk carrying an error is always the last one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChunk {
    pub buffer: Vec<u8>,
    pub error: Option<String>,
}

impl FileChunk {
    pub fn data(buffer: Vec<u8>) -> Self {
        Self { buffer, error: None }
    }

    pub fn failure(error: impl fmt::Display) -> Self {
        Self {
            buffer: Vec::new(),
            error: Some(error.to_string()),
        }
    }
}

// ── Constants ─────────────────────────────────────────────────────────────────

/// Port the server listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 8978;

/// Upper bound for one chunk of file bytes.
pub const PIPE_BUFFER_SIZE: usize = 100_000;

/// Size of a single underlying read by the framed transport.
pub const READ_BUFFER_SIZE: usize = 1500;

/// Largest payload a receiver will assemble. Larger declared lengths are
/// rejected before any allocation.
pub const MAX_MESSAGE_LEN: u64 = 64 * 1024 * 1024;

/// AES-256 key length.
pub const AES_KEY_SIZE: usize = 32;

/// AES block size, used as the CFB initialization vector length.
pub const IV_BLOCK_SIZE: usize = 16;

/// RSA modulus size for generated keys.
pub const RSA_KEY_BITS: usize = 4096;

/// Helper process exit codes.
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_ERROR: i32 = 1;
/// The helper could not reach the rendezvous socket.
pub const EXIT_SOCKET: i32 = 2;

/// Prefix of a failure report on the helper's stderr. Other stderr lines
/// are diagnostics.
pub const HELPER_ERROR_PREFIX: &str = "ucp-proxy error: ";

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown conversation token: {0:?}")]
    UnknownConversation(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────

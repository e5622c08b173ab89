//! Framed transport — discrete, checksum-verified messages over a byte stream.
//!
//! Every message is written as one packet:
//!
//!   [u64 length LE (8 bytes)] [MD5 of payload (16 bytes)] [payload]
//!
//! The receiver never hands out a partially assembled message. It keeps
//! reading until the declared length is reached; end-of-stream first is a
//! truncated message.

use md5::{Digest, Md5};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use zerocopy::{AsBytes, FromBytes};

use crate::channel::{ChannelError, MessageChannel};
use crate::wire::{FrameHeader, MAX_MESSAGE_LEN, READ_BUFFER_SIZE};

/// Length of the frame header on the wire.
pub const HEADER_LEN: usize = std::mem::size_of::<FrameHeader>();

/// Any bidirectional byte stream a connection can be built on.
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ByteStream for T {}

/// MD5 digest of a payload.
pub fn checksum(payload: &[u8]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(&Md5::digest(payload));
    out
}

/// Build the full packet (header + payload) for one message.
pub fn encode_packet(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let length = payload.len() as u64;
    if length > MAX_MESSAGE_LEN {
        return Err(FrameError::TooLarge(length));
    }
    let header = FrameHeader::new(length, checksum(payload));

    let mut packet = Vec::with_capacity(HEADER_LEN + payload.len());
    packet.extend_from_slice(header.as_bytes());
    packet.extend_from_slice(payload);
    Ok(packet)
}

/// The bottom layer of every connection. Exclusively owns its stream.
pub struct Framed<S> {
    stream: S,
    read_buffer: Box<[u8]>,
}

impl<S> Framed<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            read_buffer: vec![0u8; READ_BUFFER_SIZE].into_boxed_slice(),
        }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: AsyncWrite + Unpin> Framed<S> {
    /// Write one message. Returns the payload length.
    ///
    /// The packet is handed to the stream as a single logical write; a
    /// stream that stops accepting bytes part-way is an incomplete write.
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<usize, FrameError> {
        let packet = encode_packet(payload)?;

        let mut written = 0;
        while written < packet.len() {
            let n = self.stream.write(&packet[written..]).await?;
            if n == 0 {
                return Err(FrameError::IncompleteWrite {
                    written,
                    expected: packet.len(),
                });
            }
            written += n;
        }
        self.stream.flush().await?;

        Ok(payload.len())
    }
}

impl<S: AsyncRead + Unpin> Framed<S> {
    /// Read one message into `dest`, replacing its contents.
    ///
    /// On `ChecksumMismatch` the assembled (corrupt) bytes are left in `dest`
    /// so the caller can inspect them before dropping the connection.
    pub async fn read_frame(&mut self, dest: &mut Vec<u8>) -> Result<usize, FrameError> {
        dest.clear();

        let mut header_bytes = [0u8; HEADER_LEN];
        let mut filled = 0;
        while filled < HEADER_LEN {
            let n = self.stream.read(&mut header_bytes[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Err(FrameError::Closed);
                }
                return Err(FrameError::Truncated {
                    received: filled,
                    expected: HEADER_LEN,
                });
            }
            filled += n;
        }

        let header = FrameHeader::read_from(&header_bytes[..]).ok_or(FrameError::MalformedHeader)?;
        let length = header.payload_len();
        if length > MAX_MESSAGE_LEN {
            return Err(FrameError::TooLarge(length));
        }
        let length = length as usize;

        while dest.len() < length {
            // Never read past the end of this message.
            let want = (length - dest.len()).min(self.read_buffer.len());
            let n = self.stream.read(&mut self.read_buffer[..want]).await?;
            if n == 0 {
                return Err(FrameError::Truncated {
                    received: dest.len(),
                    expected: length,
                });
            }
            dest.extend_from_slice(&self.read_buffer[..n]);
        }

        let actual = checksum(dest);
        if actual != header.checksum {
            return Err(FrameError::ChecksumMismatch {
                expected: header.checksum,
                actual,
            });
        }

        Ok(length)
    }
}

impl<S: ByteStream> MessageChannel for Framed<S> {
    async fn write_message(&mut self, payload: &[u8]) -> Result<usize, ChannelError> {
        Ok(self.write_frame(payload).await?)
    }

    async fn read_message(&mut self, dest: &mut Vec<u8>) -> Result<usize, ChannelError> {
        Ok(self.read_frame(dest).await?)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("incomplete write: {written} of {expected} bytes accepted")]
    IncompleteWrite { written: usize, expected: usize },

    #[error("connection closed")]
    Closed,

    #[error("stream ended mid-message: {received} of {expected} bytes")]
    Truncated { received: usize, expected: usize },

    #[error("malformed frame header")]
    MalformedHeader,

    #[error("message length {0} exceeds maximum {}", MAX_MESSAGE_LEN)]
    TooLarge(u64),

    #[error("invalid checksum: expected {}, computed {}", hex::encode(.expected), hex::encode(.actual))]
    ChecksumMismatch { expected: [u8; 16], actual: [u8; 16] },
}

// ── Tests ─────────────────────────────────────────────────────────────────────

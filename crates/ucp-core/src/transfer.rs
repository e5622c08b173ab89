//! Chunk streaming with stop-and-wait flow control.
//!
//! The sink opens with FILE_TRANSFER_START. The source then sends one chunk
//! at a time and waits for FILE_TRANSFER_MORE before the next. Once the
//! declared size has been delivered the source sends FILE_TRANSFER_COMPLETE.
//! There is no zero-length terminal chunk; a zero-byte file is just START
//! followed by COMPLETE.
//!
//! The same functions drive the client, the helper process, and every test.
//! The server's relay between the two lives in ucp-services.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::channel::{ChannelError, Codec, MessageChannel};
use crate::wire::{Conversation, FileChunk};

/// What one completed transfer moved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub chunks: u64,
    pub bytes: u64,
}

/// Source side: stream `file_size` bytes from `source`.
///
/// Local read failures are reported to the sink inside a chunk before the
/// error is returned, so the peer gets an explanation rather than a
/// dropped connection.
pub async fn send_file<C, R>(
    channel: &mut Codec<C>,
    source: &mut R,
    file_size: u64,
    chunk_bound: usize,
) -> Result<TransferStats, TransferError>
where
    C: MessageChannel,
    R: AsyncRead + Unpin + Send,
{
    match channel.recv::<Conversation>().await? {
        Conversation::FileTransferStart => {}
        Conversation::FileTransferAbort => return Err(TransferError::Aborted),
        received => {
            return Err(ChannelError::UnexpectedToken {
                expected: Conversation::FileTransferStart,
                received,
            }
            .into())
        }
    }

    let mut buffer = vec![0u8; chunk_bound];
    let mut stats = TransferStats::default();

    while stats.bytes < file_size {
        let remaining = file_size - stats.bytes;
        let want = (chunk_bound as u64).min(remaining) as usize;

        let read = match fill(source, &mut buffer[..want]).await {
            Ok(n) => n,
            Err(e) => {
                channel.send(&FileChunk::failure(&e)).await?;
                return Err(e.into());
            }
        };
        if read == 0 {
            let err = TransferError::ShortSource {
                sent: stats.bytes,
                expected: file_size,
            };
            channel.send(&FileChunk::failure(&err)).await?;
            return Err(err);
        }

        channel.send(&FileChunk::data(buffer[..read].to_vec())).await?;
        stats.chunks += 1;
        stats.bytes += read as u64;

        match channel.recv::<Conversation>().await? {
            Conversation::FileTransferMore => {}
            Conversation::FileTransferFail => return Err(TransferError::PeerFailed),
            other => return Err(TransferError::PrematureTermination(other)),
        }
    }

    channel.send(&Conversation::FileTransferComplete).await?;
    tracing::debug!(chunks = stats.chunks, bytes = stats.bytes, "source finished");
    Ok(stats)
}

/// Sink side: receive `file_size` bytes into `sink`.
pub async fn receive_file<C, W>(
    channel: &mut Codec<C>,
    sink: &mut W,
    file_size: u64,
) -> Result<TransferStats, TransferError>
where
    C: MessageChannel,
    W: AsyncWrite + Unpin + Send,
{
    channel.send(&Conversation::FileTransferStart).await?;

    let mut stats = TransferStats::default();
    while stats.bytes < file_size {
        let chunk: FileChunk = channel.recv().await?;
        if let Some(error) = chunk.error {
            return Err(TransferError::Remote(error));
        }
        if chunk.buffer.is_empty() {
            return Err(TransferError::ShortSource {
                sent: stats.bytes,
                expected: file_size,
            });
        }

        let received = stats.bytes + chunk.buffer.len() as u64;
        if received > file_size {
            return Err(TransferError::Overrun {
                received,
                expected: file_size,
            });
        }

        if let Err(e) = sink.write_all(&chunk.buffer).await {
            channel.send(&Conversation::FileTransferFail).await?;
            return Err(e.into());
        }
        stats.chunks += 1;
        stats.bytes = received;

        channel.send(&Conversation::FileTransferMore).await?;
    }

    sink.flush().await?;
    channel.expect(Conversation::FileTransferComplete).await?;
    tracing::debug!(chunks = stats.chunks, bytes = stats.bytes, "sink finished");
    Ok(stats)
}

/// Sink side, when the destination could not be opened: refuse the stream.
pub async fn decline<C: MessageChannel>(channel: &mut Codec<C>) -> Result<(), ChannelError> {
    channel.send(&Conversation::FileTransferAbort).await
}

/// Read until `buf` is full or the source is exhausted.
async fn fill<R: AsyncRead + Unpin>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("local I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("file transfer aborted by peer")]
    Aborted,

    #[error("peer failed to store file data")]
    PeerFailed,

    #[error("connection prematurely terminated by peer (received {0})")]
    PrematureTermination(Conversation),

    #[error("{0}")]
    Remote(String),

    #[error("source ended after {sent} of {expected} bytes")]
    ShortSource { sent: u64, expected: u64 },

    #[error("received {received} bytes, more than the declared {expected}")]
    Overrun { received: u64, expected: u64 },
}

// ── Tests ─────────────────────────────────────────────────────────────────────

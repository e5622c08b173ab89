//! Helper-side session — runs inside `ucp-proxy` under the account's
//! credentials and does the actual file I/O.
//!
//! The helper receives the `TransferInfo` from the server, opens or
//! creates the file, replies with the completed info, then runs the chunk
//! protocol as source or sink. As a source it waits for the server's final
//! FILE_TRANSFER_COMPLETE before returning, so the process cannot exit
//! while the server is still relaying its last chunk.

use std::path::PathBuf;

use tokio::fs::File;
use ucp_core::channel::{ChannelError, Codec, MessageChannel};
use ucp_core::transfer::{self, TransferError, TransferStats};
use ucp_core::wire::{Conversation, TransferDirection, TransferInfo, PIPE_BUFFER_SIZE};

pub async fn serve<C: MessageChannel>(channel: &mut Codec<C>) -> Result<TransferStats, HelperError> {
    let info: TransferInfo = channel.recv().await?;
    tracing::debug!(direction = ?info.direction, file = %info.file_name, "transfer requested");

    match info.direction {
        TransferDirection::SendToClient => {
            let (mut file, size) = match open_source(&info.file_name).await {
                Ok(opened) => opened,
                Err(e) => {
                    let error = HelperError::Open(PathBuf::from(&info.file_name), e);
                    channel.send(&info.clone().with_error(&error)).await?;
                    return Err(error);
                }
            };
            channel
                .send(&TransferInfo {
                    file_size: size,
                    ..info
                })
                .await?;

            let stats = transfer::send_file(channel, &mut file, size, PIPE_BUFFER_SIZE).await?;
            channel.expect(Conversation::FileTransferComplete).await?;
            Ok(stats)
        }
        TransferDirection::ReceiveFromClient => {
            let mut file = match File::create(&info.file_name).await {
                Ok(file) => file,
                Err(e) => {
                    let error = HelperError::Create(PathBuf::from(&info.file_name), e);
                    channel.send(&info.clone().with_error(&error)).await?;
                    return Err(error);
                }
            };
            channel.send(&info).await?;

            let stats = transfer::receive_file(channel, &mut file, info.file_size).await?;
            file.sync_all().await.map_err(TransferError::Io)?;
            Ok(stats)
        }
    }
}

async fn open_source(path: &str) -> std::io::Result<(File, u64)> {
    let file = File::open(path).await?;
    let metadata = file.metadata().await?;
    if !metadata.is_file() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "not a regular file",
        ));
    }
    Ok((file, metadata.len()))
}

#[derive(Debug, thiserror::Error)]
pub enum HelperError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("cannot open {0}: {1}")]
    Open(PathBuf, std::io::Error),

    #[error("cannot create {0}: {1}")]
    Create(PathBuf, std::io::Error),
}

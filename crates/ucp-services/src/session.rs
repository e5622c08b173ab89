//! Whole-connection pipelines for both roles.
//!
//! Server: handshake → authorize → request transfer info → proxy.
//! Client: handshake → authenticate → describe transfer → stream.
//!
//! Both are generic over the byte stream so the same code runs on TCP in
//! the binaries and on in-memory pipes in tests.

use std::path::{Path, PathBuf};

use rsa::RsaPrivateKey;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncRead;
use ucp_core::channel::ChannelError;
use ucp_core::frame::ByteStream;
use ucp_core::handshake::{self, HandshakeError, SecureChannel};
use ucp_core::transfer::{self, TransferError, TransferStats};
use ucp_core::wire::{Conversation, TransferDirection, TransferInfo, PIPE_BUFFER_SIZE};

use crate::account::AccountServices;
use crate::auth::{self, AuthError, PasswordPrompt};
use crate::proxy::{self, HelperSpawner, ProxyError, ProxySettings};

/// What the server did for one connection.
#[derive(Debug, Clone)]
pub struct ServedTransfer {
    pub user: String,
    pub info: TransferInfo,
    pub stats: TransferStats,
}

// ── Server ────────────────────────────────────────────────────────────────────

pub async fn serve<S, A, H>(
    stream: S,
    services: &A,
    spawner: &H,
    settings: &ProxySettings,
) -> Result<ServedTransfer, SessionError>
where
    S: ByteStream,
    A: AccountServices + ?Sized,
    H: HelperSpawner + ?Sized,
{
    let (mut channel, client_key) = handshake::accept(stream, services.private_key()).await?;
    let account = auth::authorize(&mut channel, services, &client_key).await?;

    channel.send(&Conversation::FileTransferInformationRequest).await?;
    let info: TransferInfo = channel.recv().await?;
    tracing::info!(
        user = %account.name,
        direction = ?info.direction,
        file = %info.file_name,
        size = info.file_size,
        "transfer requested"
    );

    let stats = proxy::run_transfer(&mut channel, info.clone(), &account, spawner, settings).await?;
    Ok(ServedTransfer {
        user: account.name,
        info,
        stats,
    })
}

// ── Client ────────────────────────────────────────────────────────────────────

/// Who the client is: its key pair and the remote account it claims.
pub struct Credentials<'a, P: ?Sized> {
    pub private_key: RsaPrivateKey,
    pub user: &'a str,
    pub prompt: &'a mut P,
}

async fn establish<S, P>(stream: S, credentials: Credentials<'_, P>) -> Result<SecureChannel<S>, SessionError>
where
    S: ByteStream,
    P: PasswordPrompt + ?Sized,
{
    let (mut channel, _server_key) = handshake::connect(stream, credentials.private_key).await?;
    auth::authenticate(&mut channel, credentials.user, credentials.prompt).await?;
    channel.expect(Conversation::FileTransferInformationRequest).await?;
    Ok(channel)
}

/// Send `size` bytes from `source` to `remote_path` on the server.
pub async fn upload<S, P, R>(
    stream: S,
    credentials: Credentials<'_, P>,
    source: &mut R,
    size: u64,
    remote_path: &str,
) -> Result<TransferStats, SessionError>
where
    S: ByteStream,
    P: PasswordPrompt + ?Sized,
    R: AsyncRead + Unpin + Send,
{
    let mut channel = establish(stream, credentials).await?;
    channel
        .send(&TransferInfo::new(TransferDirection::ReceiveFromClient, remote_path, size))
        .await?;
    let reply: TransferInfo = channel.recv().await?;
    if let Some(error) = reply.error {
        return Err(SessionError::Remote(error));
    }

    Ok(transfer::send_file(&mut channel, source, size, PIPE_BUFFER_SIZE).await?)
}

/// Fetch `remote_path` from the server into `local_path`. A partially
/// written local file is removed on failure.
pub async fn download<S, P>(
    stream: S,
    credentials: Credentials<'_, P>,
    remote_path: &str,
    local_path: &Path,
) -> Result<TransferStats, SessionError>
where
    S: ByteStream,
    P: PasswordPrompt + ?Sized,
{
    let mut channel = establish(stream, credentials).await?;
    channel
        .send(&TransferInfo::new(TransferDirection::SendToClient, remote_path, 0))
        .await?;
    let reply: TransferInfo = channel.recv().await?;
    if let Some(error) = reply.error {
        return Err(SessionError::Remote(error));
    }

    let mut file = match File::create(local_path).await {
        Ok(file) => file,
        Err(e) => {
            transfer::decline(&mut channel).await?;
            return Err(SessionError::Local(local_path.to_path_buf(), e));
        }
    };

    let received = async {
        let stats = transfer::receive_file(&mut channel, &mut file, reply.file_size).await?;
        file.sync_all().await.map_err(TransferError::Io)?;
        Ok::<_, TransferError>(stats)
    }
    .await;

    match received {
        Ok(stats) => Ok(stats),
        Err(e) => {
            drop(file);
            if let Err(cleanup) = tokio::fs::remove_file(local_path).await {
                tracing::debug!(path = %local_path.display(), error = %cleanup, "partial file not removed");
            }
            Err(e.into())
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("authorization failed: {0}")]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("transfer failed: {0}")]
    Transfer(#[from] TransferError),

    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error("server: {0}")]
    Remote(String),

    #[error("{0}: {1}")]
    Local(PathBuf, std::io::Error),
}

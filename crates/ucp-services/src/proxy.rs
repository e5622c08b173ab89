//! Privilege-separation proxy — the server side of every file transfer.
//!
//! The server never opens a user's file itself. Per transfer it:
//!   1. binds a randomly named unix socket (the rendezvous)
//!   2. spawns `ucp-proxy --socket-path <path>` under the account's uid/gid
//!   3. accepts the helper's connection (racing helper exit and a timeout)
//!   4. relays the transfer between the remote secure channel and the
//!      helper's plain framed channel, message by message
//!
//! While relaying, the helper's stderr is drained concurrently. A line
//! starting with HELPER_ERROR_PREFIX is a failure and wins the race against
//! the relay; other lines are diagnostics and are logged at debug.
//!
//! The socket file is removed when the rendezvous is dropped, on every path.

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};
use tokio::net::{UnixListener, UnixStream};
use tokio::process::{Child, Command};
use ucp_core::channel::{ChannelError, Codec, MessageChannel};
use ucp_core::frame::Framed;
use ucp_core::transfer::{TransferError, TransferStats};
use ucp_core::wire::{
    Conversation, FileChunk, TransferDirection, TransferInfo, EXIT_SOCKET, HELPER_ERROR_PREFIX,
};

use crate::account::Account;

// ── Settings ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ProxySettings {
    /// Directory for rendezvous sockets.
    pub socket_dir: PathBuf,
    /// How long the helper gets to connect back.
    pub connect_timeout: Duration,
}

/// Grace period for the relay once the helper has reported a failure.
const HELPER_DRAIN: Duration = Duration::from_secs(2);

// ── Helper Spawning ───────────────────────────────────────────────────────────

/// Starts the helper process for one transfer.
pub trait HelperSpawner: Send + Sync {
    /// The child's stderr must be piped; it carries failure reports.
    fn spawn(&self, account: &Account, socket_path: &Path) -> io::Result<Child>;
}

/// Spawns the real `ucp-proxy` binary.
pub struct OsHelperSpawner {
    program: PathBuf,
}

impl OsHelperSpawner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl HelperSpawner for OsHelperSpawner {
    fn spawn(&self, account: &Account, socket_path: &Path) -> io::Result<Child> {
        let mut command = Command::new(&self.program);
        command
            .arg("--socket-path")
            .arg(socket_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .env("HOME", &account.home)
            .env("USER", &account.name)
            .kill_on_drop(true);
        if account.home.is_dir() {
            command.current_dir(&account.home);
        }
        // Unprivileged servers (development) run helpers as themselves.
        if nix::unistd::geteuid().is_root() {
            command.uid(account.uid).gid(account.gid);
        }
        command.spawn()
    }
}

// ── Rendezvous ────────────────────────────────────────────────────────────────

/// A listening unix socket with a random name. Removed on drop.
pub struct Rendezvous {
    listener: UnixListener,
    path: PathBuf,
}

impl Rendezvous {
    pub fn bind(dir: &Path) -> io::Result<Self> {
        let path = dir.join(format!("ucp-{}.sock", hex::encode(rand::random::<[u8; 8]>())));
        let listener = UnixListener::bind(&path)?;
        let rendezvous = Self { listener, path };
        std::fs::set_permissions(&rendezvous.path, std::fs::Permissions::from_mode(0o600))?;
        Ok(rendezvous)
    }

    /// Hand the socket to the account the helper will run as.
    pub fn grant_to(&self, account: &Account) -> io::Result<()> {
        if nix::unistd::geteuid().is_root() {
            std::os::unix::fs::chown(&self.path, Some(account.uid), Some(account.gid))?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn accept(&self) -> io::Result<UnixStream> {
        let (stream, _) = self.listener.accept().await?;
        Ok(stream)
    }
}

impl Drop for Rendezvous {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::debug!(path = %self.path.display(), error = %e, "rendezvous cleanup failed");
        }
    }
}

// ── Side Channel ──────────────────────────────────────────────────────────────

/// The helper's stderr, read line by line.
struct SideChannel<R> {
    lines: Option<Lines<BufReader<R>>>,
}

impl<R: AsyncRead + Unpin> SideChannel<R> {
    fn new(stream: Option<R>) -> Self {
        Self {
            lines: stream.map(|s| BufReader::new(s).lines()),
        }
    }

    /// Resolves with the first failure report. Never resolves once the
    /// stream has ended without one.
    async fn next_failure(&mut self) -> String {
        loop {
            let Some(lines) = self.lines.as_mut() else {
                return std::future::pending().await;
            };
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if let Some(failure) = line.strip_prefix(HELPER_ERROR_PREFIX) {
                        return failure.to_string();
                    }
                    tracing::debug!(helper = %line);
                }
                Ok(None) | Err(_) => self.lines = None,
            }
        }
    }

    /// Read to end of stream. Returns the first failure report, if any.
    async fn finish(&mut self) -> Option<String> {
        let mut first = None;
        while let Some(lines) = self.lines.as_mut() {
            match lines.next_line().await {
                Ok(Some(line)) => match line.strip_prefix(HELPER_ERROR_PREFIX) {
                    Some(failure) => {
                        first.get_or_insert_with(|| failure.to_string());
                    }
                    None => tracing::debug!(helper = %line),
                },
                Ok(None) | Err(_) => self.lines = None,
            }
        }
        first
    }
}

// ── Transfer ──────────────────────────────────────────────────────────────────

/// Carry out one negotiated transfer through a helper running as `account`.
///
/// Failures before the helper has answered are reported to the remote peer
/// as a `TransferInfo` carrying the error. Success requires the helper to
/// exit cleanly.
pub async fn run_transfer<C, H>(
    remote: &mut Codec<C>,
    info: TransferInfo,
    account: &Account,
    spawner: &H,
    settings: &ProxySettings,
) -> Result<TransferStats, ProxyError>
where
    C: MessageChannel,
    H: HelperSpawner + ?Sized,
{
    let (rendezvous, mut child) = match start_helper(account, spawner, settings) {
        Ok(started) => started,
        Err(e) => {
            notify(remote, &info, &e).await;
            return Err(e);
        }
    };
    tracing::debug!(socket = %rendezvous.path().display(), pid = ?child.id(), "helper started");

    let mut side = SideChannel::new(child.stderr.take());
    let outcome = match connect_helper(&rendezvous, &mut child, &mut side, settings.connect_timeout).await {
        Ok(stream) => {
            let mut helper = Codec::new(Framed::new(stream));
            let mut replied = false;
            let relayed = supervise(remote, &mut helper, info.clone(), &mut side, &mut replied).await;
            if let Err(e) = &relayed {
                if !replied {
                    notify(remote, &info, e).await;
                }
            }
            relayed
        }
        Err(e) => {
            notify(remote, &info, &e).await;
            Err(e)
        }
    };
    drop(rendezvous);

    if outcome.is_err() {
        if let Err(e) = child.start_kill() {
            tracing::debug!(error = %e, "helper already gone");
        }
    }
    let (status, late_failure) = tokio::join!(child.wait(), side.finish());
    let status = status.map_err(ProxyError::Wait)?;
    let stats = outcome?;

    if !status.success() {
        return Err(ProxyError::HelperExit {
            code: status.code(),
            reason: late_failure.unwrap_or_default(),
        });
    }
    Ok(stats)
}

fn start_helper<H: HelperSpawner + ?Sized>(
    account: &Account,
    spawner: &H,
    settings: &ProxySettings,
) -> Result<(Rendezvous, Child), ProxyError> {
    let rendezvous = Rendezvous::bind(&settings.socket_dir).map_err(ProxyError::Rendezvous)?;
    rendezvous.grant_to(account).map_err(ProxyError::Rendezvous)?;
    let child = spawner
        .spawn(account, rendezvous.path())
        .map_err(ProxyError::Spawn)?;
    Ok((rendezvous, child))
}

async fn connect_helper<R: AsyncRead + Unpin>(
    rendezvous: &Rendezvous,
    child: &mut Child,
    side: &mut SideChannel<R>,
    timeout: Duration,
) -> Result<UnixStream, ProxyError> {
    tokio::select! {
        accepted = rendezvous.accept() => accepted.map_err(ProxyError::Rendezvous),
        status = child.wait() => {
            let status = status.map_err(ProxyError::Wait)?;
            let reason = side.finish().await.unwrap_or_default();
            if status.code() == Some(EXIT_SOCKET) {
                Err(ProxyError::RendezvousUnreachable(reason))
            } else {
                Err(ProxyError::HelperExit { code: status.code(), reason })
            }
        }
        _ = tokio::time::sleep(timeout) => Err(ProxyError::ConnectTimeout(timeout)),
    }
}

async fn notify<C: MessageChannel>(remote: &mut Codec<C>, info: &TransferInfo, error: &ProxyError) {
    if let Err(e) = remote.send(&info.clone().with_error(error)).await {
        tracing::debug!(error = %e, "could not report proxy failure to client");
    }
}

/// Relay while watching the side channel; the first failure decides.
///
/// A failing helper writes its protocol-level report (error reply or error
/// chunk) before its stderr line, so a side-channel failure gives the relay
/// up to HELPER_DRAIN to deliver that report to the remote peer.
async fn supervise<C, H, R>(
    remote: &mut Codec<C>,
    helper: &mut Codec<H>,
    info: TransferInfo,
    side: &mut SideChannel<R>,
    replied: &mut bool,
) -> Result<TransferStats, ProxyError>
where
    C: MessageChannel,
    H: MessageChannel,
    R: AsyncRead + Unpin,
{
    let relayed = relay(remote, helper, info, replied);
    tokio::pin!(relayed);

    tokio::select! {
        outcome = &mut relayed => outcome,
        failure = side.next_failure() => {
            match tokio::time::timeout(HELPER_DRAIN, &mut relayed).await {
                Ok(outcome) => tracing::debug!(relay = ?outcome.err(), "relay drained after helper failure"),
                Err(_) => tracing::debug!("relay still busy after helper failure"),
            }
            Err(ProxyError::HelperReported(failure))
        }
    }
}

/// Negotiate with the helper and forward its reply, then stream. `replied`
/// is set once the helper's reply has reached the remote peer.
async fn relay<C, H>(
    remote: &mut Codec<C>,
    helper: &mut Codec<H>,
    info: TransferInfo,
    replied: &mut bool,
) -> Result<TransferStats, ProxyError>
where
    C: MessageChannel,
    H: MessageChannel,
{
    helper.send(&info).await?;
    let reply: TransferInfo = helper.recv().await?;
    remote.send(&reply).await?;
    *replied = true;
    if let Some(error) = reply.error {
        return Err(ProxyError::HelperReported(error));
    }

    match reply.direction {
        TransferDirection::SendToClient => {
            let stats = pump(helper, remote, reply.file_size).await?;
            // Releases the helper
            helper.send(&Conversation::FileTransferComplete).await?;
            Ok(stats)
        }
        TransferDirection::ReceiveFromClient => Ok(pump(remote, helper, reply.file_size).await?),
    }
}

/// Forward one chunk stream from `source` to `sink`, and every
/// acknowledgment back, checking each message on the way through.
async fn pump<S, K>(
    source: &mut Codec<S>,
    sink: &mut Codec<K>,
    file_size: u64,
) -> Result<TransferStats, ProxyError>
where
    S: MessageChannel,
    K: MessageChannel,
{
    let opening: Conversation = sink.recv().await?;
    source.send(&opening).await?;
    match opening {
        Conversation::FileTransferStart => {}
        Conversation::FileTransferAbort => return Err(TransferError::Aborted.into()),
        received => {
            return Err(ChannelError::UnexpectedToken {
                expected: Conversation::FileTransferStart,
                received,
            }
            .into())
        }
    }

    let mut stats = TransferStats::default();
    while stats.bytes < file_size {
        let chunk: FileChunk = source.recv().await?;
        sink.send(&chunk).await?;
        if let Some(error) = chunk.error {
            return Err(TransferError::Remote(error).into());
        }
        if chunk.buffer.is_empty() {
            return Err(TransferError::ShortSource {
                sent: stats.bytes,
                expected: file_size,
            }
            .into());
        }
        stats.chunks += 1;
        stats.bytes += chunk.buffer.len() as u64;

        let ack: Conversation = sink.recv().await?;
        source.send(&ack).await?;
        match ack {
            Conversation::FileTransferMore => {}
            Conversation::FileTransferFail => return Err(TransferError::PeerFailed.into()),
            other => return Err(TransferError::PrematureTermination(other).into()),
        }
    }

    let closing: Conversation = source.recv().await?;
    sink.send(&closing).await?;
    if closing != Conversation::FileTransferComplete {
        return Err(ChannelError::UnexpectedToken {
            expected: Conversation::FileTransferComplete,
            received: closing,
        }
        .into());
    }
    Ok(stats)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("rendezvous socket: {0}")]
    Rendezvous(io::Error),

    #[error("failed to start helper: {0}")]
    Spawn(io::Error),

    #[error("failed to wait for helper: {0}")]
    Wait(io::Error),

    #[error("helper did not connect within {0:?}")]
    ConnectTimeout(Duration),

    #[error("helper could not reach the rendezvous socket: {0}")]
    RendezvousUnreachable(String),

    #[error("helper exited with status {code:?}: {reason}")]
    HelperExit { code: Option<i32>, reason: String },

    #[error("{0}")]
    HelperReported(String),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

//! ucp-core — wire format, layered message channels, the session handshake,
//! and chunk streaming. Every other UCP crate depends on this one.

pub mod channel;
pub mod config;
pub mod crypto;
pub mod frame;
pub mod handshake;
pub mod keys;
pub mod transfer;
pub mod wire;

pub use channel::{ChannelError, Codec, MessageChannel};
pub use config::UcpConfig;
pub use frame::{ByteStream, Framed};
pub use handshake::SecureChannel;
pub use transfer::{TransferError, TransferStats};

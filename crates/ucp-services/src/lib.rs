//! ucp-services — the session logic that sits on top of ucp-core:
//! account lookup, user authorization, the privilege-separation proxy with
//! its helper counterpart, and the end-to-end pipelines for both roles.

pub mod account;
pub mod auth;
pub mod helper;
pub mod proxy;
pub mod session;

#[cfg(test)]
mod test_support;

pub use account::{Account, AccountServices, OsServices, ServiceError};
pub use auth::{AuthError, PasswordPrompt};
pub use proxy::{HelperSpawner, OsHelperSpawner, ProxyError, ProxySettings};
pub use session::{Credentials, ServedTransfer, SessionError};

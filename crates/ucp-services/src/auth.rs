//! User authorization over an established secure channel.
//!
//!   AwaitUsername → LookupUser → { AuthorizedByKey | NeedPassword }
//!                              → { Authorized | Rejected }
//!
//! The server asks for a user name, resolves it, and accepts the session if
//! the client's handshake key is listed in the account's authorized keys.
//! Otherwise it asks for one password. Rejections carry a description to
//! the client and end the session; there is no retry.
//!
//! Authorization is per connection. Nothing after `Authorized` re-checks
//! identity.

use rsa::RsaPublicKey;
use thiserror::Error;
use ucp_core::channel::{ChannelError, Codec, MessageChannel};
use ucp_core::crypto;
use ucp_core::wire::{AuthorizationCode, Conversation, UserAuthorizationResponse};
use zeroize::Zeroizing;

use crate::account::{Account, AccountServices};

// ── Server ────────────────────────────────────────────────────────────────────

/// Run the server side. On success returns the resolved account.
pub async fn authorize<C, A>(
    channel: &mut Codec<C>,
    services: &A,
    client_key: &RsaPublicKey,
) -> Result<Account, AuthError>
where
    C: MessageChannel,
    A: AccountServices + ?Sized,
{
    channel.send(&Conversation::UserNameRequest).await?;
    let name: String = channel.recv().await?;

    let account = match services.lookup_user(&name) {
        Ok(Some(account)) => account,
        Ok(None) => {
            return reject(channel, AuthorizationCode::NonexistentUser, format!("User '{name}' is unknown")).await;
        }
        Err(e) => {
            tracing::warn!(user = %name, error = %e, "user lookup failed");
            return reject(channel, AuthorizationCode::NonexistentUser, format!("Unable to look up user '{name}'"))
                .await;
        }
    };

    let wanted = crypto::authorized_key_line(client_key);
    match services.authorized_keys(&account) {
        Ok(store) if key_is_listed(&store, &wanted) => {
            tracing::info!(user = %account.name, key = %crypto::fingerprint(client_key), "authorized by key");
            respond(channel, AuthorizationCode::Authorized, "").await?;
            return Ok(account);
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(user = %account.name, error = %e, "cannot read authorized keys"),
    }

    respond(channel, AuthorizationCode::PasswordRequired, "").await?;
    let password = Zeroizing::new(channel.recv::<String>().await?);

    match services.verify_password(&account, &password) {
        Ok(()) => {
            tracing::info!(user = %account.name, "authorized by password");
            respond(channel, AuthorizationCode::Authorized, "").await?;
            Ok(account)
        }
        Err(e) => {
            tracing::warn!(user = %account.name, error = %e, "password rejected");
            reject(
                channel,
                AuthorizationCode::IncorrectPassword,
                format!("Incorrect password for user '{}'", account.name),
            )
            .await
        }
    }
}

/// Exact line match, line terminators stripped.
pub fn key_is_listed(store: &[u8], authorized_key_line: &str) -> bool {
    let wanted = authorized_key_line.trim_end_matches(['\r', '\n']).as_bytes();
    store
        .split(|b| *b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .any(|line| line == wanted)
}

async fn respond<C: MessageChannel>(
    channel: &mut Codec<C>,
    code: AuthorizationCode,
    description: &str,
) -> Result<(), ChannelError> {
    channel.send(&UserAuthorizationResponse::new(code, description)).await
}

async fn reject<C: MessageChannel, T>(
    channel: &mut Codec<C>,
    code: AuthorizationCode,
    description: String,
) -> Result<T, AuthError> {
    respond(channel, code, &description).await?;
    Err(AuthError::Rejected { code, description })
}

// ── Client ────────────────────────────────────────────────────────────────────

/// Source of the password when the server asks for one.
pub trait PasswordPrompt: Send {
    fn prompt(&mut self, user: &str) -> std::io::Result<Zeroizing<String>>;
}

/// Run the client side: answer with `user`, and prompt at most once.
pub async fn authenticate<C, P>(channel: &mut Codec<C>, user: &str, prompt: &mut P) -> Result<(), AuthError>
where
    C: MessageChannel,
    P: PasswordPrompt + ?Sized,
{
    channel.expect(Conversation::UserNameRequest).await?;
    channel.send(user).await?;

    let mut prompted = false;
    loop {
        let response: UserAuthorizationResponse = channel.recv().await?;
        match response.code {
            AuthorizationCode::Authorized => return Ok(()),
            AuthorizationCode::PasswordRequired if !prompted => {
                prompted = true;
                let password = prompt.prompt(user).map_err(AuthError::Prompt)?;
                channel.send(password.as_str()).await?;
            }
            AuthorizationCode::PasswordRequired => return Err(AuthError::RepeatedPasswordRequest),
            code @ (AuthorizationCode::NonexistentUser | AuthorizationCode::IncorrectPassword) => {
                return Err(AuthError::Rejected {
                    code,
                    description: response.description,
                })
            }
        }
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    /// Terminal for the session. `description` is what the server sent.
    #[error("{description}")]
    Rejected {
        code: AuthorizationCode,
        description: String,
    },

    #[error("failed to read password: {0}")]
    Prompt(std::io::Error),

    #[error("server asked for a password twice")]
    RepeatedPasswordRequest,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{client_key, server_key, FakeServices, ScriptedPrompt};
    use tokio::io::duplex;
    use ucp_core::frame::Framed;

    async fn run(
        services: FakeServices,
        user: &str,
        mut prompt: ScriptedPrompt,
    ) -> (Result<Account, AuthError>, Result<(), AuthError>, ScriptedPrompt, FakeServices) {
        let (a, b) = duplex(64 * 1024);
        let mut server_side = Codec::new(Framed::new(a));
        let mut client_side = Codec::new(Framed::new(b));
        let public = client_key().to_public_key();

        let server = authorize(&mut server_side, &services, &public);
        let client = authenticate(&mut client_side, user, &mut prompt);
        let (server_result, client_result) = tokio::join!(server, client);
        (server_result, client_result, prompt, services)
    }

    #[tokio::test]
    async fn listed_key_authorizes_without_password() {
        let services = FakeServices::new().with_user("bob", Some(client_key().to_public_key()), "pw");
        let (server, client, prompt, _) = run(services, "bob", ScriptedPrompt::new(&[])).await;

        assert_eq!(server.unwrap().name, "bob");
        client.unwrap();
        assert_eq!(prompt.asked, 0);
    }

    #[tokio::test]
    async fn correct_password_after_exactly_one_prompt() {
        let other = server_key().to_public_key();
        let services = FakeServices::new().with_user("bob", Some(other), "hunter2");
        let (server, client, prompt, _) = run(services, "bob", ScriptedPrompt::new(&["hunter2"])).await;

        assert_eq!(server.unwrap().name, "bob");
        client.unwrap();
        assert_eq!(prompt.asked, 1);
    }

    #[tokio::test]
    async fn wrong_password_surfaces_server_description() {
        let services = FakeServices::new().with_user("bob", None, "hunter2");
        let (server, client, prompt, _) = run(services, "bob", ScriptedPrompt::new(&["letmein"])).await;

        let server_err = server.unwrap_err();
        let client_err = client.unwrap_err();
        assert_eq!(prompt.asked, 1);
        match (&server_err, &client_err) {
            (
                AuthError::Rejected { description: sent, .. },
                AuthError::Rejected {
                    code: AuthorizationCode::IncorrectPassword,
                    description: received,
                },
            ) => assert_eq!(sent, received),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(client_err.to_string(), "Incorrect password for user 'bob'");
    }

    #[tokio::test]
    async fn unknown_user_never_reaches_key_check() {
        let services = FakeServices::new().with_user("bob", Some(client_key().to_public_key()), "pw");
        let (server, client, prompt, services) = run(services, "mallory", ScriptedPrompt::new(&[])).await;

        assert!(matches!(
            server,
            Err(AuthError::Rejected {
                code: AuthorizationCode::NonexistentUser,
                ..
            })
        ));
        assert_eq!(client.unwrap_err().to_string(), "User 'mallory' is unknown");
        assert_eq!(prompt.asked, 0);
        assert_eq!(services.key_checks(), 0);
    }

    #[test]
    fn key_match_is_exact_per_line() {
        let line = "ssh-rsa AAAAB3Nza\n";
        assert!(key_is_listed(b"ssh-rsa OTHER\nssh-rsa AAAAB3Nza\n", line));
        assert!(key_is_listed(b"ssh-rsa AAAAB3Nza", line));
        assert!(key_is_listed(b"ssh-rsa AAAAB3Nza\r\n", line));
        assert!(!key_is_listed(b"ssh-rsa AAAAB3Nza comment\n", line));
        assert!(!key_is_listed(b"# ssh-rsa AAAAB3Nza\n", line));
        assert!(!key_is_listed(b"", line));
    }
}

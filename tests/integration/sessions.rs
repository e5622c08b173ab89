//! Authentication outcomes seen from both ends of a session.

use ucp_core::wire::AuthorizationCode;
use ucp_services::{AuthError, ProxyError, SessionError};

use crate::*;

fn download_request(local: &std::path::Path) -> Request<'_> {
    Request::Download {
        remote: "notes.txt",
        local,
    }
}

#[tokio::test]
async fn unknown_user_is_turned_away() {
    let scratch = tempfile::tempdir().unwrap();
    let accounts = TestAccounts::new().with_user("alice", scratch.path(), true, "pw");
    let mut prompt = Prompt::answering(&[]);
    let local = scratch.path().join("out");

    let outcome = run_session(
        &accounts,
        &NoHelper,
        &proxy_settings(scratch.path()),
        "mallory",
        &mut prompt,
        download_request(&local),
    )
    .await;

    assert!(matches!(
        outcome.server,
        Err(SessionError::Auth(AuthError::Rejected {
            code: AuthorizationCode::NonexistentUser,
            ..
        }))
    ));
    match outcome.client {
        Err(SessionError::Auth(AuthError::Rejected { description, .. })) => {
            assert_eq!(description, "User 'mallory' is unknown")
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(prompt.asked, 0);
}

#[tokio::test]
async fn listed_key_skips_the_password() {
    let scratch = tempfile::tempdir().unwrap();
    let accounts = TestAccounts::new().with_user("alice", scratch.path(), true, "pw");
    let mut prompt = Prompt::answering(&[]);
    let local = scratch.path().join("out");

    let outcome = run_session(
        &accounts,
        &NoHelper,
        &proxy_settings(scratch.path()),
        "alice",
        &mut prompt,
        download_request(&local),
    )
    .await;

    // Authorized, so the session got as far as starting the helper.
    assert!(matches!(outcome.server, Err(SessionError::Proxy(ProxyError::Spawn(_)))));
    assert!(matches!(outcome.client, Err(SessionError::Remote(_))));
    assert_eq!(prompt.asked, 0);
}

#[tokio::test]
async fn password_fallback_accepts_the_right_password() {
    let scratch = tempfile::tempdir().unwrap();
    let accounts = TestAccounts::new().with_user("erin", scratch.path(), false, "hunter2");
    let mut prompt = Prompt::answering(&["hunter2"]);
    let local = scratch.path().join("out");

    let outcome = run_session(
        &accounts,
        &NoHelper,
        &proxy_settings(scratch.path()),
        "erin",
        &mut prompt,
        download_request(&local),
    )
    .await;

    assert!(matches!(outcome.server, Err(SessionError::Proxy(_))));
    match outcome.client {
        Err(SessionError::Remote(message)) => assert!(message.contains("helpers disabled"), "{message}"),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(prompt.asked, 1);
}

#[tokio::test]
async fn wrong_password_is_rejected_after_one_prompt() {
    let scratch = tempfile::tempdir().unwrap();
    let accounts = TestAccounts::new().with_user("erin", scratch.path(), false, "hunter2");
    let mut prompt = Prompt::answering(&["letmein", "hunter2"]);

    let outcome = run_session(
        &accounts,
        &NoHelper,
        &proxy_settings(scratch.path()),
        "erin",
        &mut prompt,
        Request::Upload {
            data: b"payload",
            remote: "upload.txt",
        },
    )
    .await;

    assert!(matches!(
        outcome.server,
        Err(SessionError::Auth(AuthError::Rejected {
            code: AuthorizationCode::IncorrectPassword,
            ..
        }))
    ));
    assert_eq!(
        outcome.client.unwrap_err().to_string(),
        "authorization failed: Incorrect password for user 'erin'"
    );
    assert_eq!(prompt.asked, 1);
    assert!(!scratch.path().join("upload.txt").exists());
}

#[tokio::test]
async fn unreadable_prompt_ends_the_session() {
    let scratch = tempfile::tempdir().unwrap();
    let accounts = TestAccounts::new().with_user("erin", scratch.path(), false, "hunter2");
    let mut prompt = Prompt::answering(&[]);
    let local = scratch.path().join("out");

    let outcome = run_session(
        &accounts,
        &NoHelper,
        &proxy_settings(scratch.path()),
        "erin",
        &mut prompt,
        download_request(&local),
    )
    .await;

    assert!(matches!(outcome.client, Err(SessionError::Auth(AuthError::Prompt(_)))));
    assert!(outcome.server.is_err());
}

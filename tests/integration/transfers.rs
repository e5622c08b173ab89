//! Full transfers through the server, the proxy and a real helper process.

use ucp_services::SessionError;

use crate::*;

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

#[tokio::test]
async fn upload_lands_in_the_account_home() {
    let Some(helper) = real_helper() else { return };
    let home = tempfile::tempdir().unwrap();
    let sockets = tempfile::tempdir().unwrap();
    let accounts = TestAccounts::new().with_user("alice", home.path(), true, "pw");
    let data = pattern(250_000);
    let mut prompt = Prompt::answering(&[]);

    let outcome = run_session(
        &accounts,
        &helper,
        &proxy_settings(sockets.path()),
        "alice",
        &mut prompt,
        Request::Upload {
            data: &data,
            remote: "incoming.bin",
        },
    )
    .await;

    let sent = outcome.client.unwrap();
    let served = outcome.server.unwrap();
    assert_eq!(sent.chunks, 3);
    assert_eq!(sent.bytes, 250_000);
    assert_eq!(served.stats, sent);
    assert_eq!(served.user, "alice");
    assert_eq!(std::fs::read(home.path().join("incoming.bin")).unwrap(), data);
    assert!(std::fs::read_dir(sockets.path()).unwrap().next().is_none());
}

#[tokio::test]
async fn download_of_exact_multiple_sends_no_empty_chunk() {
    let Some(helper) = real_helper() else { return };
    let home = tempfile::tempdir().unwrap();
    let sockets = tempfile::tempdir().unwrap();
    let accounts = TestAccounts::new().with_user("alice", home.path(), true, "pw");
    let data = pattern(200_000);
    std::fs::write(home.path().join("exact.bin"), &data).unwrap();
    let local = home.path().join("copy.bin");
    let mut prompt = Prompt::answering(&[]);

    let outcome = run_session(
        &accounts,
        &helper,
        &proxy_settings(sockets.path()),
        "alice",
        &mut prompt,
        Request::Download {
            remote: "exact.bin",
            local: &local,
        },
    )
    .await;

    let received = outcome.client.unwrap();
    assert_eq!(received.chunks, 2);
    assert_eq!(outcome.server.unwrap().stats, received);
    assert_eq!(std::fs::read(&local).unwrap(), data);
}

#[tokio::test]
async fn empty_file_round_trips() {
    let Some(helper) = real_helper() else { return };
    let home = tempfile::tempdir().unwrap();
    let sockets = tempfile::tempdir().unwrap();
    let accounts = TestAccounts::new().with_user("alice", home.path(), true, "pw");
    std::fs::write(home.path().join("empty"), b"").unwrap();
    let local = home.path().join("empty.copy");
    let mut prompt = Prompt::answering(&[]);

    let outcome = run_session(
        &accounts,
        &helper,
        &proxy_settings(sockets.path()),
        "alice",
        &mut prompt,
        Request::Download {
            remote: "empty",
            local: &local,
        },
    )
    .await;

    let received = outcome.client.unwrap();
    assert_eq!(received.chunks, 0);
    assert_eq!(received.bytes, 0);
    assert!(outcome.server.is_ok());
    assert_eq!(std::fs::metadata(&local).unwrap().len(), 0);
}

#[tokio::test]
async fn missing_remote_file_is_reported() {
    let Some(helper) = real_helper() else { return };
    let home = tempfile::tempdir().unwrap();
    let sockets = tempfile::tempdir().unwrap();
    let accounts = TestAccounts::new().with_user("alice", home.path(), true, "pw");
    let local = home.path().join("never");
    let mut prompt = Prompt::answering(&[]);

    let outcome = run_session(
        &accounts,
        &helper,
        &proxy_settings(sockets.path()),
        "alice",
        &mut prompt,
        Request::Download {
            remote: "no-such-file",
            local: &local,
        },
    )
    .await;

    match outcome.client {
        Err(SessionError::Remote(message)) => assert!(message.contains("no-such-file"), "{message}"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(outcome.server.is_err());
    assert!(!local.exists());
}

#[tokio::test]
async fn unwritable_local_target_aborts_the_download() {
    let Some(helper) = real_helper() else { return };
    let home = tempfile::tempdir().unwrap();
    let sockets = tempfile::tempdir().unwrap();
    let accounts = TestAccounts::new().with_user("alice", home.path(), true, "pw");
    std::fs::write(home.path().join("report.txt"), b"quarterly numbers").unwrap();
    let local = home.path().join("missing-dir").join("report.txt");
    let mut prompt = Prompt::answering(&[]);

    let outcome = run_session(
        &accounts,
        &helper,
        &proxy_settings(sockets.path()),
        "alice",
        &mut prompt,
        Request::Download {
            remote: "report.txt",
            local: &local,
        },
    )
    .await;

    assert!(matches!(outcome.client, Err(SessionError::Local(..))));
    assert!(outcome.server.is_err());
}

#[tokio::test]
async fn upload_into_missing_directory_is_refused() {
    let Some(helper) = real_helper() else { return };
    let home = tempfile::tempdir().unwrap();
    let sockets = tempfile::tempdir().unwrap();
    let accounts = TestAccounts::new().with_user("alice", home.path(), true, "pw");
    let mut prompt = Prompt::answering(&[]);

    let outcome = run_session(
        &accounts,
        &helper,
        &proxy_settings(sockets.path()),
        "alice",
        &mut prompt,
        Request::Upload {
            data: b"will not arrive",
            remote: "nested/dir/file.txt",
        },
    )
    .await;

    assert!(matches!(outcome.client, Err(SessionError::Remote(_))));
    assert!(outcome.server.is_err());
    assert!(!home.path().join("nested").exists());
}

//! Integration tests for the push flow.
//!
//! These drive the public client API over the in-memory transport and check
//! the exact bytes a remote `scp -t` receiver would see.

use anyhow::Result;
use tokio_test::io::Builder;

use scp_push::client::Client;
use scp_push::config::Endpoint;
use scp_push::scp::{FailureCause, PushOptions, TransferFailure, TransferStage, WriteErrorPolicy};
use scp_push::transport::memory::{MemoryTransport, RemoteBehavior};
use scp_push::transport::RemoteExit;

async fn connected(transport: &MemoryTransport) -> Result<Client<MemoryTransport>> {
    let mut client = Client::with_transport(Endpoint::default(), transport.clone());
    client.connect().await?;
    Ok(client)
}

/// Push "hello" to /tmp/out.txt against a receiver that exits 0
#[tokio::test]
async fn test_push_hello_success() -> Result<()> {
    let transport = MemoryTransport::new();
    let mut client = connected(&transport).await?;

    client.copy(&b"hello"[..], "/tmp/out.txt", "0644", 5).await?;

    let record = transport.last_session().unwrap();
    assert_eq!(record.command.as_deref(), Some("scp -t /tmp"));
    assert_eq!(record.written, b"C0644 5 out.txt\nhello\x00\n");
    assert_eq!(record.wait_calls, 1);
    Ok(())
}

/// Same push against a receiver that exits 1: everything is still written
#[tokio::test]
async fn test_push_hello_remote_exit_failure() -> Result<()> {
    let transport = MemoryTransport::new().with_behavior(RemoteBehavior::exit(1));
    let mut client = connected(&transport).await?;

    let err = client
        .copy(&b"hello"[..], "/tmp/out.txt", "0644", 5)
        .await
        .unwrap_err();

    assert_eq!(err.downcast_ref::<RemoteExit>().map(|e| e.status), Some(1));
    let record = transport.last_session().unwrap();
    assert_eq!(record.written, b"C0644 5 out.txt\nhello\x00\n");
    assert_eq!(record.wait_calls, 1);
    Ok(())
}

/// Spaces in the directory are quoted for the shell, not in the header
#[tokio::test]
async fn test_push_path_with_spaces() -> Result<()> {
    let transport = MemoryTransport::new();
    let mut client = connected(&transport).await?;

    client
        .copy(&b"data"[..], "/var/my data/my file.txt", "0644", 4)
        .await?;
    client
        .copy(&b"data"[..], "/var/data/my file.txt", "0644", 4)
        .await?;

    let sessions = transport.sessions();
    assert_eq!(sessions[0].command.as_deref(), Some("scp -t '/var/my data'"));
    assert_eq!(sessions[1].command.as_deref(), Some("scp -t /var/data"));
    assert!(sessions[1].written.starts_with(b"C0644 4 my file.txt\n"));
    Ok(())
}

/// An empty unsized source still produces a header and a terminator
#[tokio::test]
async fn test_push_empty_unsized_source() -> Result<()> {
    let transport = MemoryTransport::new();
    let mut client = connected(&transport).await?;

    client
        .copy_stream(Builder::new().build(), "/tmp/empty", "0644")
        .await?;

    let record = transport.last_session().unwrap();
    assert_eq!(record.written, b"C0644 0 empty\n\x00\n");
    assert_eq!(record.wait_calls, 1);
    Ok(())
}

/// The unsized adapter declares the measured length however reads arrive
#[tokio::test]
async fn test_push_unsized_source_in_small_reads() -> Result<()> {
    let transport = MemoryTransport::new();
    let mut client = connected(&transport).await?;

    let reader = Builder::new()
        .read(b"a")
        .read(b"bc")
        .read(b"def")
        .read(b"ghij")
        .build();
    client.copy_stream(reader, "notes.txt", "0600").await?;

    let record = transport.last_session().unwrap();
    assert_eq!(record.command.as_deref(), Some("scp -t ."));
    assert_eq!(record.written, b"C0600 10 notes.txt\nabcdefghij\x00\n");
    Ok(())
}

/// A remote that exits before reading is still waited on exactly once
#[tokio::test]
async fn test_push_remote_exits_early() -> Result<()> {
    let transport = MemoryTransport::new().with_behavior(RemoteBehavior::exit_early(1));
    let mut client = connected(&transport).await?;

    let err = client
        .copy(&b"hello"[..], "/tmp/out.txt", "0644", 5)
        .await
        .unwrap_err();

    let failure = err.downcast_ref::<TransferFailure>().unwrap();
    assert_eq!(failure.stage, TransferStage::WriteHeader);
    assert_eq!(failure.cause, FailureCause::Local);
    assert_eq!(transport.last_session().unwrap().wait_calls, 1);
    Ok(())
}

/// Under best effort the remote exit status decides the outcome
#[tokio::test]
async fn test_best_effort_reports_remote_status() -> Result<()> {
    let transport = MemoryTransport::new().with_behavior(RemoteBehavior::exit_early(1));
    let mut client = connected(&transport).await?.with_options(PushOptions {
        write_errors: WriteErrorPolicy::BestEffort,
        ..Default::default()
    });

    let err = client
        .copy(&b"hello"[..], "/tmp/out.txt", "0644", 5)
        .await
        .unwrap_err();

    assert_eq!(
        err.downcast_ref::<TransferFailure>().map(|f| f.cause),
        Some(FailureCause::Remote)
    );
    assert_eq!(transport.last_session().unwrap().wait_calls, 1);
    Ok(())
}

/// A missing remote `scp` binary surfaces as a start failure
#[tokio::test]
async fn test_push_receiver_missing() -> Result<()> {
    let transport = MemoryTransport::new().with_behavior(RemoteBehavior::fail_start("scp: not found"));
    let mut client = connected(&transport).await?;

    let err = client
        .copy(&b"hello"[..], "/tmp/out.txt", "0644", 5)
        .await
        .unwrap_err();

    assert_eq!(
        err.downcast_ref::<TransferFailure>().map(|f| f.stage),
        Some(TransferStage::StartCommand)
    );
    let record = transport.last_session().unwrap();
    assert!(record.input_closed);
    assert_eq!(record.wait_calls, 0);
    Ok(())
}

/// Input stream acquisition failure stops before the command starts
#[tokio::test]
async fn test_push_input_unavailable() -> Result<()> {
    let transport = MemoryTransport::new().with_behavior(RemoteBehavior::fail_input("no stdin"));
    let mut client = connected(&transport).await?;

    let err = client
        .copy(&b"hello"[..], "/tmp/out.txt", "0644", 5)
        .await
        .unwrap_err();

    assert_eq!(err.root_cause().to_string(), "no stdin");
    assert!(transport.last_session().unwrap().command.is_none());
    Ok(())
}

#[tokio::test]
async fn test_invalid_remote_path_opens_no_session() -> Result<()> {
    let transport = MemoryTransport::new();
    let mut client = connected(&transport).await?;

    assert!(client.copy(&b""[..], "/tmp/dir/", "0644", 0).await.is_err());
    assert!(transport.sessions().is_empty());
    Ok(())
}

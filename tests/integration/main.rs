//! Satchel integration test harness.
//!
//! Each test runs the real receive loop on a loopback socket with its own
//! temporary mailbox root, then drives it with raw datagrams the way the
//! original client did. UDP on loopback is dependable enough for these
//! exchanges; anything racing the server's side effects polls instead of
//! assuming ordering.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;

use satchel_core::wire::{self, Frame};
use satchel_services::{Dispatcher, FsMailbox, MailboxStore, Reassembler, SessionRegistry};

mod transfers;

// ── Harness ───────────────────────────────────────────────────────────────────

pub struct TestServer {
    pub addr: SocketAddr,
    pub root: PathBuf,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

/// Spawn an in-process daemon loop on 127.0.0.1 with a fresh mailbox root.
pub async fn spawn_server(tag: &str) -> Result<TestServer> {
    let root = std::env::temp_dir().join(format!("satchel-it-{tag}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&root);

    let store: Arc<dyn MailboxStore> = Arc::new(FsMailbox::new(root.clone())?);
    let reassembler = Arc::new(Reassembler::new(
        store.clone(),
        Duration::from_secs(300),
        8192,
    ));
    let dispatcher = Dispatcher::new(store, reassembler, SessionRegistry::new());

    let socket = UdpSocket::bind("127.0.0.1:0").await?;
    let addr = socket.local_addr()?;

    let task = tokio::spawn(async move {
        let mut buf = vec![0u8; wire::MAX_DATAGRAM];
        loop {
            let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                return;
            };
            if let Some(reply) = dispatcher.handle(&buf[..len], peer) {
                let _ = socket.send_to(&reply, peer).await;
            }
        }
    });

    Ok(TestServer { addr, root, task })
}

/// Send one frame and wait for the reply datagram.
pub async fn exchange(server: &TestServer, frame: &Frame) -> Result<Vec<u8>> {
    let socket = UdpSocket::bind("127.0.0.1:0").await?;
    socket.send_to(&frame.encode()?, server.addr).await?;
    recv_reply(&socket).await
}

/// Send one frame that expects no reply.
pub async fn fire(server: &TestServer, frame: &Frame) -> Result<()> {
    let socket = UdpSocket::bind("127.0.0.1:0").await?;
    socket.send_to(&frame.encode()?, server.addr).await?;
    Ok(())
}

/// Send pre-encoded bytes that expect no reply.
pub async fn fire_raw(server: &TestServer, raw: &[u8]) -> Result<()> {
    let socket = UdpSocket::bind("127.0.0.1:0").await?;
    socket.send_to(raw, server.addr).await?;
    Ok(())
}

pub async fn recv_reply(socket: &UdpSocket) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; 65536];
    let (len, _) = tokio::time::timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .context("timed out waiting for reply")??;
    buf.truncate(len);
    Ok(buf)
}

pub async fn create_account(server: &TestServer, account: &str) -> Result<Vec<u8>> {
    exchange(
        server,
        &Frame::CreateAccount {
            account: account.to_string(),
        },
    )
    .await
}

/// Download, retrying while the server may still be assembling.
pub async fn download_until(
    server: &TestServer,
    account: &str,
    file_name: &str,
    expected: &[u8],
) -> Result<()> {
    let frame = Frame::Download {
        account: account.to_string(),
        file_name: file_name.to_string(),
    };
    let mut last = Vec::new();
    for _ in 0..20 {
        last = exchange(server, &frame).await?;
        if last == expected {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    anyhow::bail!(
        "download never matched: got {} bytes, wanted {}",
        last.len(),
        expected.len()
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_account_round_trip() -> Result<()> {
    let server = spawn_server("create").await?;

    let reply = create_account(&server, "alice").await?;
    assert_eq!(reply, b"Account created successfully!");

    let reply = create_account(&server, "alice").await?;
    assert_eq!(reply, b"Account already exists!");
    Ok(())
}

#[tokio::test]
async fn login_lists_mailbox_comma_joined() -> Result<()> {
    let server = spawn_server("login").await?;
    create_account(&server, "carol").await?;

    // Two emails from different senders create two mailbox files next to
    // the welcome file.
    fire(
        &server,
        &Frame::SendEmail {
            from: "alice".into(),
            to: "carol".into(),
            body: "hi".into(),
        },
    )
    .await?;
    fire(
        &server,
        &Frame::SendEmail {
            from: "bob".into(),
            to: "carol".into(),
            body: "hello".into(),
        },
    )
    .await?;

    let expected = b"email_from_alice.txt,email_from_bob.txt,new_email.txt".to_vec();
    let frame = Frame::Login {
        account: "carol".into(),
    };
    let mut reply = Vec::new();
    for _ in 0..20 {
        reply = exchange(&server, &frame).await?;
        if reply == expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(String::from_utf8_lossy(&reply), String::from_utf8_lossy(&expected));

    let reply = exchange(
        &server,
        &Frame::Login {
            account: "nobody".into(),
        },
    )
    .await?;
    assert_eq!(reply, b"Account not found!");
    Ok(())
}

#[tokio::test]
async fn email_body_with_delimiters_survives() -> Result<()> {
    let server = spawn_server("colons").await?;
    create_account(&server, "bob").await?;

    fire(
        &server,
        &Frame::SendEmail {
            from: "alice".into(),
            to: "bob".into(),
            body: "meet at 10:30 in room B:2".into(),
        },
    )
    .await?;

    let path = server.root.join("bob").join("email_from_alice.txt");
    for _ in 0..20 {
        if path.is_file() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let record = std::fs::read_to_string(&path)?;
    assert!(
        record.contains("meet at 10:30 in room B:2"),
        "record: {record:?}"
    );
    Ok(())
}

#[tokio::test]
async fn email_to_unknown_account_leaves_no_trace() -> Result<()> {
    let server = spawn_server("ghost").await?;

    fire(
        &server,
        &Frame::SendEmail {
            from: "alice".into(),
            to: "ghost".into(),
            body: "hello".into(),
        },
    )
    .await?;

    // Give the server time to process, then confirm nothing appeared.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!server.root.join("ghost").exists());
    Ok(())
}

#[tokio::test]
async fn unknown_command_gets_stock_reply() -> Result<()> {
    let server = spawn_server("unknown").await?;
    let socket = UdpSocket::bind("127.0.0.1:0").await?;
    socket.send_to(b"MAKE_COFFEE:now", server.addr).await?;
    assert_eq!(recv_reply(&socket).await?, b"Unknown command");
    Ok(())
}

#[tokio::test]
async fn download_round_trip() -> Result<()> {
    let server = spawn_server("download").await?;
    create_account(&server, "alice").await?;

    let data: Vec<u8> = (0..700u32).map(|i| (i % 256) as u8).collect();
    std::fs::write(server.root.join("alice").join("blob.bin"), &data)?;

    let reply = exchange(
        &server,
        &Frame::Download {
            account: "alice".into(),
            file_name: "blob.bin".into(),
        },
    )
    .await?;
    assert_eq!(reply, data);

    let reply = exchange(
        &server,
        &Frame::Download {
            account: "alice".into(),
            file_name: "missing.bin".into(),
        },
    )
    .await?;
    assert_eq!(reply, b"File not found!");
    Ok(())
}

//! satchel-ctl — command-line client for the Satchel daemon.
//!
//! Each invocation is one best-effort exchange: CONNECT, the command,
//! DISCONNECT. The transport gives no delivery guarantee, so replies are
//! awaited with a timeout and a lost datagram surfaces as an error rather
//! than a retry.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::net::UdpSocket;

use satchel_core::wire::{self, Frame, DEFAULT_PORT, MAX_DATAGRAM};

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Largest reply we accept; file downloads arrive as one datagram.
const REPLY_BUFFER: usize = 65536;

fn server_addr() -> String {
    std::env::var("SATCHEL_SERVER").unwrap_or_else(|_| format!("127.0.0.1:{DEFAULT_PORT}"))
}

// ── Wire helpers ──────────────────────────────────────────────────────────────

struct Client {
    socket: UdpSocket,
}

impl Client {
    async fn connect() -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        let addr = server_addr();
        socket
            .connect(&addr)
            .await
            .with_context(|| format!("failed to reach satcheld at {addr}"))?;
        let client = Self { socket };
        client.send(&Frame::Connect).await?;
        Ok(client)
    }

    async fn send(&self, frame: &Frame) -> Result<()> {
        self.socket.send(&frame.encode()?).await?;
        Ok(())
    }

    async fn send_raw(&self, bytes: &[u8]) -> Result<()> {
        self.socket.send(bytes).await?;
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; REPLY_BUFFER];
        let len = tokio::time::timeout(REPLY_TIMEOUT, self.socket.recv(&mut buf))
            .await
            .context("no reply from server (datagram lost?)")??;
        buf.truncate(len);
        Ok(buf)
    }

    async fn disconnect(self) -> Result<()> {
        self.send(&Frame::Disconnect).await
    }
}

// ── Subcommand handlers ───────────────────────────────────────────────────────

async fn create_account(args: &[String]) -> Result<()> {
    let [account] = args else {
        bail!("usage: satchel-ctl create-account <account>");
    };
    let client = Client::connect().await?;
    client
        .send(&Frame::CreateAccount {
            account: account.clone(),
        })
        .await?;
    let reply = client.recv().await?;
    println!("{}", String::from_utf8_lossy(&reply));
    client.disconnect().await
}

async fn send(args: &[String]) -> Result<()> {
    let [from, to, body @ ..] = args else {
        bail!("usage: satchel-ctl send <from> <to> <body...>");
    };
    if body.is_empty() {
        bail!("usage: satchel-ctl send <from> <to> <body...>");
    }
    let client = Client::connect().await?;
    client
        .send(&Frame::SendEmail {
            from: from.clone(),
            to: to.clone(),
            body: body.join(" "),
        })
        .await?;
    println!("Email sent to {to} (best effort, no acknowledgment)");
    client.disconnect().await
}

async fn send_file(args: &[String]) -> Result<()> {
    let [from, to, path, body @ ..] = args else {
        bail!("usage: satchel-ctl send-file <from> <to> <path> [body...]");
    };
    let data =
        std::fs::read(path).with_context(|| format!("failed to read file: {path}"))?;
    let file_name = std::path::Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .context("file has no usable name")?;
    let body = if body.is_empty() {
        "No content".to_string()
    } else {
        body.join(" ")
    };

    let frames =
        wire::attachment_frames(from, to, &body, file_name, &data, MAX_DATAGRAM)?;

    let client = Client::connect().await?;
    for frame in &frames {
        client.send_raw(frame).await?;
    }
    println!(
        "Sent {} ({} bytes) to {to} in {} chunk(s)",
        file_name,
        data.len(),
        frames.len()
    );
    client.disconnect().await
}

async fn inbox(args: &[String]) -> Result<()> {
    let [account] = args else {
        bail!("usage: satchel-ctl inbox <account>");
    };
    let client = Client::connect().await?;
    client
        .send(&Frame::Login {
            account: account.clone(),
        })
        .await?;
    let reply = client.recv().await?;
    let listing = String::from_utf8_lossy(&reply);
    if listing == "Account not found!" {
        bail!("account not found: {account}");
    }
    println!("Files in {account}:");
    for name in listing.split(',').filter(|n| !n.is_empty()) {
        println!("  {name}");
    }
    client.disconnect().await
}

async fn fetch(args: &[String]) -> Result<()> {
    let (account, file_name, out_path) = match args {
        [account, file_name] => (account, file_name, file_name.clone()),
        [account, file_name, out] => (account, file_name, out.clone()),
        _ => bail!("usage: satchel-ctl fetch <account> <file> [out-path]"),
    };
    let client = Client::connect().await?;
    client
        .send(&Frame::Download {
            account: account.clone(),
            file_name: file_name.clone(),
        })
        .await?;
    let reply = client.recv().await?;
    if reply == b"File not found!" {
        bail!("file not found: {file_name}");
    }
    std::fs::write(&out_path, &reply)
        .with_context(|| format!("failed to write {out_path}"))?;
    println!("Saved {} bytes to {out_path}", reply.len());
    client.disconnect().await
}

fn usage() {
    eprintln!(
        "satchel-ctl — talk to a satcheld server (set SATCHEL_SERVER, default 127.0.0.1:{DEFAULT_PORT})

usage:
  satchel-ctl create-account <account>
  satchel-ctl send <from> <to> <body...>
  satchel-ctl send-file <from> <to> <path> [body...]
  satchel-ctl inbox <account>
  satchel-ctl fetch <account> <file> [out-path]"
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("create-account") => create_account(&args[1..]).await,
        Some("send") => send(&args[1..]).await,
        Some("send-file") => send_file(&args[1..]).await,
        Some("inbox") => inbox(&args[1..]).await,
        Some("fetch") => fetch(&args[1..]).await,
        _ => {
            usage();
            std::process::exit(2);
        }
    }
}
